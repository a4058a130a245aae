// Shared library for the payment gateway back office

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod retry;
pub mod telemetry;
