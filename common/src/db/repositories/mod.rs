// Repository layer for database operations

pub mod merchant;
pub mod queries;

pub use merchant::{MerchantFilter, MerchantRepository};
