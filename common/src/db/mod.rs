// Database layer: pool lifecycle manager, driver seam and repositories

pub mod manager;
pub mod pool;
pub mod repositories;

pub use manager::{PoolHandle, PoolManager, PoolState, PoolStatus};
pub use pool::{PgConnector, PoolConnector};

/// Pool manager over the PostgreSQL driver, as shared by the API
pub type PgPoolManager = PoolManager<PgConnector>;
