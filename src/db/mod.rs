//! Database layer: pool, repositories and the `ChatStore` seam over PostgreSQL.

mod pool;
mod repositories;
mod store;

pub use pool::{create_pool, DbPool};
pub use repositories::*;
pub use store::{ChatStore, PgChatStore};
