mod schema;
pub mod from_row;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::payments::PaymentProvider;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
///
/// The payment provider is an injected capability (not a global) so tests
/// can substitute a deterministic double.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub provider: Arc<dyn PaymentProvider>,
    /// Base URL for building provider redirect targets.
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub admin_api_key: String,
    pub checkout_ttl_secs: i64,
    pub refund_window_days: i64,
    pub suspend_on_dispute: bool,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
