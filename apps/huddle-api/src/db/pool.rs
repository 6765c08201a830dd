use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::error::ApiError;

pub type DbPool = Pool<AsyncPgConnection>;

/// Create a Diesel async connection pool.
///
/// Connections are opened lazily, so an unreachable database surfaces on the
/// first store call rather than here.
pub fn connect(database_url: &str) -> Result<DbPool, ApiError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager).max_size(20).build().map_err(|err| {
        tracing::error!(?err, "failed to build connection pool");
        ApiError::internal("Failed to build connection pool")
    })?;

    tracing::info!("database pool created");

    Ok(pool)
}
