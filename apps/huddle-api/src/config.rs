/// Coordinator configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset the in-memory record store is used.
    pub database_url: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Heartbeat interval advertised to gateway clients (ms).
    pub heartbeat_interval_ms: u64,
    /// Upper bound on message content length, in characters.
    pub max_message_length: usize,
    /// Attempts per record for best-effort multi-record updates and bus persistence.
    pub persist_retries: u32,
    /// Queue depth of the in-process event bus.
    pub bus_capacity: usize,
    /// Snowflake worker ID for message IDs.
    pub worker_id: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: 4002,
            heartbeat_interval_ms: 41_250,
            max_message_length: 4000,
            persist_retries: 3,
            bus_capacity: 1024,
            worker_id: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            port: parsed_var("PORT").unwrap_or(defaults.port),
            heartbeat_interval_ms: parsed_var("HEARTBEAT_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.heartbeat_interval_ms),
            max_message_length: parsed_var("MAX_MESSAGE_LENGTH")
                .unwrap_or(defaults.max_message_length),
            persist_retries: parsed_var("PERSIST_RETRIES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.persist_retries),
            bus_capacity: parsed_var("BUS_CAPACITY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.bus_capacity),
            worker_id: parsed_var("WORKER_ID").unwrap_or(defaults.worker_id),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring malformed config value");
            None
        }
    }
}
