pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use bus::EventBus;
use config::Config;
use db::store::RecordStore;
use gateway::active::ActiveMeetingRegistry;
use gateway::connections::ConnectionRegistry;
use gateway::fanout::GatewayBroadcast;
use gateway::meetings::MeetingSessionRegistry;
use gateway::presence::PresenceRegistry;
use huddle_common::SnowflakeGenerator;

/// Shared application state available to route handlers and gateway connections.
///
/// The registries are process-local. Only the gateway dispatcher calls their
/// mutating methods; REST handlers read them.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub bus: Arc<dyn EventBus>,
    pub config: Arc<Config>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub broadcast: Arc<GatewayBroadcast>,
    pub connections: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceRegistry>,
    pub meetings: Arc<MeetingSessionRegistry>,
    pub active_meetings: Arc<ActiveMeetingRegistry>,
}

impl AppState {
    /// Build state around the given collaborators with empty registries.
    pub fn new(config: Config, store: Arc<dyn RecordStore>, bus: Arc<dyn EventBus>) -> Self {
        let snowflake = Arc::new(SnowflakeGenerator::new(config.worker_id));
        Self {
            store,
            bus,
            config: Arc::new(config),
            snowflake,
            broadcast: Arc::new(GatewayBroadcast::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            presence: Arc::new(PresenceRegistry::new()),
            meetings: Arc::new(MeetingSessionRegistry::new()),
            active_meetings: Arc::new(ActiveMeetingRegistry::new()),
        }
    }
}
