// Broker client module

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::BrokerLoadTestError;

pub mod ws;

/// Client type sent in every association request.
pub const CONNECTION_TEST_CLIENT_TYPE: &str = "agent";

pub const ASSOCIATE_REQUEST_TYPE: &str = "associate_request";
pub const ASSOCIATE_RESPONSE_TYPE: &str = "associate_response";

/// Timings of the transport establishment phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionTimings {
    pub tcp: Duration,
    pub opening_handshake: Duration,
}

/// Timings of the association exchange and the session that follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationTimings {
    pub association: Duration,
    pub session: Duration,
}

/// One simulated protocol participant.
///
/// Exactly one owner at any time: the orchestrator builds the client,
/// a single Connection Task drives it for the run, and afterwards
/// either the teardown or the Keep Alive Task closes it.
pub trait BrokerClient: Send {
    /// Establish transport and associate, retrying up to `attempt_budget`
    /// times. Transport problems surface as `ConnectionError`.
    fn connect(&mut self, attempt_budget: u8) -> Result<(), BrokerLoadTestError>;

    /// Whether the broker session is currently associated.
    fn is_associated(&self) -> bool;

    /// Keep-alive ping. Failures surface as `ClientError`.
    fn ping(&mut self) -> Result<(), BrokerLoadTestError>;

    fn connection_timings(&self) -> ConnectionTimings;

    fn association_timings(&self) -> AssociationTimings;

    /// Close the connection, completing the close handshake.
    fn close(&mut self) -> Result<(), BrokerLoadTestError>;

    fn name(&self) -> &str;
}

/// Builds concrete clients; injectable so the orchestrator can be
/// exercised without a broker.
pub type ClientFactory = Box<dyn Fn(ClientConfig) -> Box<dyn BrokerClient> + Send + Sync>;

/// Factory for the blocking WebSocket client.
pub fn ws_client_factory() -> ClientFactory {
    Box::new(|config| Box::new(ws::WsClient::new(config)))
}

/// Per-client configuration, shared by every client of a run apart
/// from the common name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub common_name: String,
    pub client_type: String,
    pub broker_uris: Vec<String>,
    pub identity_dir: Option<PathBuf>,
    pub connection_timeout: Duration,
    pub association_timeout: Duration,
    pub association_request_ttl: Duration,
}

impl ClientConfig {
    pub fn from_config(config: &Config, common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            client_type: CONNECTION_TEST_CLIENT_TYPE.to_string(),
            broker_uris: config.broker_uris.clone(),
            identity_dir: config.identity_dir.as_ref().map(PathBuf::from),
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            association_timeout: Duration::from_secs(config.association_timeout_s),
            association_request_ttl: Duration::from_secs(config.association_request_ttl_s),
        }
    }
}

/// Association request, sent as a JSON text frame right after the
/// WebSocket opening handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssociateRequest {
    pub message_type: String,
    pub sender: String,
    pub client_type: String,
    pub ttl_s: u64,
}

impl AssociateRequest {
    pub fn new(sender: &str, client_type: &str, ttl: Duration) -> Self {
        Self {
            message_type: ASSOCIATE_REQUEST_TYPE.to_string(),
            sender: sender.to_string(),
            client_type: client_type.to_string(),
            ttl_s: ttl.as_secs(),
        }
    }
}

/// Association response from the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssociateResponse {
    pub message_type: String,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AssociateResponse {
    pub fn success() -> Self {
        Self {
            message_type: ASSOCIATE_RESPONSE_TYPE.to_string(),
            success: true,
            reason: None,
        }
    }

    pub fn denied(reason: &str) -> Self {
        Self {
            message_type: ASSOCIATE_RESPONSE_TYPE.to_string(),
            success: false,
            reason: Some(reason.to_string()),
        }
    }
}
