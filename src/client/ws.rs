// Blocking WebSocket broker client
//
// Plain ws:// only; wss would need a TLS stream wrapper around the
// TcpStream before the handshake.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;
use tungstenite::client::client;
use tungstenite::http::Uri;
use tungstenite::protocol::WebSocket;
use tungstenite::Error as WsError;
use tungstenite::Message;

use crate::client::{
    AssociateRequest, AssociateResponse, AssociationTimings, BrokerClient, ClientConfig,
    ConnectionTimings, ASSOCIATE_RESPONSE_TYPE,
};
use crate::error::BrokerLoadTestError;

/// Frames tolerated while waiting for a specific reply before giving up.
const MAX_INTERLEAVED_FRAMES: usize = 8;

/// Synchronous client for one broker connection, measuring each
/// establishment phase as it goes.
pub struct WsClient {
    config: ClientConfig,
    ws: Option<WebSocket<TcpStream>>,
    attempts: usize,
    associated: bool,
    tcp_interval: Duration,
    handshake_interval: Duration,
    association_interval: Duration,
    associated_at: Option<Instant>,
    closed_at: Option<Instant>,
}

impl WsClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            ws: None,
            attempts: 0,
            associated: false,
            tcp_interval: Duration::ZERO,
            handshake_interval: Duration::ZERO,
            association_interval: Duration::ZERO,
            associated_at: None,
            closed_at: None,
        }
    }

    fn connection_error(context: &str, detail: impl std::fmt::Display) -> BrokerLoadTestError {
        BrokerLoadTestError::ConnectionError(format!("{}: {}", context, detail))
    }

    /// One full connection attempt: TCP, WebSocket opening handshake,
    /// association exchange.
    fn try_connect(&mut self) -> Result<(), BrokerLoadTestError> {
        if self.config.broker_uris.is_empty() {
            return Err(BrokerLoadTestError::ConnectionError(
                "no broker URIs configured".to_string(),
            ));
        }
        let uri_str = self.config.broker_uris[self.attempts % self.config.broker_uris.len()].clone();
        self.attempts += 1;

        let uri: Uri = uri_str
            .parse()
            .map_err(|e| Self::connection_error("invalid broker URI", e))?;
        match uri.scheme_str() {
            Some("ws") => {}
            Some(other) => {
                return Err(BrokerLoadTestError::ConnectionError(format!(
                    "unsupported URI scheme '{}' in {}",
                    other, uri_str
                )));
            }
            None => {
                return Err(BrokerLoadTestError::ConnectionError(format!(
                    "broker URI {} has no scheme",
                    uri_str
                )));
            }
        }
        let host = uri
            .host()
            .ok_or_else(|| {
                BrokerLoadTestError::ConnectionError(format!("broker URI {} has no host", uri_str))
            })?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| Self::connection_error("failed to resolve broker address", e))?
            .next()
            .ok_or_else(|| {
                BrokerLoadTestError::ConnectionError(format!(
                    "no address found for {}:{}",
                    host, port
                ))
            })?;

        let tcp_start = Instant::now();
        let stream = TcpStream::connect_timeout(&addr, self.config.connection_timeout)
            .map_err(|e| Self::connection_error("TCP connect failed", e))?;
        self.tcp_interval = tcp_start.elapsed();

        stream
            .set_nodelay(true)
            .map_err(|e| Self::connection_error("failed to set TCP_NODELAY", e))?;
        stream
            .set_read_timeout(Some(self.config.connection_timeout))
            .map_err(|e| Self::connection_error("failed to set read timeout", e))?;
        stream
            .set_write_timeout(Some(self.config.connection_timeout))
            .map_err(|e| Self::connection_error("failed to set write timeout", e))?;

        let handshake_start = Instant::now();
        let (ws, _response) = client(uri_str.as_str(), stream)
            .map_err(|e| Self::connection_error("WebSocket handshake failed", e))?;
        self.handshake_interval = handshake_start.elapsed();
        self.ws = Some(ws);

        self.associate()?;

        debug!(
            client = %self.config.common_name,
            tcp_us = self.tcp_interval.as_micros() as u64,
            handshake_us = self.handshake_interval.as_micros() as u64,
            association_ms = self.association_interval.as_millis() as u64,
            "connected and associated"
        );
        Ok(())
    }

    /// Association request/response exchange over the open WebSocket.
    fn associate(&mut self) -> Result<(), BrokerLoadTestError> {
        let association_timeout = self.config.association_timeout;
        let request = AssociateRequest::new(
            &self.config.common_name,
            &self.config.client_type,
            self.config.association_request_ttl,
        );
        let payload = serde_json::to_string(&request)
            .map_err(|e| Self::connection_error("failed to encode association request", e))?;

        let ws = self.ws.as_mut().ok_or_else(|| {
            BrokerLoadTestError::ConnectionError("not connected".to_string())
        })?;
        ws.get_ref()
            .set_read_timeout(Some(association_timeout))
            .map_err(|e| Self::connection_error("failed to set association deadline", e))?;

        let association_start = Instant::now();
        ws.send(Message::Text(payload))
            .map_err(|e| Self::connection_error("failed to send association request", e))?;

        for _ in 0..MAX_INTERLEAVED_FRAMES {
            let message = ws
                .read()
                .map_err(|e| Self::connection_error("association response not received", e))?;
            let text = match message {
                Message::Text(text) => text,
                // Control frames may interleave; keep waiting
                _ => continue,
            };
            let response: AssociateResponse = serde_json::from_str(&text)
                .map_err(|e| Self::connection_error("malformed association response", e))?;
            if response.message_type != ASSOCIATE_RESPONSE_TYPE {
                return Err(BrokerLoadTestError::ConnectionError(format!(
                    "unexpected message type '{}' during association",
                    response.message_type
                )));
            }
            if !response.success {
                return Err(BrokerLoadTestError::ConnectionError(format!(
                    "association denied: {}",
                    response.reason.unwrap_or_else(|| "no reason given".to_string())
                )));
            }
            self.association_interval = association_start.elapsed();
            self.associated_at = Some(Instant::now());
            self.associated = true;
            return Ok(());
        }

        Err(BrokerLoadTestError::ConnectionError(
            "association response not received".to_string(),
        ))
    }
}

impl BrokerClient for WsClient {
    fn connect(&mut self, attempt_budget: u8) -> Result<(), BrokerLoadTestError> {
        let budget = attempt_budget.max(1);
        let mut result = self.try_connect();
        for _ in 1..budget {
            if result.is_ok() {
                break;
            }
            result = self.try_connect();
        }
        result
    }

    fn is_associated(&self) -> bool {
        self.associated
    }

    fn ping(&mut self) -> Result<(), BrokerLoadTestError> {
        let connection_timeout = self.config.connection_timeout;
        let ws = self.ws.as_mut().ok_or_else(|| {
            BrokerLoadTestError::ClientError("not connected".to_string())
        })?;
        ws.get_ref()
            .set_read_timeout(Some(connection_timeout))
            .map_err(|e| BrokerLoadTestError::ClientError(format!("ping setup failed: {}", e)))?;

        if let Err(e) = ws.send(Message::Ping(Vec::new())) {
            self.associated = false;
            return Err(BrokerLoadTestError::ClientError(format!(
                "ping send failed: {}",
                e
            )));
        }

        for _ in 0..MAX_INTERLEAVED_FRAMES {
            match ws.read() {
                Ok(Message::Pong(_)) => return Ok(()),
                Ok(_) => continue,
                Err(e) => {
                    self.associated = false;
                    return Err(BrokerLoadTestError::ClientError(format!(
                        "pong not received: {}",
                        e
                    )));
                }
            }
        }
        self.associated = false;
        Err(BrokerLoadTestError::ClientError(
            "pong not received".to_string(),
        ))
    }

    fn connection_timings(&self) -> ConnectionTimings {
        ConnectionTimings {
            tcp: self.tcp_interval,
            opening_handshake: self.handshake_interval,
        }
    }

    fn association_timings(&self) -> AssociationTimings {
        let session = match self.associated_at {
            Some(associated_at) => self
                .closed_at
                .unwrap_or_else(Instant::now)
                .duration_since(associated_at),
            None => Duration::ZERO,
        };
        AssociationTimings {
            association: self.association_interval,
            session,
        }
    }

    fn close(&mut self) -> Result<(), BrokerLoadTestError> {
        let Some(mut ws) = self.ws.take() else {
            return Ok(());
        };
        self.associated = false;
        self.closed_at = Some(Instant::now());

        let close_result = match ws.close(None) {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(BrokerLoadTestError::ClientError(format!(
                "close failed: {}",
                e
            ))),
        };

        // Drain until the peer acknowledges the close handshake
        loop {
            match ws.read() {
                Ok(_) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => break,
                Err(_) => break,
            }
        }

        close_result
    }

    fn name(&self) -> &str {
        &self.config.common_name
    }
}
