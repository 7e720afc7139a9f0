// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP locator client.
//!
//! The client sends [`RequestFrame`]s to a discovered locator and waits for
//! the matching [`ReplyFrame`]. One connection is opened per call; tcp
//! endpoints are tried in order until one accepts.
//!
//! Every failure to reach the locator or to get a reply in time surfaces as
//! [`LocatorError::Transport`], which the forwarding facade treats as a bad
//! handle.

use crate::codec::{codec_for, Operation};
use crate::connection::FramedConnection;
use crate::error::{LocatorError, LocatorResult};
use crate::locator::{Locator, LocatorConnector};
use crate::protocol::{ReplyFrame, ReplyStatus, RequestFrame};
use crate::types::{DiscoveredLocator, ObjectProxy, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Connector producing [`TcpLocatorClient`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Timeout for establishing a connection to one endpoint.
    pub connect_timeout: Duration,

    /// Timeout for one request/reply exchange.
    pub invocation_timeout: Duration,

    /// Maximum frame size accepted from the locator.
    pub max_frame_size: usize,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            invocation_timeout: Duration::from_secs(5),
            max_frame_size: 1024 * 1024,
        }
    }
}

impl LocatorConnector for TcpConnector {
    fn connect(&self, locator: &Arc<DiscoveredLocator>) -> Arc<dyn Locator> {
        Arc::new(TcpLocatorClient::new(Arc::clone(locator), self.clone()))
    }
}

/// Client for one discovered locator.
pub struct TcpLocatorClient {
    locator: Arc<DiscoveredLocator>,
    settings: TcpConnector,
    next_request_id: AtomicU32,
}

impl TcpLocatorClient {
    pub fn new(locator: Arc<DiscoveredLocator>, settings: TcpConnector) -> Self {
        Self {
            locator,
            settings,
            next_request_id: AtomicU32::new(1),
        }
    }

    pub fn locator(&self) -> &Arc<DiscoveredLocator> {
        &self.locator
    }

    /// Connect to the first reachable tcp endpoint.
    async fn open(&self) -> LocatorResult<FramedConnection> {
        let mut last_error = None;

        for endpoint in &self.locator.endpoints {
            if endpoint.transport != Transport::Tcp {
                continue;
            }

            let authority = endpoint.authority();
            match timeout(
                self.settings.connect_timeout,
                FramedConnection::connect(&authority, self.settings.max_frame_size),
            )
            .await
            {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(e)) => {
                    tracing::debug!("Locator endpoint {} unreachable: {}", endpoint, e);
                    last_error = Some(format!("{}: {}", authority, e));
                }
                Err(_) => {
                    tracing::debug!("Locator endpoint {} connect timeout", endpoint);
                    last_error = Some(format!("{}: connect timeout", authority));
                }
            }
        }

        Err(LocatorError::Transport(last_error.unwrap_or_else(|| {
            format!("locator {} has no tcp endpoint", self.locator.identity)
        })))
    }

    /// Send `request` and wait for its reply.
    async fn exchange(&self, request: &RequestFrame) -> LocatorResult<ReplyFrame> {
        let mut conn = self.open().await?;
        let peer = conn.peer_addr();

        let reply = timeout(self.settings.invocation_timeout, async {
            conn.write_frame(request).await?;
            conn.read_frame::<ReplyFrame>().await
        })
        .await
        .map_err(|_| LocatorError::Transport(format!("{}: invocation timeout", peer)))??;

        let Some(reply) = reply else {
            return Err(LocatorError::Transport(format!(
                "{}: connection closed before reply",
                peer
            )));
        };

        if reply.request_id != request.request_id {
            return Err(LocatorError::Protocol(format!(
                "reply id {} does not match request id {}",
                reply.request_id, request.request_id
            )));
        }

        Ok(reply)
    }
}

#[async_trait]
impl Locator for TcpLocatorClient {
    async fn invoke(&self, op: &Operation) -> LocatorResult<Option<ObjectProxy>> {
        let codec = codec_for(self.locator.encoding)?;
        let request = RequestFrame {
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            operation: op.name().to_string(),
            encoding: self.locator.encoding,
            payload: codec.encode_request(op)?,
        };

        let reply = self.exchange(&request).await?;

        match reply.status {
            ReplyStatus::Ok => Ok(codec.decode_result(&reply.payload)?),
            ReplyStatus::UserException => {
                let (code, message) = codec.decode_fault(&reply.payload)?;
                Err(LocatorError::Remote { code, message })
            }
            ReplyStatus::OperationNotExist => {
                Err(LocatorError::remote("OperationNotExist", op.name()))
            }
            // The locator's own failure answers, propagated like faults
            ReplyStatus::MarshalError => Err(LocatorError::remote(
                "MarshalError",
                String::from_utf8_lossy(&reply.payload),
            )),
            ReplyStatus::UnknownException => Err(LocatorError::remote(
                "UnknownException",
                String::from_utf8_lossy(&reply.payload),
            )),
        }
    }

    async fn invoke_raw(&self, request: RequestFrame) -> LocatorResult<ReplyFrame> {
        self.exchange(&request).await
    }
}
