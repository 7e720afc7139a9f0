// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire messages.
//!
//! Two message families share this module:
//!
//! - **Lookup datagrams** ([`LookupMessage`]): one JSON document per UDP
//!   datagram, sent to the lookup group and back to the reply address.
//! - **Locator frames** ([`RequestFrame`] / [`ReplyFrame`]): carried over TCP
//!   with a 4-byte big-endian length prefix (see
//!   [`FramedConnection`](crate::connection::FramedConnection)).
//!
//! This is a crate-private protocol, not interoperable with other locator
//! implementations.
//!
//! ```text
//! {"type":"find_locator","instance_name":"prod","reply":"10.0.0.4:50120"}
//! {"type":"found_locator","locator":{"identity":{"name":"Locator","category":"prod"},...}}
//! ```

use crate::types::{
    DiscoveredLocator, EncodingVersion, Endpoint, Identity, ParseError, ProtocolVersion,
    ENCODING_1_1, PROTOCOL_1_0,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Lookup datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LookupMessage {
    /// Query sent to the lookup group.
    #[serde(rename = "find_locator")]
    FindLocator {
        /// Instance name to match; empty matches any deployment.
        #[serde(default)]
        instance_name: String,
        /// Where to send the [`LookupMessage::FoundLocator`] reply.
        reply: SocketAddr,
    },

    /// Reply from a locator deployment.
    #[serde(rename = "found_locator")]
    FoundLocator { locator: LocatorWire },
}

impl LookupMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }
}

/// Wire format for a locator handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorWire {
    pub identity: Identity,
    #[serde(default)]
    pub facet: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

fn default_protocol() -> String {
    PROTOCOL_1_0.to_string()
}

fn default_encoding() -> String {
    ENCODING_1_1.to_string()
}

impl From<&DiscoveredLocator> for LocatorWire {
    fn from(locator: &DiscoveredLocator) -> Self {
        Self {
            identity: locator.identity.clone(),
            facet: locator.facet.clone(),
            protocol: locator.protocol.to_string(),
            encoding: locator.encoding.to_string(),
            endpoints: locator.endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl TryFrom<LocatorWire> for DiscoveredLocator {
    type Error = ProtocolError;

    fn try_from(wire: LocatorWire) -> Result<Self, Self::Error> {
        if wire.identity.name.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty locator identity".into()));
        }

        let protocol: ProtocolVersion = wire.protocol.parse()?;
        let encoding: EncodingVersion = wire.encoding.parse()?;

        // Unparseable endpoints are skipped; a locator with none left is useless.
        let endpoints: Vec<Endpoint> = wire
            .endpoints
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        if endpoints.is_empty() {
            return Err(ProtocolError::NoEndpoints);
        }

        Ok(DiscoveredLocator {
            identity: wire.identity,
            facet: wire.facet,
            protocol,
            encoding,
            endpoints,
        })
    }
}

/// Request carried to a locator (or to the proxy acting as one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub request_id: u32,
    pub operation: String,
    pub encoding: EncodingVersion,
    /// Operation arguments, encoded according to `encoding`.
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Payload holds the encoded result.
    Ok,
    /// Payload holds an encoded application exception.
    UserException,
    /// The target does not implement the operation.
    OperationNotExist,
    /// The request could not be decoded.
    MarshalError,
    /// Any other failure; payload holds a UTF-8 reason.
    UnknownException,
}

/// Reply to a [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub request_id: u32,
    pub status: ReplyStatus,
    pub encoding: EncodingVersion,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl ReplyFrame {
    pub fn ok(request: &RequestFrame, payload: Vec<u8>) -> Self {
        Self::with_status(request, ReplyStatus::Ok, payload)
    }

    pub fn with_status(request: &RequestFrame, status: ReplyStatus, payload: Vec<u8>) -> Self {
        Self {
            request_id: request.request_id,
            status,
            encoding: request.encoding,
            payload,
        }
    }

    /// Reply whose payload is a plain UTF-8 reason.
    pub fn failure(request: &RequestFrame, status: ReplyStatus, reason: &str) -> Self {
        Self::with_status(request, status, reason.as_bytes().to_vec())
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

/// Protocol error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("locator reply carries no usable endpoint")]
    NoEndpoints,

    #[error(transparent)]
    Parse(#[from] ParseError),
}
