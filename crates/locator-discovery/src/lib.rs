// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locator Discovery Proxy
//!
//! Finds an RPC naming service (the *locator*) on the local network with a
//! multicast lookup, caches it, and serves locator requests on its behalf.
//!
//! # Features
//!
//! - **Single-flight discovery**: concurrent callers share one lookup round
//! - **Cooldown**: a fruitless round blocks new lookups for `retry_delay`
//! - **Replica merging**: replies from replicas of the same locator add endpoints
//! - **Self-healing**: a transport failure invalidates the locator and rediscovers it once
//! - **Transcoding**: requests in a foreign encoding are re-encoded, matching ones forwarded unchanged
//!
//! # Quick Start
//!
//! ```bash
//! # Serve on 127.0.0.1:4062, look up on the default group
//! locator-discovery
//!
//! # Using config file
//! locator-discovery --config locator-discovery.toml
//!
//! # List every locator deployment answering within 2 seconds
//! locator-discovery list --wait 2000
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! lookup = ["udp -h 239.255.0.1 -p 4061"]
//! instance_name = "prod"
//! timeout_ms = 300
//! retry_count = 3
//! retry_delay_ms = 2000
//! listen = "127.0.0.1:4062"
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod facade;
pub mod locator;
pub mod lookup;
pub mod protocol;
pub mod reconcile;
pub mod reply;
pub mod server;
pub mod shim;
pub mod stats;
pub mod types;

pub use client::{TcpConnector, TcpLocatorClient};
pub use codec::{codec_for, Codec, CodecError, NamedCodec, Operation, PositionalCodec};
pub use config::{ConfigError, DiscoveryConfig};
pub use coordinator::{DiscoveryCoordinator, DiscoverySettings, InstanceScope, Resolution};
pub use error::{LocatorError, LocatorResult};
pub use facade::ForwardingFacade;
pub use locator::{Locator, LocatorConnector, VoidLocator};
pub use lookup::{LookupSender, LookupTarget, UdpLookupSender};
pub use protocol::{LookupMessage, ReplyFrame, ReplyStatus, RequestFrame};
pub use reply::{ReplyListener, ReplySink};
pub use server::{start_discovery, ProxyServer, ServerError};
pub use shim::{DispatchStrategy, TranscodingDispatchShim};
pub use stats::{DiscoveryStats, DiscoveryStatsSnapshot};
pub use types::{
    DiscoveredLocator, EncodingVersion, Endpoint, Identity, ObjectProxy, ProtocolVersion,
    Transport,
};
