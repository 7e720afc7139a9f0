// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy server: the listening adapter.
//!
//! Binds the reply listener and a TCP listener. Every TCP connection carries
//! [`RequestFrame`]s, each dispatched through the
//! [`TranscodingDispatchShim`] and answered with a [`ReplyFrame`](crate::protocol::ReplyFrame).

use crate::config::{ConfigError, DiscoveryConfig};
use crate::connection::{ConnectionError, FramedConnection};
use crate::coordinator::DiscoveryCoordinator;
use crate::facade::ForwardingFacade;
use crate::lookup::{lookup_targets, multicast_interfaces, UdpLookupSender};
use crate::protocol::RequestFrame;
use crate::reply::ReplyListener;
use crate::shim::TranscodingDispatchShim;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Interfaces to send lookups from, per address family present in
/// `destinations`.
fn select_interfaces(config: &DiscoveryConfig, destinations: &[SocketAddr]) -> Vec<Option<IpAddr>> {
    if let Some(interface) = config.interface {
        return vec![Some(interface)];
    }

    let mut interfaces = Vec::new();
    for ipv6 in [false, true] {
        if !destinations.iter().any(|d| d.is_ipv6() == ipv6) {
            continue;
        }
        let found = multicast_interfaces(ipv6);
        if found.is_empty() {
            let any = if ipv6 {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            };
            interfaces.push(Some(any));
        } else {
            interfaces.extend(found.into_iter().map(Some));
        }
    }
    interfaces
}

/// Bind the lookup sockets and the reply listener, and start the listener
/// tasks feeding a new coordinator.
pub async fn start_discovery(
    config: &DiscoveryConfig,
) -> Result<(DiscoveryCoordinator, Vec<JoinHandle<()>>), ServerError> {
    let destinations = config.lookup_endpoints()?;
    let interfaces = select_interfaces(config, &destinations);

    let listener = ReplyListener::bind(&interfaces, config.reply_port)
        .await
        .map_err(|e| ServerError::Bind(format!("reply listener: {}", e)))?;
    let targets = lookup_targets(&destinations, &listener.reply_addresses()?);

    for target in &targets {
        debug!(
            "Lookup target {} via {:?}, replies to {}",
            target.destination, target.interface, target.reply
        );
    }

    let sender = UdpLookupSender::bind(&targets)
        .map_err(|e| ServerError::Bind(format!("lookup sender: {}", e)))?;
    let coordinator = DiscoveryCoordinator::new(config.settings(), targets, Arc::new(sender));

    let handles = listener.spawn(
        Arc::new(coordinator.clone()),
        coordinator.subscribe_shutdown(),
    );

    Ok((coordinator, handles))
}

/// Locator proxy server.
pub struct ProxyServer {
    config: Arc<DiscoveryConfig>,
    shim: Arc<TranscodingDispatchShim>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    reply_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProxyServer {
    /// Validate `config`, start discovery and bind the request listener.
    pub async fn bind(config: DiscoveryConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let (coordinator, reply_tasks) = start_discovery(&config).await?;

        let listener = match TcpListener::bind(config.listen).await {
            Ok(listener) => listener,
            Err(e) => {
                coordinator.shutdown();
                return Err(ServerError::Bind(format!("{}: {}", config.listen, e)));
            }
        };
        let local_addr = listener.local_addr()?;

        let facade = ForwardingFacade::new(coordinator, Arc::new(config.connector()));
        let shim = TranscodingDispatchShim::new(Arc::new(facade));

        Ok(Self {
            config: Arc::new(config),
            shim: Arc::new(shim),
            listener: Mutex::new(Some(listener)),
            local_addr,
            reply_tasks: Mutex::new(reply_tasks),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &DiscoveryCoordinator {
        self.shim.facade().coordinator()
    }

    pub fn facade(&self) -> &Arc<ForwardingFacade> {
        self.shim.facade()
    }

    /// Accept and serve connections until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(ServerError::AlreadyRunning)?;

        info!("Locator proxy listening on {}", self.local_addr);

        let mut shutdown = self.coordinator().subscribe_shutdown();

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("New connection from {}", peer_addr);

                            let shim = Arc::clone(&self.shim);
                            let max_frame_size = self.config.max_frame_size;
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream,
                                    peer_addr,
                                    shim,
                                    max_frame_size,
                                    shutdown,
                                ).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Shutdown signal received");

        let reply_tasks = std::mem::take(&mut *self.reply_tasks.lock());
        for task in reply_tasks {
            if let Err(e) = task.await {
                debug!("Reply listener task ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    /// Stop accepting, stop the reply listener and end in-flight discovery.
    pub fn shutdown(&self) {
        self.coordinator().shutdown();
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    shim: Arc<TranscodingDispatchShim>,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let mut conn = FramedConnection::new(stream, peer_addr, max_frame_size);

    loop {
        let request = tokio::select! {
            result = conn.read_frame::<RequestFrame>() => {
                match result? {
                    Some(request) => request,
                    None => {
                        debug!("Connection closed: {}", peer_addr);
                        return Ok(());
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("Connection handler shutting down: {}", peer_addr);
                return Ok(());
            }
        };

        let reply = shim.dispatch(request).await;
        conn.write_frame(&reply).await?;
    }
}
