// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reply listener: receives "locator found" datagrams.

use crate::lookup::is_link_local;
use crate::protocol::LookupMessage;
use crate::types::DiscoveredLocator;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receives decoded locator replies.
///
/// Called from the listener tasks, any number of times, in arrival order per
/// socket.
pub trait ReplySink: Send + Sync {
    fn on_reply_received(&self, candidate: DiscoveredLocator);
}

/// Passive UDP endpoint(s) for lookup replies.
///
/// One socket per interface. The listener has no retry logic; it only
/// decodes and hands replies to a [`ReplySink`].
pub struct ReplyListener {
    sockets: Vec<(Option<IpAddr>, Arc<UdpSocket>)>,
}

impl ReplyListener {
    /// Bind one reply socket per interface (`None` = any interface).
    ///
    /// `port` 0 picks an ephemeral port.
    pub async fn bind(interfaces: &[Option<IpAddr>], port: u16) -> io::Result<Self> {
        let mut sockets = Vec::with_capacity(interfaces.len());

        for interface in interfaces {
            let ip = interface.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            let socket = UdpSocket::bind(SocketAddr::new(ip, port)).await?;
            tracing::debug!("Reply listener bound to {}", socket.local_addr()?);
            sockets.push((*interface, Arc::new(socket)));
        }

        Ok(Self { sockets })
    }

    /// `(interface, reply address)` pairs to advertise in lookup queries.
    ///
    /// A socket bound to the unspecified address advertises the host's
    /// primary address.
    pub fn reply_addresses(&self) -> io::Result<Vec<(Option<IpAddr>, SocketAddr)>> {
        self.sockets
            .iter()
            .map(|(interface, socket)| {
                let local = socket.local_addr()?;
                let ip = if local.ip().is_unspecified() {
                    advertised_ip(local.is_ipv6())
                } else {
                    local.ip()
                };
                Ok((*interface, SocketAddr::new(ip, local.port())))
            })
            .collect()
    }

    /// Start one receive task per socket.
    ///
    /// Tasks exit when `shutdown` turns true or its sender is dropped.
    pub fn spawn(
        self,
        sink: Arc<dyn ReplySink>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        self.sockets
            .into_iter()
            .map(|(_, socket)| {
                let sink = Arc::clone(&sink);
                let shutdown = shutdown.clone();
                tokio::spawn(receive_loop(socket, sink, shutdown))
            })
            .collect()
    }
}

fn advertised_ip(ipv6: bool) -> IpAddr {
    let (found, localhost) = if ipv6 {
        (local_ip_address::local_ipv6(), IpAddr::V6(Ipv6Addr::LOCALHOST))
    } else {
        (local_ip_address::local_ip(), IpAddr::V4(Ipv4Addr::LOCALHOST))
    };

    // A link-local reply address is useless without its scope id
    match found {
        Ok(ip) if !is_link_local(&ip) => ip,
        _ => localhost,
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    sink: Arc<dyn ReplySink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => handle_datagram(&buf[..len], from, sink.as_ref()),
                    Err(e) => {
                        // ICMP port unreachable from earlier sends surfaces here on some platforms
                        tracing::debug!("Reply socket receive error: {}", e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Reply listener stopped");
}

/// Decode one datagram and forward it to `sink`.
pub fn handle_datagram(bytes: &[u8], from: SocketAddr, sink: &dyn ReplySink) {
    match LookupMessage::decode(bytes) {
        Ok(LookupMessage::FoundLocator { locator }) => {
            match DiscoveredLocator::try_from(locator) {
                Ok(candidate) => {
                    tracing::trace!("Locator reply from {}: {}", from, candidate);
                    sink.on_reply_received(candidate);
                }
                Err(e) => tracing::debug!("Unusable locator reply from {}: {}", from, e),
            }
        }
        Ok(LookupMessage::FindLocator { .. }) => {
            tracing::trace!("Ignoring lookup query from {}", from);
        }
        Err(e) => tracing::debug!("Undecodable datagram from {}: {}", from, e),
    }
}
