// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup fan-out: sending "find locator" queries.
//!
//! A lookup round sends one datagram per [`LookupTarget`]. Targets are built
//! once from the configured lookup endpoints crossed with the selected
//! interfaces; each carries the reply address of the interface it leaves
//! through.

use crate::protocol::LookupMessage;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::net::UdpSocket;

/// Multicast TTL / hop limit for lookup datagrams (stay on the local link).
pub const LOOKUP_TTL: u32 = 1;

/// One send target of a lookup round.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupTarget {
    /// Datagram destination (multicast group or unicast address).
    pub destination: SocketAddr,

    /// Outgoing interface; `None` lets the OS route.
    pub interface: Option<IpAddr>,

    /// Address replies to this send must come back to.
    pub reply: SocketAddr,
}

impl LookupTarget {
    /// Dedup key: one send per destination and interface.
    pub fn key(&self) -> (SocketAddr, Option<IpAddr>) {
        (self.destination, self.interface)
    }
}

/// Query content of a lookup datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupQuery {
    /// Instance name to match; empty matches any deployment.
    pub instance_name: String,
}

/// Lookup send failure for one target.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(String),
}

/// Sends lookup datagrams.
///
/// Each call is independent: a failure for one target says nothing about the
/// others. Implementations must not block beyond the underlying send.
#[async_trait]
pub trait LookupSender: Send + Sync {
    async fn send(&self, target: &LookupTarget, query: &LookupQuery) -> Result<(), LookupError>;
}

/// Build the deduplicated target list.
///
/// Every destination is paired with every reply address of the same address
/// family. `replies` holds `(interface, reply address)` pairs as advertised by
/// the reply listener.
pub fn lookup_targets(
    destinations: &[SocketAddr],
    replies: &[(Option<IpAddr>, SocketAddr)],
) -> Vec<LookupTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for destination in destinations {
        for (interface, reply) in replies {
            if reply.is_ipv6() != destination.is_ipv6() {
                continue;
            }
            let target = LookupTarget {
                destination: *destination,
                interface: *interface,
                reply: *reply,
            };
            if seen.insert(target.key()) {
                targets.push(target);
            }
        }
    }

    targets
}

/// Whether `ip` is link-local (`169.254/16`, `fe80::/10`).
///
/// Link-local IPv6 addresses cannot be bound without a scope id.
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Non-loopback, non-link-local interface addresses usable for multicast.
pub fn multicast_interfaces(ipv6: bool) -> Vec<IpAddr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            tracing::debug!("Failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addrs: Vec<IpAddr> = interfaces
        .into_iter()
        .map(|(_name, ip)| ip)
        .filter(|ip| ip.is_ipv6() == ipv6 && !ip.is_loopback() && !is_link_local(ip))
        .collect();
    addrs.sort();
    addrs.dedup();

    tracing::debug!("Discovered {} multicast interfaces", addrs.len());
    addrs
}

/// UDP implementation of [`LookupSender`].
///
/// Holds one socket per (interface, address family), configured for
/// multicast on that interface.
pub struct UdpLookupSender {
    sockets: HashMap<(Option<IpAddr>, bool), UdpSocket>,
}

impl UdpLookupSender {
    /// Open the sockets needed for `targets`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(targets: &[LookupTarget]) -> io::Result<Self> {
        let mut sockets = HashMap::new();

        for target in targets {
            let key = (target.interface, target.destination.is_ipv6());
            if sockets.contains_key(&key) {
                continue;
            }
            let socket = open_socket(key.0, key.1)?;
            tracing::debug!(
                "Lookup socket bound to {} (interface {:?})",
                socket.local_addr()?,
                key.0
            );
            sockets.insert(key, UdpSocket::from_std(socket)?);
        }

        Ok(Self { sockets })
    }
}

fn open_socket(interface: Option<IpAddr>, ipv6: bool) -> io::Result<std::net::UdpSocket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    let bind_ip = match interface {
        Some(IpAddr::V4(addr)) if !ipv6 => {
            socket.set_multicast_if_v4(&addr)?;
            IpAddr::V4(addr)
        }
        Some(IpAddr::V6(addr)) if ipv6 => {
            match interface_index(&addr) {
                Ok(index) => socket.set_multicast_if_v6(index)?,
                Err(e) => tracing::debug!("No interface index for {}: {}", addr, e),
            }
            IpAddr::V6(addr)
        }
        _ if ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    if ipv6 {
        socket.set_multicast_hops_v6(LOOKUP_TTL)?;
        socket.set_multicast_loop_v6(true)?;
    } else {
        socket.set_multicast_ttl_v4(LOOKUP_TTL)?;
        socket.set_multicast_loop_v4(true)?;
    }

    socket.bind(&SocketAddr::new(bind_ip, 0).into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// OS index of the interface carrying `addr`.
fn interface_index(addr: &Ipv6Addr) -> io::Result<u32> {
    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let (name, _) = interfaces
        .into_iter()
        .find(|(_, ip)| *ip == IpAddr::V6(*addr))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address not on any interface"))?;
    interface_index_by_name(&name)
}

#[cfg(unix)]
fn interface_index_by_name(name: &str) -> io::Result<u32> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name"))?;

    // SAFETY:
    // - c_name is a valid NUL-terminated CString
    // - if_nametoindex only reads the string and returns 0 on error
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(index)
}

#[cfg(not(unix))]
fn interface_index_by_name(_name: &str) -> io::Result<u32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interface index lookup needs a unix host",
    ))
}

#[async_trait]
impl LookupSender for UdpLookupSender {
    async fn send(&self, target: &LookupTarget, query: &LookupQuery) -> Result<(), LookupError> {
        let socket = self
            .sockets
            .get(&(target.interface, target.destination.is_ipv6()))
            .ok_or_else(|| {
                LookupError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no socket for interface {:?}", target.interface),
                ))
            })?;

        let datagram = LookupMessage::FindLocator {
            instance_name: query.instance_name.clone(),
            reply: target.reply,
        }
        .encode()
        .map_err(|e| LookupError::Encode(e.to_string()))?;

        socket.send_to(&datagram, target.destination).await?;
        tracing::trace!(
            "Sent lookup to {} (reply {})",
            target.destination,
            target.reply
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_targets_dedup_and_family() {
        let destinations = [
            addr("239.255.0.1:4061"),
            addr("239.255.0.1:4061"),
            addr("[ff15::1]:4061"),
        ];
        let replies = [
            (Some("10.0.0.4".parse().unwrap()), addr("10.0.0.4:50120")),
            (Some("192.168.1.4".parse().unwrap()), addr("192.168.1.4:50121")),
        ];

        let targets = lookup_targets(&destinations, &replies);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| !t.destination.is_ipv6()));
        assert_eq!(targets[0].reply, addr("10.0.0.4:50120"));
        assert_eq!(targets[1].interface, Some("192.168.1.4".parse().unwrap()));
    }

    #[test]
    fn test_multicast_interfaces_filter_loopback() {
        for ip in multicast_interfaces(false) {
            assert!(ip.is_ipv4());
            assert!(!ip.is_loopback());
        }
    }

    #[test]
    fn test_multicast_interfaces_skip_link_local() {
        for ip in multicast_interfaces(true) {
            assert!(ip.is_ipv6());
            assert!(!ip.is_loopback());
            assert!(!is_link_local(&ip));
        }
    }

    #[test]
    fn test_is_link_local() {
        let link_local: [IpAddr; 3] = [
            "fe80::fc:ff:fe00:1".parse().unwrap(),
            "febf::1".parse().unwrap(),
            "169.254.3.4".parse().unwrap(),
        ];
        for ip in &link_local {
            assert!(is_link_local(ip), "{}", ip);
        }

        let routable: [IpAddr; 4] = [
            "fd00::2".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
            "fec0::1".parse().unwrap(),
            "10.0.0.4".parse().unwrap(),
        ];
        for ip in &routable {
            assert!(!is_link_local(ip), "{}", ip);
        }
    }

    #[tokio::test]
    async fn test_udp_send_unicast() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = LookupTarget {
            destination: receiver.local_addr().unwrap(),
            interface: Some("127.0.0.1".parse().unwrap()),
            reply: addr("127.0.0.1:50120"),
        };

        let sender = UdpLookupSender::bind(std::slice::from_ref(&target)).unwrap();
        let query = LookupQuery {
            instance_name: "prod".into(),
        };
        sender.send(&target, &query).await.unwrap();

        let mut buf = [0u8; 1500];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        match LookupMessage::decode(&buf[..len]).unwrap() {
            LookupMessage::FindLocator {
                instance_name,
                reply,
            } => {
                assert_eq!(instance_name, "prod");
                assert_eq!(reply, target.reply);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_without_socket_fails() {
        let sender = UdpLookupSender::bind(&[]).unwrap();
        let target = LookupTarget {
            destination: addr("127.0.0.1:4061"),
            interface: None,
            reply: addr("127.0.0.1:50120"),
        };
        let err = sender.send(&target, &LookupQuery::default()).await;
        assert!(matches!(err, Err(LookupError::Io(_))));
    }
}
