// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core value types shared by discovery, forwarding and dispatch.
//!
//! Everything here is plain data: identities, version pairs, transport
//! endpoints and the resolved locator handle itself. A published
//! [`DiscoveredLocator`] is never mutated; merging replica endpoints builds a
//! new value (see [`DiscoveredLocator::merged_with`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing textual values (endpoints, versions).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid endpoint `{0}`")]
    Endpoint(String),

    #[error("invalid version `{0}` (expected major.minor)")]
    Version(String),
}

/// Object identity: a name scoped by a category.
///
/// For a locator the category is the *instance name* of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub category: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.category, self.name)
        }
    }
}

/// A `major.minor` version pair.
///
/// Used both for the locator protocol version and the request encoding
/// version; see [`ProtocolVersion`] and [`EncodingVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// Protocol version advertised by a locator.
pub type ProtocolVersion = Version;

/// Wire encoding version of a request or locator.
pub type EncodingVersion = Version;

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

/// Protocol 1.0.
pub const PROTOCOL_1_0: ProtocolVersion = Version::new(1, 0);

/// Positional encoding: operation arguments as a JSON array.
pub const ENCODING_1_0: EncodingVersion = Version::new(1, 0);

/// Named encoding: operation arguments as a JSON object.
pub const ENCODING_1_1: EncodingVersion = Version::new(1, 1);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| ParseError::Version(s.to_string()))?;
        let major = major
            .parse()
            .map_err(|_| ParseError::Version(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| ParseError::Version(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for Version {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// Transport of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// A transport endpoint, written `tcp -h <host> -p <port>`.
///
/// The short form `host:port` is accepted and means tcp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: Transport::Tcp,
            host: host.into(),
            port,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: Transport::Udp,
            host: host.into(),
            port,
        }
    }

    /// `host:port` form suitable for `ToSocketAddrs` (IPv6 hosts bracketed).
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -h {} -p {}",
            self.transport.as_str(),
            self.host,
            self.port
        )
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Endpoint(s.to_string());
        let trimmed = s.trim();

        let mut tokens = trimmed.split_whitespace();
        let transport = match tokens.next() {
            Some("tcp") => Transport::Tcp,
            Some("udp") => Transport::Udp,
            Some(_) => {
                // Short form: host:port
                let addr: std::net::SocketAddr = trimmed.parse().map_err(|_| err())?;
                return Ok(Self::tcp(addr.ip().to_string(), addr.port()));
            }
            None => return Err(err()),
        };

        let mut host = None;
        let mut port = None;
        while let Some(flag) = tokens.next() {
            let value = tokens.next().ok_or_else(err)?;
            match flag {
                "-h" => host = Some(value.to_string()),
                "-p" => port = Some(value.parse::<u16>().map_err(|_| err())?),
                // Options such as -t (timeout) or --interface are accepted and ignored.
                _ => {}
            }
        }

        Ok(Self {
            transport,
            host: host.ok_or_else(err)?,
            port: port.ok_or_else(err)?,
        })
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> Self {
        e.to_string()
    }
}

/// A resolved locator handle.
///
/// Identity, facet and protocol are fixed once the first reply is accepted;
/// only the endpoint set grows, and only by building a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLocator {
    pub identity: Identity,
    pub facet: String,
    pub protocol: ProtocolVersion,
    pub encoding: EncodingVersion,
    pub endpoints: Vec<Endpoint>,
}

impl DiscoveredLocator {
    /// Create a locator with protocol 1.0, encoding 1.1 and no endpoints.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            facet: String::new(),
            protocol: PROTOCOL_1_0,
            encoding: ENCODING_1_1,
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingVersion) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facet = facet.into();
        self
    }

    /// The deployment's instance name (identity category).
    pub fn instance_name(&self) -> &str {
        &self.identity.category
    }

    /// Whether `other` designates the same logical object (identity and facet).
    pub fn same_object(&self, other: &DiscoveredLocator) -> bool {
        self.identity == other.identity && self.facet == other.facet
    }

    /// Union of both endpoint sets, in order of first appearance.
    ///
    /// Returns `None` when `other` contributes no new endpoint.
    pub fn merged_with(&self, other: &DiscoveredLocator) -> Option<DiscoveredLocator> {
        let fresh: Vec<&Endpoint> = other
            .endpoints
            .iter()
            .enumerate()
            .filter(|(i, e)| !self.endpoints.contains(e) && !other.endpoints[..*i].contains(e))
            .map(|(_, e)| e)
            .collect();

        if fresh.is_empty() {
            return None;
        }

        let mut merged = self.clone();
        merged.endpoints.extend(fresh.into_iter().cloned());
        Some(merged)
    }
}

impl fmt::Display for DiscoveredLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        if !self.facet.is_empty() {
            write!(f, " -f {}", self.facet)?;
        }
        write!(f, " -p {} -e {}", self.protocol, self.encoding)?;
        for endpoint in &self.endpoints {
            write!(f, ":{}", endpoint)?;
        }
        Ok(())
    }
}

/// A proxy returned by a locator lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProxy {
    pub identity: Identity,
    #[serde(default)]
    pub facet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl ObjectProxy {
    pub fn direct(identity: Identity, endpoints: Vec<Endpoint>) -> Self {
        Self {
            identity,
            facet: String::new(),
            adapter_id: None,
            endpoints,
        }
    }

    pub fn indirect(identity: Identity, adapter_id: impl Into<String>) -> Self {
        Self {
            identity,
            facet: String::new(),
            adapter_id: Some(adapter_id.into()),
            endpoints: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(endpoints: &[(&str, u16)]) -> DiscoveredLocator {
        DiscoveredLocator::new(Identity::new("Locator", "inst1")).with_endpoints(
            endpoints
                .iter()
                .map(|(h, p)| Endpoint::tcp(*h, *p))
                .collect(),
        )
    }

    #[test]
    fn test_endpoint_parse_long_form() {
        let ep: Endpoint = "tcp -h 10.0.0.1 -p 4061".parse().unwrap();
        assert_eq!(ep, Endpoint::tcp("10.0.0.1", 4061));

        let ep: Endpoint = "udp -h 239.255.0.1 -p 4061 -t 100".parse().unwrap();
        assert_eq!(ep.transport, Transport::Udp);
        assert_eq!(ep.port, 4061);
    }

    #[test]
    fn test_endpoint_parse_short_form() {
        let ep: Endpoint = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(ep, Endpoint::tcp("127.0.0.1", 9000));

        let ep: Endpoint = "[::1]:9000".parse().unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.authority(), "[::1]:9000");
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!("tcp -h host".parse::<Endpoint>().is_err());
        assert!("tcp -h host -p notaport".parse::<Endpoint>().is_err());
        assert!("garbage".parse::<Endpoint>().is_err());
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("1.1".parse::<Version>().unwrap(), ENCODING_1_1);
        assert!("1".parse::<Version>().is_err());
        assert!("a.b".parse::<Version>().is_err());
        assert_eq!(ENCODING_1_0.to_string(), "1.0");
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new("Locator", "inst1").to_string(), "inst1/Locator");
        assert_eq!(Identity::new("Locator", "").to_string(), "Locator");
    }

    #[test]
    fn test_merge_disjoint_endpoints() {
        let a = locator(&[("10.0.0.1", 4061)]);
        let b = locator(&[("10.0.0.2", 4061)]);

        let merged = a.merged_with(&b).expect("new endpoint");
        assert_eq!(
            merged.endpoints,
            vec![Endpoint::tcp("10.0.0.1", 4061), Endpoint::tcp("10.0.0.2", 4061)]
        );
        // Source snapshot untouched
        assert_eq!(a.endpoints.len(), 1);
    }

    #[test]
    fn test_merge_nothing_new() {
        let a = locator(&[("10.0.0.1", 4061), ("10.0.0.2", 4061)]);
        let b = locator(&[("10.0.0.2", 4061)]);
        assert!(a.merged_with(&b).is_none());
    }

    #[test]
    fn test_merge_dedups_within_candidate() {
        let a = locator(&[("10.0.0.1", 4061)]);
        let b = locator(&[("10.0.0.3", 1), ("10.0.0.3", 1)]);
        let merged = a.merged_with(&b).unwrap();
        assert_eq!(merged.endpoints.len(), 2);
    }
}
