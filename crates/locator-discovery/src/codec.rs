// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request encodings.
//!
//! Two wire generations coexist:
//!
//! | Encoding | Arguments / results                         |
//! |----------|---------------------------------------------|
//! | `1.0`    | positional: JSON arrays                     |
//! | `1.1`    | named: JSON objects keyed by argument name  |
//!
//! A locator found on the network may speak a different generation than the
//! caller; the dispatch shim decodes with one [`Codec`] and the client
//! re-encodes with another.

use crate::types::{EncodingVersion, Endpoint, Identity, ObjectProxy, ENCODING_1_0, ENCODING_1_1};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Locator operation with decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    FindObjectById { identity: Identity, facet: String },
    FindAdapterById { id: String },
    GetRegistry,
    ResolveLocation { location: Vec<String> },
    ResolveWellKnownProxy { identity: Identity },
}

impl Operation {
    pub const FIND_OBJECT_BY_ID: &'static str = "findObjectById";
    pub const FIND_ADAPTER_BY_ID: &'static str = "findAdapterById";
    pub const GET_REGISTRY: &'static str = "getRegistry";
    pub const RESOLVE_LOCATION: &'static str = "resolveLocation";
    pub const RESOLVE_WELL_KNOWN_PROXY: &'static str = "resolveWellKnownProxy";

    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FindObjectById { .. } => Self::FIND_OBJECT_BY_ID,
            Self::FindAdapterById { .. } => Self::FIND_ADAPTER_BY_ID,
            Self::GetRegistry => Self::GET_REGISTRY,
            Self::ResolveLocation { .. } => Self::RESOLVE_LOCATION,
            Self::ResolveWellKnownProxy { .. } => Self::RESOLVE_WELL_KNOWN_PROXY,
        }
    }

    /// Whether `name` is a locator operation.
    pub fn is_known(name: &str) -> bool {
        matches!(
            name,
            Self::FIND_OBJECT_BY_ID
                | Self::FIND_ADAPTER_BY_ID
                | Self::GET_REGISTRY
                | Self::RESOLVE_LOCATION
                | Self::RESOLVE_WELL_KNOWN_PROXY
        )
    }
}

/// Codec error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(EncodingVersion),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// One request encoding.
pub trait Codec: Send + Sync {
    fn version(&self) -> EncodingVersion;

    fn encode_request(&self, op: &Operation) -> Result<Vec<u8>, CodecError>;

    fn decode_request(&self, operation: &str, payload: &[u8]) -> Result<Operation, CodecError>;

    /// Encode an operation result; `None` is the not-found answer.
    fn encode_result(&self, result: Option<&ObjectProxy>) -> Result<Vec<u8>, CodecError>;

    fn decode_result(&self, payload: &[u8]) -> Result<Option<ObjectProxy>, CodecError>;

    fn encode_fault(&self, code: &str, message: &str) -> Result<Vec<u8>, CodecError>;

    /// Decode a fault into `(code, message)`.
    fn decode_fault(&self, payload: &[u8]) -> Result<(String, String), CodecError>;
}

/// Get the codec for `encoding`.
pub fn codec_for(encoding: EncodingVersion) -> Result<&'static dyn Codec, CodecError> {
    static POSITIONAL: PositionalCodec = PositionalCodec;
    static NAMED: NamedCodec = NamedCodec;

    match encoding {
        ENCODING_1_0 => Ok(&POSITIONAL),
        ENCODING_1_1 => Ok(&NAMED),
        other => Err(CodecError::UnsupportedEncoding(other)),
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}

fn check_known(operation: &str) -> Result<(), CodecError> {
    if Operation::is_known(operation) {
        Ok(())
    } else {
        Err(CodecError::UnknownOperation(operation.to_string()))
    }
}

// ============================================================================
// 1.0: positional
// ============================================================================

/// Encoding 1.0.
///
/// Identities are `[name, category]`, a proxy is
/// `[identity, facet, adapter_id | null, [endpoint, ...]]`, a fault is
/// `[code, message]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalCodec;

type IdentityTuple = (String, String);
type ProxyTuple = (IdentityTuple, String, Option<String>, Vec<Endpoint>);

fn to_tuple(identity: &Identity) -> IdentityTuple {
    (identity.name.clone(), identity.category.clone())
}

fn from_tuple((name, category): IdentityTuple) -> Identity {
    Identity { name, category }
}

impl Codec for PositionalCodec {
    fn version(&self) -> EncodingVersion {
        ENCODING_1_0
    }

    fn encode_request(&self, op: &Operation) -> Result<Vec<u8>, CodecError> {
        let bytes = match op {
            Operation::FindObjectById { identity, facet } => {
                serde_json::to_vec(&(to_tuple(identity), facet))?
            }
            Operation::FindAdapterById { id } => serde_json::to_vec(&(id,))?,
            Operation::GetRegistry => b"[]".to_vec(),
            Operation::ResolveLocation { location } => serde_json::to_vec(&(location,))?,
            Operation::ResolveWellKnownProxy { identity } => {
                serde_json::to_vec(&(to_tuple(identity),))?
            }
        };
        Ok(bytes)
    }

    fn decode_request(&self, operation: &str, payload: &[u8]) -> Result<Operation, CodecError> {
        check_known(operation)?;

        let op = match operation {
            Operation::FIND_OBJECT_BY_ID => {
                let (identity, facet): (IdentityTuple, String) = decode(payload)?;
                Operation::FindObjectById {
                    identity: from_tuple(identity),
                    facet,
                }
            }
            Operation::FIND_ADAPTER_BY_ID => {
                let (id,): (String,) = decode(payload)?;
                Operation::FindAdapterById { id }
            }
            Operation::RESOLVE_LOCATION => {
                let (location,): (Vec<String>,) = decode(payload)?;
                Operation::ResolveLocation { location }
            }
            Operation::RESOLVE_WELL_KNOWN_PROXY => {
                let (identity,): (IdentityTuple,) = decode(payload)?;
                Operation::ResolveWellKnownProxy {
                    identity: from_tuple(identity),
                }
            }
            _ => {
                let args: Vec<serde_json::Value> = decode(payload)?;
                if !args.is_empty() {
                    return Err(CodecError::Malformed(format!(
                        "{} takes no arguments",
                        operation
                    )));
                }
                Operation::GetRegistry
            }
        };
        Ok(op)
    }

    fn encode_result(&self, result: Option<&ObjectProxy>) -> Result<Vec<u8>, CodecError> {
        let tuple: Option<ProxyTuple> = result.map(|p| {
            (
                to_tuple(&p.identity),
                p.facet.clone(),
                p.adapter_id.clone(),
                p.endpoints.clone(),
            )
        });
        Ok(serde_json::to_vec(&tuple)?)
    }

    fn decode_result(&self, payload: &[u8]) -> Result<Option<ObjectProxy>, CodecError> {
        let tuple: Option<ProxyTuple> = decode(payload)?;
        Ok(tuple.map(|(identity, facet, adapter_id, endpoints)| ObjectProxy {
            identity: from_tuple(identity),
            facet,
            adapter_id,
            endpoints,
        }))
    }

    fn encode_fault(&self, code: &str, message: &str) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&(code, message))?)
    }

    fn decode_fault(&self, payload: &[u8]) -> Result<(String, String), CodecError> {
        decode(payload)
    }
}

// ============================================================================
// 1.1: named
// ============================================================================

/// Encoding 1.1.
///
/// Arguments are objects keyed by name; a result is `{"proxy": ...}`, a fault
/// is `{"code": ..., "message": ...}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedCodec;

#[derive(Serialize, Deserialize)]
struct ObjectArgs {
    identity: Identity,
    #[serde(default)]
    facet: String,
}

#[derive(Serialize, Deserialize)]
struct AdapterArgs {
    id: String,
}

#[derive(Serialize, Deserialize)]
struct LocationArgs {
    location: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct WellKnownArgs {
    identity: Identity,
}

#[derive(Serialize, Deserialize)]
struct NoArgs {}

#[derive(Serialize, Deserialize)]
struct NamedResult {
    proxy: Option<ObjectProxy>,
}

#[derive(Serialize, Deserialize)]
struct NamedFault {
    code: String,
    #[serde(default)]
    message: String,
}

impl Codec for NamedCodec {
    fn version(&self) -> EncodingVersion {
        ENCODING_1_1
    }

    fn encode_request(&self, op: &Operation) -> Result<Vec<u8>, CodecError> {
        let bytes = match op {
            Operation::FindObjectById { identity, facet } => serde_json::to_vec(&ObjectArgs {
                identity: identity.clone(),
                facet: facet.clone(),
            })?,
            Operation::FindAdapterById { id } => {
                serde_json::to_vec(&AdapterArgs { id: id.clone() })?
            }
            Operation::GetRegistry => serde_json::to_vec(&NoArgs {})?,
            Operation::ResolveLocation { location } => serde_json::to_vec(&LocationArgs {
                location: location.clone(),
            })?,
            Operation::ResolveWellKnownProxy { identity } => {
                serde_json::to_vec(&WellKnownArgs {
                    identity: identity.clone(),
                })?
            }
        };
        Ok(bytes)
    }

    fn decode_request(&self, operation: &str, payload: &[u8]) -> Result<Operation, CodecError> {
        check_known(operation)?;

        let op = match operation {
            Operation::FIND_OBJECT_BY_ID => {
                let args: ObjectArgs = decode(payload)?;
                Operation::FindObjectById {
                    identity: args.identity,
                    facet: args.facet,
                }
            }
            Operation::FIND_ADAPTER_BY_ID => {
                let args: AdapterArgs = decode(payload)?;
                Operation::FindAdapterById { id: args.id }
            }
            Operation::RESOLVE_LOCATION => {
                let args: LocationArgs = decode(payload)?;
                Operation::ResolveLocation {
                    location: args.location,
                }
            }
            Operation::RESOLVE_WELL_KNOWN_PROXY => {
                let args: WellKnownArgs = decode(payload)?;
                Operation::ResolveWellKnownProxy {
                    identity: args.identity,
                }
            }
            _ => {
                let _: NoArgs = decode(payload)?;
                Operation::GetRegistry
            }
        };
        Ok(op)
    }

    fn encode_result(&self, result: Option<&ObjectProxy>) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&NamedResult {
            proxy: result.cloned(),
        })?)
    }

    fn decode_result(&self, payload: &[u8]) -> Result<Option<ObjectProxy>, CodecError> {
        let result: NamedResult = decode(payload)?;
        Ok(result.proxy)
    }

    fn encode_fault(&self, code: &str, message: &str) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&NamedFault {
            code: code.to_string(),
            message: message.to_string(),
        })?)
    }

    fn decode_fault(&self, payload: &[u8]) -> Result<(String, String), CodecError> {
        let fault: NamedFault = decode(payload)?;
        Ok((fault.code, fault.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;

    fn proxy() -> ObjectProxy {
        ObjectProxy::direct(
            Identity::new("hello", "demo"),
            vec![Endpoint::tcp("10.0.0.7", 10000)],
        )
    }

    #[test]
    fn test_codec_lookup() {
        assert_eq!(codec_for(ENCODING_1_0).unwrap().version(), ENCODING_1_0);
        assert_eq!(codec_for(ENCODING_1_1).unwrap().version(), ENCODING_1_1);
        assert_eq!(
            codec_for(Version::new(2, 0)).err(),
            Some(CodecError::UnsupportedEncoding(Version::new(2, 0)))
        );
    }

    #[test]
    fn test_positional_layout() {
        let op = Operation::FindObjectById {
            identity: Identity::new("hello", "demo"),
            facet: String::new(),
        };
        let bytes = PositionalCodec.encode_request(&op).unwrap();
        assert_eq!(bytes, br#"[["hello","demo"],""]"#);

        let result = PositionalCodec.encode_result(Some(&proxy())).unwrap();
        assert_eq!(
            String::from_utf8(result).unwrap(),
            r#"[["hello","demo"],"",null,["tcp -h 10.0.0.7 -p 10000"]]"#
        );
        assert_eq!(PositionalCodec.encode_result(None).unwrap(), b"null");
    }

    #[test]
    fn test_named_layout() {
        let op = Operation::FindAdapterById { id: "Hello".into() };
        let bytes = NamedCodec.encode_request(&op).unwrap();
        assert_eq!(bytes, br#"{"id":"Hello"}"#);

        assert_eq!(NamedCodec.encode_result(None).unwrap(), br#"{"proxy":null}"#);
    }

    #[test]
    fn test_transcode_between_generations() {
        let op = Operation::ResolveWellKnownProxy {
            identity: Identity::new("registry", ""),
        };
        let named = NamedCodec.encode_request(&op).unwrap();
        let decoded = NamedCodec.decode_request(op.name(), &named).unwrap();
        let positional = PositionalCodec.encode_request(&decoded).unwrap();
        assert_eq!(
            PositionalCodec.decode_request(op.name(), &positional).unwrap(),
            op
        );

        let result = PositionalCodec.encode_result(Some(&proxy())).unwrap();
        let decoded = PositionalCodec.decode_result(&result).unwrap();
        let named = NamedCodec.encode_result(decoded.as_ref()).unwrap();
        assert_eq!(NamedCodec.decode_result(&named).unwrap(), Some(proxy()));
    }

    #[test]
    fn test_get_registry_arguments() {
        assert_eq!(
            PositionalCodec.decode_request("getRegistry", b"[]").unwrap(),
            Operation::GetRegistry
        );
        assert!(matches!(
            PositionalCodec.decode_request("getRegistry", b"[1]"),
            Err(CodecError::Malformed(_))
        ));
        assert_eq!(
            NamedCodec.decode_request("getRegistry", b"{}").unwrap(),
            Operation::GetRegistry
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            NamedCodec.decode_request("shutdown", b"{}").unwrap_err(),
            CodecError::UnknownOperation("shutdown".into())
        );
        assert!(matches!(
            NamedCodec.decode_request("findAdapterById", br#"{"name":"A"}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            PositionalCodec.decode_request("findAdapterById", b"not json"),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_fault_round_trip() {
        for codec in [codec_for(ENCODING_1_0).unwrap(), codec_for(ENCODING_1_1).unwrap()] {
            let bytes = codec.encode_fault("AdapterNotFound", "no adapter").unwrap();
            assert_eq!(
                codec.decode_fault(&bytes).unwrap(),
                ("AdapterNotFound".to_string(), "no adapter".to_string())
            );
        }
    }
}
