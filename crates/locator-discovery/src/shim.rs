// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transcoding dispatch shim.
//!
//! Requests reach the proxy in the caller's encoding. When the discovered
//! locator speaks the same encoding the request bytes are forwarded as they
//! are; otherwise (or when no locator is known) the request is decoded,
//! invoked through the [`ForwardingFacade`] and the result re-encoded in the
//! caller's encoding.

use crate::codec::{codec_for, Codec, CodecError, Operation};
use crate::error::LocatorError;
use crate::facade::ForwardingFacade;
use crate::locator::Locator;
use crate::protocol::{ReplyFrame, ReplyStatus, RequestFrame};
use crate::types::{DiscoveredLocator, ObjectProxy};
use std::sync::Arc;

/// How one request is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Forward the bytes unchanged to this locator.
    RawForward(Arc<DiscoveredLocator>),
    /// Decode, invoke the facade, re-encode.
    Structured,
}

pub struct TranscodingDispatchShim {
    facade: Arc<ForwardingFacade>,
}

impl TranscodingDispatchShim {
    pub fn new(facade: Arc<ForwardingFacade>) -> Self {
        Self { facade }
    }

    pub fn facade(&self) -> &Arc<ForwardingFacade> {
        &self.facade
    }

    pub async fn select_strategy(&self, request: &RequestFrame) -> DispatchStrategy {
        match self.facade.coordinator().resolve().await {
            Some(locator) if locator.encoding == request.encoding => {
                DispatchStrategy::RawForward(locator)
            }
            _ => DispatchStrategy::Structured,
        }
    }

    /// Dispatch one request. Always produces a reply.
    pub async fn dispatch(&self, request: RequestFrame) -> ReplyFrame {
        match self.select_strategy(&request).await {
            DispatchStrategy::RawForward(locator) => {
                tracing::trace!(
                    "Forwarding {} #{} to {} unchanged",
                    request.operation,
                    request.request_id,
                    locator.identity
                );
                match self.facade.invoke_raw(request.clone()).await {
                    Ok(reply) => reply,
                    Err(LocatorError::NotFound) => self.dispatch_structured(&request).await,
                    Err(e) => {
                        tracing::debug!("Raw forward of {} failed: {}", request.operation, e);
                        ReplyFrame::failure(&request, ReplyStatus::UnknownException, &e.to_string())
                    }
                }
            }
            DispatchStrategy::Structured => self.dispatch_structured(&request).await,
        }
    }

    async fn dispatch_structured(&self, request: &RequestFrame) -> ReplyFrame {
        let codec = match codec_for(request.encoding) {
            Ok(codec) => codec,
            Err(e) => return ReplyFrame::failure(request, ReplyStatus::MarshalError, &e.to_string()),
        };

        let op = match codec.decode_request(&request.operation, &request.payload) {
            Ok(op) => op,
            Err(CodecError::UnknownOperation(name)) => {
                tracing::debug!("Unknown locator operation `{}`", name);
                return ReplyFrame::failure(request, ReplyStatus::OperationNotExist, &name);
            }
            Err(e) => {
                tracing::debug!("Cannot decode {}: {}", request.operation, e);
                return ReplyFrame::failure(request, ReplyStatus::MarshalError, &e.to_string());
            }
        };

        let result = self.facade.invoke(&op).await;
        encode_reply(request, codec, &op, result)
    }
}

fn encode_reply(
    request: &RequestFrame,
    codec: &dyn Codec,
    op: &Operation,
    result: Result<Option<ObjectProxy>, LocatorError>,
) -> ReplyFrame {
    let encoded = match result {
        Ok(proxy) => codec
            .encode_result(proxy.as_ref())
            .map(|payload| ReplyFrame::ok(request, payload)),
        Err(LocatorError::Remote { code, message }) => codec
            .encode_fault(&code, &message)
            .map(|payload| ReplyFrame::with_status(request, ReplyStatus::UserException, payload)),
        Err(e) => {
            tracing::debug!("{} failed: {}", op.name(), e);
            Ok(ReplyFrame::failure(
                request,
                ReplyStatus::UnknownException,
                &e.to_string(),
            ))
        }
    };

    encoded.unwrap_or_else(|e| {
        ReplyFrame::failure(request, ReplyStatus::UnknownException, &e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{NamedCodec, PositionalCodec};
    use crate::coordinator::{DiscoveryCoordinator, DiscoverySettings};
    use crate::error::LocatorResult;
    use crate::locator::LocatorConnector;
    use crate::lookup::{LookupError, LookupQuery, LookupSender, LookupTarget};
    use crate::types::{Endpoint, EncodingVersion, Identity, ENCODING_1_0, ENCODING_1_1};
    use async_trait::async_trait;
    use std::time::Duration;

    struct SilentSender;

    #[async_trait]
    impl LookupSender for SilentSender {
        async fn send(&self, _target: &LookupTarget, _query: &LookupQuery) -> Result<(), LookupError> {
            Ok(())
        }
    }

    /// Answers structured calls with a proxy (or a fault for adapter `Missing`)
    /// and raw calls with a marker payload.
    struct FakeLocator;

    #[async_trait]
    impl Locator for FakeLocator {
        async fn invoke(&self, op: &Operation) -> LocatorResult<Option<ObjectProxy>> {
            match op {
                Operation::FindAdapterById { id } if id == "Missing" => {
                    Err(LocatorError::remote("AdapterNotFound", id.clone()))
                }
                _ => Ok(Some(ObjectProxy::indirect(Identity::new("hello", ""), "Hello"))),
            }
        }

        async fn invoke_raw(&self, request: RequestFrame) -> LocatorResult<ReplyFrame> {
            Ok(ReplyFrame::ok(&request, b"raw".to_vec()))
        }
    }

    struct FakeConnector;

    impl LocatorConnector for FakeConnector {
        fn connect(&self, _locator: &Arc<DiscoveredLocator>) -> Arc<dyn Locator> {
            Arc::new(FakeLocator)
        }
    }

    fn shim(locator_encoding: Option<EncodingVersion>) -> TranscodingDispatchShim {
        let settings = DiscoverySettings {
            timeout: Duration::from_millis(20),
            max_attempts: 1,
            retry_delay: Duration::from_secs(1),
            instance_name: None,
        };
        let target = LookupTarget {
            destination: "239.255.0.1:4061".parse().unwrap(),
            interface: None,
            reply: "10.0.0.4:50120".parse().unwrap(),
        };
        let coordinator =
            DiscoveryCoordinator::new(settings, vec![target], Arc::new(SilentSender));

        if let Some(encoding) = locator_encoding {
            coordinator.on_reply_received(
                DiscoveredLocator::new(Identity::new("Locator", "inst1"))
                    .with_encoding(encoding)
                    .with_endpoints(vec![Endpoint::tcp("10.0.0.1", 4061)]),
            );
        }

        let facade = ForwardingFacade::new(coordinator, Arc::new(FakeConnector));
        TranscodingDispatchShim::new(Arc::new(facade))
    }

    fn request(operation: &str, encoding: EncodingVersion, payload: &[u8]) -> RequestFrame {
        RequestFrame {
            request_id: 11,
            operation: operation.into(),
            encoding,
            payload: payload.to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_passthrough_on_matching_encoding() {
        let shim = shim(Some(ENCODING_1_1));
        let request = request("findAdapterById", ENCODING_1_1, br#"{"id":"Hello"}"#);

        assert!(matches!(
            shim.select_strategy(&request).await,
            DispatchStrategy::RawForward(_)
        ));

        let reply = shim.dispatch(request).await;
        assert!(reply.is_ok());
        assert_eq!(reply.payload, b"raw");
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_on_encoding_mismatch() {
        let shim = shim(Some(ENCODING_1_1));
        let request = request("findAdapterById", ENCODING_1_0, br#"["Hello"]"#);
        assert_eq!(
            shim.select_strategy(&request).await,
            DispatchStrategy::Structured
        );

        let reply = shim.dispatch(request).await;
        assert!(reply.is_ok());
        assert_eq!(reply.encoding, ENCODING_1_0);
        let proxy = PositionalCodec.decode_result(&reply.payload).unwrap().unwrap();
        assert_eq!(proxy.adapter_id.as_deref(), Some("Hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_locator_answers_not_found_in_caller_encoding() {
        let shim = shim(None);
        let reply = shim
            .dispatch(request("findAdapterById", ENCODING_1_1, br#"{"id":"Hello"}"#))
            .await;

        assert!(reply.is_ok());
        assert_eq!(NamedCodec.decode_result(&reply.payload).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_operation() {
        let shim = shim(Some(ENCODING_1_0));
        let reply = shim
            .dispatch(request("destroy", ENCODING_1_1, b"{}"))
            .await;
        assert_eq!(reply.status, ReplyStatus::OperationNotExist);
        assert_eq!(reply.payload, b"destroy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload() {
        let shim = shim(Some(ENCODING_1_0));
        let reply = shim
            .dispatch(request("findAdapterById", ENCODING_1_1, b"not json"))
            .await;
        assert_eq!(reply.status, ReplyStatus::MarshalError);

        let reply = shim
            .dispatch(request("getRegistry", EncodingVersion::new(3, 0), b""))
            .await;
        assert_eq!(reply.status, ReplyStatus::MarshalError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_fault_reencoded() {
        let shim = shim(Some(ENCODING_1_0));
        let reply = shim
            .dispatch(request("findAdapterById", ENCODING_1_1, br#"{"id":"Missing"}"#))
            .await;

        assert_eq!(reply.status, ReplyStatus::UserException);
        let (code, message) = NamedCodec.decode_fault(&reply.payload).unwrap();
        assert_eq!(code, "AdapterNotFound");
        assert_eq!(message, "Missing");
    }
}
