// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The locator interface and its null implementation.

use crate::codec::Operation;
use crate::error::{LocatorError, LocatorResult};
use crate::protocol::{ReplyFrame, RequestFrame};
use crate::types::{DiscoveredLocator, Identity, ObjectProxy};
use async_trait::async_trait;
use std::sync::Arc;

/// A locator: resolves identities and adapter ids to proxies.
///
/// Implementations provide [`Locator::invoke`] and [`Locator::invoke_raw`];
/// the typed operations are expressed in terms of `invoke`. `Ok(None)` is the
/// not-found answer.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Invoke a decoded operation.
    async fn invoke(&self, op: &Operation) -> LocatorResult<Option<ObjectProxy>>;

    /// Carry an already-encoded request unchanged.
    async fn invoke_raw(&self, request: RequestFrame) -> LocatorResult<ReplyFrame>;

    async fn find_object_by_id(
        &self,
        identity: &Identity,
        facet: &str,
    ) -> LocatorResult<Option<ObjectProxy>> {
        self.invoke(&Operation::FindObjectById {
            identity: identity.clone(),
            facet: facet.to_string(),
        })
        .await
    }

    async fn find_adapter_by_id(&self, id: &str) -> LocatorResult<Option<ObjectProxy>> {
        self.invoke(&Operation::FindAdapterById { id: id.to_string() })
            .await
    }

    async fn get_registry(&self) -> LocatorResult<Option<ObjectProxy>> {
        self.invoke(&Operation::GetRegistry).await
    }

    async fn resolve_location(&self, location: &[String]) -> LocatorResult<Option<ObjectProxy>> {
        self.invoke(&Operation::ResolveLocation {
            location: location.to_vec(),
        })
        .await
    }

    async fn resolve_well_known_proxy(
        &self,
        identity: &Identity,
    ) -> LocatorResult<Option<ObjectProxy>> {
        self.invoke(&Operation::ResolveWellKnownProxy {
            identity: identity.clone(),
        })
        .await
    }
}

/// Builds a callable [`Locator`] from a discovered handle.
pub trait LocatorConnector: Send + Sync {
    fn connect(&self, locator: &Arc<DiscoveredLocator>) -> Arc<dyn Locator>;
}

/// Locator that knows nothing.
///
/// Every structured operation answers not-found; opaque requests cannot be
/// answered and fail with [`LocatorError::NotFound`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidLocator;

#[async_trait]
impl Locator for VoidLocator {
    async fn invoke(&self, _op: &Operation) -> LocatorResult<Option<ObjectProxy>> {
        Ok(None)
    }

    async fn invoke_raw(&self, _request: RequestFrame) -> LocatorResult<ReplyFrame> {
        Err(LocatorError::NotFound)
    }
}
