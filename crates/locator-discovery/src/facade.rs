// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forwarding facade: the public locator.
//!
//! Every operation is forwarded to the discovered locator. A local fault
//! (unreachable locator or an answer that cannot be understood) invalidates
//! that locator and triggers one rediscovery; if the rediscovered locator is
//! the same bad one, or fails as well, the call falls back to
//! [`VoidLocator`]. Remote faults are the locator's own answers and are
//! returned unchanged.

use crate::codec::Operation;
use crate::coordinator::DiscoveryCoordinator;
use crate::error::LocatorResult;
use crate::locator::{Locator, LocatorConnector, VoidLocator};
use crate::protocol::{ReplyFrame, RequestFrame};
use crate::types::{DiscoveredLocator, ObjectProxy};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Real forwarding calls per operation.
const MAX_FORWARDS: usize = 2;

/// Locator forwarding to whatever the coordinator discovered.
pub struct ForwardingFacade {
    coordinator: DiscoveryCoordinator,
    connector: Arc<dyn LocatorConnector>,
}

impl ForwardingFacade {
    pub fn new(coordinator: DiscoveryCoordinator, connector: Arc<dyn LocatorConnector>) -> Self {
        Self {
            coordinator,
            connector,
        }
    }

    pub fn coordinator(&self) -> &DiscoveryCoordinator {
        &self.coordinator
    }

    /// Run `call` against the discovered locator, rediscovering once on a
    /// local fault. A locator `accepts` turns down is not used.
    async fn attempt_with<T, A, F, Fut>(&self, accepts: A, call: F) -> LocatorResult<T>
    where
        T: Send,
        A: Fn(&DiscoveredLocator) -> bool + Send + Sync,
        F: Fn(Arc<dyn Locator>) -> Fut + Send + Sync,
        Fut: Future<Output = LocatorResult<T>> + Send,
    {
        let mut known_bad: Option<Arc<DiscoveredLocator>> = None;
        let mut last_fault = None;

        for _ in 0..MAX_FORWARDS {
            let Some(locator) = self.coordinator.resolve().await else {
                break;
            };
            if known_bad.as_deref() == Some(&*locator) {
                break;
            }
            if !accepts(&locator) {
                tracing::debug!("Locator {} cannot carry this call", locator);
                break;
            }

            match call(self.connector.connect(&locator)).await {
                Err(e) if e.is_local() => {
                    tracing::debug!("Forwarding to locator {} failed: {}", locator, e);
                    self.coordinator.invalidate(&locator);
                    known_bad = Some(locator);
                    last_fault = Some(e);
                }
                result => return result,
            }
        }

        if let Some(e) = last_fault {
            tracing::debug!("No usable locator, answering not found (last fault: {})", e);
        }
        call(Arc::new(VoidLocator)).await
    }
}

#[async_trait]
impl Locator for ForwardingFacade {
    async fn invoke(&self, op: &Operation) -> LocatorResult<Option<ObjectProxy>> {
        self.attempt_with(|_| true, |locator| async move { locator.invoke(op).await })
            .await
    }

    /// Fails with [`LocatorError::NotFound`](crate::error::LocatorError::NotFound)
    /// when no locator can carry the request, including one that was
    /// rediscovered with a different encoding.
    async fn invoke_raw(&self, request: RequestFrame) -> LocatorResult<ReplyFrame> {
        let request = &request;
        self.attempt_with(
            |locator| locator.encoding == request.encoding,
            |locator| {
                let request = request.clone();
                async move { locator.invoke_raw(request).await }
            },
        )
        .await
    }
}
