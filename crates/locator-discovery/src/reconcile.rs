// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reply reconciliation.
//!
//! Several locator replicas may answer one lookup, out of order, and
//! unrelated deployments may share the multicast group. [`reconcile`] decides
//! what an incoming reply does to the known locator. It is a pure function;
//! the coordinator applies the decision under its state lock.

use crate::types::DiscoveredLocator;

/// Outcome of reconciling one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No locator known yet: the candidate becomes the locator.
    AcceptFirst,

    /// Same locator, new endpoints: the union to publish.
    Merge(DiscoveredLocator),

    /// Same locator, no new endpoints. Counts as an acceptance.
    AlreadyKnown,

    /// Category does not match the configured or locked instance name.
    RejectInstanceMismatch,

    /// Identity or facet differs from the known locator.
    RejectIdentityMismatch,

    /// Protocol version differs from the known locator.
    RejectProtocolMismatch,
}

impl Decision {
    /// Whether the reply is accepted (fulfills a pending lookup).
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::AcceptFirst | Self::Merge(_) | Self::AlreadyKnown)
    }
}

/// Reconcile `candidate` against the `known` locator.
///
/// `instance_name` is the configured or previously locked instance name;
/// `None` or an empty string accepts any category.
pub fn reconcile(
    known: Option<&DiscoveredLocator>,
    instance_name: Option<&str>,
    candidate: &DiscoveredLocator,
) -> Decision {
    if let Some(name) = instance_name.filter(|n| !n.is_empty()) {
        if candidate.instance_name() != name {
            return Decision::RejectInstanceMismatch;
        }
    }

    let Some(known) = known else {
        return Decision::AcceptFirst;
    };

    if !known.same_object(candidate) {
        return Decision::RejectIdentityMismatch;
    }

    if known.protocol != candidate.protocol {
        return Decision::RejectProtocolMismatch;
    }

    match known.merged_with(candidate) {
        Some(merged) => Decision::Merge(merged),
        None => Decision::AlreadyKnown,
    }
}
