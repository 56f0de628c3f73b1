//! Requester entitlement and access decisions.

use serde::{Deserialize, Serialize};

/// Role attached to a configured access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authenticated member without a premium entitlement.
    Member,
    /// Authenticated member with a premium entitlement.
    Premium,
    /// Administrator: full access, including uploads and deletes.
    Admin,
}

/// The identity making a request, as established by the auth layer.
///
/// The core consumes only the yes/no entitlement result; how a requester was
/// authenticated is the HTTP layer's concern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    Member { premium: bool },
    Admin,
}

impl Requester {
    pub fn from_role(role: Role) -> Self {
        match role {
            Role::Member => Self::Member { premium: false },
            Role::Premium => Self::Member { premium: true },
            Role::Admin => Self::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Why access was denied. Distinguishes 401 from 403 at the HTTP layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// No authenticated identity on premium content.
    Unauthenticated,
    /// Authenticated but lacking the premium entitlement.
    NotEntitled,
}

/// Per-request access decision. Computed, consumed, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(DenyReason),
}

impl AccessDecision {
    /// Decide whether `requester` may view content with the given premium flag.
    ///
    /// Non-premium content is public. Premium content requires an
    /// authenticated requester with the premium entitlement, or an admin.
    pub fn evaluate(requester: Requester, premium_content: bool) -> Self {
        if !premium_content {
            return Self::Allowed;
        }
        match requester {
            Requester::Anonymous => Self::Denied(DenyReason::Unauthenticated),
            Requester::Member { premium: false } => Self::Denied(DenyReason::NotEntitled),
            Requester::Member { premium: true } | Requester::Admin => Self::Allowed,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}
