//! Admission verdicts.
//!
//! This module defines the [`AdmissionVerdict`] structure that represents the
//! outcome of evaluating a Pod against its namespace policy.

use serde::{Deserialize, Serialize};

/// The result of evaluating an admission request.
///
/// # Examples
///
/// ```rust
/// use gatekeeper_core::AdmissionVerdict;
///
/// let verdict = AdmissionVerdict::allow("uid-1", "no size limit for namespace dev");
/// assert!(verdict.allowed);
///
/// let denied = AdmissionVerdict::deny("uid-2", "image too large");
/// assert!(!denied.allowed);
/// assert_eq!(denied.uid, "uid-2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionVerdict {
    /// Whether the request is allowed.
    pub allowed: bool,

    /// Human-readable explanation returned to the API server.
    pub message: String,

    /// UID of the admission request this verdict answers.
    pub uid: String,

    /// True when the request was allowed without evaluating any image.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl AdmissionVerdict {
    /// Creates an allow verdict.
    #[must_use]
    pub fn allow(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            message: message.into(),
            uid: uid.into(),
            skipped: false,
        }
    }

    /// Creates an allow verdict for a request that needed no evaluation.
    #[must_use]
    pub fn skip(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::allow(uid, message)
        }
    }

    /// Creates a deny verdict.
    #[must_use]
    pub fn deny(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: message.into(),
            uid: uid.into(),
            skipped: false,
        }
    }

    /// Returns true if the request was denied.
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Returns a short label for metrics (`allowed`, `denied`, `skipped`).
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match (self.allowed, self.skipped) {
            (false, _) => "denied",
            (true, true) => "skipped",
            (true, false) => "allowed",
        }
    }
}
