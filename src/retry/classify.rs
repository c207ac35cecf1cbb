use crate::transport::TransportError;
use crate::{Failure, FailureKind};

/// Splits failures into transient (worth retrying) and permanent
///
/// | Failure | Transient when |
/// |---------|----------------|
/// | HTTP status | listed in `statuses`, or 5xx with `server_errors` |
/// | Timeout | `timeouts` |
/// | Connect / reset | `network` |
/// | Invalid request, body, other | never |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    /// Statuses retried regardless of `server_errors`
    pub statuses: Vec<u16>,
    /// Treat every 5xx as transient
    pub server_errors: bool,
    /// Treat transport timeouts as transient
    pub timeouts: bool,
    /// Treat refused and reset connections as transient
    pub network: bool,
}

impl Classifier {
    /// Only HTTP statuses: 5xx, 408 and 429
    pub fn http_only() -> Self {
        Self {
            statuses: vec![408, 429],
            server_errors: true,
            timeouts: false,
            network: false,
        }
    }

    /// HTTP statuses plus every network-level hiccup
    pub fn tolerant() -> Self {
        Self {
            statuses: vec![408, 429],
            server_errors: true,
            timeouts: true,
            network: true,
        }
    }

    /// Throttling and gateway statuses plus timeouts
    pub fn narrow() -> Self {
        Self {
            statuses: vec![429, 502, 503, 504],
            server_errors: false,
            timeouts: true,
            network: false,
        }
    }

    /// Returns [`FailureKind::Transient`] or [`FailureKind::Permanent`]
    pub fn classify(&self, failure: &Failure) -> FailureKind {
        let transient = match failure {
            Failure::Status(code) => {
                self.statuses.contains(code) || (self.server_errors && (500..600).contains(code))
            }
            Failure::Transport(TransportError::Timeout) => self.timeouts,
            Failure::Transport(TransportError::Connect | TransportError::Reset) => self.network,
            Failure::Transport(_) => false,
        };

        if transient {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::http_only()
    }
}
