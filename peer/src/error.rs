//! Failure taxonomy for the match layer
//!
//! Fatal variants end the match and surface exactly once through the abort
//! report. The rest are logged and the offending operation is dropped.

use shared::{PeerId, RpcKind};

pub const CODE_MISSING_PARAMETERS: &str = "1004";
pub const CODE_TIMEOUT: &str = "1011";
pub const CODE_MISSING_COMPONENTS: &str = "1014";
pub const CODE_LEFT_BEFORE_START: &str = "1018";
pub const CODE_UNEXPECTED_PEER_COUNT: &str = "1019";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("setup failed: {reason}")]
    Setup { reason: String, code: &'static str },

    #[error("{operation} attempted by {peer} without state authority")]
    AuthorityViolation {
        peer: PeerId,
        operation: &'static str,
    },

    #[error("{kind:?} from {sender} rejected: {reason}")]
    SourceRejected {
        sender: PeerId,
        kind: RpcKind,
        reason: &'static str,
    },

    #[error("timed out waiting for {waiting_for} after {ticks} ticks")]
    Timeout {
        waiting_for: &'static str,
        ticks: u64,
    },

    #[error("unexpected peer count: {remaining} active after leave")]
    UnexpectedPeerCount { remaining: usize },

    #[error("session full, {peer} rejected")]
    SessionFull { peer: PeerId },
}

impl MatchError {
    pub fn setup(reason: impl Into<String>, code: &'static str) -> Self {
        MatchError::Setup {
            reason: reason.into(),
            code,
        }
    }

    /// Fatal errors abort the match; the others only drop the operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MatchError::Setup { .. }
                | MatchError::Timeout { .. }
                | MatchError::UnexpectedPeerCount { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            MatchError::Setup { code, .. } => code,
            MatchError::Timeout { .. } => CODE_TIMEOUT,
            MatchError::UnexpectedPeerCount { .. } => CODE_UNEXPECTED_PEER_COUNT,
            MatchError::AuthorityViolation { .. }
            | MatchError::SourceRejected { .. }
            | MatchError::SessionFull { .. } => "",
        }
    }

    /// Short human-readable headline for the abort report.
    pub fn headline(&self) -> &'static str {
        match self {
            MatchError::Setup { .. } => "Game setup failed",
            MatchError::Timeout { .. } => "Game setup failed",
            MatchError::UnexpectedPeerCount { .. } => "Player left the game",
            MatchError::AuthorityViolation { .. } => "Authority violation",
            MatchError::SourceRejected { .. } => "Message rejected",
            MatchError::SessionFull { .. } => "Session full",
        }
    }
}
