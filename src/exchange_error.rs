//! ExchangeError: unified error type for the exchange layer.
//!
//! Every public operation returns `Result<_, ExchangeError>`. Errors fall into
//! three kinds (see [`ErrorKind`]): configuration problems detected before any
//! message is posted, protocol violations detected while talking to a peer,
//! and transport failures on a specific peer. None of them are retried
//! internally.

use crate::algs::communicator::TransportError;
use thiserror::Error;

/// Which process list a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListRole {
    Send,
    Receive,
}

impl std::fmt::Display for ListRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListRole::Send => f.write_str("send-list"),
            ListRole::Receive => f.write_str("receive-list"),
        }
    }
}

/// Coarse classification of an [`ExchangeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any communication.
    Configuration,
    /// Two participants disagree about who sends what to whom.
    Protocol,
    /// The transport failed for a specific peer.
    Communication,
}

/// Unified error type for exchange operations.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// A peer appears more than once in one process list.
    #[error("peer {peer} listed twice in {role}")]
    DuplicatePeer { peer: usize, role: ListRole },
    /// A listed peer is not a member of the process group.
    #[error("peer {peer} outside process group of size {group_size}")]
    PeerOutOfGroup { peer: usize, group_size: usize },
    /// Count vector and process list have different lengths.
    #[error("count table length mismatch: {expected} peers, {found} counts")]
    CountLengthMismatch { expected: usize, found: usize },
    /// The send payload does not match the sizes implied by its counts.
    #[error("payload length mismatch: expected {expected}, found {found}")]
    PayloadLengthMismatch { expected: usize, found: usize },
    /// Rejected configuration value.
    #[error("invalid exchange configuration: {0}")]
    InvalidConfig(String),
    /// The requested strategy needs a capability the backend lacks.
    #[error("unsupported by this process group: {0}")]
    Unsupported(&'static str),
    /// A peer violated an algorithm precondition.
    #[error("protocol violation with rank {peer}: {reason}")]
    Protocol { peer: usize, reason: String },
    /// The transport failed while talking to `peer`.
    #[error("communication with rank {peer} failed: {source}")]
    Communication {
        peer: usize,
        #[source]
        source: TransportError,
    },
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::DuplicatePeer { .. }
            | ExchangeError::PeerOutOfGroup { .. }
            | ExchangeError::CountLengthMismatch { .. }
            | ExchangeError::PayloadLengthMismatch { .. }
            | ExchangeError::InvalidConfig(_)
            | ExchangeError::Unsupported(_) => ErrorKind::Configuration,
            ExchangeError::Protocol { .. } => ErrorKind::Protocol,
            ExchangeError::Communication { .. } => ErrorKind::Communication,
        }
    }

    /// The peer this error names, if it names one.
    pub fn peer(&self) -> Option<usize> {
        match self {
            ExchangeError::DuplicatePeer { peer, .. }
            | ExchangeError::PeerOutOfGroup { peer, .. }
            | ExchangeError::Protocol { peer, .. }
            | ExchangeError::Communication { peer, .. } => Some(*peer),
            _ => None,
        }
    }

    /// Map a transport failure on `peer`. Length mismatches mean the two ends
    /// disagree on counts, which is a protocol problem, not a broken link.
    pub(crate) fn from_transport(peer: usize, err: TransportError) -> Self {
        match err {
            TransportError::LengthMismatch { expected, got, .. } => ExchangeError::Protocol {
                peer,
                reason: format!("expected {expected} bytes, received {got}"),
            },
            source => ExchangeError::Communication { peer, source },
        }
    }
}
