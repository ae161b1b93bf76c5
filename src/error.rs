use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation rejected: {0}")]
    ValidationRejected(String),
    #[error("malformed transition: {0}")]
    MalformedTransition(String),
    #[error("counterparty rejected: {0}")]
    CounterpartyRejected(String),
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("unknown party: {0}")]
    UnknownParty(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("consensus rejected: {0}")]
    ConsensusRejected(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl LedgerError {
    /// Peer disagreement is final; only transport-level failures are worth
    /// re-proposing as a fresh transition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::PeerUnreachable(_) | LedgerError::Timeout(_))
    }

    /// The bare reason, without the category prefix used by `Display`.
    pub fn reason(&self) -> &str {
        match self {
            LedgerError::ValidationRejected(reason)
            | LedgerError::MalformedTransition(reason)
            | LedgerError::CounterpartyRejected(reason)
            | LedgerError::PeerUnreachable(reason)
            | LedgerError::Timeout(reason)
            | LedgerError::UnknownParty(reason)
            | LedgerError::NotFound(reason)
            | LedgerError::ConsensusRejected(reason)
            | LedgerError::Config(reason)
            | LedgerError::Http(reason)
            | LedgerError::Serialization(reason)
            | LedgerError::Runtime(reason) => reason,
        }
    }

    /// Stable name of the variant, carried in daemon error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::ValidationRejected(_) => "validation_rejected",
            LedgerError::MalformedTransition(_) => "malformed_transition",
            LedgerError::CounterpartyRejected(_) => "counterparty_rejected",
            LedgerError::PeerUnreachable(_) => "peer_unreachable",
            LedgerError::Timeout(_) => "timeout",
            LedgerError::UnknownParty(_) => "unknown_party",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::ConsensusRejected(_) => "consensus_rejected",
            LedgerError::Config(_) => "config",
            LedgerError::Http(_) => "http",
            LedgerError::Serialization(_) => "serialization",
            LedgerError::Runtime(_) => "runtime",
        }
    }

    pub fn from_kind(kind: &str, reason: String) -> Option<Self> {
        let err = match kind {
            "validation_rejected" => LedgerError::ValidationRejected(reason),
            "malformed_transition" => LedgerError::MalformedTransition(reason),
            "counterparty_rejected" => LedgerError::CounterpartyRejected(reason),
            "peer_unreachable" => LedgerError::PeerUnreachable(reason),
            "timeout" => LedgerError::Timeout(reason),
            "unknown_party" => LedgerError::UnknownParty(reason),
            "not_found" => LedgerError::NotFound(reason),
            "consensus_rejected" => LedgerError::ConsensusRejected(reason),
            "config" => LedgerError::Config(reason),
            "http" => LedgerError::Http(reason),
            "serialization" => LedgerError::Serialization(reason),
            "runtime" => LedgerError::Runtime(reason),
            _ => return None,
        };
        Some(err)
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
