use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domains::message::PartyId;
use crate::domains::transition::{FinalizedTransition, Transition};

/// Which proposer flow opened a session. Responders use it for logging and
/// for optional per-flow review predicates, never to skip reply checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    SendMessage,
    ReplyToMessage,
    CreateStates,
    ConsumeState,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowKind::SendMessage => "SendMessage",
            FlowKind::ReplyToMessage => "ReplyToMessage",
            FlowKind::CreateStates => "CreateStates",
            FlowKind::ConsumeState => "ConsumeState",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowMessage {
    Propose {
        flow: FlowKind,
        transition: Transition,
    },
    Signature {
        signer: PartyId,
    },
    Rejected {
        reason: String,
    },
    Finalize {
        finalized: FinalizedTransition,
    },
    Recorded,
    Broadcast {
        finalized: FinalizedTransition,
    },
}

impl FlowMessage {
    pub fn label(&self) -> &'static str {
        match self {
            FlowMessage::Propose { .. } => "propose",
            FlowMessage::Signature { .. } => "signature",
            FlowMessage::Rejected { .. } => "rejected",
            FlowMessage::Finalize { .. } => "finalize",
            FlowMessage::Recorded => "recorded",
            FlowMessage::Broadcast { .. } => "broadcast",
        }
    }
}

pub type SessionId = u64;
