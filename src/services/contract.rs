//! Validation rules every party applies before it signs or records a
//! transition. Pure functions of their arguments: the same transition always
//! gets the same verdict.

use std::collections::BTreeSet;
use std::fmt;

use crate::domains::message::PartyId;
use crate::domains::transition::{SignedTransition, Transition, TransitionKind};
use crate::error::LedgerError;

pub const SEND_CONSUMES_INPUTS: &str = "send must not consume inputs";
pub const SEND_OUTPUT_COUNT: &str = "send must produce exactly one entry";
pub const REPLY_INPUT_COUNT: &str = "reply must consume exactly one entry";
pub const REPLY_OUTPUT_COUNT: &str = "reply must produce exactly one entry";
pub const REPLY_SENDER: &str = "only the original recipient may reply";
pub const REPLY_RECIPIENT: &str = "reply must return to original sender";
pub const REPLY_PARTICIPANTS_SIGN: &str = "original participants must sign";
pub const UNAUTHORIZED_SIGNERS: &str = "unauthorized signer set";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Cardinality is wrong; the transition is not worth sending to anyone.
    Malformed,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    fn malformed(reason: &str) -> Self {
        Self {
            kind: RejectionKind::Malformed,
            reason: reason.to_string(),
        }
    }

    fn rule(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Rule,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<Rejection> for LedgerError {
    fn from(rejection: Rejection) -> Self {
        match rejection.kind {
            RejectionKind::Malformed => LedgerError::MalformedTransition(rejection.reason),
            RejectionKind::Rule => LedgerError::ValidationRejected(rejection.reason),
        }
    }
}

fn require(condition: bool, rejection: impl FnOnce() -> Rejection) -> Result<(), Rejection> {
    if condition {
        Ok(())
    } else {
        Err(rejection())
    }
}

/// Checks a proposed transition against its declared signer set.
pub fn verify(transition: &Transition) -> Result<(), Rejection> {
    verify_with_signers(transition, &transition.required_signers)
}

/// Checks a transition at finality: every required signer has approved and
/// the rules still hold for the parties that actually signed.
pub fn verify_signed(signed: &SignedTransition) -> Result<(), Rejection> {
    let missing = signed.missing_signers();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|party| party.to_string()).collect();
        return Err(Rejection::rule(format!(
            "missing signatures from {}",
            names.join("; ")
        )));
    }
    verify(&signed.transition)?;
    verify_with_signers(&signed.transition, &signed.signers)
}

fn verify_with_signers(
    transition: &Transition,
    signers: &BTreeSet<PartyId>,
) -> Result<(), Rejection> {
    match transition.kind {
        TransitionKind::Send => verify_send(transition),
        TransitionKind::Reply => verify_reply(transition, signers),
    }
}

fn verify_send(transition: &Transition) -> Result<(), Rejection> {
    require(transition.inputs.is_empty(), || {
        Rejection::malformed(SEND_CONSUMES_INPUTS)
    })?;
    require(transition.outputs.len() == 1, || {
        Rejection::malformed(SEND_OUTPUT_COUNT)
    })
}

fn verify_reply(transition: &Transition, signers: &BTreeSet<PartyId>) -> Result<(), Rejection> {
    let [input] = transition.inputs.as_slice() else {
        return Err(Rejection::malformed(REPLY_INPUT_COUNT));
    };
    let [output] = transition.outputs.as_slice() else {
        return Err(Rejection::malformed(REPLY_OUTPUT_COUNT));
    };
    let input = &input.entry;

    require(output.sender == input.recipient, || Rejection::rule(REPLY_SENDER))?;
    require(output.recipient == input.sender, || {
        Rejection::rule(REPLY_RECIPIENT)
    })?;
    require(
        signers.contains(&input.sender) && signers.contains(&input.recipient),
        || Rejection::rule(REPLY_PARTICIPANTS_SIGN),
    )?;

    // Generalised move rule: whoever is named on either side must sign.
    let authorized = transition
        .participants()
        .iter()
        .all(|party| signers.contains(party));
    require(authorized, || Rejection::rule(UNAUTHORIZED_SIGNERS))
}
