use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domains::message::{EntryAndRef, MessageEntry, PartyId};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    Send,
    Reply,
}

impl TransitionKind {
    fn tag(self) -> &'static str {
        match self {
            TransitionKind::Send => "send",
            TransitionKind::Reply => "reply",
        }
    }
}

/// Upper-case hex SHA-256 of a transition's contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionId(String);

impl TransitionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransitionId {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LedgerError::MalformedTransition(format!(
                "'{trimmed}' is not a transaction id"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub inputs: Vec<EntryAndRef>,
    pub outputs: Vec<MessageEntry>,
    pub required_signers: BTreeSet<PartyId>,
    pub proposer: PartyId,
}

impl Transition {
    pub fn send(
        proposer: PartyId,
        outputs: Vec<MessageEntry>,
        required_signers: BTreeSet<PartyId>,
    ) -> Self {
        Self {
            kind: TransitionKind::Send,
            inputs: Vec::new(),
            outputs,
            required_signers,
            proposer,
        }
    }

    pub fn reply(
        proposer: PartyId,
        input: EntryAndRef,
        output: MessageEntry,
        required_signers: BTreeSet<PartyId>,
    ) -> Self {
        Self {
            kind: TransitionKind::Reply,
            inputs: vec![input],
            outputs: vec![output],
            required_signers,
            proposer,
        }
    }

    pub fn id(&self) -> TransitionId {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, self.kind.tag());
        hash_field(&mut hasher, self.proposer.as_str());
        hasher.update((self.inputs.len() as u64).to_be_bytes());
        for input in &self.inputs {
            hash_field(&mut hasher, input.reference.tx_id.as_str());
            hasher.update((input.reference.index as u64).to_be_bytes());
            hash_entry(&mut hasher, &input.entry);
        }
        hasher.update((self.outputs.len() as u64).to_be_bytes());
        for output in &self.outputs {
            hash_entry(&mut hasher, output);
        }
        hasher.update((self.required_signers.len() as u64).to_be_bytes());
        for signer in &self.required_signers {
            hash_field(&mut hasher, signer.as_str());
        }
        let digest = hasher.finalize();
        TransitionId(digest.iter().map(|b| format!("{b:02X}")).collect())
    }

    /// Every party named by an input or an output, in first-seen order.
    pub fn participants(&self) -> Vec<PartyId> {
        let mut seen = Vec::new();
        let named = self
            .inputs
            .iter()
            .flat_map(|input| input.entry.participants())
            .chain(self.outputs.iter().flat_map(|output| output.participants()));
        for party in named {
            if !seen.contains(party) {
                seen.push(party.clone());
            }
        }
        seen
    }

    /// Parties the proposer has to open a session with: participants and
    /// required signers, minus the proposer itself.
    pub fn counterparties(&self) -> Vec<PartyId> {
        let mut parties = self.participants();
        for signer in &self.required_signers {
            if !parties.contains(signer) {
                parties.push(signer.clone());
            }
        }
        parties.retain(|party| party != &self.proposer);
        parties
    }
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn hash_entry(hasher: &mut Sha256, entry: &MessageEntry) {
    hash_field(hasher, entry.id.as_str());
    hash_field(hasher, entry.sender.as_str());
    hash_field(hasher, entry.recipient.as_str());
    hash_field(hasher, &entry.contents);
}

/// A transition together with the parties that have approved it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransition {
    pub transition: Transition,
    pub signers: BTreeSet<PartyId>,
}

impl SignedTransition {
    pub fn new(transition: Transition) -> Self {
        Self {
            transition,
            signers: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> TransitionId {
        self.transition.id()
    }

    pub fn add_signature(&mut self, signer: PartyId) {
        self.signers.insert(signer);
    }

    pub fn missing_signers(&self) -> Vec<PartyId> {
        self.transition
            .required_signers
            .difference(&self.signers)
            .cloned()
            .collect()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.transition.required_signers.is_subset(&self.signers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedTransition {
    pub id: TransitionId,
    pub signed: SignedTransition,
    pub finalized_at: i64,
}

impl FinalizedTransition {
    pub fn new(signed: SignedTransition, finalized_at: i64) -> Self {
        Self {
            id: signed.id(),
            signed,
            finalized_at,
        }
    }

    pub fn transition(&self) -> &Transition {
        &self.signed.transition
    }

    /// The claimed id must match the contents it names.
    pub fn is_consistent(&self) -> bool {
        self.id == self.signed.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(name: &str) -> PartyId {
        PartyId::new(name)
    }

    #[test]
    fn ids_are_stable_and_content_addressed() {
        let entry = MessageEntry::new(party("A"), party("B"), "hi");
        let signers: BTreeSet<PartyId> = [party("A"), party("B")].into_iter().collect();
        let tx = Transition::send(party("A"), vec![entry.clone()], signers.clone());
        assert_eq!(tx.id(), tx.clone().id());
        assert_eq!(tx.id().as_str().len(), 64);

        let mut other = tx.clone();
        other.outputs[0].contents = "bye".to_string();
        assert_ne!(tx.id(), other.id());
    }

    #[test]
    fn transaction_ids_parse_case_insensitively() {
        let id: TransitionId = "ab".repeat(32).parse().unwrap();
        assert_eq!(id.as_str(), "AB".repeat(32));
        assert!("xyz".parse::<TransitionId>().is_err());
    }

    #[test]
    fn counterparties_exclude_proposer_and_keep_order() {
        let entry = MessageEntry::new(party("A"), party("B"), "hi");
        let signers: BTreeSet<PartyId> = [party("A"), party("B")].into_iter().collect();
        let tx = Transition::send(party("A"), vec![entry], signers);
        assert_eq!(tx.counterparties(), vec![party("B")]);
    }

    #[test]
    fn signature_tracking() {
        let entry = MessageEntry::new(party("A"), party("B"), "hi");
        let signers: BTreeSet<PartyId> = [party("A"), party("B")].into_iter().collect();
        let mut signed = SignedTransition::new(Transition::send(party("A"), vec![entry], signers));
        signed.add_signature(party("A"));
        assert!(!signed.is_fully_signed());
        assert_eq!(signed.missing_signers(), vec![party("B")]);
        signed.add_signature(party("B"));
        assert!(signed.is_fully_signed());
    }
}
