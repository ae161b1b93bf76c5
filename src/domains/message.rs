use std::fmt;
use std::str::FromStr;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::domains::transition::TransitionId;
use crate::error::LedgerError;

/// Opaque, globally unique party name, e.g. `O=PartyB, L=London, C=GB`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Random v4 UUID.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Consumed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Consumed => "consumed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "unconsumed" => Ok(EntryStatus::Active),
            "consumed" => Ok(EntryStatus::Consumed),
            other => Err(LedgerError::MalformedTransition(format!(
                "unknown entry status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub id: EntryId,
    pub sender: PartyId,
    pub recipient: PartyId,
    pub contents: String,
}

impl MessageEntry {
    pub fn new(sender: PartyId, recipient: PartyId, contents: impl Into<String>) -> Self {
        Self {
            id: EntryId::generate(),
            sender,
            recipient,
            contents: contents.into(),
        }
    }

    /// Parties whose approval is needed to move this entry.
    pub fn participants(&self) -> [&PartyId; 2] {
        [&self.sender, &self.recipient]
    }
}

/// Position of an entry among the outputs of the transition that created it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub tx_id: TransitionId,
    pub index: usize,
}

impl StateRef {
    pub fn new(tx_id: TransitionId, index: usize) -> Self {
        Self { tx_id, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tx_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAndRef {
    pub reference: StateRef,
    pub entry: MessageEntry,
}

/// A vault row: the entry, where it came from and where it is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEntry {
    pub reference: StateRef,
    pub entry: MessageEntry,
    pub status: EntryStatus,
    /// Received as a read-only broadcast copy rather than as a participant.
    pub observed: bool,
}

impl RecordedEntry {
    pub fn as_input(&self) -> EntryAndRef {
        EntryAndRef {
            reference: self.reference.clone(),
            entry: self.entry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_look_like_uuids() {
        let id = EntryId::generate();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[2].chars().next(), Some('4'));
        assert_ne!(id, EntryId::generate());
    }

    #[test]
    fn status_parsing() {
        assert_eq!("Active".parse::<EntryStatus>().unwrap(), EntryStatus::Active);
        assert_eq!(
            "consumed".parse::<EntryStatus>().unwrap(),
            EntryStatus::Consumed
        );
        assert!("spent".parse::<EntryStatus>().is_err());
    }
}
