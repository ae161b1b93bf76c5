use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::domains::message::{EntryStatus, PartyId, RecordedEntry, StateRef};
use crate::domains::transition::{FinalizedTransition, TransitionId};
use crate::domains::wire::{FlowMessage, SessionId};
use crate::error::{LedgerError, Result};
use crate::interfaces::identity::IdentityResolver;
use crate::interfaces::ledger::{LedgerStore, RecordRole, UniquenessService};
use crate::interfaces::transport::{BoxedSession, FlowSession, Inbox, SessionNetwork};

#[derive(Default)]
struct Vault {
    transitions: Vec<FinalizedTransition>,
    index: HashMap<TransitionId, usize>,
    entries: HashMap<StateRef, RecordedEntry>,
    order: Vec<StateRef>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    vault: RwLock<Vault>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            vault: RwLock::new(Vault::default()),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn record(&self, finalized: &FinalizedTransition, role: RecordRole) -> Result<()> {
        if !finalized.is_consistent() {
            return Err(LedgerError::ConsensusRejected(format!(
                "transaction {} does not match its contents",
                finalized.id
            )));
        }

        let mut vault = self.vault.write().await;
        if vault.index.contains_key(&finalized.id) {
            return Ok(());
        }

        let transition = finalized.transition();
        for input in &transition.inputs {
            if let Some(existing) = vault.entries.get(&input.reference) {
                if existing.status == EntryStatus::Consumed {
                    return Err(LedgerError::ConsensusRejected(format!(
                        "input {} already consumed",
                        input.reference
                    )));
                }
            }
        }

        for input in &transition.inputs {
            if let Some(existing) = vault.entries.get_mut(&input.reference) {
                existing.status = EntryStatus::Consumed;
            }
        }
        for (index, output) in transition.outputs.iter().enumerate() {
            let reference = StateRef::new(finalized.id.clone(), index);
            vault.order.push(reference.clone());
            vault.entries.insert(
                reference.clone(),
                RecordedEntry {
                    reference,
                    entry: output.clone(),
                    status: EntryStatus::Active,
                    observed: role == RecordRole::Observer,
                },
            );
        }
        let position = vault.transitions.len();
        vault.index.insert(finalized.id.clone(), position);
        vault.transitions.push(finalized.clone());
        Ok(())
    }

    async fn load_entry(&self, reference: &StateRef) -> Result<RecordedEntry> {
        let vault = self.vault.read().await;
        vault
            .entries
            .get(reference)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("no entry at {reference}")))
    }

    async fn load_transition(&self, id: &TransitionId) -> Result<FinalizedTransition> {
        let vault = self.vault.read().await;
        vault
            .index
            .get(id)
            .and_then(|position| vault.transitions.get(*position))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("no transaction {id}")))
    }

    async fn query_by_status(&self, status: Option<EntryStatus>) -> Result<Vec<RecordedEntry>> {
        let vault = self.vault.read().await;
        Ok(vault
            .order
            .iter()
            .filter_map(|reference| vault.entries.get(reference))
            .filter(|entry| status.map_or(true, |wanted| entry.status == wanted))
            .cloned()
            .collect())
    }

    async fn transitions(&self) -> Result<Vec<FinalizedTransition>> {
        Ok(self.vault.read().await.transitions.clone())
    }
}

/// Single uniqueness authority shared by every party of a local network.
#[derive(Default)]
pub struct InMemoryNotary {
    consumed: RwLock<HashMap<StateRef, TransitionId>>,
}

impl InMemoryNotary {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UniquenessService for InMemoryNotary {
    async fn commit(&self, id: &TransitionId, inputs: &[StateRef]) -> Result<()> {
        let mut consumed = self.consumed.write().await;
        for input in inputs {
            if let Some(spender) = consumed.get(input) {
                if spender != id {
                    return Err(LedgerError::ConsensusRejected(format!(
                        "input {input} already consumed by {spender}"
                    )));
                }
            }
        }
        for input in inputs {
            consumed.insert(input.clone(), id.clone());
        }
        Ok(())
    }
}

type SessionKey = (PartyId, SessionId);

#[derive(Default)]
struct Routes {
    inboxes: HashMap<PartyId, mpsc::UnboundedSender<BoxedSession>>,
    sessions: HashMap<SessionKey, mpsc::UnboundedSender<FlowMessage>>,
}

/// Channel-backed session network for parties hosted in one process.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    routes: Arc<Mutex<Routes>>,
    next_session: Arc<AtomicU64>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Routes>> {
        lock_routes(&self.routes)
    }
}

fn lock_routes(routes: &Mutex<Routes>) -> Result<std::sync::MutexGuard<'_, Routes>> {
    routes
        .lock()
        .map_err(|_| LedgerError::Runtime("session routes poisoned".to_string()))
}

impl SessionNetwork for InMemoryNetwork {
    fn register(&self, party: &PartyId) -> Result<Inbox> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()?.inboxes.insert(party.clone(), tx);
        Ok(rx)
    }

    fn open_session(&self, from: &PartyId, to: &PartyId) -> Result<BoxedSession> {
        let mut routes = self.lock()?;
        if !routes.inboxes.contains_key(to) {
            return Err(LedgerError::PeerUnreachable(format!("no route to {to}")));
        }
        let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        routes.sessions.insert((from.clone(), id), tx);
        Ok(Box::new(InMemorySession {
            id,
            local: from.clone(),
            peer: to.clone(),
            incoming: rx,
            routes: self.routes.clone(),
            announced: false,
        }))
    }
}

struct InMemorySession {
    id: SessionId,
    local: PartyId,
    peer: PartyId,
    incoming: mpsc::UnboundedReceiver<FlowMessage>,
    routes: Arc<Mutex<Routes>>,
    announced: bool,
}

impl InMemorySession {
    fn closed(&self) -> LedgerError {
        LedgerError::PeerUnreachable(format!("{} closed the session", self.peer))
    }
}

#[async_trait]
impl FlowSession for InMemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn counterparty(&self) -> &PartyId {
        &self.peer
    }

    async fn send(&mut self, message: FlowMessage) -> Result<()> {
        let mut routes = lock_routes(&self.routes)?;
        let peer_key = (self.peer.clone(), self.id);
        if let Some(route) = routes.sessions.get(&peer_key) {
            return route.send(message).map_err(|_| self.closed());
        }
        if self.announced {
            return Err(self.closed());
        }

        // First message: create the peer's half and hand it to its inbox.
        let inbox = routes
            .inboxes
            .get(&self.peer)
            .cloned()
            .ok_or_else(|| LedgerError::PeerUnreachable(format!("no route to {}", self.peer)))?;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(message).map_err(|_| self.closed())?;
        let remote = InMemorySession {
            id: self.id,
            local: self.peer.clone(),
            peer: self.local.clone(),
            incoming: rx,
            routes: self.routes.clone(),
            announced: true,
        };
        routes.sessions.insert(peer_key.clone(), tx);
        if let Err(refused) = inbox.send(Box::new(remote)) {
            routes.sessions.remove(&peer_key);
            // The refused half locks the routes when it drops.
            drop(routes);
            drop(refused);
            return Err(LedgerError::PeerUnreachable(format!(
                "{} is not accepting sessions",
                self.peer
            )));
        }
        self.announced = true;
        Ok(())
    }

    async fn receive(&mut self) -> Result<FlowMessage> {
        match self.incoming.recv().await {
            Some(message) => Ok(message),
            None => Err(self.closed()),
        }
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        // Closing either half closes the conversation for both parties.
        if let Ok(mut routes) = self.routes.lock() {
            routes.sessions.remove(&(self.local.clone(), self.id));
            routes.sessions.remove(&(self.peer.clone(), self.id));
        }
    }
}

/// Network map fixed at start-up.
pub struct StaticIdentityResolver {
    parties: Vec<PartyId>,
    notaries: Vec<PartyId>,
}

impl StaticIdentityResolver {
    pub fn new(parties: Vec<PartyId>, notaries: Vec<PartyId>) -> Self {
        Self { parties, notaries }
    }
}

fn normalize(name: &str) -> String {
    name.split(',')
        .map(|part| {
            part.split('=')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("=")
        })
        .collect::<Vec<_>>()
        .join(", ")
        .to_ascii_lowercase()
}

fn organisation(name: &str) -> Option<String> {
    name.split(',').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        (key.trim().eq_ignore_ascii_case("o")).then(|| value.trim().to_ascii_lowercase())
    })
}

impl IdentityResolver for StaticIdentityResolver {
    /// Accepts a full name in any spacing, or a bare organisation such as
    /// `PartyB`.
    fn resolve_party(&self, name: &str) -> Result<PartyId> {
        let wanted = normalize(name);
        let bare = (!name.contains('=')).then(|| name.trim().to_ascii_lowercase());
        self.parties
            .iter()
            .chain(self.notaries.iter())
            .find(|party| {
                normalize(party.as_str()) == wanted
                    || (bare.is_some() && organisation(party.as_str()) == bare)
            })
            .cloned()
            .ok_or_else(|| LedgerError::UnknownParty(name.trim().to_string()))
    }

    fn all_parties(&self) -> Vec<PartyId> {
        self.parties.clone()
    }

    fn notaries(&self) -> Vec<PartyId> {
        self.notaries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_full_and_bare_names() {
        let resolver = StaticIdentityResolver::new(
            vec![PartyId::new("O=PartyB, L=London, C=GB")],
            vec![PartyId::new("O=Notary, L=London, C=GB")],
        );
        let full = resolver.resolve_party("O=PartyB,L=London,C=GB").unwrap();
        assert_eq!(full.as_str(), "O=PartyB, L=London, C=GB");
        assert_eq!(resolver.resolve_party("partyb").unwrap(), full);
        assert!(matches!(
            resolver.resolve_party("O=PartyZ, L=Paris, C=FR"),
            Err(LedgerError::UnknownParty(_))
        ));
    }

    #[tokio::test]
    async fn sessions_deliver_in_order_and_close_together() {
        let network = InMemoryNetwork::new();
        let a = PartyId::new("A");
        let b = PartyId::new("B");
        network.register(&a).unwrap();
        let mut inbox = network.register(&b).unwrap();

        let mut session = network.open_session(&a, &b).unwrap();
        session.send(FlowMessage::Recorded).await.unwrap();
        session
            .send(FlowMessage::Rejected {
                reason: "second".to_string(),
            })
            .await
            .unwrap();

        let mut remote = inbox.recv().await.unwrap();
        assert_eq!(remote.counterparty(), &a);
        assert_eq!(remote.receive().await.unwrap(), FlowMessage::Recorded);
        assert_eq!(remote.receive().await.unwrap().label(), "rejected");

        drop(session);
        assert!(matches!(
            remote.receive().await,
            Err(LedgerError::PeerUnreachable(_))
        ));
    }

    #[test]
    fn unknown_peers_are_unreachable() {
        let network = InMemoryNetwork::new();
        let result = network.open_session(&PartyId::new("A"), &PartyId::new("Z"));
        assert!(matches!(result, Err(LedgerError::PeerUnreachable(_))));
    }
}
