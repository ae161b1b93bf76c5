use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::domains::message::{EntryStatus, PartyId, RecordedEntry};
use crate::domains::transition::FinalizedTransition;
use crate::error::{LedgerError, Result};
use crate::interfaces::identity::IdentityResolver;
use crate::interfaces::ledger::{LedgerStore, UniquenessService};
use crate::interfaces::transport::SessionNetwork;
use crate::providers::memory::{
    InMemoryLedger, InMemoryNetwork, InMemoryNotary, StaticIdentityResolver,
};
use crate::services::flow::FlowContext;
use crate::services::orchestrator::Orchestrator;
use crate::services::responder::Responder;
use crate::services::review::ReviewPolicies;

/// One party: its vault, the flows it can start and the responder that
/// answers everyone else's.
pub struct LedgerNode {
    identity: PartyId,
    ledger: Arc<dyn LedgerStore>,
    orchestrator: Orchestrator,
    events: broadcast::Sender<FinalizedTransition>,
    responder: JoinHandle<()>,
}

impl LedgerNode {
    /// Registers `identity` on `network` and starts answering its sessions.
    pub fn spawn(
        identity: PartyId,
        network: Arc<dyn SessionNetwork>,
        identities: Arc<dyn IdentityResolver>,
        notary: Arc<dyn UniquenessService>,
        timeout: Duration,
        policies: ReviewPolicies,
    ) -> Result<Self> {
        let inbox = network.register(&identity)?;
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let (events, _) = broadcast::channel(256);
        let ctx = Arc::new(FlowContext {
            identity: identity.clone(),
            ledger: ledger.clone(),
            network,
            identities,
            notary,
            timeout,
            events: events.clone(),
        });
        let responder = Responder::new(ctx.clone(), policies).spawn(inbox);
        Ok(Self {
            identity,
            ledger,
            orchestrator: Orchestrator::new(ctx),
            events,
            responder,
        })
    }

    pub fn identity(&self) -> &PartyId {
        &self.identity
    }

    pub fn flows(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Every transition this node records, as it is recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<FinalizedTransition> {
        self.events.subscribe()
    }

    pub async fn entries(&self, status: Option<EntryStatus>) -> Result<Vec<RecordedEntry>> {
        self.ledger.query_by_status(status).await
    }
}

impl Drop for LedgerNode {
    fn drop(&mut self) {
        self.responder.abort();
    }
}

/// Every configured party hosted in one process over an [`InMemoryNetwork`].
pub struct LocalNetwork {
    local: PartyId,
    nodes: BTreeMap<PartyId, LedgerNode>,
    identities: Arc<StaticIdentityResolver>,
}

impl LocalNetwork {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let parties: Vec<PartyId> = config.parties.iter().map(PartyId::new).collect();
        let notaries: Vec<PartyId> = config.notary.iter().map(PartyId::new).collect();
        let identities = Arc::new(StaticIdentityResolver::new(parties.clone(), notaries));
        let network: Arc<dyn SessionNetwork> = Arc::new(InMemoryNetwork::new());
        let notary: Arc<dyn UniquenessService> = Arc::new(InMemoryNotary::new());
        let policies = ReviewPolicies::new(config.strict_reply_signer());

        let mut nodes = BTreeMap::new();
        for party in parties {
            let node = LedgerNode::spawn(
                party.clone(),
                network.clone(),
                identities.clone(),
                notary.clone(),
                config.flow_timeout(),
                policies.clone(),
            )?;
            nodes.insert(party, node);
        }
        let local = identities.resolve_party(&config.local_party)?;
        if !nodes.contains_key(&local) {
            return Err(LedgerError::Config(format!(
                "local party {local} is not in the network map"
            )));
        }
        Ok(Self {
            local,
            nodes,
            identities,
        })
    }

    pub fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::from_file(path)?;
        Self::from_config(&config)
    }

    /// Looks a node up by full or bare organisation name.
    pub fn node(&self, name: &str) -> Result<&LedgerNode> {
        let party = self.identities.resolve_party(name)?;
        self.nodes
            .get(&party)
            .ok_or_else(|| LedgerError::UnknownParty(format!("{party} is not hosted here")))
    }

    pub fn local(&self) -> Result<&LedgerNode> {
        self.nodes
            .get(&self.local)
            .ok_or_else(|| LedgerError::UnknownParty(self.local.to_string()))
    }

    pub fn parties(&self) -> Vec<PartyId> {
        self.nodes.keys().cloned().collect()
    }
}
