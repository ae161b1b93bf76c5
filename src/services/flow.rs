use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domains::message::PartyId;
use crate::domains::transition::{FinalizedTransition, TransitionId};
use crate::domains::wire::FlowMessage;
use crate::error::{LedgerError, Result};
use crate::interfaces::identity::IdentityResolver;
use crate::interfaces::ledger::{LedgerStore, UniquenessService};
use crate::interfaces::transport::{BoxedSession, SessionNetwork};

pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowRole {
    Proposer,
    Responder,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Building,
    LocalValidate,
    AwaitingSignatures,
    CounterpartyReview,
    Finalizing,
    Finalized,
    Aborted,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Finalized | FlowState::Aborted)
    }

    fn leads_to(self, next: FlowState) -> bool {
        use FlowState::*;
        match (self, next) {
            (from, Aborted) => !from.is_terminal(),
            (Building, LocalValidate)
            | (LocalValidate, AwaitingSignatures)
            | (AwaitingSignatures, Finalizing)
            | (CounterpartyReview, Finalizing)
            | (Finalizing, Finalized) => true,
            _ => false,
        }
    }
}

/// Where one party is in one transition. Illegal moves are errors rather
/// than silently ignored.
#[derive(Debug, Clone)]
pub struct FlowProgress {
    label: String,
    role: FlowRole,
    state: FlowState,
    history: Vec<FlowState>,
}

impl FlowProgress {
    fn starting(label: String, role: FlowRole, state: FlowState) -> Self {
        debug!(flow = %label, ?role, ?state, "flow started");
        Self {
            label,
            role,
            state,
            history: vec![state],
        }
    }

    pub fn proposer(label: impl Into<String>) -> Self {
        Self::starting(label.into(), FlowRole::Proposer, FlowState::Building)
    }

    pub fn responder(label: impl Into<String>) -> Self {
        Self::starting(
            label.into(),
            FlowRole::Responder,
            FlowState::CounterpartyReview,
        )
    }

    pub fn observer(label: impl Into<String>) -> Self {
        Self::starting(label.into(), FlowRole::Observer, FlowState::Finalizing)
    }

    pub fn role(&self) -> FlowRole {
        self.role
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn history(&self) -> &[FlowState] {
        &self.history
    }

    pub fn advance(&mut self, next: FlowState) -> Result<()> {
        if !self.state.leads_to(next) {
            return Err(LedgerError::Runtime(format!(
                "{}: illegal flow transition {:?} -> {:?}",
                self.label, self.state, next
            )));
        }
        debug!(flow = %self.label, from = ?self.state, to = ?next, "flow advanced");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Aborted` and hands the error back for propagation.
    pub fn abort(&mut self, err: LedgerError) -> LedgerError {
        warn!(flow = %self.label, role = ?self.role, state = ?self.state, error = %err, "flow aborted");
        if !self.state.is_terminal() {
            self.state = FlowState::Aborted;
            self.history.push(FlowState::Aborted);
        }
        err
    }
}

/// Everything a party's flows need from the platform.
pub struct FlowContext {
    pub identity: PartyId,
    pub ledger: Arc<dyn LedgerStore>,
    pub network: Arc<dyn SessionNetwork>,
    pub identities: Arc<dyn IdentityResolver>,
    pub notary: Arc<dyn UniquenessService>,
    pub timeout: Duration,
    pub events: broadcast::Sender<FinalizedTransition>,
}

impl FlowContext {
    /// Waits at most `timeout` for the counterparty's next message.
    pub async fn receive(&self, session: &mut BoxedSession) -> Result<FlowMessage> {
        let peer = session.counterparty().clone();
        match tokio::time::timeout(self.timeout, session.receive()).await {
            Ok(message) => message,
            Err(_) => Err(LedgerError::Timeout(format!(
                "no response from {peer} within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    pub fn publish(&self, finalized: &FinalizedTransition) {
        // No subscribers is fine.
        let _ = self.events.send(finalized.clone());
    }
}

pub fn flow_label(name: &str, id: &TransitionId) -> String {
    format!("{name}[{}]", &id.as_str()[..12.min(id.as_str().len())])
}

pub fn now_ts() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposer_path() {
        let mut progress = FlowProgress::proposer("send");
        progress.advance(FlowState::LocalValidate).unwrap();
        progress.advance(FlowState::AwaitingSignatures).unwrap();
        progress.advance(FlowState::Finalizing).unwrap();
        progress.advance(FlowState::Finalized).unwrap();
        assert_eq!(progress.history().len(), 5);
        assert!(progress.state().is_terminal());
    }

    #[test]
    fn skipping_validation_is_refused() {
        let mut progress = FlowProgress::proposer("send");
        assert!(progress.advance(FlowState::AwaitingSignatures).is_err());
        assert_eq!(progress.state(), FlowState::Building);
    }

    #[test]
    fn abort_is_terminal() {
        let mut progress = FlowProgress::responder("reply");
        let err = progress.abort(LedgerError::CounterpartyRejected("no".to_string()));
        assert!(matches!(err, LedgerError::CounterpartyRejected(_)));
        assert_eq!(progress.state(), FlowState::Aborted);
        assert!(progress.advance(FlowState::Finalizing).is_err());
    }
}
