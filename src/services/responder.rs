use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domains::message::{EntryStatus, PartyId};
use crate::domains::transition::{FinalizedTransition, Transition, TransitionId};
use crate::domains::wire::{FlowKind, FlowMessage};
use crate::error::{LedgerError, Result};
use crate::interfaces::ledger::RecordRole;
use crate::interfaces::transport::{BoxedSession, Inbox};
use crate::services::contract;
use crate::services::flow::{flow_label, FlowContext, FlowProgress, FlowState};
use crate::services::review::{ReviewContext, ReviewPolicies};

/// Answers sessions other parties open towards this one: co-signs
/// proposals that pass review and records what it is sent.
pub struct Responder {
    ctx: Arc<FlowContext>,
    policies: ReviewPolicies,
}

impl Responder {
    pub fn new(ctx: Arc<FlowContext>, policies: ReviewPolicies) -> Self {
        Self { ctx, policies }
    }

    pub fn spawn(self, inbox: Inbox) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox))
    }

    /// Serves each incoming session on its own task until the inbox closes.
    pub async fn run(self, mut inbox: Inbox) {
        let responder = Arc::new(self);
        while let Some(session) = inbox.recv().await {
            let responder = responder.clone();
            tokio::spawn(async move {
                responder.handle(session).await;
            });
        }
        debug!("{} stopped responding", responder.ctx.identity);
    }

    async fn handle(&self, mut session: BoxedSession) {
        let peer = session.counterparty().clone();
        let outcome = match self.ctx.receive(&mut session).await {
            Ok(FlowMessage::Propose { flow, transition }) => {
                self.co_sign(flow, transition, &mut session).await
            }
            Ok(FlowMessage::Broadcast { finalized }) => self.observe(finalized, &mut session).await,
            Ok(other) => Err(LedgerError::Runtime(format!(
                "{peer} opened a session with {}",
                other.label()
            ))),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            let _ = session
                .send(FlowMessage::Rejected {
                    reason: err.reason().to_string(),
                })
                .await;
        }
    }

    async fn co_sign(
        &self,
        flow: FlowKind,
        transition: Transition,
        session: &mut BoxedSession,
    ) -> Result<()> {
        let id = transition.id();
        let peer = session.counterparty().clone();
        let mut progress = FlowProgress::responder(flow_label(&flow.to_string(), &id));

        if let Err(reason) = self.review(flow, &transition, &peer).await {
            info!("Refused to sign {id} for {peer}: {reason}");
            return Err(progress.abort(LedgerError::CounterpartyRejected(reason)));
        }
        session
            .send(FlowMessage::Signature {
                signer: self.ctx.identity.clone(),
            })
            .await
            .map_err(|err| progress.abort(err))?;

        progress.advance(FlowState::Finalizing)?;
        let finalized = match self.ctx.receive(session).await {
            Ok(FlowMessage::Finalize { finalized }) => finalized,
            Ok(FlowMessage::Rejected { reason }) => {
                return Err(progress.abort(LedgerError::CounterpartyRejected(reason)));
            }
            Ok(other) => {
                return Err(progress.abort(LedgerError::Runtime(format!(
                    "expected finalize from {peer}, got {}",
                    other.label()
                ))));
            }
            Err(err) => return Err(progress.abort(err)),
        };
        if let Err(err) = self.accept_finalized(&id, &finalized) {
            return Err(progress.abort(err));
        }

        self.ctx
            .ledger
            .record(&finalized, RecordRole::Participant)
            .await
            .map_err(|err| progress.abort(err))?;
        session
            .send(FlowMessage::Recorded)
            .await
            .map_err(|err| progress.abort(err))?;
        progress.advance(FlowState::Finalized)?;
        self.ctx.publish(&finalized);
        info!("Received transaction {id} from finality");
        Ok(())
    }

    async fn review(
        &self,
        flow: FlowKind,
        transition: &Transition,
        peer: &PartyId,
    ) -> std::result::Result<(), String> {
        contract::verify(transition).map_err(|rejection| rejection.reason)?;
        let ctx = ReviewContext {
            own_identity: self.ctx.identity.clone(),
            counterparty: peer.clone(),
        };
        self.policies.review(flow, transition, &ctx)?;

        // Inputs this party holds must still be live and unaltered.
        for input in &transition.inputs {
            match self.ctx.ledger.load_entry(&input.reference).await {
                Ok(held) if held.status == EntryStatus::Consumed => {
                    return Err(format!("input {} is already consumed", input.reference));
                }
                Ok(held) if held.entry != input.entry => {
                    return Err(format!(
                        "input {} does not match the recorded entry",
                        input.reference
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn accept_finalized(
        &self,
        expected: &TransitionId,
        finalized: &FinalizedTransition,
    ) -> Result<()> {
        if &finalized.id != expected || !finalized.is_consistent() {
            return Err(LedgerError::ConsensusRejected(format!(
                "finalized transaction {} is not the one signed ({expected})",
                finalized.id
            )));
        }
        if !finalized.signed.signers.contains(&self.ctx.identity) {
            return Err(LedgerError::ConsensusRejected(format!(
                "{} does not carry my signature",
                finalized.id
            )));
        }
        contract::verify_signed(&finalized.signed)?;
        Ok(())
    }

    async fn observe(
        &self,
        finalized: FinalizedTransition,
        session: &mut BoxedSession,
    ) -> Result<()> {
        let mut progress = FlowProgress::observer(flow_label("Broadcast", &finalized.id));
        if !finalized.is_consistent() {
            return Err(progress.abort(LedgerError::ConsensusRejected(format!(
                "broadcast {} does not match its contents",
                finalized.id
            ))));
        }
        if let Err(rejection) = contract::verify_signed(&finalized.signed) {
            return Err(progress.abort(rejection.into()));
        }
        self.ctx
            .ledger
            .record(&finalized, RecordRole::Observer)
            .await
            .map_err(|err| progress.abort(err))?;
        session
            .send(FlowMessage::Recorded)
            .await
            .map_err(|err| progress.abort(err))?;
        progress.advance(FlowState::Finalized)?;
        self.ctx.publish(&finalized);
        info!(
            "Recorded broadcast of {} from {}",
            finalized.id,
            session.counterparty()
        );
        Ok(())
    }
}
