use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domains::message::{EntryAndRef, EntryStatus, MessageEntry, PartyId, StateRef};
use crate::domains::transition::{FinalizedTransition, SignedTransition, Transition, TransitionId};
use crate::domains::wire::{FlowKind, FlowMessage};
use crate::error::{LedgerError, Result};
use crate::interfaces::ledger::RecordRole;
use crate::interfaces::transport::BoxedSession;
use crate::services::contract;
use crate::services::flow::{flow_label, now_ts, FlowContext, FlowProgress, FlowState};

/// Proposer side of every flow a party can start.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<FlowContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<FlowContext>) -> Self {
        Self { ctx }
    }

    pub fn identity(&self) -> &PartyId {
        &self.ctx.identity
    }

    pub async fn send_message(&self, message: MessageEntry) -> Result<FinalizedTransition> {
        info!("Started sending message {}", message.contents);
        let signers = participants_of(&[&message]);
        let transition = Transition::send(self.ctx.identity.clone(), vec![message], signers);
        let finalized = self.run(FlowKind::SendMessage, transition).await?;
        info!("Finished sending message {}", finalized.transition().outputs[0].contents);
        Ok(finalized)
    }

    /// Replies to the entry at `reference`. Without `contents` the reply
    /// quotes the original.
    pub async fn reply_to_message(
        &self,
        reference: &StateRef,
        sender: PartyId,
        recipient: PartyId,
        contents: Option<String>,
    ) -> Result<FinalizedTransition> {
        let original = self.load_unconsumed(reference).await?;
        info!("Started replying to message {}", original.entry.contents);
        let contents = contents.unwrap_or_else(|| thanks(&original.entry.contents));
        let reply = MessageEntry::new(sender, recipient, contents);
        let signers = participants_of(&[&original.entry, &reply]);
        let transition = Transition::reply(self.ctx.identity.clone(), original, reply, signers);
        let finalized = self.run(FlowKind::ReplyToMessage, transition).await?;
        info!("Finished replying to message at {reference}");
        Ok(finalized)
    }

    /// Sends `count` numbered copies of `contents` in one transition.
    pub async fn create_states(
        &self,
        contents: &str,
        recipient: &str,
        count: usize,
    ) -> Result<TransitionId> {
        info!("Started CreateStates {contents}");
        let recipient = self.ctx.identities.resolve_party(recipient).map_err(|_| {
            LedgerError::UnknownParty(format!("the recipient party {recipient} does not exist"))
        })?;
        let me = self.ctx.identity.clone();
        let outputs: Vec<MessageEntry> = (0..count)
            .map(|index| {
                debug!("Creating state with index - {index}");
                MessageEntry::new(me.clone(), recipient.clone(), format!("{contents} - {index}"))
            })
            .collect();
        let signers: BTreeSet<PartyId> = [me.clone(), recipient].into_iter().collect();
        let transition = Transition::send(me, outputs, signers);
        let finalized = self.run(FlowKind::CreateStates, transition).await?;
        info!(
            "Finished CreateStates, transaction {} created with {} output states",
            finalized.id,
            finalized.transition().outputs.len()
        );
        Ok(finalized.id)
    }

    /// Replies, as this party, to the entry at `(tx_id, index)`.
    pub async fn consume_state(&self, tx_id: &TransitionId, index: usize) -> Result<TransitionId> {
        info!("Started ConsumeState from {tx_id} index {index}");
        let reference = StateRef::new(tx_id.clone(), index);
        let original = self.load_unconsumed(&reference).await?;
        let reply = MessageEntry::new(
            self.ctx.identity.clone(),
            original.entry.sender.clone(),
            thanks(&original.entry.contents),
        );
        let signers = participants_of(&[&original.entry, &reply]);
        let transition = Transition::reply(self.ctx.identity.clone(), original, reply, signers);
        let finalized = self.run(FlowKind::ConsumeState, transition).await?;
        info!("Finished ConsumeState from {tx_id} index {index}");
        if let Ok(consumed) = self.ctx.ledger.query_by_status(Some(EntryStatus::Consumed)).await {
            let refs: Vec<String> = consumed.iter().map(|e| e.reference.to_string()).collect();
            debug!("Currently consumed entries include: {refs:?}");
        }
        Ok(finalized.id)
    }

    /// Pushes a read-only copy of a finalized transaction to `observers`.
    pub async fn broadcast_transaction(
        &self,
        id: &TransitionId,
        observers: &[PartyId],
    ) -> Result<()> {
        let finalized = self.ctx.ledger.load_transition(id).await?;
        self.broadcast(&finalized, observers).await
    }

    pub async fn broadcast(
        &self,
        finalized: &FinalizedTransition,
        observers: &[PartyId],
    ) -> Result<()> {
        for observer in observers {
            if observer == &self.ctx.identity {
                continue;
            }
            let mut session = self.ctx.network.open_session(&self.ctx.identity, observer)?;
            session
                .send(FlowMessage::Broadcast {
                    finalized: finalized.clone(),
                })
                .await?;
            match self.ctx.receive(&mut session).await? {
                FlowMessage::Recorded => {
                    debug!("{observer} recorded broadcast of {}", finalized.id);
                }
                FlowMessage::Rejected { reason } => {
                    return Err(LedgerError::CounterpartyRejected(reason));
                }
                other => return Err(unexpected(&other, observer)),
            }
        }
        info!(
            "Broadcast transaction {} to {} parties",
            finalized.id,
            observers.len()
        );
        Ok(())
    }

    /// Sends, then broadcasts to every other party on the network.
    pub async fn send_message_and_broadcast(
        &self,
        message: MessageEntry,
    ) -> Result<FinalizedTransition> {
        let finalized = self.send_message(message.clone()).await?;
        let notaries = self.ctx.identities.notaries();
        let observers: Vec<PartyId> = self
            .ctx
            .identities
            .all_parties()
            .into_iter()
            .filter(|party| {
                !notaries.contains(party)
                    && party != &message.recipient
                    && party != &message.sender
                    && party != &self.ctx.identity
            })
            .collect();
        self.broadcast(&finalized, &observers).await?;
        Ok(finalized)
    }

    async fn load_unconsumed(&self, reference: &StateRef) -> Result<EntryAndRef> {
        let recorded = self.ctx.ledger.load_entry(reference).await?;
        if recorded.status == EntryStatus::Consumed {
            return Err(LedgerError::ValidationRejected(format!(
                "entry {reference} is already consumed"
            )));
        }
        Ok(recorded.as_input())
    }

    async fn run(&self, flow: FlowKind, transition: Transition) -> Result<FinalizedTransition> {
        let id = transition.id();
        let mut progress = FlowProgress::proposer(flow_label(&flow.to_string(), &id));

        progress.advance(FlowState::LocalValidate)?;
        if let Err(rejection) = contract::verify(&transition) {
            return Err(progress.abort(rejection.into()));
        }

        progress.advance(FlowState::AwaitingSignatures)?;
        let mut signed = SignedTransition::new(transition);
        signed.add_signature(self.ctx.identity.clone());
        let mut sessions = Vec::new();
        for party in signed.transition.counterparties() {
            match self.request_signature(flow, &signed.transition, &party).await {
                Ok(session) => {
                    signed.add_signature(party);
                    sessions.push(session);
                }
                // Dropping the open sessions is the abort signal.
                Err(err) => return Err(progress.abort(err)),
            }
        }

        progress.advance(FlowState::Finalizing)?;
        match self.finalize(signed, &mut sessions).await {
            Ok(finalized) => {
                progress.advance(FlowState::Finalized)?;
                self.ctx.publish(&finalized);
                Ok(finalized)
            }
            Err(err) => Err(progress.abort(err)),
        }
    }

    async fn request_signature(
        &self,
        flow: FlowKind,
        transition: &Transition,
        party: &PartyId,
    ) -> Result<BoxedSession> {
        let mut session = self.ctx.network.open_session(&self.ctx.identity, party)?;
        session
            .send(FlowMessage::Propose {
                flow,
                transition: transition.clone(),
            })
            .await?;
        match self.ctx.receive(&mut session).await? {
            FlowMessage::Signature { signer } if &signer == party => Ok(session),
            FlowMessage::Signature { signer } => Err(LedgerError::CounterpartyRejected(format!(
                "{party} answered with a signature from {signer}"
            ))),
            FlowMessage::Rejected { reason } => Err(LedgerError::CounterpartyRejected(reason)),
            other => Err(unexpected(&other, party)),
        }
    }

    async fn finalize(
        &self,
        signed: SignedTransition,
        sessions: &mut [BoxedSession],
    ) -> Result<FinalizedTransition> {
        contract::verify_signed(&signed)?;
        let id = signed.id();
        let inputs: Vec<StateRef> = signed
            .transition
            .inputs
            .iter()
            .map(|input| input.reference.clone())
            .collect();
        self.ctx.notary.commit(&id, &inputs).await?;

        let finalized = FinalizedTransition::new(signed, now_ts());
        self.ctx
            .ledger
            .record(&finalized, RecordRole::Participant)
            .await?;

        // Committed: a peer that misses its copy is reported, the flow
        // still finishes.
        let unreached = self.distribute(&finalized, sessions).await;
        if !unreached.is_empty() {
            let names: Vec<String> = unreached.iter().map(ToString::to_string).collect();
            warn!(
                "Transaction {id} is final but not recorded by {}",
                names.join("; ")
            );
        }
        Ok(finalized)
    }

    /// Sends the finalized transition to every co-signer and waits for each
    /// to record it. Returns the parties that did not confirm.
    async fn distribute(
        &self,
        finalized: &FinalizedTransition,
        sessions: &mut [BoxedSession],
    ) -> Vec<PartyId> {
        let mut unreached = Vec::new();
        let mut delivered = Vec::with_capacity(sessions.len());
        for session in sessions.iter_mut() {
            let sent = session
                .send(FlowMessage::Finalize {
                    finalized: finalized.clone(),
                })
                .await;
            if let Err(err) = &sent {
                warn!("Could not send {} to {}: {err}", finalized.id, session.counterparty());
                unreached.push(session.counterparty().clone());
            }
            delivered.push(sent.is_ok());
        }
        for (session, sent) in sessions.iter_mut().zip(delivered) {
            if !sent {
                continue;
            }
            let peer = session.counterparty().clone();
            match self.ctx.receive(session).await {
                Ok(FlowMessage::Recorded) => {}
                Ok(FlowMessage::Rejected { reason }) => {
                    warn!("{peer} refused to record {}: {reason}", finalized.id);
                    unreached.push(peer);
                }
                Ok(other) => {
                    warn!("{}", unexpected(&other, &peer));
                    unreached.push(peer);
                }
                Err(err) => {
                    warn!("{peer} did not confirm {}: {err}", finalized.id);
                    unreached.push(peer);
                }
            }
        }
        unreached
    }
}

fn participants_of(entries: &[&MessageEntry]) -> BTreeSet<PartyId> {
    entries
        .iter()
        .flat_map(|entry| entry.participants())
        .cloned()
        .collect()
}

fn thanks(contents: &str) -> String {
    format!("thanks for the reply: {contents}")
}

fn unexpected(message: &FlowMessage, peer: &PartyId) -> LedgerError {
    LedgerError::Runtime(format!("unexpected {} message from {peer}", message.label()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_signers_cover_both_entries() {
        let original = MessageEntry::new(PartyId::new("A"), PartyId::new("B"), "hi");
        let reply = MessageEntry::new(PartyId::new("B"), PartyId::new("A"), thanks("hi"));
        let signers = participants_of(&[&original, &reply]);
        assert_eq!(signers.len(), 2);
        assert!(signers.contains(&PartyId::new("A")));
        assert_eq!(reply.contents, "thanks for the reply: hi");
    }

    #[test]
    fn unexpected_messages_name_the_peer() {
        let err = unexpected(&FlowMessage::Recorded, &PartyId::new("O=PartyB"));
        assert_eq!(err.reason(), "unexpected recorded message from O=PartyB");
    }
}
