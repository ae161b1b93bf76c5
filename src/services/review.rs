//! Checks a co-signer applies on top of the shared contract rules. The
//! contract cannot see who is asking for a signature; these predicates can.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domains::message::PartyId;
use crate::domains::transition::{Transition, TransitionKind};
use crate::domains::wire::FlowKind;

pub const SENDER_IS_ME: &str = "sender of new message cannot match my identity";
pub const SENDER_NOT_PROPOSER: &str = "sender of the reply must be the party creating this transaction";
pub const SIGNER_NOT_BOUND: &str = "reply signer is not bound to the consumed entry's recipient";
pub const NOT_A_SIGNER: &str = "I am not a required signer of this transaction";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewContext {
    pub own_identity: PartyId,
    /// Identity of whoever opened the session, as authenticated by the network.
    pub counterparty: PartyId,
}

pub trait ReviewPolicy: Send + Sync {
    fn check(&self, transition: &Transition, ctx: &ReviewContext) -> Result<(), String>;
}

impl<F> ReviewPolicy for F
where
    F: Fn(&Transition, &ReviewContext) -> Result<(), String> + Send + Sync,
{
    fn check(&self, transition: &Transition, ctx: &ReviewContext) -> Result<(), String> {
        self(transition, ctx)
    }
}

/// Signs whatever passes the contract.
pub struct AcceptAll;

impl ReviewPolicy for AcceptAll {
    fn check(&self, _transition: &Transition, _ctx: &ReviewContext) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyReview {
    /// Also require that the proposer is the consumed entry's recipient and
    /// that nobody outside the original pair signs.
    pub strict_signer_binding: bool,
}

impl ReplyReview {
    pub fn new(strict_signer_binding: bool) -> Self {
        Self {
            strict_signer_binding,
        }
    }
}

impl ReviewPolicy for ReplyReview {
    fn check(&self, transition: &Transition, ctx: &ReviewContext) -> Result<(), String> {
        if transition.kind != TransitionKind::Reply {
            return Ok(());
        }
        // The contract already ran, so there is exactly one output.
        let Some(reply) = transition.outputs.first() else {
            return Ok(());
        };
        if reply.sender == ctx.own_identity {
            return Err(SENDER_IS_ME.to_string());
        }
        if reply.sender != ctx.counterparty {
            return Err(SENDER_NOT_PROPOSER.to_string());
        }
        if self.strict_signer_binding {
            let bound = transition.inputs.iter().all(|input| {
                input.entry.recipient == reply.sender
                    && transition.required_signers.iter().all(|signer| {
                        signer == &input.entry.sender || signer == &input.entry.recipient
                    })
            });
            if !bound {
                return Err(SIGNER_NOT_BOUND.to_string());
            }
        }
        Ok(())
    }
}

/// Checks a co-signer runs before signing. Every Reply transition goes
/// through [`ReplyReview`] whatever flow label the proposer sent; extra
/// predicates registered per flow run after it.
#[derive(Clone)]
pub struct ReviewPolicies {
    reply: ReplyReview,
    policies: HashMap<FlowKind, Arc<dyn ReviewPolicy>>,
}

impl ReviewPolicies {
    pub fn new(strict_reply_signer: bool) -> Self {
        Self {
            reply: ReplyReview::new(strict_reply_signer),
            policies: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, flow: FlowKind, policy: Arc<dyn ReviewPolicy>) -> Self {
        self.policies.insert(flow, policy);
        self
    }

    pub fn review(
        &self,
        flow: FlowKind,
        transition: &Transition,
        ctx: &ReviewContext,
    ) -> Result<(), String> {
        if !transition.required_signers.contains(&ctx.own_identity) {
            return Err(NOT_A_SIGNER.to_string());
        }
        // Keyed on what the transition is, not on the label it arrived with.
        self.reply.check(transition, ctx)?;
        match self.policies.get(&flow) {
            Some(policy) => policy.check(transition, ctx),
            None => AcceptAll.check(transition, ctx),
        }
    }
}

impl Default for ReviewPolicies {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domains::message::{EntryAndRef, MessageEntry, StateRef};

    fn party(name: &str) -> PartyId {
        PartyId::new(name)
    }

    fn reply(sender: &str, recipient: &str, signers: &[&str]) -> Transition {
        let entry = MessageEntry::new(party("A"), party("B"), "hi");
        let send = Transition::send(
            party("A"),
            vec![entry.clone()],
            [party("A"), party("B")].into_iter().collect(),
        );
        let input = EntryAndRef {
            reference: StateRef::new(send.id(), 0),
            entry,
        };
        let signers: BTreeSet<PartyId> = signers.iter().map(|name| party(name)).collect();
        Transition::reply(
            party(sender),
            input,
            MessageEntry::new(party(sender), party(recipient), "thanks"),
            signers,
        )
    }

    fn ctx(own: &str, counterparty: &str) -> ReviewContext {
        ReviewContext {
            own_identity: party(own),
            counterparty: party(counterparty),
        }
    }

    #[test]
    fn co_signer_refuses_a_reply_in_its_own_name() {
        let tx = reply("B", "A", &["A", "B"]);
        let err = ReplyReview::default().check(&tx, &ctx("B", "A")).unwrap_err();
        assert_eq!(err, SENDER_IS_ME);
    }

    #[test]
    fn co_signer_refuses_impersonated_sender() {
        let tx = reply("B", "A", &["A", "B"]);
        let err = ReplyReview::default().check(&tx, &ctx("A", "D")).unwrap_err();
        assert_eq!(err, SENDER_NOT_PROPOSER);
        assert!(ReplyReview::default().check(&tx, &ctx("A", "B")).is_ok());
    }

    #[test]
    fn strict_binding_rejects_extra_signers() {
        let tx = reply("B", "A", &["A", "B", "C"]);
        assert!(ReplyReview::new(false).check(&tx, &ctx("A", "B")).is_ok());
        let err = ReplyReview::new(true).check(&tx, &ctx("A", "B")).unwrap_err();
        assert_eq!(err, SIGNER_NOT_BOUND);
    }

    fn send(signers: &[&str]) -> Transition {
        let signers: BTreeSet<PartyId> = signers.iter().map(|name| party(name)).collect();
        Transition::send(party("A"), vec![MessageEntry::new(party("A"), party("B"), "hi")], signers)
    }

    #[test]
    fn policies_default_to_accept_all_and_require_membership() {
        let tx = send(&["A", "B"]);
        let policies = ReviewPolicies::default();
        assert!(policies.review(FlowKind::SendMessage, &tx, &ctx("B", "A")).is_ok());
        assert_eq!(
            policies
                .review(FlowKind::SendMessage, &tx, &ctx("C", "A"))
                .unwrap_err(),
            NOT_A_SIGNER
        );

        let closure =
            |_: &Transition, _: &ReviewContext| -> Result<(), String> { Err("closed".to_string()) };
        let policies = policies.with_policy(FlowKind::SendMessage, Arc::new(closure));
        assert_eq!(
            policies
                .review(FlowKind::SendMessage, &tx, &ctx("B", "A"))
                .unwrap_err(),
            "closed"
        );
    }

    #[test]
    fn replies_are_reviewed_under_any_flow_label() {
        let tx = reply("B", "A", &["A", "B"]);
        let policies = ReviewPolicies::default();
        for flow in [
            FlowKind::SendMessage,
            FlowKind::ReplyToMessage,
            FlowKind::CreateStates,
            FlowKind::ConsumeState,
        ] {
            assert_eq!(
                policies.review(flow, &tx, &ctx("B", "A")).unwrap_err(),
                SENDER_IS_ME
            );
            assert_eq!(
                policies.review(flow, &tx, &ctx("A", "D")).unwrap_err(),
                SENDER_NOT_PROPOSER
            );
            assert!(policies.review(flow, &tx, &ctx("A", "B")).is_ok());
        }
    }
}
