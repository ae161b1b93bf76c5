use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domains::message::PartyId;
use crate::domains::wire::{FlowMessage, SessionId};
use crate::error::Result;

/// One side of a point-to-point conversation between two parties.
///
/// Delivery is ordered within a session. `receive` blocks until the peer
/// sends or the peer drops its side, which surfaces as
/// `LedgerError::PeerUnreachable`. Callers bound the wait themselves.
#[async_trait]
pub trait FlowSession: Send {
    fn id(&self) -> SessionId;
    fn counterparty(&self) -> &PartyId;
    async fn send(&mut self, message: FlowMessage) -> Result<()>;
    async fn receive(&mut self) -> Result<FlowMessage>;
}

pub type BoxedSession = Box<dyn FlowSession>;

/// Sessions opened towards a party arrive here, one per initiating flow.
pub type Inbox = mpsc::UnboundedReceiver<BoxedSession>;

pub trait SessionNetwork: Send + Sync {
    fn register(&self, party: &PartyId) -> Result<Inbox>;
    fn open_session(&self, from: &PartyId, to: &PartyId) -> Result<BoxedSession>;
}
