use crate::domains::message::PartyId;
use crate::error::Result;

pub trait IdentityResolver: Send + Sync {
    fn resolve_party(&self, name: &str) -> Result<PartyId>;
    fn all_parties(&self) -> Vec<PartyId>;
    fn notaries(&self) -> Vec<PartyId>;
}
