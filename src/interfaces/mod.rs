pub mod identity;
pub mod ledger;
pub mod transport;
