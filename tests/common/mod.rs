#![allow(dead_code)]

use message_ledger::client::LocalNetwork;
use message_ledger::config::Config;
use message_ledger::domains::message::PartyId;

pub fn party(name: &str) -> PartyId {
    PartyId::new(format!("O={name}, L=Berlin, C=DE"))
}

pub fn config() -> Config {
    let mut config = Config::default_local();
    config.flow_timeout_secs = Some(5);
    config
}

pub fn network() -> LocalNetwork {
    LocalNetwork::from_config(&config()).unwrap()
}

pub fn strict_network() -> LocalNetwork {
    let mut config = config();
    config.strict_reply_signer = Some(true);
    LocalNetwork::from_config(&config).unwrap()
}
