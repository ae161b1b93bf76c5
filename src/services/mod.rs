pub mod contract;
pub mod daemon_client;
pub mod exporter;
pub mod flow;
pub mod orchestrator;
pub mod responder;
pub mod review;
