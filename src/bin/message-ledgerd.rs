use clap::Parser;
use message_ledger::config::Config;
use message_ledger::daemon;
use message_ledger::error::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "message-ledgerd")]
#[command(about = "Message ledger daemon hosting a local party network")]
struct Cli {
    /// Network layout; the built-in four-party layout when absent.
    #[arg(long, env = "MESSAGE_LEDGER_CONFIG")]
    config: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, env = "MESSAGE_LEDGER_TOKEN")]
    token: Option<String>,

    /// Overrides the configured local party.
    #[arg(long)]
    party: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,message_ledger=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default_local(),
    };
    if let Some(party) = cli.party {
        config.local_party = party;
    }
    let host = cli
        .host
        .or_else(|| config.host.clone())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = cli.port.or(config.port).unwrap_or(10050);
    let token = cli.token.or_else(|| config.token.clone()).unwrap_or_default();

    daemon::run(config, &host, port, &token).await
}
