use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use message_ledger::domains::transition::TransitionId;
use message_ledger::error::Result;
use message_ledger::services::daemon_client::{
    BroadcastMessageRequest, BroadcastRequest, ConsumeRequest, CreateMessagesRequest,
    DaemonClient, ReplyRequest,
};
use message_ledger::services::exporter;

#[derive(Parser, Debug)]
#[command(name = "message-ledger")]
#[command(about = "Command line client for message-ledgerd")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:10050")]
    daemon: String,

    #[arg(long, env = "MESSAGE_LEDGER_TOKEN")]
    token: Option<String>,

    /// Act as this party instead of the daemon's local party.
    #[arg(long)]
    party: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send numbered messages to a recipient.
    Send {
        #[arg(long)]
        contents: String,

        #[arg(long)]
        recipient: String,

        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Also push a copy to every other party.
        #[arg(long, default_value_t = false)]
        broadcast: bool,
    },
    /// Reply to a received message with the default thanks.
    Consume {
        #[arg(long)]
        tx_id: String,

        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    Reply {
        #[arg(long)]
        tx_id: String,

        #[arg(long, default_value_t = 0)]
        index: usize,

        #[arg(long)]
        contents: Option<String>,
    },
    /// Push a recorded transaction to observers.
    Broadcast {
        #[arg(long)]
        tx_id: String,

        #[arg(long = "observer", required = true)]
        observers: Vec<String>,
    },
    List {
        #[arg(long, default_value = "all")]
        status: String,
    },
    /// Write a recorded transaction to disk as JSON.
    Export {
        #[arg(long)]
        tx_id: String,

        #[arg(long, default_value = ".")]
        directory: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,message_ledger=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let client = DaemonClient::new(cli.daemon.clone(), cli.token.clone().unwrap_or_default())?
        .acting_as(cli.party.clone());

    match cli.command {
        Commands::Send {
            contents,
            recipient,
            count,
            broadcast,
        } => {
            let tx_id = if broadcast {
                client
                    .send_and_broadcast(&BroadcastMessageRequest {
                        contents,
                        recipient,
                    })
                    .await?
            } else {
                client
                    .create_messages(&CreateMessagesRequest {
                        contents,
                        recipient,
                        number_of_states_to_create: count,
                    })
                    .await?
            };
            println!("Transaction id {tx_id} committed to ledger.");
        }
        Commands::Consume { tx_id, index } => {
            let tx_id = client
                .consume(&ConsumeRequest {
                    tx_id,
                    index_to_consume: index,
                })
                .await?;
            println!("Transaction id {tx_id} committed to ledger.");
        }
        Commands::Reply {
            tx_id,
            index,
            contents,
        } => {
            let tx_id = client
                .reply(&ReplyRequest {
                    tx_id,
                    index,
                    contents,
                })
                .await?;
            println!("Transaction id {tx_id} committed to ledger.");
        }
        Commands::Broadcast { tx_id, observers } => {
            let tx_id: TransitionId = tx_id.parse()?;
            client
                .broadcast(&tx_id, &BroadcastRequest { observers })
                .await?;
            println!("Transaction id {tx_id} broadcast.");
        }
        Commands::List { status } => {
            for entry in client.messages(&status).await? {
                println!(
                    "{}  {}  {} -> {}  {}{}",
                    entry.reference,
                    entry.status.as_str(),
                    entry.entry.sender,
                    entry.entry.recipient,
                    entry.entry.contents,
                    if entry.observed { "  (observed)" } else { "" }
                );
            }
        }
        Commands::Export { tx_id, directory } => {
            let tx_id: TransitionId = tx_id.parse()?;
            match client.transaction(&tx_id).await? {
                Some(finalized) => {
                    let path = exporter::export_transaction(&finalized, &directory)?;
                    println!("Exported transaction to {}", path.display());
                }
                None => println!("No transactions with txId = {tx_id}"),
            }
        }
    }
    Ok(())
}
