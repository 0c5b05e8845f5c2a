//! Gateway binary: boots the Gateway Protocol Server, or runs a small set of
//! read-only admin subcommands against the same on-disk stores (spec §4.4).
//!
//! Interactive onboarding/pairing prompts are a client concern, not this
//! binary's — pairing approval and QR login are reached over the protocol
//! (`pairing.approve`, `web.login.*`), not a CLI wizard.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cli::bootstrap::Layout;

#[derive(Parser, Debug)]
#[command(name = "loom-gateway")]
#[command(about = "Personal messaging gateway: runs the protocol server and inspects its state")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Data directory holding clawdis.json, sessions.json, nodes.sqlite3, transcripts/
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Gateway Protocol Server (default when no subcommand is given)
    Serve {
        /// Override gateway.addr from config (e.g. 127.0.0.1:8765)
        #[arg(long, value_name = "ADDR")]
        addr: Option<String>,
    },
    /// List known sessions and their current run state
    Sessions,
    /// List paired/pending nodes
    Nodes {
        /// Filter by status: pending | paired
        #[arg(long)]
        status: Option<String>,
    },
    /// Show channel adapter status
    Channels,
}

fn data_dir(args: &Args) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(Layout::default_data_dir)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_and_apply("loom", None::<&std::path::Path>).ok();
    cli::logging::init()?;

    let args = Args::parse();
    let layout = Layout::under(data_dir(&args));
    let (state, default_addr) = cli::bootstrap(&layout).await?;

    match args.cmd.unwrap_or(Command::Serve { addr: None }) {
        Command::Serve { addr } => {
            let addr = addr.unwrap_or(default_addr);
            serve::run_gateway(Some(&addr), state).await?;
        }
        Command::Sessions => {
            let snapshot = state.sessions.snapshot().await;
            for (key, entry) in snapshot {
                let run_state = state.scheduler.run_state(&key).await;
                println!("{key}\t{entry:?}\trunState={run_state:?}");
            }
        }
        Command::Nodes { status } => {
            let status = status.as_deref().map(|s| match s {
                "paired" => nodes::NodeStatus::Paired,
                _ => nodes::NodeStatus::Pending,
            });
            for node in state.nodes.list(status).await? {
                println!("{node:?}");
            }
        }
        Command::Channels => {
            for ((kind, account_id), adapter) in state.registry.iter() {
                let status = adapter.probe(account_id).await;
                println!("{}:{account_id}\t{status:?}", kind.id());
            }
        }
    }

    Ok(())
}
