use clap::Parser;
use duet_client::{Inbound, RosterView, SignalingClient};
use duet_common::{Identity, ServerMessage};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "duet-roster", about = "Register with a Duet gateway and print the roster")]
struct Args {
    /// Gateway control endpoint
    #[arg(long, env = "DUET_GATEWAY_URL", default_value = "ws://127.0.0.1:3000/ws")]
    url: String,
    #[arg(long)]
    username: String,
    /// Transport id to register; a random one is generated when omitted
    #[arg(long)]
    peer_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duet_common::init_tracing_with_default("duet_client=info,duet_roster=info");
    let args = Args::parse();

    let peer_id = args
        .peer_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let view = RosterView::new(peer_id.clone());
    let mut client = SignalingClient::connect(&args.url, Identity::new(args.username, peer_id)).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            msg = client.recv() => match msg? {
                Inbound::Server(ServerMessage::Users { users }) => {
                    let peers = view.peers(&users);
                    println!("{} online, {} peers", users.len(), peers.len());
                    for peer in peers {
                        println!("  {} ({})", peer.username, peer.transport_id);
                    }
                }
                Inbound::Server(ServerMessage::Registered { peer_id }) => {
                    info!("registered as {}", peer_id)
                }
                Inbound::Server(ServerMessage::Error { message }) => {
                    warn!("gateway error: {}", message)
                }
                Inbound::Relay { kind, .. } => info!("ignoring relayed {}", kind.as_str()),
            },
        }
    }

    client.close().await?;
    Ok(())
}
