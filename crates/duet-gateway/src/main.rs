use std::io::ErrorKind;
use std::net::SocketAddr;

use duet_gateway::{router, AppState, GatewayConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn check_public_bind_allowed(addr: SocketAddr, config: &GatewayConfig) -> anyhow::Result<()> {
    if addr.ip().is_loopback() || config.allow_public_bind {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "refusing non-loopback bind without DUET_ALLOW_PUBLIC_BIND=1"
    ))
}

fn ws_signaling_url_for_bound_addr(bound_addr: SocketAddr) -> String {
    let host = if bound_addr.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        bound_addr.ip().to_string()
    };
    format!("ws://{}:{}/ws", host, bound_addr.port())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "duet_gateway=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env();
    let addr: SocketAddr = config.bind_addr.parse()?;
    check_public_bind_allowed(addr, &config)?;

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(addr.ip(), 0);
            tracing::warn!(
                "gateway bind {} is already in use, falling back to {}",
                addr,
                fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    let bound_addr = listener.local_addr()?;
    tracing::info!("gateway listening on {}", bound_addr);
    tracing::info!(
        "gateway signaling url {}",
        ws_signaling_url_for_bound_addr(bound_addr)
    );

    let app = router(AppState::new(config));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
