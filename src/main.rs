use std::net::SocketAddr;
use std::panic;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sk_gateway::config::GatewayConfig;
use sk_gateway::http::{AppState, router};
use sk_gateway::native::{gateway::ExecutionGateway, provisioner::BinaryProvisioner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sk_gateway=info,tower_http=info".into()),
        )
        .init();
    set_panic_hook();

    let config = GatewayConfig::from_env()?;
    tracing::debug!("Loaded configuration: {:?}", config);

    let provisioner = Arc::new(BinaryProvisioner::new(config.provisioner())?);
    let gateway = ExecutionGateway::new(provisioner, config.gateway());
    let state = AppState {
        gateway: Arc::new(gateway),
        deadline: config.deadline,
    };
    let app = router(state, config.max_body_bytes);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
