use std::net::SocketAddr;
use std::sync::Arc;

use autotest::config::AutotestConfig;
use autotest::{build_router, AppState, SERVICE_NAME};
use common_auth::StaticSourceRegistry;
use common_config::load;
use common_obs::ObsInit;
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn build_sha() -> &'static str {
    option_env!("BUILD_SHA").unwrap_or("unknown")
}

fn build_time() -> &'static str {
    option_env!("BUILD_TIME").unwrap_or("unknown")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init(SERVICE_NAME)?;

    let config = load::<AutotestConfig>()?;
    let addr = config.socket_addr()?;

    let registry = StaticSourceRegistry::from_path(&config.sources_path)?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        build_sha = build_sha(),
        build_time = build_time(),
        listen_addr = %addr,
        sources_path = %config.sources_path.display(),
        sources = registry.source_ids().count(),
        "starting service"
    );

    let state = Arc::new(AppState::new(Arc::new(registry)));
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    tracing::info!(event = "service_stop", service = SERVICE_NAME);

    Ok(())
}
