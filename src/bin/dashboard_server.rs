use std::{net::SocketAddr, sync::Arc};

use ecodash::{
    dashboard_router, hgraph_config_from_env, init_logging, load_live_snapshot, log_app_bind,
    log_app_start, log_snapshot_loaded, log_source_selected, logging_config_from_env,
    DashboardSnapshotSource, InMemorySnapshotSource,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let addr: SocketAddr = std::env::var("ECODASH_DASHBOARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let source = source_from_env().await?;
    let app = dashboard_router(source);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn source_from_env() -> Result<Arc<dyn DashboardSnapshotSource>, Box<dyn std::error::Error>>
{
    let use_demo = std::env::var("ECODASH_USE_DEMO")
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let source = if use_demo {
        log_source_selected("demo", Some("ECODASH_USE_DEMO"));
        InMemorySnapshotSource::demo()
    } else {
        log_source_selected("live_hgraph", None);
        let cfg = hgraph_config_from_env();
        let snapshot = tokio::task::spawn_blocking(move || load_live_snapshot(&cfg)).await??;
        InMemorySnapshotSource::new(snapshot)
    };

    let snapshot = source.snapshot();
    log_snapshot_loaded(
        snapshot.metrics.len(),
        snapshot.cohort_rows.len(),
        snapshot.hbar_usd_rate,
    );

    Ok(Arc::new(source))
}
