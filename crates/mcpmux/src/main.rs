use mcpmux::MuxServer;
use mcpmux_core::BackendRegistry;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(start())
}

async fn start() -> anyhow::Result<()> {
    // stdout carries the protocol; all diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = Arc::new(BackendRegistry::new());
    let server = MuxServer::new(registry.clone());

    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ct.cancel();
        }
    });

    tokio::select! {
        result = service.waiting() => {
            result?;
        }
        _ = ct.cancelled() => {
            tracing::info!("shutdown requested");
        }
    }

    // drain every backend session before exiting
    registry.close_all().await;
    Ok(())
}
