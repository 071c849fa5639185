use clap::Args;
use rhythmguard_core::{EnforcementScheduler, Event};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::common::{Context, GateMode};
use crate::http::{self, AppState};

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address, e.g. 127.0.0.1:8787 (overrides server.listen)
    #[arg(long)]
    listen: Option<String>,
}

pub async fn run(ctx: &Context, args: ServeArgs) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let machine = ctx.machine(&config, GateMode::Live)?;
    info!(
        config = %ctx.config_path.display(),
        db = %ctx.db_path(&config)?.display(),
        gate_enabled = config.gate.enabled,
        domain = %config.gate.domain,
        "starting rhythmguard"
    );

    let event_log = spawn_event_log(machine.subscribe());
    let scheduler = EnforcementScheduler::new(machine.clone(), &config.scheduler).spawn();

    let listen = args.listen.unwrap_or(config.server.listen);
    let listener = TcpListener::bind(&listen).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let app = http::router(AppState { machine });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    event_log.abort();
    Ok(())
}

fn spawn_event_log(mut events: broadcast::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "rhythmguard::events", event = %json),
                    Err(e) => warn!(error = %e, "unserializable event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
