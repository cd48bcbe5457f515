//! `sohmod serve`: long-running instance fed over the control socket.

use anyhow::Result;
use sohmod_core::config::{self, PipelineConfig};
use sohmod_core::orchestrator::{EventFilter, Orchestrator};

use crate::cli::control_socket::spawn_control_listener;
use crate::cli::report::EventPrinter;

pub async fn run_serve(cfg: PipelineConfig, json: bool) -> Result<i32> {
    let orch = Orchestrator::new(cfg)?;
    let socket = config::control_socket_path()?;
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut events = orch.subscribe(EventFilter::All);
    let printer = tokio::spawn(async move {
        let mut printer = EventPrinter::new(json);
        while let Some(ev) = events.next().await {
            printer.print(&ev);
        }
    });
    let listener = spawn_control_listener(orch.clone(), &socket)?;
    if !json {
        println!(
            "Listening on {} (mods root {}); Ctrl-C to stop",
            socket.display(),
            orch.layout().root().display()
        );
    }
    tracing::info!(socket = %socket.display(), "serving");

    tokio::signal::ctrl_c().await?;
    let cancelled = orch.cancel_all();
    tracing::info!(cancelled, "shutting down");
    listener.abort();
    for run in orch.active_runs() {
        orch.wait(run.id).await;
    }
    printer.abort();
    if let Err(e) = std::fs::remove_file(&socket) {
        tracing::debug!(socket = %socket.display(), "remove control socket: {}", e);
    }
    Ok(0)
}
