//! `sohmod install`: run one request in-process and follow it to the end.

use anyhow::Result;
use sohmod_core::config::PipelineConfig;
use sohmod_core::orchestrator::{EventFilter, Orchestrator, SubmitError};
use sohmod_core::request::InstallRequest;

use crate::cli::report::{self, EventPrinter};

/// What the user handed us: a raw invocation or separate fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallInput {
    Raw(String),
    Parts {
        url: String,
        name: String,
        id: Option<String>,
    },
}

pub async fn run_install(cfg: PipelineConfig, input: InstallInput, json: bool) -> Result<i32> {
    let orch = Orchestrator::new(cfg)?;
    // Subscribe first so the Queued event is not missed.
    let mut events = orch.subscribe(EventFilter::All);

    let submitted = match &input {
        InstallInput::Raw(raw) => orch.submit(raw),
        InstallInput::Parts { url, name, id } => InstallRequest::from_parts(url, name, id.as_deref())
            .map_err(SubmitError::from)
            .and_then(|req| orch.submit_request(req)),
    };
    let id = match submitted {
        Ok(id) => id,
        Err(e) => {
            eprintln!("sohmod: {}", e);
            return Ok(e.exit_code());
        }
    };

    let mut printer = EventPrinter::new(json);
    let mut interrupted = false;
    loop {
        tokio::select! {
            ev = events.next() => match ev {
                Some(ev) if ev.request_id == id => {
                    printer.print(&ev);
                    if ev.is_terminal() {
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                match orch.cancel(id) {
                    Ok(()) => eprintln!("Cancelling..."),
                    Err(e) => eprintln!("sohmod: {}", e),
                }
            }
        }
    }

    let Some(run) = orch.wait(id).await else {
        anyhow::bail!("run {} disappeared before finishing", id);
    };
    if !json {
        println!("{}", report::summary(&run));
    }
    Ok(run.state.exit_code().unwrap_or(1))
}
