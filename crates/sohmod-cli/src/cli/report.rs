//! Rendering pipeline events for the terminal.

use std::time::{Duration, Instant};

use sohmod_core::orchestrator::{FetchProgress, PipelineEvent, PipelineRun, RunState};

const PROGRESS_PRINT_INTERVAL: Duration = Duration::from_millis(500);
const MIB: f64 = 1_048_576.0;

/// Prints events as text or JSON lines; throttles text progress lines.
pub struct EventPrinter {
    json: bool,
    last_progress: Option<Instant>,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last_progress: None,
        }
    }

    pub fn print(&mut self, ev: &PipelineEvent) {
        if self.json {
            match ev.to_json() {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("event not serializable: {}", e),
            }
            return;
        }
        if let Some(p) = &ev.progress {
            let now = Instant::now();
            if self
                .last_progress
                .map_or(false, |t| now.duration_since(t) < PROGRESS_PRINT_INTERVAL)
            {
                return;
            }
            self.last_progress = Some(now);
            println!("  {}: {}", ev.mod_name, progress_line(p, ev.attempt));
            return;
        }
        match &ev.state {
            RunState::Failed(f) => eprintln!("{}: failed ({:?}): {}", ev.mod_name, f.kind, f.message),
            state => println!("{}: {}", ev.mod_name, state),
        }
    }
}

pub fn progress_line(p: &FetchProgress, attempt: u32) -> String {
    let done = p.bytes_done as f64 / MIB;
    let rate = p.bytes_per_sec() / MIB;
    let mut line = match (p.total_bytes, p.fraction()) {
        (Some(total), Some(frac)) => format!(
            "{:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s",
            done,
            total as f64 / MIB,
            frac * 100.0,
            rate
        ),
        _ => format!("{:.1} MiB  {:.2} MiB/s", done, rate),
    };
    if attempt > 1 {
        line.push_str(&format!("  (attempt {attempt})"));
    }
    line
}

/// One-line summary of a finished run.
pub fn summary(run: &PipelineRun) -> String {
    match &run.state {
        RunState::Succeeded => match &run.installation {
            Some(inst) => format!(
                "Installed {} at {}{}",
                inst.mod_name,
                inst.path.display(),
                if inst.replaced_previous {
                    " (replaced previous)"
                } else {
                    ""
                }
            ),
            None => format!("Installed {}", run.request.mod_name()),
        },
        RunState::Failed(f) => format!("Install of {} failed: {}", run.request.mod_name(), f.message),
        other => format!("Install of {} {}", run.request.mod_name(), other),
    }
}
