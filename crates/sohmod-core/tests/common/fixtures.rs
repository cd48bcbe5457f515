//! Zip, config, and filesystem helpers shared by the integration tests.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use sohmod_core::config::PipelineConfig;
use sohmod_core::orchestrator::{Orchestrator, PipelineRun, RequestId};
use sohmod_core::retry::RetryPolicy;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Zip archive with the given `(name, contents)` entries.
pub fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().unix_permissions(0o644);
    for (name, data) in files {
        zip.start_file(*name, opts).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Pipeline config rooted at `root` with fast retries.
pub fn config(root: &Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::with_mods_root(root);
    cfg.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
    };
    cfg
}

/// Every regular file under `dir`, keyed by `/`-joined relative path.
pub fn tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let rel = path.strip_prefix(base).unwrap();
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(key, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

/// Entries left in the work areas (`.tmp` and `.staging`).
pub fn work_area_leftovers(root: &Path) -> Vec<String> {
    let mut left = Vec::new();
    for sub in [".tmp", ".staging"] {
        if let Ok(entries) = fs::read_dir(root.join(sub)) {
            for e in entries {
                left.push(format!("{sub}/{}", e.unwrap().file_name().to_string_lossy()));
            }
        }
    }
    left
}

/// Wait (bounded) for run `id` to reach a terminal state.
pub async fn finished(orch: &Orchestrator, id: RequestId) -> PipelineRun {
    tokio::time::timeout(Duration::from_secs(30), orch.wait(id))
        .await
        .expect("run did not finish in time")
        .expect("unknown request id")
}
