//! `sohmod list`: installed mods under the mods root.

use anyhow::{Context, Result};
use sohmod_core::config::PipelineConfig;
use sohmod_core::layout::ModsLayout;

pub fn run_list(cfg: &PipelineConfig, json: bool) -> Result<i32> {
    if !cfg.mods_root.exists() {
        if json {
            println!("[]");
        } else {
            println!("No mods installed ({} does not exist)", cfg.mods_root.display());
        }
        return Ok(0);
    }
    let mods = ModsLayout::new(&cfg.mods_root)
        .installed_mods()
        .with_context(|| format!("list {}", cfg.mods_root.display()))?;
    if json {
        println!("{}", serde_json::to_string(&mods)?);
        return Ok(0);
    }
    if mods.is_empty() {
        println!("No mods installed in {}", cfg.mods_root.display());
    }
    for m in mods {
        println!("{:<32} {}", m.name, m.path.display());
    }
    Ok(0)
}
