//! `sohmod checksum <path>`: SHA-256 of a file, `sha256sum` style.

use anyhow::Result;
use sohmod_core::checksum;
use std::path::Path;

pub fn run_checksum(path: &Path) -> Result<i32> {
    let digest = checksum::sha256_path(path)?;
    println!("{}  {}", digest, path.display());
    Ok(0)
}
