//! `sohmod handle <raw>`: the URL-scheme entry point.
//!
//! If a `sohmod serve` instance for the same mods root is listening on the
//! control socket the invocation is relayed there and this process exits at
//! once; otherwise it installs in-process like `sohmod install`.

use anyhow::Result;
use sohmod_core::config::{self, PipelineConfig};

use super::install::{run_install, InstallInput};
use crate::cli::control_socket::{self, RelayReply};

pub async fn run_handle(cfg: PipelineConfig, raw: &str, json: bool) -> Result<i32> {
    // The socket protocol is line based; such input cannot be relayed as-is.
    if !raw.contains(['\n', '\r']) {
        let socket = config::control_socket_path()?;
        match control_socket::relay(&socket, &cfg.mods_root, raw).await? {
            Some(RelayReply::Accepted(id)) => {
                if json {
                    println!("{}", serde_json::json!({ "relayed": true, "request_id": id }));
                } else {
                    println!("Handed to running sohmod instance (request {id})");
                }
                return Ok(0);
            }
            Some(RelayReply::Rejected { code, message }) => {
                eprintln!("sohmod: {}", message);
                return Ok(code);
            }
            Some(RelayReply::Done(_)) | None => {}
        }
        tracing::debug!(socket = %socket.display(), "no running instance; installing here");
    }
    run_install(cfg, InstallInput::Raw(raw.to_string()), json).await
}
