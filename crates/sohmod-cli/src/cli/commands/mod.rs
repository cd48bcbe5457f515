//! CLI command handlers, one per file.

mod checksum;
mod handle;
mod install;
mod list;
mod serve;

pub use checksum::run_checksum;
pub use handle::run_handle;
pub use install::{run_install, InstallInput};
pub use list::run_list;
pub use serve::run_serve;
