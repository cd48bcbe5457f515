pub mod config;
pub mod logging;

pub mod checksum;
pub mod commit;
pub mod extract;
pub mod fetch;
pub mod layout;
pub mod orchestrator;
pub mod request;
pub mod retry;
pub mod storage;
