//! detserver: TCP command server for a segmented X-ray area detector
//!
//! Clients speak a textual protocol: one command per line, responses as
//! `code OK|ERR text` frames terminated by 0x18. One connection at a time
//! holds the control token and may mutate detector state; everyone else can
//! query. Exposure timing runs on a cooperative millisecond tick inside the
//! dispatch loop, and on multi-computer detectors the master relays commands
//! to its secondary banks before executing locally.

pub mod client;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod exposure;
pub mod hardware;
pub mod protocol;
pub mod server;
pub mod status;

pub use error::CamError;
