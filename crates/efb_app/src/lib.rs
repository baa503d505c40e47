//! EFB Application
//!
//! Wires the runtime pieces into one tablet session: the shell view with its
//! pages, the RPC client and the notification ticker. The `efb` binary runs a
//! headless session against the in-memory simulation data.

pub mod app;
pub mod config;

pub use app::{EfbApp, Page};
pub use config::AppConfig;
