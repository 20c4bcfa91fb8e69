//! # Observability Module
//!
//! Structured logging for the node. Every connection event is logged with
//! `client_id` and `session` fields so one connection can be followed from
//! upgrade to close.

mod logging;

pub use logging::{default_filter, init_logging, LogFormat};
