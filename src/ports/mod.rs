//! Port traits the domain depends on.

pub mod bar_cache;
pub mod bar_source;
pub mod config_port;
pub mod persistence_port;
pub mod signal_source;
