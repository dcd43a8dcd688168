//! Utilities shared by every conveyor binary: logging, configuration, socket framing, and
//! filesystem helpers.

pub mod config;
pub mod fs;
pub mod log;
pub mod net;
pub mod sync;
pub mod time;
