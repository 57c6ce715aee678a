#![deny(clippy::all)]

pub mod os_cmd;
pub mod tracing;
