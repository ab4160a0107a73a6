pub mod ansi;
pub mod config;
pub mod core;
pub mod http;
pub mod native;
pub mod stubs;
