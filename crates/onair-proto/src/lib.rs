pub mod config;
pub mod content;
pub mod platform;
pub mod protocol;
