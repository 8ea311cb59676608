//! Shared types for the Kimai keypad plugin: per-button settings, the
//! recording status model, the JSON-RPC client for the Kimai server, and the
//! framed wire protocol spoken with the keypad host.

pub mod client;
pub mod config;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod settings;
pub mod status;
