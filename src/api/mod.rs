//! HTTP API endpoints

pub mod chat;
pub mod completions;
