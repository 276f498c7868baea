//! Chat module
//!
//! Conversation and message storage backed by a SQLite database.

pub mod db;
pub mod models;

pub use db::ChatDb;
pub use models::{ChatTurn, Conversation, Message, MessageRole};
