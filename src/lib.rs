//! Scout - a chat assistant that can search the web
//!
//! This library provides the agent loop, the web search tool, and the
//! WebSocket transport that streams answers to browser clients.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod history;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
