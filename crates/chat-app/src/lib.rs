#![deny(unsafe_code)]

//! Streaming chat session engine and its terminal front end.

/// Terminal front end.
pub mod app;
/// Chat domain model and the session engine.
pub mod chat;
/// Backend reachability tracking.
pub mod connection;
/// Settings persistence.
pub mod settings;
