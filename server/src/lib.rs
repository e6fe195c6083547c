//! Chorus coordination server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod call;
pub mod chat;
pub mod config;
pub mod dm;
pub mod error;
pub mod fabric;
pub mod proto;
pub mod rooms;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod ws;
