#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # watchsync-server
//!
//! Real-time synchronization server for distributed watch-party playback:
//! a Redis-coordinated WebSocket service that keeps every participant in a
//! room watching the same content at the same position.

/// Authentication for the Connection Gateway — bearer JWTs and guest tokens.
pub mod auth;

/// Server configuration and environment variables.
pub mod config;

/// Connection Gateway — WebSocket upgrade, auth, and per-connection I/O.
pub mod gateway;

/// Room Hub — the per-room actor that serializes playback mutations.
pub mod hub;

/// Periodic sweep that reclaims abandoned rooms and stale participants.
pub mod janitor;

/// Structured logging configuration.
pub mod logging;

/// Wire and canonical message types for the sync protocol.
pub mod protocol;

/// Retry logic utilities for idempotent Coordination Store reads.
pub mod retry;

/// Per-connection session state: bounded outbound queue and heartbeat.
pub mod session;

/// Coordination Store Adapter: the trait plus Redis and in-memory backends.
pub mod store;

/// Playback mutation authorization, conflict resolution, and state transitions.
pub mod sync_controller;
