//! relay-server library crate.
//!
//! This crate is the Signal Relay daemon: it captures live host signals
//! (microphone audio, system-loopback audio, clipboard text, on-demand
//! screenshots) and fans them out as typed JSON messages to every connected
//! WebSocket subscriber, on a plain TCP endpoint and a TLS endpoint whose
//! self-signed certificate it manages itself.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Subscribers (JSON over WebSocket, ports 9047 / 9048)
//!         ↕
//! [relay-server]
//!   ├── domain/           Pure types: RelayConfig
//!   ├── application/      Registry, capture lifecycle, broadcast dispatch
//!   └── infrastructure/
//!         ├── capture/    cpal audio sources (dedicated hardware threads)
//!         ├── clipboard/  polling clipboard watcher (arboard)
//!         ├── screenshot/ on-demand primary-display capture (xcap)
//!         ├── tls/        certificate manager (rcgen + rustls)
//!         ├── ws_server/  plain + TLS WebSocket accept loops
//!         └── storage/    TOML config persistence
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies (no I/O, no async, no frameworks).
//! - `application` depends on `domain` and `relay-core` only; hardware is
//!   reached exclusively through the traits it defines seams for.
//! - `infrastructure` depends on all other layers plus the OS-facing crates
//!   (`tokio`, `cpal`, `arboard`, `xcap`, `rustls`).
//!
//! # Data flow
//!
//! A transport accept bumps the subscriber count; the lifecycle manager
//! starts idle capture sources on the 0 -> 1 edge. Source callbacks feed
//! `SignalEvent`s into an mpsc channel; the dispatcher wraps each event in a
//! wire envelope and the registry fans it out to every open connection.
//! Inbound subscriber commands travel the other way: the session read loop
//! hands raw text to the dispatcher, which decodes it and, for a screenshot
//! command, captures the display and re-broadcasts the result to everyone.

/// Domain layer: pure business-logic types (no I/O).
pub mod domain;

/// Application layer: connection registry, capture lifecycle, dispatch.
pub mod application;

/// Infrastructure layer: capture backends, TLS, WebSocket servers, storage.
pub mod infrastructure;
