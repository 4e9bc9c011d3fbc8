//! Bridge Module
//!
//! Connects a host application to a [`SensorSdk`](crate::infrastructure::sdk::SensorSdk).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  BridgeCommand   ┌──────────────────────────────┐
//! │ BridgeHandle │ ───────────────▶ │        BridgeService         │
//! │   (host)     │ ◀─────────────── │ (worker thread, owns state)  │
//! └──────────────┘   BridgeEvent    └──────┬───────────────▲───────┘
//!                                          │ spawn         │ Internal
//!                                          ▼               │
//!                          ┌─────────────────────────────────────┐
//!                          │ Subscription tasks (one per slot)    │
//!                          │ - streams, listings, recording ops   │
//!                          └──────────────────┬──────────────────┘
//!                                             ▼
//!                                      SensorSdk (+ observer
//!                                      callbacks to the worker)
//! ```
//!
//! ## Modules
//!
//! - [`handle`] - Worker thread startup and the command surface
//! - [`service`] - The worker: command dispatch, readiness, event emission
//! - [`session`] - Per-device readiness, subscriptions and exercise list
//! - [`subscription`] - Cancellable subscription handles and their slots
//! - [`translate`] - SDK frames to host payloads

pub mod handle;
pub mod service;
pub mod session;
pub mod subscription;
pub mod translate;

pub use handle::{BridgeClosed, BridgeHandle};
pub use service::BridgeService;
