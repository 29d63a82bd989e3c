//! warden — central event-processing server of a distributed monitoring
//! platform.
//!
//! Agents publish keepalives and check results into a broker; warden
//! consumes both streams, reconciles them against per-client history in a
//! key-value store, derives events (state transitions, flap conditions,
//! resolutions) and dispatches them through configurable handler pipelines.
//! An elected master schedules outbound check requests, watches client
//! liveness and prunes aggregation history.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
