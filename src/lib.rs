//! percept: media analysis orchestration
//!
//! Coordinates independent, individually-toggleable analysis capabilities
//! (semantic tagging, structural vision/face detection, speech transcription,
//! geolocation extraction) into one merged per-file result:
//!
//! - **jobs**: bounded-concurrency async task executor with ephemeral
//!   status tracking and TTL cleanup
//! - **analysis**: per-file analysis records, one pipeline per media kind,
//!   fan-out/fan-in merging across providers
//! - **scan**: batch sweeps over the file corpus for files missing a given
//!   category of analysis, with cadence-based triggering
//!
//! Capability providers, persistence, and the search index are consumed
//! through traits; see the `providers` and `store` modules for the contracts
//! and `store::memory` for the in-memory implementations used in tests.

pub mod analysis;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod providers;
pub mod scan;
pub mod store;
