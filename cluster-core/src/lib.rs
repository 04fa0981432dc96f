//! Core pipeline, analysis and supervision for a distributed
//! muon-detector cluster aggregator.
//!
//! Detector stations publish timestamped hits over a message bus. This crate
//! contains everything between the decoded bus messages and the outgoing
//! artifacts: the typed sink fabric connecting components across threads,
//! the per-station bookkeeping and trigger state machine, the adaptive
//! coincidence filter that groups hits from distinct stations into combined
//! events, and the pairwise time-difference analyzer with its on-disk
//! histogram store.
//!
//! # Data flow
//!
//! ```text
//!  bus sources ──► StationSupervisor ──► CoincidenceFilter ──► event sinks
//!                      │    │                  │
//!                      │    └──► StationCoincidence (pair histograms)
//!                      │
//!                      └──► summaries / triggers
//! ```
//!
//! The service crate wires these components to the bus, database and file
//! sinks; everything in here is transport-agnostic.

pub mod analysis;
pub mod messages;
pub mod pipeline;
pub mod supervision;
pub mod util;

pub use messages::{
    ClusterLog, DetectorInfo, DetectorLog, DetectorSummary, DetectorTrigger, Event, Hit, Location,
    RawHit, StationStatus, TimebaseSample, TriggerLevel, UserInfo,
};
pub use pipeline::{CollectionSink, MapSink, ShutdownToken, Sink, ThreadedSink, WorkerHandle};
