//! Service-side glue for the muon detector cluster aggregator: config and
//! credentials handling, the bus link boundary, typed sources and sinks,
//! and the application wiring. The `muon-cluster` binary is a thin shell
//! around [`app::run`].

pub mod app;
pub mod config;
pub mod link;
pub mod sink;
pub mod source;
