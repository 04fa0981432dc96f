//! Outgoing sinks: bus publications, time-series database rows, ASCII
//! debug output and the trigger state file.

mod ascii;
mod bus;
mod database;
mod trigger_file;

pub use ascii::{AsciiSink, Render};
pub use bus::{
    BusClusterLogSink, BusDetectorLogSink, BusEventSink, BusSummarySink, BusTriggerSink,
};
pub use database::{DatabaseLink, DatabaseSink, ToLineProtocol};
pub use trigger_file::TriggerFileSink;
