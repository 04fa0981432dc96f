//! Typed messages rendered into bus publications.
//!
//! Every payload starts with a UTC timestamp `YYYY-MM-DD_HH-MM-SS` and a
//! parameter name; value fields are space separated. A failed publish is
//! logged and that single message dropped.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use cluster_core::pipeline::Sink;
use cluster_core::util::geo;
use cluster_core::{ClusterLog, DetectorLog, DetectorSummary, DetectorTrigger, Event};

use crate::link::Bus;

fn utc_stamp() -> String {
    Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn publish(bus: &Arc<dyn Bus>, topic: &str, payload: &str) {
    if !bus.publish(topic, payload) {
        warn!(topic, "could not publish bus message");
    }
}

/// Publishes combined events as one submessage per contributing hit.
pub struct BusEventSink {
    bus: Arc<dyn Bus>,
    topic: String,
    /// Publish to `<topic>/<user>/<station>` instead of the bare topic,
    /// used for the local-cluster l1data output.
    detailed: bool,
    max_geohash_length: usize,
}

impl BusEventSink {
    pub fn new(bus: Arc<dyn Bus>, topic: &str, detailed: bool, max_geohash_length: usize) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
            detailed,
            max_geohash_length,
        }
    }
}

impl Sink<Event> for BusEventSink {
    fn submit(&self, event: Event) {
        // Single events never leave the service.
        if event.n() < 2 {
            return;
        }

        let uuid = format!("{:016x}{:016x}", event.id(), event.start_ns() as u64);
        let n = event.n();
        let span = event.span_ns();
        let start = event.start_ns();

        for hit in event.hits() {
            // The published geohash is capped so precise locations never
            // leave the service.
            let geohash = geo::geohash(hit.location.lat, hit.location.lon, self.max_geohash_length);
            let payload = format!(
                "{uuid} {:016x} {geohash} {} {n} {span} {} {} {} {} {} {} {}",
                hit.station,
                hit.time_acc_ns,
                hit.start_ns - start,
                hit.ublox_counter,
                hit.duration_ns,
                hit.gnss_time_grid,
                u8::from(hit.fix),
                hit.start_ns,
                u8::from(hit.utc),
            );
            if self.detailed {
                let topic = format!("{}/{}", self.topic, hit.user.topic_suffix());
                publish(&self.bus, &topic, &payload);
            } else {
                publish(&self.bus, &self.topic, &payload);
            }
        }
    }
}

/// Publishes each cluster-log field as its own key/value message.
pub struct BusClusterLogSink {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl BusClusterLogSink {
    pub fn new(bus: Arc<dyn Bus>, topic: &str) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
        }
    }
}

impl Sink<ClusterLog> for BusClusterLogSink {
    fn submit(&self, log: ClusterLog) {
        let stamp = utc_stamp();
        let fields: Vec<(&str, String)> = vec![
            ("timeout", log.timeout_ms.to_string()),
            ("timebase", log.timebase_ns.to_string()),
            ("uptime", log.uptime_s.to_string()),
            ("frequency_in", format!("{:.4}", log.frequency_in)),
            ("frequency_l1_out", format!("{:.4}", log.frequency_l1_out)),
            ("buffer_length", log.buffer_length.to_string()),
            ("total_detectors", log.total_detectors.to_string()),
            ("reliable_detectors", log.reliable_detectors.to_string()),
            ("max_coincidences", log.maximum_n.to_string()),
            ("cpu_load", format!("{:.2}", log.system_cpu_load)),
            ("process_cpu_load", format!("{:.2}", log.process_cpu_load)),
            ("memory_usage", log.memory_usage.to_string()),
            ("incoming", log.incoming.to_string()),
        ];
        for (name, value) in fields {
            publish(&self.bus, &self.topic, &format!("{stamp} {name} {value}"));
        }
        for (&level, &count) in &log.outgoing {
            if level == 1 {
                continue;
            }
            publish(
                &self.bus,
                &self.topic,
                &format!("{stamp} outgoing_{level} {count}"),
            );
        }
    }
}

/// Publishes per-station summaries as key/value messages prefixed with the
/// station's display name.
pub struct BusSummarySink {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl BusSummarySink {
    pub fn new(bus: Arc<dyn Bus>, topic: &str) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
        }
    }
}

impl Sink<DetectorSummary> for BusSummarySink {
    fn submit(&self, summary: DetectorSummary) {
        let stamp = utc_stamp();
        let name = summary.user.display_name();
        let fields: Vec<(&str, String)> = vec![
            ("eventrate", format!("{:.4}", summary.mean_eventrate)),
            (
                "eventrate_stddev",
                format!("{:.4}", summary.stddev_eventrate),
            ),
            ("time_acc", format!("{:.2}", summary.mean_time_acc)),
            ("pulselength", format!("{:.2}", summary.mean_pulselength)),
            ("incoming", summary.incoming.to_string()),
            (
                "ublox_counter_progress",
                format!("{:.3}", summary.ublox_counter_progress),
            ),
            ("deadtime_factor", format!("{:.4}", summary.deadtime_factor)),
        ];
        for (field, value) in fields {
            publish(
                &self.bus,
                &self.topic,
                &format!("{stamp} {name} {field} {value}"),
            );
        }
    }
}

/// Publishes trigger transitions on `<topic>/<user>/<station>`.
pub struct BusTriggerSink {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl BusTriggerSink {
    pub fn new(bus: Arc<dyn Bus>, topic: &str) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
        }
    }
}

impl Sink<DetectorTrigger> for BusTriggerSink {
    fn submit(&self, trigger: DetectorTrigger) {
        let topic = format!("{}/{}", self.topic, trigger.user.topic_suffix());
        let payload = format!("{} {}", utc_stamp(), trigger.level.as_str());
        publish(&self.bus, &topic, &payload);
    }
}

/// Republishes detector log items on `<topic>/<user>/<station>`.
pub struct BusDetectorLogSink {
    bus: Arc<dyn Bus>,
    topic: String,
}

impl BusDetectorLogSink {
    pub fn new(bus: Arc<dyn Bus>, topic: &str) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
        }
    }
}

impl Sink<DetectorLog> for BusDetectorLogSink {
    fn submit(&self, log: DetectorLog) {
        let stamp = utc_stamp();
        let topic = format!("{}/{}", self.topic, log.user.topic_suffix());
        for item in &log.items {
            let payload = if item.unit.is_empty() {
                format!("{stamp} {} {}", item.name, item.value)
            } else {
                format!("{stamp} {} {} {}", item.name, item.value, item.unit)
            };
            publish(&self.bus, &topic, &payload);
        }
    }
}
