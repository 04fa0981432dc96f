//! Time-series database sink.
//!
//! Messages are rendered into line protocol and handed to a background
//! writer that batches rows and posts them to the database's HTTP write
//! endpoint. A failed write drops that batch and the pipeline continues;
//! rows accumulate in the channel while the database is unreachable.

use chrono::Utc;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use cluster_core::pipeline::{ShutdownToken, Sink, WorkerHandle};
use cluster_core::{ClusterLog, DetectorLog, DetectorSummary, Event};

use crate::config::DatabaseConfig;

const BATCH_LIMIT: usize = 200;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Escapes a tag value for line protocol.
fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(' ', "\\ ")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Renders a message into one or more line-protocol rows.
pub trait ToLineProtocol {
    fn to_lines(&self, out: &mut Vec<String>);
}

impl ToLineProtocol for Event {
    fn to_lines(&self, out: &mut Vec<String>) {
        if self.n() < 2 {
            return;
        }
        for hit in self.hits() {
            out.push(format!(
                "L1Event,user={},detector={} uuid=\"{:016x}\",coinc_level={}i,coinc_time={}i,time_diff={}i,time_acc={},duration={}i,ublox_counter={}i,fix={}i,utc={}i {}",
                escape_tag(&hit.user.username),
                escape_tag(&hit.user.station_id),
                self.id(),
                self.n(),
                self.span_ns(),
                hit.start_ns - self.start_ns(),
                hit.time_acc_ns,
                hit.duration_ns,
                hit.ublox_counter,
                u8::from(hit.fix),
                u8::from(hit.utc),
                hit.start_ns,
            ));
        }
    }
}

impl ToLineProtocol for ClusterLog {
    fn to_lines(&self, out: &mut Vec<String>) {
        let outgoing: u64 = self
            .outgoing
            .iter()
            .filter(|(&n, _)| n >= 2)
            .map(|(_, &count)| count)
            .sum();
        out.push(format!(
            "cluster_summary timeout={}i,timebase={}i,uptime={}i,frequency_in={},frequency_l1_out={},buffer_length={}i,total_detectors={}i,reliable_detectors={}i,max_coincidences={}i,cpu_load={},process_cpu_load={},memory_usage={}i,incoming={}i,outgoing={}i {}",
            self.timeout_ms,
            self.timebase_ns,
            self.uptime_s,
            self.frequency_in,
            self.frequency_l1_out,
            self.buffer_length,
            self.total_detectors,
            self.reliable_detectors,
            self.maximum_n,
            self.system_cpu_load,
            self.process_cpu_load,
            self.memory_usage,
            self.incoming,
            outgoing,
            now_ns(),
        ));
    }
}

impl ToLineProtocol for DetectorSummary {
    fn to_lines(&self, out: &mut Vec<String>) {
        out.push(format!(
            "detector_summary,user={},detector={} eventrate={},eventrate_stddev={},time_acc={},pulselength={},incoming={}i,ublox_counter_progress={},deadtime_factor={} {}",
            escape_tag(&self.user.username),
            escape_tag(&self.user.station_id),
            self.mean_eventrate,
            self.stddev_eventrate,
            self.mean_time_acc,
            self.mean_pulselength,
            self.incoming,
            self.ublox_counter_progress,
            self.deadtime_factor,
            now_ns(),
        ));
    }
}

impl ToLineProtocol for DetectorLog {
    fn to_lines(&self, out: &mut Vec<String>) {
        let stamp = now_ns();
        for item in &self.items {
            out.push(format!(
                "detector_log,user={},detector={} {}=\"{}\",unit=\"{}\" {}",
                escape_tag(&self.user.username),
                escape_tag(&self.user.station_id),
                escape_tag(&item.name),
                item.value,
                item.unit,
                stamp,
            ));
        }
    }
}

/// Background writer shared by all database sinks.
pub struct DatabaseLink {
    tx: Sender<String>,
}

impl DatabaseLink {
    /// Spawns the batching writer thread.
    pub fn spawn(cfg: DatabaseConfig, stop: ShutdownToken) -> (Arc<Self>, WorkerHandle) {
        let (tx, rx) = unbounded::<String>();
        let url = format!(
            "http://{}:{}/write?db={}&u={}&p={}",
            cfg.host, cfg.port, cfg.database, cfg.login.username, cfg.login.password
        );

        let thread = std::thread::Builder::new()
            .name("database".into())
            .spawn(move || {
                let client = match reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                {
                    Ok(client) => client,
                    Err(e) => {
                        warn!("database writer disabled, could not build http client: {e}");
                        return;
                    }
                };
                let mut batch: Vec<String> = Vec::new();
                let mut last_flush = std::time::Instant::now();

                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    match rx.recv_timeout(Duration::from_millis(250)) {
                        Ok(line) => batch.push(line),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if batch.len() >= BATCH_LIMIT || last_flush.elapsed() >= FLUSH_INTERVAL {
                        Self::flush(&client, &url, &mut batch);
                        last_flush = std::time::Instant::now();
                    }
                }

                while let Ok(line) = rx.try_recv() {
                    batch.push(line);
                }
                Self::flush(&client, &url, &mut batch);
            })
            .expect("failed to spawn database writer");

        (Arc::new(Self { tx }), WorkerHandle::new("database", thread))
    }

    fn flush(client: &reqwest::blocking::Client, url: &str, batch: &mut Vec<String>) {
        if batch.is_empty() {
            return;
        }
        let body = batch.join("\n");
        let count = batch.len();
        batch.clear();

        match client.post(url).body(body).send() {
            Ok(response) if response.status().is_success() => {
                debug!(rows = count, "database batch written");
            }
            Ok(response) => {
                warn!(rows = count, status = %response.status(), "database write rejected, dropping batch");
            }
            Err(e) => {
                warn!(rows = count, "database write failed, dropping batch: {e}");
            }
        }
    }

    fn submit_line(&self, line: String) {
        let _ = self.tx.send(line);
    }
}

/// Sink adapter rendering `T` into rows for the shared writer.
pub struct DatabaseSink<T: ToLineProtocol> {
    link: Arc<DatabaseLink>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: ToLineProtocol> DatabaseSink<T> {
    pub fn new(link: Arc<DatabaseLink>) -> Self {
        Self {
            link,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: ToLineProtocol + Send> Sink<T> for DatabaseSink<T> {
    fn submit(&self, item: T) {
        let mut lines = Vec::new();
        item.to_lines(&mut lines);
        for line in lines {
            self.link.submit_line(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_core::{Hit, Location, UserInfo};

    fn hit(station: u64, start_ns: i64) -> Hit {
        Hit {
            station,
            user: UserInfo::new("alice liddell", "01"),
            location: Location::default(),
            start_ns,
            duration_ns: 150,
            time_acc_ns: 25.0,
            ublox_counter: 9,
            gnss_time_grid: 1,
            fix: true,
            utc: false,
        }
    }

    #[test]
    fn test_event_lines_use_hit_timestamps() {
        let mut event = Event::from_hit(hit(1, 1_000));
        let mut second = hit(2, 1_500);
        second.user = UserInfo::new("bob", "02");
        event.add(second);

        let mut lines = Vec::new();
        event.to_lines(&mut lines);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("L1Event,user=alice\\ liddell,detector=01 "));
        assert!(lines[0].ends_with(" 1000"));
        assert!(lines[1].ends_with(" 1500"));
        assert!(lines[1].contains("time_diff=500i"));
    }

    #[test]
    fn test_single_events_render_no_lines() {
        let event = Event::from_hit(hit(1, 0));
        let mut lines = Vec::new();
        event.to_lines(&mut lines);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_tag_escaping() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
    }
}
