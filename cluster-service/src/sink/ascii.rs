//! Human-readable one-line rendering for debug runs.

use std::io::Write;
use std::sync::Mutex;

use cluster_core::pipeline::Sink;
use cluster_core::{ClusterLog, DetectorSummary, Event};

/// One-line textual rendering of a pipeline message.
pub trait Render {
    fn render(&self) -> String;
}

impl Render for Event {
    fn render(&self) -> String {
        let stations: Vec<String> = self
            .hits()
            .iter()
            .map(|h| h.user.display_name())
            .collect();
        format!(
            "event {:016x} n={} start={} span={}ns [{}]",
            self.id(),
            self.n(),
            self.start_ns(),
            self.span_ns(),
            stations.join(", ")
        )
    }
}

impl Render for ClusterLog {
    fn render(&self) -> String {
        format!(
            "cluster uptime={}s timebase={}ns detectors={}/{} in={:.2}Hz out={:.2}Hz buffers={} cpu={:.1}%/{:.1}% mem={}B",
            self.uptime_s,
            self.timebase_ns,
            self.reliable_detectors,
            self.total_detectors,
            self.frequency_in,
            self.frequency_l1_out,
            self.buffer_length,
            self.process_cpu_load,
            self.system_cpu_load,
            self.memory_usage,
        )
    }
}

impl Render for DetectorSummary {
    fn render(&self) -> String {
        format!(
            "summary {} rate={:.3}±{:.3}Hz time_acc={:.1}ns pulse={:.1}ns incoming={} deadtime={:.3}",
            self.user.display_name(),
            self.mean_eventrate,
            self.stddev_eventrate,
            self.mean_time_acc,
            self.mean_pulselength,
            self.incoming,
            self.deadtime_factor,
        )
    }
}

/// Writes rendered messages to any `Write`, one per line.
pub struct AsciiSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> AsciiSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<T: Render + Send, W: Write + Send> Sink<T> for AsciiSink<W> {
    fn submit(&self, item: T) {
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "{}", item.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_core::{Hit, Location, UserInfo};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_event_rendering() {
        let hit = Hit {
            station: 7,
            user: UserInfo::new("alice", "01"),
            location: Location::default(),
            start_ns: 1000,
            duration_ns: 100,
            time_acc_ns: 20.0,
            ublox_counter: 1,
            gnss_time_grid: 1,
            fix: true,
            utc: false,
        };
        let event = Event::from_hit(hit);

        let buf = SharedBuf::default();
        let sink = AsciiSink::new(buf.clone());
        sink.submit(event);

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("n=1"));
        assert!(written.contains("alice 01"));
        assert!(written.ends_with('\n'));
    }
}
