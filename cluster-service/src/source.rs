//! Bus subscriptions decoded into typed pipeline messages.
//!
//! One worker thread per subscription. Malformed payloads are logged and
//! dropped; the stream continues.

use crossbeam_channel::RecvTimeoutError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use cluster_core::pipeline::{ShutdownToken, Sink, WorkerHandle};
use cluster_core::{DetectorInfo, DetectorLog, Location, RawHit, UserInfo};
use cluster_core::messages::{LogItem, LogValue};

use crate::link::Bus;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected at least {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
    #[error("invalid {field} field: '{value}'")]
    Field { field: &'static str, value: String },
}

fn parse<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| DecodeError::Field {
        field,
        value: value.to_string(),
    })
}

/// Decodes one hit payload.
///
/// Field order on the data topics: uuid, station hash (hex), geohash,
/// time accuracy, multiplicity, cluster coincidence time, relative offset,
/// hardware counter, duration, GNSS time grid, fix, start timestamp, utc
/// flag. The uuid, geohash and the cluster-level fields are produced by
/// upstream aggregation layers and ignored here.
pub fn decode_hit(payload: &str) -> Result<RawHit, DecodeError> {
    let fields: Vec<&str> = payload.split_whitespace().collect();
    if fields.len() < 13 {
        return Err(DecodeError::FieldCount {
            expected: 13,
            got: fields.len(),
        });
    }

    let station = u64::from_str_radix(fields[1], 16).map_err(|_| DecodeError::Field {
        field: "station hash",
        value: fields[1].to_string(),
    })?;

    Ok(RawHit {
        station,
        start_ns: parse("start", fields[11])?,
        duration_ns: parse("duration", fields[8])?,
        time_acc_ns: parse("time accuracy", fields[3])?,
        ublox_counter: parse("hardware counter", fields[7])?,
        gnss_time_grid: parse("time grid", fields[9])?,
        fix: parse::<u8>("fix", fields[10])? != 0,
        utc: parse::<u8>("utc", fields[12])? != 0,
    })
}

/// Subscribes a hit topic and feeds decoded hits into the pipeline.
pub struct HitSource;

impl HitSource {
    pub fn spawn(
        bus: &Arc<dyn Bus>,
        filter: &str,
        sink: Arc<dyn Sink<RawHit>>,
        stop: ShutdownToken,
    ) -> WorkerHandle {
        let rx = bus.subscribe(filter);
        let name = format!("source:{filter}");
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || loop {
                if stop.is_cancelled() {
                    break;
                }
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(message) => match decode_hit(&message.payload) {
                        Ok(hit) => sink.submit(hit),
                        Err(e) => warn!(topic = message.topic, "dropping hit message: {e}"),
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn source thread");
        WorkerHandle::new(&name, thread)
    }
}

const GEO_LATITUDE: &str = "geoLatitude";
const GEO_LONGITUDE: &str = "geoLongitude";
const GEO_ALTITUDE: &str = "geoAltitude";
const GEO_HOR_ACCURACY: &str = "geoHorAccuracy";
const GEO_VERT_ACCURACY: &str = "geoVertAccuracy";
const POSITION_DOP: &str = "positionDOP";

/// Location fields arrive as individual log items; a station's entry is
/// promoted to a [`DetectorInfo`] once all six fields have been seen.
#[derive(Debug, Default, Clone)]
struct PartialLocation {
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    h_acc: Option<f64>,
    v_acc: Option<f64>,
    dop: Option<f64>,
}

impl PartialLocation {
    /// Returns true when the item was a location field and was absorbed.
    fn absorb(&mut self, name: &str, value: &str) -> bool {
        let Ok(number) = value.parse::<f64>() else {
            return false;
        };
        let slot = match name {
            GEO_LATITUDE => &mut self.lat,
            GEO_LONGITUDE => &mut self.lon,
            GEO_ALTITUDE => &mut self.alt,
            GEO_HOR_ACCURACY => &mut self.h_acc,
            GEO_VERT_ACCURACY => &mut self.v_acc,
            POSITION_DOP => &mut self.dop,
            _ => return false,
        };
        *slot = Some(number);
        true
    }

    fn complete(&self) -> Option<Location> {
        Some(Location {
            lat: self.lat?,
            lon: self.lon?,
            alt: self.alt?,
            h_acc: self.h_acc?,
            v_acc: self.v_acc?,
            dop: self.dop?,
        })
    }
}

/// Subscribes the log topic, assembling detector locations and forwarding
/// all other items as detector logs.
pub struct LogSource;

impl LogSource {
    pub fn spawn(
        bus: &Arc<dyn Bus>,
        filter: &str,
        info_sink: Arc<dyn Sink<DetectorInfo>>,
        log_sink: Arc<dyn Sink<DetectorLog>>,
        stop: ShutdownToken,
    ) -> WorkerHandle {
        let rx = bus.subscribe(filter);
        let name = format!("source:{filter}");
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut pending: HashMap<u64, PartialLocation> = HashMap::new();
                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    match rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(message) => Self::handle(
                            &message.topic,
                            &message.payload,
                            &mut pending,
                            &info_sink,
                            &log_sink,
                        ),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn source thread");
        WorkerHandle::new(&name, thread)
    }

    fn handle(
        topic: &str,
        payload: &str,
        pending: &mut HashMap<u64, PartialLocation>,
        info_sink: &Arc<dyn Sink<DetectorInfo>>,
        log_sink: &Arc<dyn Sink<DetectorLog>>,
    ) {
        let Some(user) = user_from_topic(topic) else {
            debug!(topic, "log message without user/station suffix dropped");
            return;
        };

        // Payload shape: "<timestamp> <name> <value> [unit]".
        let fields: Vec<&str> = payload.split_whitespace().collect();
        if fields.len() < 3 {
            warn!(topic, "dropping malformed log message");
            return;
        }
        let (name, value) = (fields[1], fields[2]);
        let unit = fields.get(3).copied().unwrap_or("");

        let entry = pending.entry(user.station_hash()).or_default();
        if entry.absorb(name, value) {
            if let Some(location) = entry.complete() {
                pending.remove(&user.station_hash());
                info_sink.submit(DetectorInfo { user, location });
            }
            return;
        }

        log_sink.submit(DetectorLog {
            user,
            items: vec![LogItem {
                name: name.to_string(),
                value: LogValue::parse(value),
                unit: unit.to_string(),
            }],
        });
    }
}

/// Extracts `<user>/<station>` from a `muonpi/log/<user>/<station>` topic.
fn user_from_topic(topic: &str) -> Option<UserInfo> {
    let mut parts = topic.split('/');
    let (_prefix, _channel) = (parts.next()?, parts.next()?);
    let username = parts.next()?;
    let station_id = parts.next()?;
    if username.is_empty() || station_id.is_empty() {
        return None;
    }
    Some(UserInfo::new(username, station_id))
}
