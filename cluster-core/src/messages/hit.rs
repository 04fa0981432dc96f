//! Detector hits and station identity.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Geographic position of a detector station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in meters above the ellipsoid.
    pub alt: f64,
    /// Horizontal accuracy in meters.
    pub h_acc: f64,
    /// Vertical accuracy in meters.
    pub v_acc: f64,
    /// Position dilution of precision.
    pub dop: f64,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            h_acc: f64::MAX,
            v_acc: f64::MAX,
            dop: f64::MAX,
        }
    }
}

/// Identity of a detector station: the owning user plus the station id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub station_id: String,
}

impl UserInfo {
    pub fn new(username: impl Into<String>, station_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            station_id: station_id.into(),
        }
    }

    /// The 64-bit station hash keying all per-station state.
    ///
    /// Hashes are process-local: persisted artifacts store the full
    /// `UserInfo` and recompute the hash at load time.
    pub fn station_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.username.hash(&mut hasher);
        self.station_id.hash(&mut hasher);
        hasher.finish()
    }

    /// `<user>/<station>` topic suffix used on the bus.
    pub fn topic_suffix(&self) -> String {
        format!("{}/{}", self.username, self.station_id)
    }

    /// `<user> <station>` display name used in summary payloads.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.username, self.station_id)
    }
}

/// A hit as decoded from the bus, before the owning station is known.
///
/// The station supervisor resolves the station hash against its registry
/// and promotes accepted raw hits to [`Hit`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    /// Hash of the publishing station.
    pub station: u64,
    /// GNSS timestamp of the rising edge, nanoseconds.
    pub start_ns: i64,
    /// Pulse length in nanoseconds.
    pub duration_ns: i64,
    /// Reported timing accuracy in nanoseconds.
    pub time_acc_ns: f64,
    /// Hardware event counter, wraps at 2^16.
    pub ublox_counter: u16,
    /// Time grid the station was synced to at the moment of the hit.
    pub gnss_time_grid: u8,
    /// Whether the station had a valid GNSS fix.
    pub fix: bool,
    /// Whether the station timestamps in UTC.
    pub utc: bool,
}

/// A hit accepted by the station supervisor, carrying the registered
/// station identity and location. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub station: u64,
    pub user: UserInfo,
    pub location: Location,
    pub start_ns: i64,
    pub duration_ns: i64,
    pub time_acc_ns: f64,
    pub ublox_counter: u16,
    pub gnss_time_grid: u8,
    pub fix: bool,
    pub utc: bool,
}

impl Hit {
    pub fn from_raw(raw: RawHit, user: UserInfo, location: Location) -> Self {
        Self {
            station: raw.station,
            user,
            location,
            start_ns: raw.start_ns,
            duration_ns: raw.duration_ns,
            time_acc_ns: raw.time_acc_ns,
            ublox_counter: raw.ublox_counter,
            gnss_time_grid: raw.gnss_time_grid,
            fix: raw.fix,
            utc: raw.utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_hash_distinguishes_stations() {
        let a = UserInfo::new("alice", "station-1");
        let b = UserInfo::new("alice", "station-2");
        let c = UserInfo::new("bob", "station-1");

        assert_ne!(a.station_hash(), b.station_hash());
        assert_ne!(a.station_hash(), c.station_hash());
        assert_eq!(a.station_hash(), UserInfo::new("alice", "station-1").station_hash());
    }

    #[test]
    fn test_topic_suffix() {
        let user = UserInfo::new("alice", "station-1");
        assert_eq!(user.topic_suffix(), "alice/station-1");
        assert_eq!(user.display_name(), "alice station-1");
    }
}
