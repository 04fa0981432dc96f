//! Pairwise time-difference histograms between all active stations.
//!
//! A background worker sinks every accepted hit and every trigger
//! transition. Hit timestamps collect in short per-station rings; on each
//! sampling pass the cross-pair differences Δt = t_j − t_i are binned into
//! one fixed-width histogram per unordered station pair. The whole store is
//! periodically serialized to the data directory and restored at startup.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use super::histogram::Histogram;
use super::ring_buffer::RingBuffer;
use super::upper_matrix::UpperMatrix;
use crate::messages::{Location, StationStatus, UserInfo};
use crate::pipeline::Stage;
use crate::util::geo;

/// Bins per pair histogram.
const BINS: usize = 2000;
/// Half-width of the histogram range: Δt spans ±100 µs.
const HALF_WIDTH_NS: i64 = 100_000;

const MAGIC: [u8; 4] = *b"MUCS";
const VERSION: u16 = 1;
const DUMP_FILE: &str = "station_coincidence.dat";

/// Input vocabulary of the analyzer's worker.
#[derive(Debug, Clone)]
pub enum PairEvent {
    Hit { station: u64, start_ns: i64 },
    Status { station: u64, status: StationStatus },
    AddStation { user: UserInfo, location: Location },
}

#[derive(Debug, Clone)]
pub struct PairHistogramsConfig {
    pub data_directory: PathBuf,
    /// Cadence of the Δt sampling pass.
    pub sample_interval: Duration,
    /// Cadence of the on-disk dump.
    pub save_interval: Duration,
    /// Timestamps retained per station between sampling passes.
    pub ring_size: usize,
}

impl Default for PairHistogramsConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("."),
            sample_interval: Duration::from_secs(6 * 3600),
            save_interval: Duration::from_secs(3600),
            ring_size: 50,
        }
    }
}

struct StationEntry {
    user: UserInfo,
    location: Location,
    status: StationStatus,
    timestamps: RingBuffer<i64>,
}

struct PairData {
    hist: Histogram,
    distance_m: f32,
    /// 0: a station is offline, 1: both online, 2: both reliable.
    online: u8,
    last_online_unix: i64,
    uptime: Duration,
}

impl PairData {
    fn new(distance_m: f32) -> Self {
        Self {
            hist: Histogram::new(BINS, -HALF_WIDTH_NS, HALF_WIDTH_NS),
            distance_m,
            online: 0,
            last_online_unix: 0,
            uptime: Duration::ZERO,
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The analyzer state, driven as a [`Stage`] by its own threaded sink.
pub struct PairHistograms {
    stations: Vec<StationEntry>,
    index: HashMap<u64, usize>,
    pairs: UpperMatrix<PairData>,
    cfg: PairHistogramsConfig,
    last_sample: Instant,
    last_save: Instant,
    last_uptick: Instant,
    saving: bool,
}

impl PairHistograms {
    pub fn new(cfg: PairHistogramsConfig) -> Self {
        let now = Instant::now();
        Self {
            stations: Vec::new(),
            index: HashMap::new(),
            pairs: UpperMatrix::new(),
            cfg,
            last_sample: now,
            last_save: now,
            last_uptick: now,
            saving: false,
        }
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.pairs()
    }

    fn dump_path(&self) -> PathBuf {
        self.cfg.data_directory.join(DUMP_FILE)
    }

    fn add_station(&mut self, user: UserInfo, location: Location) {
        let hash = user.station_hash();
        if let Some(&index) = self.index.get(&hash) {
            self.stations[index].location = location;
            return;
        }

        let ring_size = self.cfg.ring_size;
        let entry = StationEntry {
            user,
            location,
            status: StationStatus::Offline,
            timestamps: RingBuffer::new(ring_size),
        };
        let stations = &self.stations;
        self.pairs.add_station(|k| {
            let other = &stations[k].location;
            PairData::new(geo::great_circle_distance_m(
                other.lat,
                other.lon,
                entry.location.lat,
                entry.location.lon,
            ) as f32)
        });
        self.index.insert(hash, self.stations.len());
        self.stations.push(entry);
        debug!(stations = self.stations.len(), "station pair matrix grown");
    }

    fn update_status(&mut self, station: u64, status: StationStatus) {
        let Some(&changed) = self.index.get(&station) else {
            return;
        };
        self.stations[changed].status = status;

        let now = unix_now();
        for other in 0..self.stations.len() {
            if other == changed {
                continue;
            }
            let (i, j) = (other.min(changed), other.max(changed));
            let level = Self::online_level(&self.stations[i], &self.stations[j]);
            let pair = self.pairs.at_mut(i, j);
            pair.online = level;
            if level > 0 {
                pair.last_online_unix = now;
            }
        }
    }

    fn online_level(a: &StationEntry, b: &StationEntry) -> u8 {
        if !a.status.is_online() || !b.status.is_online() {
            0
        } else if a.status == StationStatus::Reliable && b.status == StationStatus::Reliable {
            2
        } else {
            1
        }
    }

    /// Bins all cross-pair time differences collected since the previous
    /// pass, then clears the rings so nothing is counted twice.
    fn sample_pass(&mut self) {
        let mut filled = 0_u64;
        for (i, j, pair) in self.pairs.iter_pairs_mut() {
            for &ti in self.stations[i].timestamps.iter() {
                for &tj in self.stations[j].timestamps.iter() {
                    let dt = tj - ti;
                    if dt.abs() <= HALF_WIDTH_NS {
                        pair.hist.fill(dt);
                        filled += 1;
                    }
                }
            }
        }
        for station in &mut self.stations {
            station.timestamps.clear();
        }
        debug!(filled, "station coincidence sampling pass complete");
    }

    /// Accrues simultaneous-online time on every pair.
    fn uptick(&mut self) {
        let elapsed = self.last_uptick.elapsed();
        self.last_uptick = Instant::now();
        let now = unix_now();
        for (_, _, pair) in self.pairs.iter_pairs_mut() {
            if pair.online > 0 {
                pair.uptime += elapsed;
                pair.last_online_unix = now;
            }
        }
    }

    fn encode(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&MAGIC)?;
        out.write_u16::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(self.stations.len() as u32)?;
        out.write_u32::<LittleEndian>(BINS as u32)?;
        out.write_u32::<LittleEndian>((2 * HALF_WIDTH_NS / BINS as i64) as u32)?;
        out.write_u32::<LittleEndian>((2 * HALF_WIDTH_NS) as u32)?;

        for station in &self.stations {
            write_string(out, &station.user.username)?;
            write_string(out, &station.user.station_id)?;
            let loc = &station.location;
            for value in [loc.lat, loc.lon, loc.alt, loc.h_acc, loc.v_acc, loc.dop] {
                out.write_f64::<LittleEndian>(value)?;
            }
        }

        for (i, j, pair) in self.pairs.iter_pairs() {
            out.write_u32::<LittleEndian>(i as u32)?;
            out.write_u32::<LittleEndian>(j as u32)?;
            out.write_f32::<LittleEndian>(pair.distance_m)?;
            out.write_u8(pair.online)?;
            out.write_i64::<LittleEndian>(pair.last_online_unix)?;
            out.write_i64::<LittleEndian>(pair.uptime.as_secs() as i64)?;
            for &bin in pair.hist.bins() {
                out.write_u32::<LittleEndian>(bin)?;
            }
        }
        Ok(())
    }

    fn decode(&mut self, data: &[u8]) -> io::Result<()> {
        let mut cursor = Cursor::new(data);

        let mut magic = [0_u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(invalid("bad magic"));
        }
        if cursor.read_u16::<LittleEndian>()? != VERSION {
            return Err(invalid("unsupported version"));
        }
        let n = cursor.read_u32::<LittleEndian>()? as usize;
        let bins = cursor.read_u32::<LittleEndian>()? as usize;
        let bin_width = cursor.read_u32::<LittleEndian>()? as i64;
        let total_width = cursor.read_u32::<LittleEndian>()? as i64;
        if bins != BINS || bin_width != 2 * HALF_WIDTH_NS / BINS as i64 || total_width != 2 * HALF_WIDTH_NS
        {
            return Err(invalid("histogram geometry mismatch"));
        }

        let mut stations = Vec::with_capacity(n);
        let mut index = HashMap::with_capacity(n);
        for position in 0..n {
            let username = read_string(&mut cursor)?;
            let station_id = read_string(&mut cursor)?;
            let mut fields = [0.0_f64; 6];
            for field in &mut fields {
                *field = cursor.read_f64::<LittleEndian>()?;
            }
            let user = UserInfo::new(username, station_id);
            index.insert(user.station_hash(), position);
            stations.push(StationEntry {
                user,
                location: Location {
                    lat: fields[0],
                    lon: fields[1],
                    alt: fields[2],
                    h_acc: fields[3],
                    v_acc: fields[4],
                    dop: fields[5],
                },
                status: StationStatus::Offline,
                timestamps: RingBuffer::new(self.cfg.ring_size),
            });
        }

        let mut pairs: UpperMatrix<PairData> = UpperMatrix::new();
        for _ in 0..n {
            pairs.add_station(|_| PairData::new(0.0));
        }
        for (i, j, pair) in pairs.iter_pairs_mut() {
            let first = cursor.read_u32::<LittleEndian>()? as usize;
            let second = cursor.read_u32::<LittleEndian>()? as usize;
            if first != i || second != j {
                return Err(invalid("pair order mismatch"));
            }
            pair.distance_m = cursor.read_f32::<LittleEndian>()?;
            pair.online = cursor.read_u8()?;
            pair.last_online_unix = cursor.read_i64::<LittleEndian>()?;
            pair.uptime = Duration::from_secs(cursor.read_i64::<LittleEndian>()?.max(0) as u64);
            let mut bins = vec![0_u32; BINS];
            for bin in &mut bins {
                *bin = cursor.read_u32::<LittleEndian>()?;
            }
            if !pair.hist.restore(&bins) {
                return Err(invalid("bin count mismatch"));
            }
        }

        self.stations = stations;
        self.index = index;
        self.pairs = pairs;
        Ok(())
    }

    /// Writes the dump with a length prefix, atomically replacing the
    /// previous file. A failed write leaves the old dump in place.
    pub fn save(&mut self) -> io::Result<()> {
        if self.saving {
            return Ok(());
        }
        self.saving = true;
        let result = self.save_inner();
        self.saving = false;
        result
    }

    fn save_inner(&self) -> io::Result<()> {
        let mut payload = Vec::new();
        self.encode(&mut payload)?;

        let mut blob = Vec::with_capacity(payload.len() + 8);
        blob.write_u64::<LittleEndian>(payload.len() as u64)?;
        blob.extend_from_slice(&payload);

        std::fs::create_dir_all(&self.cfg.data_directory)?;
        let path = self.dump_path();
        let tmp = path.with_extension("dat.tmp");
        std::fs::write(&tmp, &blob)?;
        std::fs::rename(&tmp, &path)?;
        info!(
            stations = self.stations.len(),
            pairs = self.pairs.pairs(),
            path = %path.display(),
            "station coincidence data saved"
        );
        Ok(())
    }

    /// Restores the previous dump if one exists. Returns false when there
    /// was nothing to load.
    pub fn load(&mut self) -> io::Result<bool> {
        let path = self.dump_path();
        let blob = match std::fs::read(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if blob.len() < 8 {
            return Err(invalid("truncated dump"));
        }
        let declared = Cursor::new(&blob[..8]).read_u64::<LittleEndian>()?;
        let payload = &blob[8..];
        if declared as usize != payload.len() {
            return Err(invalid("length prefix mismatch"));
        }
        self.decode(payload)?;
        info!(
            stations = self.stations.len(),
            pairs = self.pairs.pairs(),
            "station coincidence data restored"
        );
        Ok(true)
    }
}

impl Stage for PairHistograms {
    type Input = PairEvent;

    fn process(&mut self, event: PairEvent) {
        match event {
            PairEvent::Hit { station, start_ns } => {
                if let Some(&index) = self.index.get(&station) {
                    self.stations[index].timestamps.push(start_ns);
                }
            }
            PairEvent::Status { station, status } => self.update_status(station, status),
            PairEvent::AddStation { user, location } => self.add_station(user, location),
        }
    }

    fn tick(&mut self) {
        self.uptick();
        if self.last_sample.elapsed() >= self.cfg.sample_interval {
            self.sample_pass();
            self.last_sample = Instant::now();
        }
        if self.last_save.elapsed() >= self.cfg.save_interval {
            if let Err(e) = self.save() {
                error!("could not save station coincidence data: {e}");
            }
            self.last_save = Instant::now();
        }
    }

    fn post_run(&mut self) {
        // Bin whatever is still in the rings, then write the final dump.
        self.sample_pass();
        if let Err(e) = self.save() {
            error!("could not save station coincidence data on shutdown: {e}");
        }
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn write_string(out: &mut impl Write, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > u16::MAX as usize {
        warn!("truncating oversized string in dump");
    }
    let len = bytes.len().min(u16::MAX as usize);
    out.write_u16::<LittleEndian>(len as u16)?;
    out.write_all(&bytes[..len])
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> io::Result<String> {
    let len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0_u8; len];
    cursor.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| invalid("non-utf8 string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn location(lat: f64, lon: f64) -> Location {
        Location {
            lat,
            lon,
            alt: 450.0,
            h_acc: 5.0,
            v_acc: 9.0,
            dop: 1.5,
        }
    }

    fn analyzer(dir: &TempDir) -> PairHistograms {
        PairHistograms::new(PairHistogramsConfig {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        })
    }

    fn add(analyzer: &mut PairHistograms, name: &str, lat: f64, lon: f64) -> u64 {
        let user = UserInfo::new(name, "01");
        let hash = user.station_hash();
        analyzer.process(PairEvent::AddStation {
            user,
            location: location(lat, lon),
        });
        hash
    }

    #[test]
    fn test_matrix_grows_with_stations() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer(&dir);

        add(&mut analyzer, "a", 48.0, 11.0);
        add(&mut analyzer, "b", 48.0, 12.0);
        add(&mut analyzer, "c", 49.0, 11.0);
        assert_eq!(analyzer.station_count(), 3);
        assert_eq!(analyzer.pair_count(), 3);

        add(&mut analyzer, "d", 49.0, 12.0);
        assert_eq!(analyzer.pair_count(), 6);

        // Re-registration must not grow the matrix.
        add(&mut analyzer, "b", 48.1, 12.0);
        assert_eq!(analyzer.station_count(), 4);
        assert_eq!(analyzer.pair_count(), 6);
    }

    #[test]
    fn test_pair_distance_set_at_registration() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer(&dir);
        add(&mut analyzer, "a", 48.0, 11.0);
        add(&mut analyzer, "b", 48.0, 12.0);

        // One degree of longitude at 48° latitude is roughly 74 km.
        let distance = analyzer.pairs.at(0, 1).distance_m;
        assert!((70_000.0..80_000.0).contains(&distance), "{distance}");
    }

    #[test]
    fn test_sampling_bins_time_differences() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer(&dir);
        let a = add(&mut analyzer, "a", 48.0, 11.0);
        let b = add(&mut analyzer, "b", 48.0, 12.0);

        analyzer.process(PairEvent::Hit {
            station: a,
            start_ns: 1_000_000,
        });
        analyzer.process(PairEvent::Hit {
            station: b,
            start_ns: 1_000_250,
        });
        // Out of range for the ±100 µs histogram.
        analyzer.process(PairEvent::Hit {
            station: b,
            start_ns: 2_000_000,
        });
        analyzer.sample_pass();

        let hist = &analyzer.pairs.at(0, 1).hist;
        assert_eq!(hist.total(), 1);
        assert_eq!(hist.bins()[1002], 1);

        // The rings were cleared: a second pass adds nothing.
        analyzer.sample_pass();
        assert_eq!(analyzer.pairs.at(0, 1).hist.total(), 1);
    }

    #[test]
    fn test_online_levels() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer(&dir);
        let a = add(&mut analyzer, "a", 48.0, 11.0);
        let b = add(&mut analyzer, "b", 48.0, 12.0);
        assert_eq!(analyzer.pairs.at(0, 1).online, 0);

        analyzer.process(PairEvent::Status {
            station: a,
            status: StationStatus::Unreliable,
        });
        assert_eq!(analyzer.pairs.at(0, 1).online, 0);

        analyzer.process(PairEvent::Status {
            station: b,
            status: StationStatus::Reliable,
        });
        assert_eq!(analyzer.pairs.at(0, 1).online, 1);

        analyzer.process(PairEvent::Status {
            station: a,
            status: StationStatus::Reliable,
        });
        assert_eq!(analyzer.pairs.at(0, 1).online, 2);

        analyzer.process(PairEvent::Status {
            station: b,
            status: StationStatus::Offline,
        });
        assert_eq!(analyzer.pairs.at(0, 1).online, 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer(&dir);
        let a = add(&mut analyzer, "alice", 48.0, 11.0);
        let b = add(&mut analyzer, "bob", 48.5, 11.5);
        add(&mut analyzer, "carol", 49.0, 12.0);

        analyzer.process(PairEvent::Status {
            station: a,
            status: StationStatus::Reliable,
        });
        analyzer.process(PairEvent::Status {
            station: b,
            status: StationStatus::Reliable,
        });
        for offset in [-50_000, -100, 0, 300, 99_900] {
            analyzer.process(PairEvent::Hit {
                station: a,
                start_ns: 5_000_000,
            });
            analyzer.process(PairEvent::Hit {
                station: b,
                start_ns: 5_000_000 + offset,
            });
            analyzer.sample_pass();
        }
        analyzer.save().unwrap();

        let mut restored = PairHistograms::new(PairHistogramsConfig {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        });
        assert!(restored.load().unwrap());

        assert_eq!(restored.station_count(), 3);
        assert_eq!(restored.pair_count(), 3);
        for (i, j, pair) in analyzer.pairs.iter_pairs() {
            let other = restored.pairs.at(i, j);
            assert_eq!(other.hist, pair.hist, "bins differ for pair ({i},{j})");
            assert_eq!(other.distance_m, pair.distance_m);
            assert_eq!(other.online, pair.online);
            assert_eq!(other.last_online_unix, pair.last_online_unix);
            assert_eq!(other.uptime.as_secs(), pair.uptime.as_secs());
        }
        for (left, right) in analyzer.stations.iter().zip(restored.stations.iter()) {
            assert_eq!(left.user, right.user);
            assert_eq!(left.location, right.location);
        }
        // Hashes are recomputed on load, so hits keep routing.
        assert!(restored.index.contains_key(&a));
    }

    #[test]
    fn test_load_without_dump_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer(&dir);
        assert!(!analyzer.load().unwrap());
        assert_eq!(analyzer.station_count(), 0);
    }

    #[test]
    fn test_corrupt_dump_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DUMP_FILE);
        std::fs::write(&path, b"garbage").unwrap();

        let mut analyzer = analyzer(&dir);
        assert!(analyzer.load().is_err());
    }
}
