//! Online analysis: per-station meters, the coincidence filter and the
//! pairwise time-difference store.

mod coincidence;
mod detector;
mod histogram;
mod rate_meter;
mod ring_buffer;
mod station_coincidence;
mod upper_matrix;

pub use coincidence::{CoincidenceConfig, CoincidenceFilter};
pub use detector::{DetectorStation, StationConfig};
pub use histogram::Histogram;
pub use rate_meter::RateMeter;
pub use ring_buffer::RingBuffer;
pub use station_coincidence::{PairEvent, PairHistograms, PairHistogramsConfig};
pub use upper_matrix::UpperMatrix;
