//! Long-running supervision components: the station registry, the adaptive
//! timebase controller and the process-wide state reporter.

mod state;
mod station;
mod timebase;

pub use state::{ClusterMetrics, StateSupervisor};
pub use station::{StationDirectory, StationMessage, StationSupervisor, StationSupervisorConfig};
pub use timebase::{TimebaseConfig, TimebaseHandle, TimebaseSupervisor};
