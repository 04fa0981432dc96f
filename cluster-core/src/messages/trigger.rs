//! Station trigger state and transition messages.

use serde::{Deserialize, Serialize};

use super::hit::UserInfo;

/// Operational state of a station as tracked by its trigger state machine.
///
/// `Unreliable` and `Reliable` are both online; reliability qualifies the
/// stability of the station's event rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationStatus {
    Offline,
    Unreliable,
    Reliable,
}

impl StationStatus {
    pub fn is_online(self) -> bool {
        !matches!(self, StationStatus::Offline)
    }
}

/// Transition level carried by a trigger message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerLevel {
    Offline,
    Online,
    Unreliable,
    Reliable,
}

impl TriggerLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerLevel::Offline => "offline",
            TriggerLevel::Online => "online",
            TriggerLevel::Unreliable => "unreliable",
            TriggerLevel::Reliable => "reliable",
        }
    }

    /// Maps a state transition to the level to publish.
    pub fn from_transition(from: StationStatus, to: StationStatus) -> Option<Self> {
        match (from, to) {
            (_, _) if from == to => None,
            (_, StationStatus::Offline) => Some(TriggerLevel::Offline),
            (StationStatus::Offline, _) => Some(TriggerLevel::Online),
            (_, StationStatus::Reliable) => Some(TriggerLevel::Reliable),
            (_, StationStatus::Unreliable) => Some(TriggerLevel::Unreliable),
        }
    }
}

/// Published on `muonpi/trigger/<user>/<station>` on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorTrigger {
    pub user: UserInfo,
    pub level: TriggerLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_levels() {
        use StationStatus::*;

        assert_eq!(
            TriggerLevel::from_transition(Offline, Unreliable),
            Some(TriggerLevel::Online)
        );
        assert_eq!(
            TriggerLevel::from_transition(Unreliable, Reliable),
            Some(TriggerLevel::Reliable)
        );
        assert_eq!(
            TriggerLevel::from_transition(Reliable, Unreliable),
            Some(TriggerLevel::Unreliable)
        );
        assert_eq!(
            TriggerLevel::from_transition(Reliable, Offline),
            Some(TriggerLevel::Offline)
        );
        assert_eq!(
            TriggerLevel::from_transition(Unreliable, Offline),
            Some(TriggerLevel::Offline)
        );
        assert_eq!(TriggerLevel::from_transition(Reliable, Reliable), None);
    }
}
