//! Station metadata and log messages from the bus.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::hit::{Location, UserInfo};

/// Location announcement for a station. Creates or updates the station's
/// registry record.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorInfo {
    pub user: UserInfo,
    pub location: Location,
}

/// A single named value reported by a station (bias voltage, temperature,
/// thresholds, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    pub name: String,
    pub value: LogValue,
    /// Unit string, empty when dimensionless.
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Integer(v) => write!(f, "{v}"),
            LogValue::Float(v) => write!(f, "{v}"),
            LogValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl LogValue {
    /// Parses a payload field, preferring the narrowest representation.
    pub fn parse(field: &str) -> Self {
        if let Ok(v) = field.parse::<i64>() {
            LogValue::Integer(v)
        } else if let Ok(v) = field.parse::<f64>() {
            LogValue::Float(v)
        } else {
            LogValue::Text(field.to_string())
        }
    }
}

/// Named key/value items from one station, forwarded to the log sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorLog {
    pub user: UserInfo,
    pub items: Vec<LogItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_value_parse() {
        assert_eq!(LogValue::parse("42"), LogValue::Integer(42));
        assert_eq!(LogValue::parse("-7"), LogValue::Integer(-7));
        assert_eq!(LogValue::parse("3.25"), LogValue::Float(3.25));
        assert_eq!(LogValue::parse("v1.2.3"), LogValue::Text("v1.2.3".into()));
    }

    #[test]
    fn test_log_value_display() {
        assert_eq!(LogValue::Integer(5).to_string(), "5");
        assert_eq!(LogValue::Float(1.5).to_string(), "1.5");
        assert_eq!(LogValue::Text("ok".into()).to_string(), "ok");
    }
}
