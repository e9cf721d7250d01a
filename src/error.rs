//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DeviceError`, used across all
//! device abstractions. Using the `thiserror` crate, it provides a centralized
//! and consistent way to handle the failure modes that matter on a beamline:
//! unreachable process variables, calibration-table problems, conversion
//! targets outside the reachable range, and soft-limit violations.
//!
//! With `#[from]` conversions, `DeviceError` can be created seamlessly from
//! underlying error types, so device code propagates errors with `?`.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors produced by device abstractions and conversion logic.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// File-system failure (calibration or configuration files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Semantically invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unparseable configuration file.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A process variable could not be reached.
    #[error("Process variable '{pv}' is not connected")]
    ChannelNotConnected {
        /// PV name.
        pv: String,
    },

    /// A process variable holds a different type than requested.
    #[error("Process variable '{pv}' holds {found}, expected {expected}")]
    ChannelTypeMismatch {
        /// PV name.
        pv: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type the record actually holds.
        found: &'static str,
    },

    /// Malformed or inconsistent calibration data.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// A requested value falls outside the reachable range.
    #[error("Value {value} outside reachable range [{min}, {max}]")]
    OutOfRange {
        /// The rejected value.
        value: f64,
        /// Lower bound of the reachable range.
        min: f64,
        /// Upper bound of the reachable range.
        max: f64,
    },

    /// An inverse mapping was requested on a non-monotonic table.
    #[error("Table is not invertible: {0}")]
    NotInvertible(String),

    /// A move target falls outside the motor soft limits.
    #[error("Target {target} violates soft limits [{low}, {high}]")]
    LimitViolation {
        /// The rejected move target.
        target: f64,
        /// Low soft limit.
        low: f64,
        /// High soft limit.
        high: f64,
    },

    /// A state name not known to the state positioner.
    #[error("Unknown state '{state}' (known states: {known:?})")]
    UnknownState {
        /// The rejected state name.
        state: String,
        /// States the positioner understands.
        known: Vec<String>,
    },

    /// A settle or readiness wait expired.
    #[error("Timed out after {timeout:?} waiting on '{pv}'")]
    Timeout {
        /// PV that was polled.
        pv: String,
        /// How long the wait lasted.
        timeout: Duration,
    },

    /// A unit request on a device with a fixed engineering unit.
    #[error("Engineering unit '{requested}' not supported (device is fixed to '{fixed}')")]
    UnsupportedUnit {
        /// Unit the caller asked for.
        requested: String,
        /// Unit the device is fixed to.
        fixed: String,
    },

    /// An operation the device is not configured for.
    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::OutOfRange {
            value: 12.0,
            min: 0.0,
            max: 10.0,
        };
        assert_eq!(err.to_string(), "Value 12 outside reachable range [0, 10]");
    }

    #[test]
    fn test_out_of_range_display_fits_unbounded_ranges() {
        // Also raised for physical bounds with no table behind them, such
        // as an energy floor with no upper limit.
        let err = DeviceError::OutOfRange {
            value: 1.0,
            min: 1.977,
            max: f64::INFINITY,
        };
        assert_eq!(err.to_string(), "Value 1 outside reachable range [1.977, inf]");
    }

    #[test]
    fn test_channel_not_connected_display() {
        let err = DeviceError::ChannelNotConnected {
            pv: "LAS:WP:01.RBV".into(),
        };
        assert!(err.to_string().contains("LAS:WP:01.RBV"));
    }
}
