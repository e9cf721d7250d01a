//! Typed device abstractions for beamline hardware.
//!
//! This crate binds named process variables (PVs) of an EPICS-style control
//! system to logical device attributes, and composes small deterministic
//! coordinate conversions on top: waveplate position to laser pulse energy
//! through a calibration table, crystal angle to photon energy through the
//! Bragg condition, raw power-meter voltages to calibrated readings, and
//! nanosecond timing records to seconds.
//!
//! Wire-protocol handling stays outside the crate: every device talks to the
//! control system through the [`transport::ChannelAccess`] trait, and the
//! bundled [`transport::MockChannelAccess`] makes all of it testable without
//! a beamline.

pub mod config;
pub mod error;
pub mod imager;
pub mod laser_energy;
pub mod lookup;
pub mod mono;
pub mod motor;
pub mod signal;
pub mod state;
pub mod transport;

pub use error::{DeviceError, Result};
