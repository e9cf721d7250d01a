//! Laser pulse-energy and timing stages.
//!
//! [`LaserEnergyPositioner`] turns a waveplate axis into a pulse-energy
//! pseudo-positioner via a calibration table: requesting an energy in µJ
//! inverse-maps through the table to a waveplate position and moves the axis,
//! and the energy readback forward-maps the current axis position.
//!
//! [`LaserTiming`] wraps the laser target-time record, which counts in
//! nanoseconds, so users work in seconds.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{DeviceError, Result};
use crate::lookup::CalibrationTable;
use crate::motor::Movable;
use crate::signal::{Signal, UnitConversionSignal};
use crate::transport::ChannelAccess;

/// Waveplate-position ↔ pulse-energy pseudo-positioner.
pub struct LaserEnergyPositioner<M: Movable> {
    axis: M,
    table: CalibrationTable,
}

impl<M: Movable> LaserEnergyPositioner<M> {
    /// Compose a waveplate axis with a calibration table.
    ///
    /// The table must be invertible (strictly monotonic energy column), or
    /// energy requests could not be mapped to a unique waveplate position.
    pub fn new(axis: M, table: CalibrationTable) -> Result<Self> {
        if !table.is_invertible() {
            return Err(DeviceError::NotInvertible(
                "energy column of the calibration table must be strictly monotonic".into(),
            ));
        }
        Ok(Self { axis, table })
    }

    /// Load the calibration file and compose it with the axis.
    pub fn from_file<P: AsRef<Path>>(axis: M, path: P) -> Result<Self> {
        Self::new(axis, CalibrationTable::load(path)?)
    }

    /// Reachable pulse-energy range `(min, max)` in µJ.
    pub fn energy_range(&self) -> (f64, f64) {
        self.table.quantity_range()
    }

    /// The calibration table in use.
    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    /// The underlying waveplate axis.
    pub fn axis(&self) -> &M {
        &self.axis
    }

    /// Move to the waveplate position producing `energy_uj` and settle.
    ///
    /// Energies outside the calibrated range are rejected with the
    /// reachable bounds before the axis is touched.
    pub async fn set_energy(&self, energy_uj: f64) -> Result<()> {
        let target = self.table.inverse(energy_uj)?;
        info!(energy_uj, waveplate = target, "laser energy move");
        self.axis.move_abs(target).await?;
        self.axis.wait_settled().await
    }

    /// Pulse energy in µJ at the current waveplate position.
    pub async fn energy(&self) -> Result<f64> {
        let position = self.axis.position().await?;
        self.table.forward(position)
    }
}

/// Default time allowed for the timing stage to report done.
const TIMING_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Laser target-time stage, exposed in seconds.
///
/// The underlying `FS_TGT_TIME` record counts nanoseconds; the conversion is
/// internal and the engineering unit is fixed to seconds. A motor record is
/// moved downstream of the target-time write, so settling is gated on its
/// done flag.
pub struct LaserTiming {
    setpoint: UnitConversionSignal,
    done_pv: String,
    ca: Arc<dyn ChannelAccess>,
    settle_timeout: Duration,
}

impl LaserTiming {
    /// Bind the timing records under `prefix`.
    pub fn new(ca: Arc<dyn ChannelAccess>, prefix: &str) -> Self {
        let raw = Signal::new(ca.clone(), format!("{prefix}:VIT:FS_TGT_TIME"), "ns");
        Self {
            setpoint: UnitConversionSignal::new(raw, 1e-9, 0.0, "s"),
            done_pv: format!("{prefix}:MMS:PH.DMOV"),
            ca,
            settle_timeout: TIMING_SETTLE_TIMEOUT,
        }
    }

    /// Like [`new`](Self::new), but validating a requested engineering unit.
    ///
    /// This device is pre-configured to work in seconds; any other unit is
    /// an error.
    pub fn with_egu(ca: Arc<dyn ChannelAccess>, prefix: &str, egu: &str) -> Result<Self> {
        if egu != "s" {
            return Err(DeviceError::UnsupportedUnit {
                requested: egu.to_string(),
                fixed: "s".to_string(),
            });
        }
        Ok(Self::new(ca, prefix))
    }

    /// Engineering unit (always seconds).
    pub fn egu(&self) -> &str {
        self.setpoint.egu()
    }

    /// Current target time in seconds.
    pub async fn setpoint(&self) -> Result<f64> {
        self.setpoint.get().await
    }

    /// Request a target time in seconds.
    pub async fn set(&self, seconds: f64) -> Result<()> {
        self.setpoint.put(seconds).await
    }

    /// Wait for the downstream phase motor to report done.
    pub async fn wait_settled(&self) -> Result<()> {
        self.ca
            .wait_value(&self.done_pv, &|v| v == 1.0, self.settle_timeout)
            .await?;
        Ok(())
    }
}
