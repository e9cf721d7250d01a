//! Beamline device wiring from TOML files.
//!
//! A configuration file names each device, its type, and the PV prefixes and
//! calibration files it binds to:
//!
//! ```toml
//! [devices.lxe]
//! type = "laser_energy"
//! motor_prefix = "LAS:LXE:WP"
//! calibration_file = "lxe_calib.txt"
//! column_names = ["motor", "energy"]
//! limits = [0.0, 7.5]
//!
//! [devices.im1l0]
//! type = "profile_monitor"
//! prefix = "IM1L0:PIM"
//!
//! [devices.ccm]
//! type = "energy"
//! alio_prefix = "XPP:MON:MPZ:07A"
//! vernier_pv = "XPP:USER:MCC:EPHOT"
//! ```
//!
//! [`BeamlineConfig::load`] parses and [`DeviceConfig::build`] instantiates a
//! device against a transport handle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::{DeviceError, Result};
use crate::imager::{FilterWheel, PowerMeter, Ppm, ProfileMonitor, Xpim};
use crate::lookup::CalibrationTable;
use crate::laser_energy::{LaserEnergyPositioner, LaserTiming};
use crate::mono::EnergyPositioner;
use crate::motor::EpicsMotor;
use crate::transport::ChannelAccess;

/// Whether a `column_names` entry puts the energy column first.
///
/// Only the two known column names are accepted, each exactly once.
fn energy_column_first(names: &[String]) -> Result<bool> {
    match names {
        [a, b] if a == "motor" && b == "energy" => Ok(false),
        [a, b] if a == "energy" && b == "motor" => Ok(true),
        _ => Err(DeviceError::Config(format!(
            "column_names must be a permutation of [\"motor\", \"energy\"], got {names:?}"
        ))),
    }
}

/// One device entry in the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceConfig {
    /// Plain EPICS motor.
    Motor {
        /// Motor record prefix.
        prefix: String,
    },
    /// Waveplate-based pulse-energy stage.
    LaserEnergy {
        /// Waveplate motor record prefix.
        motor_prefix: String,
        /// Two-column calibration file (see the lookup module docs).
        calibration_file: PathBuf,
        /// Order of the calibration-file columns, a permutation of
        /// `["motor", "energy"]`. Files listing the energy column first
        /// are swapped on load. Defaults to motor first.
        #[serde(default)]
        column_names: Option<Vec<String>>,
        /// Waveplate soft-limit override `[low, high]`, superseding the
        /// motor record's own limits.
        #[serde(default)]
        limits: Option<(f64, f64)>,
    },
    /// Laser target-time stage.
    LaserTiming {
        /// Timing record prefix.
        prefix: String,
        /// Requested engineering unit; only `"s"` is accepted.
        #[serde(default)]
        egu: Option<String>,
    },
    /// Monochromator energy pseudo-positioner.
    Energy {
        /// Alio stage motor record prefix.
        alio_prefix: String,
        /// Accelerator energy-request PV (eV), enabling vernier moves.
        #[serde(default)]
        vernier_pv: Option<String>,
        /// Crystal d-spacing override in Å.
        #[serde(default)]
        dspacing: Option<f64>,
    },
    /// Profile intensity monitor.
    ProfileMonitor {
        /// Base prefix; detector and zoom PVs are inferred from it.
        prefix: String,
        /// Detector prefix override.
        #[serde(default)]
        detector_prefix: Option<String>,
    },
    /// Power and profile monitor assembly.
    Ppm {
        /// Assembly base prefix.
        prefix: String,
    },
    /// Imager with filter wheel and zoom/focus stack.
    Xpim {
        /// Assembly base prefix.
        prefix: String,
    },
    /// Standalone power-meter head.
    PowerMeter {
        /// Power-meter record prefix.
        prefix: String,
    },
    /// Standalone filter wheel.
    FilterWheel {
        /// Filter-wheel record prefix.
        prefix: String,
    },
}

/// A built device, tagged by kind.
pub enum Device {
    /// Plain motor.
    Motor(EpicsMotor),
    /// Pulse-energy stage.
    LaserEnergy(LaserEnergyPositioner<EpicsMotor>),
    /// Target-time stage.
    LaserTiming(LaserTiming),
    /// Monochromator energy positioner.
    Energy(EnergyPositioner<EpicsMotor>),
    /// Profile monitor.
    ProfileMonitor(ProfileMonitor),
    /// PPM assembly.
    Ppm(Ppm),
    /// XPIM assembly.
    Xpim(Xpim),
    /// Power-meter head.
    PowerMeter(PowerMeter),
    /// Filter wheel.
    FilterWheel(FilterWheel),
}

impl DeviceConfig {
    /// Instantiate the configured device against a transport handle.
    ///
    /// `name` is used in diagnostics only.
    pub fn build(&self, ca: Arc<dyn ChannelAccess>, name: &str) -> Result<Device> {
        info!(name, "building device");
        match self {
            Self::Motor { prefix } => Ok(Device::Motor(EpicsMotor::new(ca, prefix.clone()))),
            Self::LaserEnergy {
                motor_prefix,
                calibration_file,
                column_names,
                limits,
            } => {
                let mut motor = EpicsMotor::new(ca, motor_prefix.clone());
                if let Some((low, high)) = limits {
                    motor = motor.with_limit_override(*low, *high);
                }
                let mut table = CalibrationTable::load(calibration_file)?;
                if let Some(names) = column_names {
                    if energy_column_first(names)? {
                        table = table.swapped()?;
                    }
                }
                Ok(Device::LaserEnergy(LaserEnergyPositioner::new(motor, table)?))
            }
            Self::LaserTiming { prefix, egu } => Ok(Device::LaserTiming(match egu {
                Some(egu) => LaserTiming::with_egu(ca, prefix, egu)?,
                None => LaserTiming::new(ca, prefix),
            })),
            Self::Energy {
                alio_prefix,
                vernier_pv,
                dspacing,
            } => {
                let mut positioner =
                    EnergyPositioner::new(EpicsMotor::new(ca.clone(), alio_prefix.clone()));
                if let Some(d) = dspacing {
                    positioner = positioner.with_dspacing(*d);
                }
                if let Some(pv) = vernier_pv {
                    positioner = positioner.with_vernier(ca, pv.clone());
                }
                Ok(Device::Energy(positioner))
            }
            Self::ProfileMonitor {
                prefix,
                detector_prefix,
            } => {
                let mut pim = ProfileMonitor::new(ca, prefix.clone(), name)?;
                if let Some(det) = detector_prefix {
                    pim = pim.with_detector_prefix(det.clone());
                }
                Ok(Device::ProfileMonitor(pim))
            }
            Self::Ppm { prefix } => Ok(Device::Ppm(Ppm::new(ca, prefix, name)?)),
            Self::Xpim { prefix } => Ok(Device::Xpim(Xpim::new(ca, prefix, name)?)),
            Self::PowerMeter { prefix } => Ok(Device::PowerMeter(PowerMeter::new(ca, prefix))),
            Self::FilterWheel { prefix } => Ok(Device::FilterWheel(FilterWheel::new(ca, prefix))),
        }
    }
}

/// The full device table of a beamline configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeamlineConfig {
    /// Devices by name.
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
}

impl BeamlineConfig {
    /// Parse a configuration file.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration text.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Check semantic constraints that pass parsing: referenced calibration
    /// files must exist, column-name and limit overrides must be coherent,
    /// and energy positioners must not override the d-spacing with a
    /// non-positive value.
    pub fn validate(&self) -> Result<()> {
        for (name, device) in &self.devices {
            match device {
                DeviceConfig::LaserEnergy {
                    calibration_file,
                    column_names,
                    limits,
                    ..
                } => {
                    if !calibration_file.is_file() {
                        return Err(DeviceError::Config(format!(
                            "device '{name}': calibration file '{}' not found",
                            calibration_file.display()
                        )));
                    }
                    if let Some(names) = column_names {
                        energy_column_first(names).map_err(|e| {
                            DeviceError::Config(format!("device '{name}': {e}"))
                        })?;
                    }
                    if let Some((low, high)) = limits {
                        if low >= high {
                            return Err(DeviceError::Config(format!(
                                "device '{name}': limits [{low}, {high}] are not a valid range"
                            )));
                        }
                    }
                }
                DeviceConfig::Energy {
                    dspacing: Some(d), ..
                } if *d <= 0.0 => {
                    return Err(DeviceError::Config(format!(
                        "device '{name}': d-spacing must be positive, got {d}"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Build every configured device.
    pub fn build_all(&self, ca: Arc<dyn ChannelAccess>) -> Result<HashMap<String, Device>> {
        self.validate()?;
        self.devices
            .iter()
            .map(|(name, cfg)| Ok((name.clone(), cfg.build(ca.clone(), name)?)))
            .collect()
    }
}
