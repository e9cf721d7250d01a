//! Profile monitors and power meters.
//!
//! A profile intensity monitor (PIM) is a stage that parks a YAG screen or
//! diode in the beam, a zoom motor, and a camera to view the screen. Related
//! assemblies add a power meter ([`Ppm`]) or a filter wheel and focus stack
//! ([`Xpim`]). Detector and auxiliary-motor PVs follow a naming convention
//! relative to the base prefix and are inferred when not given explicitly.

use std::sync::Arc;

use crate::error::{DeviceError, Result};
use crate::motor::EpicsMotor;
use crate::signal::Signal;
use crate::state::{InOutPositioner, StatePositioner};
use crate::transport::ChannelAccess;

/// Y-stage states of a profile monitor. YAG and diode both block the beam.
const PIM_Y_STATES: [&str; 3] = ["DIODE", "YAG", "OUT"];

/// Filter-wheel slots by transmission percentage; T100 is the empty slot.
const FILTER_WHEEL_SLOTS: [&str; 6] = ["T100", "T50", "T20", "T10", "T5", "T1"];

/// First two `:`-separated segments of a PV prefix, with a trailing colon.
///
/// Auxiliary device PVs (detector, zoom, focus, illuminator) hang off this
/// stem by convention.
pub fn prefix_start(prefix: &str) -> Result<String> {
    let mut segments = prefix.split(':');
    match (segments.next(), segments.next()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Ok(format!("{a}:{b}:")),
        _ => Err(DeviceError::Config(format!(
            "cannot infer device prefixes from '{prefix}'"
        ))),
    }
}

/// Profile intensity monitor: in/out Y stage, zoom motor, and a detector.
pub struct ProfileMonitor {
    name: String,
    y: InOutPositioner,
    zoom: EpicsMotor,
    detector_prefix: String,
    focus: Option<EpicsMotor>,
    led: Option<Signal>,
}

impl ProfileMonitor {
    /// Bind a PIM at `prefix`, inferring detector and zoom PVs.
    ///
    /// The detector defaults to `<stem>CVV:01` and the zoom motor to
    /// `<stem>CLZ:01`, where `<stem>` is [`prefix_start`] of `prefix`.
    /// Use the builder methods to override or to add the optional focus
    /// motor and illuminator.
    pub fn new(
        ca: Arc<dyn ChannelAccess>,
        prefix: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        let stem = prefix_start(&prefix)?;

        let state = StatePositioner::new(ca.clone(), format!("{prefix}:STATE"), PIM_Y_STATES.to_vec());
        let y = InOutPositioner::new(state, vec!["YAG", "DIODE"], vec!["OUT"])?;

        Ok(Self {
            name: name.into(),
            y,
            zoom: EpicsMotor::new(ca, format!("{stem}CLZ:01")),
            detector_prefix: format!("{stem}CVV:01"),
            focus: None,
            led: None,
        })
    }

    /// Override the detector PV prefix.
    pub fn with_detector_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.detector_prefix = prefix.into();
        self
    }

    /// Override the zoom motor.
    pub fn with_zoom(mut self, zoom: EpicsMotor) -> Self {
        self.zoom = zoom;
        self
    }

    /// Add the optional focus motor.
    pub fn with_focus(mut self, focus: EpicsMotor) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Add the optional illuminator signal.
    pub fn with_led(mut self, led: Signal) -> Self {
        self.led = Some(led);
        self
    }

    /// Identifying name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PV prefix of the camera.
    pub fn detector_prefix(&self) -> &str {
        &self.detector_prefix
    }

    /// Zoom motor.
    pub fn zoom(&self) -> &EpicsMotor {
        &self.zoom
    }

    /// Focus motor, if fitted.
    pub fn focus(&self) -> Option<&EpicsMotor> {
        self.focus.as_ref()
    }

    /// Illuminator, if fitted.
    pub fn led(&self) -> Option<&Signal> {
        self.led.as_ref()
    }

    /// Current Y-stage state name.
    pub async fn state(&self) -> Result<String> {
        self.y.state().await
    }

    /// Move the YAG into the beam.
    pub async fn insert(&self) -> Result<()> {
        self.y.insert().await
    }

    /// Move the YAG and diode out of the beam.
    pub async fn remove(&self) -> Result<()> {
        self.y.remove().await
    }

    /// True if the YAG or diode is in the beam.
    pub async fn inserted(&self) -> Result<bool> {
        self.y.inserted().await
    }

    /// True if the stage is clear of the beam.
    pub async fn removed(&self) -> Result<bool> {
        self.y.removed().await
    }
}

/// Power-meter calibration constants.
///
/// The calibrated readings derive from the raw voltage as
///
/// ```text
/// dimensionless = (raw_voltage + offset) * ratio
/// calibrated_mj = dimensionless * mj_ratio
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerMeterCal {
    /// Additive offset applied to the raw voltage.
    pub offset: f64,
    /// Relative-calibration ratio.
    pub ratio: f64,
    /// Scale from the dimensionless reading to millijoules.
    pub mj_ratio: f64,
}

impl PowerMeterCal {
    /// Relative calibrated reading for a raw voltage.
    pub fn dimensionless(&self, raw_voltage: f64) -> f64 {
        (raw_voltage + self.offset) * self.ratio
    }

    /// Beam power in mJ for a raw voltage.
    pub fn calibrated_mj(&self, raw_voltage: f64) -> f64 {
        self.dimensionless(raw_voltage) * self.mj_ratio
    }
}

/// Analog beam-energy measurement head of a PPM assembly.
///
/// The hardware computes the calibrated readings; this class exposes them
/// alongside the calibration constants so the chain can be cross-checked
/// offline with [`PowerMeterCal`].
pub struct PowerMeter {
    raw_voltage: Signal,
    dimensionless: Signal,
    calibrated_mj: Signal,
    calib_offset: Signal,
    calib_ratio: Signal,
    calib_mj_ratio: Signal,
}

impl PowerMeter {
    /// Bind the power-meter records under `prefix`.
    pub fn new(ca: Arc<dyn ChannelAccess>, prefix: &str) -> Self {
        Self {
            raw_voltage: Signal::new(ca.clone(), format!("{prefix}:VOLT"), "V"),
            dimensionless: Signal::new(ca.clone(), format!("{prefix}:CALIB"), ""),
            calibrated_mj: Signal::new(ca.clone(), format!("{prefix}:MJ"), "mJ"),
            calib_offset: Signal::new(ca.clone(), format!("{prefix}:CALIB:OFFSET"), "V"),
            calib_ratio: Signal::new(ca.clone(), format!("{prefix}:CALIB:RATIO"), ""),
            calib_mj_ratio: Signal::new(ca, format!("{prefix}:CALIB:MJ_RATIO"), "mJ"),
        }
    }

    /// Uncalibrated voltage reading.
    pub async fn raw_voltage(&self) -> Result<f64> {
        self.raw_voltage.get().await
    }

    /// Relative calibrated reading from the hardware.
    pub async fn dimensionless(&self) -> Result<f64> {
        self.dimensionless.get().await
    }

    /// Beam power in mJ from the hardware.
    pub async fn calibrated_mj(&self) -> Result<f64> {
        self.calibrated_mj.get().await
    }

    /// Read the calibration constants.
    pub async fn calibration(&self) -> Result<PowerMeterCal> {
        Ok(PowerMeterCal {
            offset: self.calib_offset.get().await?,
            ratio: self.calib_ratio.get().await?,
            mj_ratio: self.calib_mj_ratio.get().await?,
        })
    }

    /// Recompute the mJ reading locally from the raw voltage and the
    /// current calibration constants.
    pub async fn expected_mj(&self) -> Result<f64> {
        let cal = self.calibration().await?;
        Ok(cal.calibrated_mj(self.raw_voltage().await?))
    }
}

/// Six-slot optical filter wheel preventing camera saturation.
pub struct FilterWheel {
    state: StatePositioner,
    reset_cmd: Signal,
    error_message: Signal,
}

impl FilterWheel {
    /// Bind the filter-wheel records under `prefix`.
    pub fn new(ca: Arc<dyn ChannelAccess>, prefix: &str) -> Self {
        Self {
            state: StatePositioner::with_write_pv(
                ca.clone(),
                format!("{prefix}:GET_RBV"),
                format!("{prefix}:SET"),
                FILTER_WHEEL_SLOTS.to_vec(),
            ),
            reset_cmd: Signal::new(ca.clone(), format!("{prefix}:ERR:RESET"), ""),
            error_message: Signal::new(ca, format!("{prefix}:ERR:MSG"), ""),
        }
    }

    /// Current slot name (transmission percentage, e.g. `"T50"`).
    pub async fn slot(&self) -> Result<String> {
        self.state.state().await
    }

    /// Request a slot by name.
    pub async fn set_slot(&self, name: &str) -> Result<()> {
        self.state.set_state(name).await
    }

    /// Clear a wheel error.
    pub async fn reset_error(&self) -> Result<()> {
        self.reset_cmd.put(1.0).await
    }

    /// Latest error message from the wheel.
    pub async fn error_message(&self) -> Result<String> {
        self.error_message.get_text().await
    }
}

/// Power and Profile Monitor: a profile monitor plus a power meter and a
/// dimmable illuminator.
pub struct Ppm {
    monitor: ProfileMonitor,
    power_meter: PowerMeter,
}

impl Ppm {
    /// Bind a PPM at `prefix` (e.g. `"IM3L0:PPM"`).
    pub fn new(
        ca: Arc<dyn ChannelAccess>,
        prefix: &str,
        name: impl Into<String>,
    ) -> Result<Self> {
        let led = Signal::new(ca.clone(), format!("{prefix}:CAM:CIL:PCT"), "%");
        let monitor = ProfileMonitor::new(ca.clone(), prefix, name)?.with_led(led);
        Ok(Self {
            monitor,
            power_meter: PowerMeter::new(ca, &format!("{prefix}:SPM")),
        })
    }

    /// The profile-monitor half.
    pub fn monitor(&self) -> &ProfileMonitor {
        &self.monitor
    }

    /// The power-meter head.
    pub fn power_meter(&self) -> &PowerMeter {
        &self.power_meter
    }
}

/// Imager variant with a zoom/focus stack and a filter wheel instead of a
/// power meter; the illuminator is binary on/off.
pub struct Xpim {
    monitor: ProfileMonitor,
    filter_wheel: FilterWheel,
}

impl Xpim {
    /// Bind an XPIM at `prefix`.
    pub fn new(
        ca: Arc<dyn ChannelAccess>,
        prefix: &str,
        name: impl Into<String>,
    ) -> Result<Self> {
        let led = Signal::new(ca.clone(), format!("{prefix}:CAM:CIL:PWR"), "");
        let focus = EpicsMotor::new(ca.clone(), format!("{prefix}:CLF"));
        let zoom = EpicsMotor::new(ca.clone(), format!("{prefix}:CLZ"));
        let monitor = ProfileMonitor::new(ca.clone(), prefix, name)?
            .with_led(led)
            .with_focus(focus)
            .with_zoom(zoom);
        Ok(Self {
            monitor,
            filter_wheel: FilterWheel::new(ca, &format!("{prefix}:MFW")),
        })
    }

    /// The profile-monitor half.
    pub fn monitor(&self) -> &ProfileMonitor {
        &self.monitor
    }

    /// The filter wheel.
    pub fn filter_wheel(&self) -> &FilterWheel {
        &self.filter_wheel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockChannelAccess;
    use approx::assert_relative_eq;

    #[test]
    fn test_prefix_start() {
        assert_eq!(prefix_start("IM3L0:PPM:EXTRA").unwrap(), "IM3L0:PPM:");
        assert_eq!(prefix_start("IM3L0:PPM").unwrap(), "IM3L0:PPM:");
        assert!(prefix_start("IM3L0").is_err());
        assert!(prefix_start("").is_err());
    }

    #[test]
    fn test_power_meter_cal_chain() {
        let cal = PowerMeterCal {
            offset: 0.1,
            ratio: 2.0,
            mj_ratio: 5.0,
        };
        assert_relative_eq!(cal.dimensionless(0.4), 1.0);
        assert_relative_eq!(cal.calibrated_mj(0.4), 5.0);
        // Zero ratio pins everything at zero regardless of voltage.
        let dead = PowerMeterCal {
            offset: 0.0,
            ratio: 0.0,
            mj_ratio: 5.0,
        };
        assert_relative_eq!(dead.calibrated_mj(3.0), 0.0);
    }

    #[tokio::test]
    async fn test_power_meter_expected_mj_matches_chain() {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("IM3L0:PPM:SPM:VOLT", 0.4);
        ca.set_float("IM3L0:PPM:SPM:CALIB:OFFSET", 0.1);
        ca.set_float("IM3L0:PPM:SPM:CALIB:RATIO", 2.0);
        ca.set_float("IM3L0:PPM:SPM:CALIB:MJ_RATIO", 5.0);

        let meter = PowerMeter::new(ca, "IM3L0:PPM:SPM");
        assert_relative_eq!(meter.expected_mj().await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn test_profile_monitor_inferred_prefixes() {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("IM1L0:PIM:STATE", 3.0); // OUT

        let pim = ProfileMonitor::new(ca, "IM1L0:PIM", "im1l0").unwrap();
        assert_eq!(pim.detector_prefix(), "IM1L0:PIM:CVV:01");
        assert_eq!(pim.zoom().prefix(), "IM1L0:PIM:CLZ:01");
        assert!(pim.focus().is_none());
        assert!(pim.removed().await.unwrap());
        assert!(!pim.inserted().await.unwrap());
    }

    #[tokio::test]
    async fn test_profile_monitor_insert() {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("IM1L0:PIM:STATE", 3.0);

        let pim = ProfileMonitor::new(ca.clone(), "IM1L0:PIM", "im1l0").unwrap();
        pim.insert().await.unwrap();
        assert_eq!(pim.state().await.unwrap(), "YAG");
        assert!(pim.inserted().await.unwrap());
    }

    #[tokio::test]
    async fn test_filter_wheel() {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("IM2L0:XPIM:MFW:GET_RBV", 1.0);
        ca.set_float("IM2L0:XPIM:MFW:SET", 0.0);
        ca.set_float("IM2L0:XPIM:MFW:ERR:RESET", 0.0);
        ca.set_string("IM2L0:XPIM:MFW:ERR:MSG", "");

        let wheel = FilterWheel::new(ca.clone(), "IM2L0:XPIM:MFW");
        assert_eq!(wheel.slot().await.unwrap(), "T100");

        wheel.set_slot("T5").await.unwrap();
        assert_eq!(ca.get("IM2L0:XPIM:MFW:SET").await.unwrap(), 5.0);

        assert!(wheel.set_slot("T42").await.is_err());

        wheel.reset_error().await.unwrap();
        assert_eq!(ca.get("IM2L0:XPIM:MFW:ERR:RESET").await.unwrap(), 1.0);
        assert_eq!(wheel.error_message().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_ppm_composition() {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("IM3L0:PPM:STATE", 3.0);
        ca.set_float("IM3L0:PPM:SPM:VOLT", 0.0);

        let ppm = Ppm::new(ca, "IM3L0:PPM", "im3l0").unwrap();
        assert!(ppm.monitor().led().is_some());
        assert_eq!(ppm.power_meter().raw_voltage().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_xpim_composition() {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("IM2L0:XPIM:STATE", 2.0);

        let xpim = Xpim::new(ca, "IM2L0:XPIM", "im2l0").unwrap();
        assert_eq!(xpim.monitor().zoom().prefix(), "IM2L0:XPIM:CLZ");
        assert!(xpim.monitor().focus().is_some());
        assert!(xpim.monitor().inserted().await.unwrap());
    }
}
