//! Motor interfaces.
//!
//! [`Movable`] is the capability trait every positioner in this crate builds
//! on: absolute/relative moves, a position readback, and settling. The two
//! implementations are [`EpicsMotor`], which binds the conventional motor
//! record fields under a PV prefix, and [`SimMotor`], an instantly-settling
//! in-memory axis for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};
use crate::transport::ChannelAccess;

/// Default time allowed for a motor to report done-moving.
const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability for anything that can be positioned along one axis.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to an absolute position.
    async fn move_abs(&self, target: f64) -> Result<()>;

    /// Move by a relative distance.
    async fn move_rel(&self, delta: f64) -> Result<()> {
        let current = self.position().await?;
        self.move_abs(current + delta).await
    }

    /// Current position readback.
    async fn position(&self) -> Result<f64>;

    /// Block until motion has completed.
    async fn wait_settled(&self) -> Result<()>;
}

/// An EPICS motor record bound by prefix.
///
/// Field wiring follows the motor record conventions: `.RBV` readback,
/// `.VAL` setpoint, `.DMOV` done-moving, `.LLM`/`.HLM` soft limits,
/// `.EGU` engineering units, `.STOP` stop command.
pub struct EpicsMotor {
    ca: Arc<dyn ChannelAccess>,
    prefix: String,
    settle_timeout: Duration,
    limit_override: Option<(f64, f64)>,
}

impl EpicsMotor {
    /// Bind a motor record at `prefix` (e.g. `"IM1L0:CLZ:01"`).
    pub fn new(ca: Arc<dyn ChannelAccess>, prefix: impl Into<String>) -> Self {
        Self {
            ca,
            prefix: prefix.into(),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            limit_override: None,
        }
    }

    /// Override the settle timeout.
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Impose soft limits locally, superseding the record's `.LLM`/`.HLM`.
    ///
    /// Useful when a calibration only covers part of the travel and moves
    /// beyond it should be refused even though the record allows them.
    pub fn with_limit_override(mut self, low: f64, high: f64) -> Self {
        self.limit_override = Some((low, high));
        self
    }

    /// PV prefix this motor is bound to.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn field(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Soft limits `(low, high)`, from the local override when one is set,
    /// else from `.LLM`/`.HLM`.
    ///
    /// Per the motor record convention, `low == high` (typically both zero)
    /// means limits are disabled.
    pub async fn limits(&self) -> Result<(f64, f64)> {
        if let Some(limits) = self.limit_override {
            return Ok(limits);
        }
        let low = self.ca.get(&self.field(".LLM")).await?;
        let high = self.ca.get(&self.field(".HLM")).await?;
        Ok((low, high))
    }

    /// Engineering units from `.EGU`.
    pub async fn egu(&self) -> Result<String> {
        self.ca.get_string(&self.field(".EGU")).await
    }

    /// Command an immediate stop via `.STOP`.
    pub async fn stop(&self) -> Result<()> {
        warn!(motor = %self.prefix, "stop requested");
        self.ca.put(&self.field(".STOP"), 1.0).await
    }

    /// Check `target` against soft limits before any PV write.
    async fn check_limits(&self, target: f64) -> Result<()> {
        let (low, high) = self.limits().await?;
        if low == high {
            return Ok(()); // Limits disabled
        }
        if target < low || target > high {
            return Err(DeviceError::LimitViolation { target, low, high });
        }
        Ok(())
    }
}

#[async_trait]
impl Movable for EpicsMotor {
    async fn move_abs(&self, target: f64) -> Result<()> {
        self.check_limits(target).await?;
        debug!(motor = %self.prefix, target, "move absolute");
        self.ca.put(&self.field(".VAL"), target).await
    }

    async fn position(&self) -> Result<f64> {
        self.ca.get(&self.field(".RBV")).await
    }

    async fn wait_settled(&self) -> Result<()> {
        self.ca
            .wait_value(&self.field(".DMOV"), &|v| v == 1.0, self.settle_timeout)
            .await?;
        Ok(())
    }
}

/// Instantly-settling in-memory motor for tests and offline work.
#[derive(Default)]
pub struct SimMotor {
    position: Mutex<f64>,
    limits: Option<(f64, f64)>,
}

impl SimMotor {
    /// New axis parked at zero with no limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// New axis at `position`.
    pub fn at(position: f64) -> Self {
        Self {
            position: Mutex::new(position),
            limits: None,
        }
    }

    /// Apply soft limits.
    pub fn with_limits(mut self, low: f64, high: f64) -> Self {
        self.limits = Some((low, high));
        self
    }
}

#[async_trait]
impl Movable for SimMotor {
    async fn move_abs(&self, target: f64) -> Result<()> {
        if let Some((low, high)) = self.limits {
            if target < low || target > high {
                return Err(DeviceError::LimitViolation { target, low, high });
            }
        }
        *self.position.lock() = target;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.lock())
    }

    async fn wait_settled(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockChannelAccess;

    fn wired_motor() -> (Arc<MockChannelAccess>, EpicsMotor) {
        let ca = Arc::new(MockChannelAccess::new());
        ca.set_float("MOT:01.RBV", 2.0);
        ca.set_float("MOT:01.VAL", 2.0);
        ca.set_float("MOT:01.DMOV", 1.0);
        ca.set_float("MOT:01.LLM", -5.0);
        ca.set_float("MOT:01.HLM", 5.0);
        ca.set_float("MOT:01.STOP", 0.0);
        ca.set_string("MOT:01.EGU", "mm");
        let motor = EpicsMotor::new(ca.clone(), "MOT:01")
            .with_settle_timeout(Duration::from_millis(50));
        (ca, motor)
    }

    #[tokio::test]
    async fn test_move_writes_setpoint() {
        let (ca, motor) = wired_motor();
        motor.move_abs(3.5).await.unwrap();
        assert_eq!(ca.get("MOT:01.VAL").await.unwrap(), 3.5);
    }

    #[tokio::test]
    async fn test_move_outside_limits_rejected_before_write() {
        let (ca, motor) = wired_motor();
        let err = motor.move_abs(7.0).await.unwrap_err();
        assert!(matches!(err, DeviceError::LimitViolation { .. }));
        // Setpoint untouched.
        assert_eq!(ca.get("MOT:01.VAL").await.unwrap(), 2.0);
        assert!(ca.writes_to("MOT:01.VAL").is_empty());
    }

    #[tokio::test]
    async fn test_equal_limits_disable_checking() {
        let (ca, motor) = wired_motor();
        ca.set_float("MOT:01.LLM", 0.0);
        ca.set_float("MOT:01.HLM", 0.0);
        motor.move_abs(100.0).await.unwrap();
        assert_eq!(ca.get("MOT:01.VAL").await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_limit_override_supersedes_record() {
        let (ca, motor) = wired_motor();
        let motor = motor.with_limit_override(0.0, 3.0);
        assert_eq!(motor.limits().await.unwrap(), (0.0, 3.0));

        // The record would allow 4.0; the override refuses it before any write.
        let err = motor.move_abs(4.0).await.unwrap_err();
        assert!(matches!(err, DeviceError::LimitViolation { .. }));
        assert!(ca.writes_to("MOT:01.VAL").is_empty());

        motor.move_abs(2.0).await.unwrap();
        assert_eq!(ca.get("MOT:01.VAL").await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_move_rel_uses_readback() {
        let (ca, motor) = wired_motor();
        motor.move_rel(1.5).await.unwrap();
        assert_eq!(ca.get("MOT:01.VAL").await.unwrap(), 3.5);
    }

    #[tokio::test]
    async fn test_wait_settled_honors_dmov() {
        let (ca, motor) = wired_motor();
        motor.wait_settled().await.unwrap();

        ca.set_float("MOT:01.DMOV", 0.0);
        let err = motor.wait_settled().await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_stop_and_egu() {
        let (ca, motor) = wired_motor();
        motor.stop().await.unwrap();
        assert_eq!(ca.get("MOT:01.STOP").await.unwrap(), 1.0);
        assert_eq!(motor.egu().await.unwrap(), "mm");
    }

    #[tokio::test]
    async fn test_sim_motor() {
        let axis = SimMotor::at(1.0).with_limits(0.0, 10.0);
        axis.move_rel(2.0).await.unwrap();
        assert_eq!(axis.position().await.unwrap(), 3.0);
        assert!(matches!(
            axis.move_abs(11.0).await,
            Err(DeviceError::LimitViolation { .. })
        ));
        axis.wait_settled().await.unwrap();
    }
}
