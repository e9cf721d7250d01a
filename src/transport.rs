//! Control-system transport seam.
//!
//! Device classes in this crate never speak the EPICS wire protocol
//! themselves. They address process variables (PVs) by name through the
//! [`ChannelAccess`] trait, and a concrete client (or the in-memory
//! [`MockChannelAccess`] used in tests and simulation) provides the actual
//! transport. This keeps every device testable without hardware and keeps
//! protocol handling out of scope for this crate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use beamline_devices::transport::{ChannelAccess, MockChannelAccess};
//!
//! # tokio_test::block_on(async {
//! let ca = Arc::new(MockChannelAccess::new());
//! ca.set_float("IM1L0:MOT.RBV", 4.2);
//! assert_eq!(ca.get("IM1L0:MOT.RBV").await.unwrap(), 4.2);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{DeviceError, Result};

/// Polling cadence for [`ChannelAccess::wait_value`].
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Async access to named process variables.
///
/// All reads and writes go through this trait. An unconnected PV is an
/// error ([`DeviceError::ChannelNotConnected`]), never a panic.
#[async_trait]
pub trait ChannelAccess: Send + Sync {
    /// Read a PV as a float.
    async fn get(&self, pv: &str) -> Result<f64>;

    /// Write a float to a PV.
    async fn put(&self, pv: &str, value: f64) -> Result<()>;

    /// Read a PV as a string.
    async fn get_string(&self, pv: &str) -> Result<String>;

    /// Write a string to a PV.
    async fn put_string(&self, pv: &str, value: &str) -> Result<()>;

    /// Poll a PV until `predicate` accepts its value, or time out.
    ///
    /// Returns the accepted value. Used by motors and positioners to wait
    /// for done-moving flags without subscribing to monitors. The predicate
    /// is a trait object so the trait stays usable behind `dyn`.
    async fn wait_value(
        &self,
        pv: &str,
        predicate: &(dyn Fn(f64) -> bool + Send + Sync),
        timeout: Duration,
    ) -> Result<f64> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let value = self.get(pv).await?;
            if predicate(value) {
                return Ok(value);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DeviceError::Timeout {
                    pv: pv.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Shared handle to a transport implementation.
pub type ChannelAccessHandle = Arc<dyn ChannelAccess>;

#[derive(Debug, Clone, PartialEq)]
enum PvValue {
    Float(f64),
    Text(String),
}

/// One recorded write against the mock transport.
#[derive(Debug, Clone)]
pub struct PvWrite {
    /// PV name the write targeted.
    pub pv: String,
    /// Value written, rendered as text for string puts.
    pub value: String,
    /// When the write happened.
    pub at: DateTime<Utc>,
}

/// In-memory PV store for tests and simulation.
///
/// PVs must be seeded with [`set_float`](MockChannelAccess::set_float) or
/// [`set_string`](MockChannelAccess::set_string) before they can be read;
/// reading an unseeded PV reports it as not connected, matching how a real
/// client surfaces a missing record. Every `put` both updates the store and
/// is appended to a write log that tests can inspect.
#[derive(Default)]
pub struct MockChannelAccess {
    values: RwLock<HashMap<String, PvValue>>,
    writes: RwLock<Vec<PvWrite>>,
}

impl MockChannelAccess {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a float PV without logging a write.
    pub fn set_float(&self, pv: &str, value: f64) {
        self.values
            .write()
            .insert(pv.to_string(), PvValue::Float(value));
    }

    /// Seed or overwrite a string PV without logging a write.
    pub fn set_string(&self, pv: &str, value: &str) {
        self.values
            .write()
            .insert(pv.to_string(), PvValue::Text(value.to_string()));
    }

    /// All writes made through the [`ChannelAccess`] interface, oldest first.
    pub fn writes(&self) -> Vec<PvWrite> {
        self.writes.read().clone()
    }

    /// Writes made to one PV, oldest first.
    pub fn writes_to(&self, pv: &str) -> Vec<PvWrite> {
        self.writes
            .read()
            .iter()
            .filter(|w| w.pv == pv)
            .cloned()
            .collect()
    }

    fn log_write(&self, pv: &str, value: String) {
        self.writes.write().push(PvWrite {
            pv: pv.to_string(),
            value,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl ChannelAccess for MockChannelAccess {
    async fn get(&self, pv: &str) -> Result<f64> {
        match self.values.read().get(pv) {
            Some(PvValue::Float(v)) => Ok(*v),
            Some(PvValue::Text(_)) => Err(DeviceError::ChannelTypeMismatch {
                pv: pv.to_string(),
                expected: "float",
                found: "string",
            }),
            None => Err(DeviceError::ChannelNotConnected { pv: pv.to_string() }),
        }
    }

    async fn put(&self, pv: &str, value: f64) -> Result<()> {
        if !self.values.read().contains_key(pv) {
            return Err(DeviceError::ChannelNotConnected { pv: pv.to_string() });
        }
        debug!(pv, value, "mock put");
        self.values
            .write()
            .insert(pv.to_string(), PvValue::Float(value));
        self.log_write(pv, format!("{value}"));
        Ok(())
    }

    async fn get_string(&self, pv: &str) -> Result<String> {
        match self.values.read().get(pv) {
            Some(PvValue::Text(s)) => Ok(s.clone()),
            Some(PvValue::Float(_)) => Err(DeviceError::ChannelTypeMismatch {
                pv: pv.to_string(),
                expected: "string",
                found: "float",
            }),
            None => Err(DeviceError::ChannelNotConnected { pv: pv.to_string() }),
        }
    }

    async fn put_string(&self, pv: &str, value: &str) -> Result<()> {
        if !self.values.read().contains_key(pv) {
            return Err(DeviceError::ChannelNotConnected { pv: pv.to_string() });
        }
        self.values
            .write()
            .insert(pv.to_string(), PvValue::Text(value.to_string()));
        self.log_write(pv, value.to_string());
        Ok(())
    }
}
