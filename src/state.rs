//! Enumerated state positioners.
//!
//! Many beamline devices are driven through a state record rather than a raw
//! position: a stage that parks a YAG screen or diode in the beam, a filter
//! wheel with six slots. [`StatePositioner`] maps the integer state PV to
//! named states, and [`InOutPositioner`] layers beam-insertion semantics on
//! top (which states count as "in the beam", which as "out").
//!
//! Raw state 0 is reserved for `Unknown` in the usual state-record
//! convention; named states start at raw value 1. An unrecognized raw value
//! also reads back as `Unknown` rather than an error, since transitioning
//! hardware can briefly report nonsense.

use std::sync::Arc;

use tracing::debug;

use crate::error::{DeviceError, Result};
use crate::transport::ChannelAccess;

/// Name reported for the reserved raw state 0 and for unrecognized values.
pub const UNKNOWN_STATE: &str = "Unknown";

/// A device addressed through named states over an integer state PV.
pub struct StatePositioner {
    ca: Arc<dyn ChannelAccess>,
    read_pv: String,
    write_pv: String,
    states: Vec<String>,
}

impl StatePositioner {
    /// Bind a state record where reads and writes share one PV.
    pub fn new<S: Into<String>>(
        ca: Arc<dyn ChannelAccess>,
        pv: impl Into<String>,
        states: Vec<S>,
    ) -> Self {
        let pv = pv.into();
        Self {
            ca,
            read_pv: pv.clone(),
            write_pv: pv,
            states: states.into_iter().map(Into::into).collect(),
        }
    }

    /// Bind a state record with separate readback and setpoint PVs
    /// (e.g. `:GET_RBV` / `:SET` on TwinCAT filter wheels).
    pub fn with_write_pv<S: Into<String>>(
        ca: Arc<dyn ChannelAccess>,
        read_pv: impl Into<String>,
        write_pv: impl Into<String>,
        states: Vec<S>,
    ) -> Self {
        Self {
            ca,
            read_pv: read_pv.into(),
            write_pv: write_pv.into(),
            states: states.into_iter().map(Into::into).collect(),
        }
    }

    /// The named states, in raw-value order starting at 1.
    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// Current state name, or [`UNKNOWN_STATE`].
    pub async fn state(&self) -> Result<String> {
        let raw = self.ca.get(&self.read_pv).await?;
        let index = raw.round();
        if index < 1.0 || index > self.states.len() as f64 {
            return Ok(UNKNOWN_STATE.to_string());
        }
        Ok(self.states[index as usize - 1].clone())
    }

    /// Request a move to a named state.
    pub async fn set_state(&self, name: &str) -> Result<()> {
        let index = self
            .states
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| DeviceError::UnknownState {
                state: name.to_string(),
                known: self.states.clone(),
            })?;
        debug!(pv = %self.write_pv, state = name, "state move");
        self.ca.put(&self.write_pv, (index + 1) as f64).await
    }
}

/// A state positioner whose states are partitioned into in-beam and
/// out-of-beam sets.
pub struct InOutPositioner {
    inner: StatePositioner,
    in_states: Vec<String>,
    out_states: Vec<String>,
}

impl InOutPositioner {
    /// Wrap a state positioner with insertion semantics.
    ///
    /// `in_states` and `out_states` must each name at least one known state;
    /// a state listed in neither set reports neither inserted nor removed.
    pub fn new<S: Into<String>>(
        inner: StatePositioner,
        in_states: Vec<S>,
        out_states: Vec<S>,
    ) -> Result<Self> {
        let in_states: Vec<String> = in_states.into_iter().map(Into::into).collect();
        let out_states: Vec<String> = out_states.into_iter().map(Into::into).collect();
        for name in in_states.iter().chain(&out_states) {
            if !inner.states.iter().any(|s| s == name) {
                return Err(DeviceError::UnknownState {
                    state: name.clone(),
                    known: inner.states.clone(),
                });
            }
        }
        if in_states.is_empty() || out_states.is_empty() {
            return Err(DeviceError::Config(
                "in/out positioner needs at least one state on each side".into(),
            ));
        }
        Ok(Self {
            inner,
            in_states,
            out_states,
        })
    }

    /// Current state name.
    pub async fn state(&self) -> Result<String> {
        self.inner.state().await
    }

    /// Move to the primary in-beam state.
    pub async fn insert(&self) -> Result<()> {
        self.inner.set_state(&self.in_states[0]).await
    }

    /// Move to the primary out-of-beam state.
    pub async fn remove(&self) -> Result<()> {
        self.inner.set_state(&self.out_states[0]).await
    }

    /// Whether the current state blocks the beam.
    pub async fn inserted(&self) -> Result<bool> {
        let state = self.state().await?;
        Ok(self.in_states.contains(&state))
    }

    /// Whether the current state is clear of the beam.
    pub async fn removed(&self) -> Result<bool> {
        let state = self.state().await?;
        Ok(self.out_states.contains(&state))
    }

    /// Underlying state positioner.
    pub fn positioner(&self) -> &StatePositioner {
        &self.inner
    }
}
