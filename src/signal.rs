//! PV-bound signals.
//!
//! A [`Signal`] ties one named process variable to a logical attribute with an
//! engineering unit. [`UnitConversionSignal`] layers a linear unit conversion
//! on top, so a device can expose (for example) a nanosecond timing record in
//! seconds without the caller ever seeing raw units.

use std::sync::Arc;

use crate::error::Result;
use crate::transport::ChannelAccess;

/// A named PV exposed as a typed attribute.
#[derive(Clone)]
pub struct Signal {
    ca: Arc<dyn ChannelAccess>,
    pv: String,
    egu: String,
}

impl Signal {
    /// Bind a PV with an engineering-unit label.
    pub fn new(ca: Arc<dyn ChannelAccess>, pv: impl Into<String>, egu: impl Into<String>) -> Self {
        Self {
            ca,
            pv: pv.into(),
            egu: egu.into(),
        }
    }

    /// PV name this signal is bound to.
    pub fn pv(&self) -> &str {
        &self.pv
    }

    /// Engineering unit label.
    pub fn egu(&self) -> &str {
        &self.egu
    }

    /// Read the current value.
    pub async fn get(&self) -> Result<f64> {
        self.ca.get(&self.pv).await
    }

    /// Write a value.
    pub async fn put(&self, value: f64) -> Result<()> {
        self.ca.put(&self.pv, value).await
    }

    /// Read the PV as a string (for message and enum records).
    pub async fn get_text(&self) -> Result<String> {
        self.ca.get_string(&self.pv).await
    }
}

/// Linear unit conversion over an underlying signal.
///
/// Reads apply `derived = raw * scale + offset`; writes apply the inverse, so
/// `put(get())` round-trips to the same raw value within f64 rounding. The
/// reported engineering unit is the derived one.
#[derive(Clone)]
pub struct UnitConversionSignal {
    inner: Signal,
    scale: f64,
    offset: f64,
    derived_egu: String,
}

impl UnitConversionSignal {
    /// Wrap `inner` with a linear conversion into `derived_egu` units.
    ///
    /// `scale` must be nonzero or writes could not be inverted; a zero scale
    /// is a programming error and is rejected by `debug_assert`.
    pub fn new(inner: Signal, scale: f64, offset: f64, derived_egu: impl Into<String>) -> Self {
        debug_assert!(scale != 0.0);
        Self {
            inner,
            scale,
            offset,
            derived_egu: derived_egu.into(),
        }
    }

    /// Engineering unit of the derived value.
    pub fn egu(&self) -> &str {
        &self.derived_egu
    }

    /// Underlying raw signal.
    pub fn raw(&self) -> &Signal {
        &self.inner
    }

    /// Read the derived value.
    pub async fn get(&self) -> Result<f64> {
        Ok(self.inner.get().await? * self.scale + self.offset)
    }

    /// Write a derived value, converting back to raw units.
    pub async fn put(&self, derived: f64) -> Result<()> {
        self.inner.put((derived - self.offset) / self.scale).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockChannelAccess;
    use approx::assert_relative_eq;

    fn mock() -> Arc<MockChannelAccess> {
        Arc::new(MockChannelAccess::new())
    }

    #[tokio::test]
    async fn test_signal_get_put() {
        let ca = mock();
        ca.set_float("PM:VOLT", 0.25);
        let sig = Signal::new(ca.clone(), "PM:VOLT", "V");

        assert_eq!(sig.get().await.unwrap(), 0.25);
        sig.put(0.5).await.unwrap();
        assert_eq!(ca.get("PM:VOLT").await.unwrap(), 0.5);
        assert_eq!(sig.egu(), "V");
    }

    #[tokio::test]
    async fn test_unit_conversion_ns_to_s() {
        let ca = mock();
        ca.set_float("LAS:VIT:FS_TGT_TIME", 1.5e6); // ns

        let raw = Signal::new(ca.clone(), "LAS:VIT:FS_TGT_TIME", "ns");
        let seconds = UnitConversionSignal::new(raw, 1e-9, 0.0, "s");

        assert_relative_eq!(seconds.get().await.unwrap(), 1.5e-3);

        seconds.put(2e-3).await.unwrap();
        assert_relative_eq!(ca.get("LAS:VIT:FS_TGT_TIME").await.unwrap(), 2e6);
        assert_eq!(seconds.egu(), "s");
    }

    #[tokio::test]
    async fn test_unit_conversion_round_trip() {
        let ca = mock();
        ca.set_float("X", 123.456);
        let sig = UnitConversionSignal::new(Signal::new(ca.clone(), "X", "raw"), 0.125, -3.0, "d");

        let derived = sig.get().await.unwrap();
        sig.put(derived).await.unwrap();
        assert_relative_eq!(ca.get("X").await.unwrap(), 123.456, max_relative = 1e-12);
    }
}
