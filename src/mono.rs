//! Channel-cut monochromator angle/energy conversions.
//!
//! The crystal is driven by a linear "alio" stage whose position maps to the
//! Bragg angle through the drive geometry, and the Bragg angle maps to
//! wavelength and photon energy through the crystal d-spacing. The chain is
//!
//! ```text
//! alio [mm] <-> theta [rad] <-> wavelength [Å] <-> energy [keV]
//! ```
//!
//! Each link is a closed-form inverse pair, so an [`EnergyPositioner`] can
//! accept a request in any of the three physical coordinates and converge on
//! one alio target.
//!
//! Conversion functions take angles in radians; the positioner API reports
//! theta in degrees, matching how operators quote crystal angles.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{DeviceError, Result};
use crate::motor::Movable;
use crate::signal::Signal;
use crate::transport::ChannelAccess;

/// hc, in eV·Å.
pub const HC_EV_ANGSTROM: f64 = 12398.419;

/// Si(111) d-spacing in Å.
pub const SI_111_DSPACING: f64 = 3.135_601_149_958_777_3;

/// Default crystal angle offset, degrees.
pub const DEFAULT_THETA0_DEG: f64 = 15.1027;

/// Default drive-arm radius term, mm.
pub const DEFAULT_GR: f64 = 3.175;

/// Default drive-arm length term, mm.
pub const DEFAULT_GD: f64 = 231.303;

/// Accelerator energy requests closer than this to the current request are
/// skipped (the machine ignores sub-deadband nudges anyway).
pub const VERNIER_DEADBAND_EV: f64 = 30.0;

/// Alio stage position for a crystal angle (radians).
pub fn theta_to_alio(theta: f64, theta0: f64, gr: f64, gd: f64) -> f64 {
    let t = theta - theta0;
    gr * (1.0 / t.cos() - 1.0) + gd * t.tan()
}

/// Crystal angle (radians) for an alio stage position.
///
/// Exact inverse of [`theta_to_alio`], via the half-angle substitution.
pub fn alio_to_theta(alio: f64, theta0: f64, gr: f64, gd: f64) -> f64 {
    let root = (alio * alio + gd * gd + 2.0 * gr * alio).sqrt();
    theta0 + 2.0 * ((root - gd) / (alio + 2.0 * gr)).atan()
}

/// Bragg wavelength (Å) diffracted at `theta` (radians).
pub fn theta_to_wavelength(theta: f64, dspacing: f64) -> f64 {
    2.0 * dspacing * theta.sin()
}

/// Bragg angle (radians) selecting `wavelength` (Å).
///
/// Returns NaN when `wavelength` exceeds the 2d backscattering limit; the
/// positioner validates before calling.
pub fn wavelength_to_theta(wavelength: f64, dspacing: f64) -> f64 {
    (wavelength / (2.0 * dspacing)).asin()
}

/// Photon energy (keV) of `wavelength` (Å).
pub fn wavelength_to_energy(wavelength: f64) -> f64 {
    HC_EV_ANGSTROM / wavelength / 1000.0
}

/// Wavelength (Å) of a photon energy (keV).
pub fn energy_to_wavelength(energy: f64) -> f64 {
    HC_EV_ANGSTROM / (energy * 1000.0)
}

/// Pseudo-positioner over the alio stage: request photon energy, wavelength,
/// or crystal angle; read back all three.
pub struct EnergyPositioner<M: Movable> {
    alio: M,
    vernier: Option<Signal>,
    /// Crystal angle offset, radians.
    theta0: f64,
    /// Crystal d-spacing, Å.
    dspacing: f64,
    /// Drive geometry radius term, mm.
    gr: f64,
    /// Drive geometry length term, mm.
    gd: f64,
    /// When set (the default), vernier requests within
    /// [`VERNIER_DEADBAND_EV`] of the current request are skipped.
    pub skip_small_moves: bool,
}

impl<M: Movable> EnergyPositioner<M> {
    /// Positioner over `alio` with the default Si(111) geometry.
    pub fn new(alio: M) -> Self {
        Self {
            alio,
            vernier: None,
            theta0: DEFAULT_THETA0_DEG.to_radians(),
            dspacing: SI_111_DSPACING,
            gr: DEFAULT_GR,
            gd: DEFAULT_GD,
            skip_small_moves: true,
        }
    }

    /// Override the drive geometry (theta0 in radians, gr/gd in mm).
    pub fn with_geometry(mut self, theta0: f64, gr: f64, gd: f64) -> Self {
        self.theta0 = theta0;
        self.gr = gr;
        self.gd = gd;
        self
    }

    /// Override the crystal d-spacing (Å).
    pub fn with_dspacing(mut self, dspacing: f64) -> Self {
        self.dspacing = dspacing;
        self
    }

    /// Couple an accelerator energy-request PV (eV) for vernier moves.
    pub fn with_vernier(mut self, ca: Arc<dyn ChannelAccess>, pv: impl Into<String>) -> Self {
        self.vernier = Some(Signal::new(ca, pv, "eV"));
        self
    }

    /// The underlying alio axis.
    pub fn alio(&self) -> &M {
        &self.alio
    }

    /// Crystal d-spacing in use (Å).
    pub fn dspacing(&self) -> f64 {
        self.dspacing
    }

    /// Lowest selectable photon energy (keV), at the backscattering limit.
    pub fn min_energy(&self) -> f64 {
        wavelength_to_energy(2.0 * self.dspacing)
    }

    /// Current crystal angle, degrees.
    pub async fn theta(&self) -> Result<f64> {
        let alio = self.alio.position().await?;
        Ok(alio_to_theta(alio, self.theta0, self.gr, self.gd).to_degrees())
    }

    /// Current wavelength, Å.
    pub async fn wavelength(&self) -> Result<f64> {
        let alio = self.alio.position().await?;
        let theta = alio_to_theta(alio, self.theta0, self.gr, self.gd);
        Ok(theta_to_wavelength(theta, self.dspacing))
    }

    /// Current photon energy, keV.
    pub async fn energy(&self) -> Result<f64> {
        Ok(wavelength_to_energy(self.wavelength().await?))
    }

    /// Move the crystal to `theta_deg` degrees.
    pub async fn set_theta(&self, theta_deg: f64) -> Result<()> {
        let target = theta_to_alio(theta_deg.to_radians(), self.theta0, self.gr, self.gd);
        debug!(theta_deg, alio = target, "theta move");
        self.alio.move_abs(target).await?;
        self.alio.wait_settled().await
    }

    /// Select `wavelength` Å.
    ///
    /// Wavelengths outside `(0, 2d]` cannot satisfy the Bragg condition and
    /// are rejected.
    pub async fn set_wavelength(&self, wavelength: f64) -> Result<()> {
        let limit = 2.0 * self.dspacing;
        if wavelength <= 0.0 || wavelength > limit {
            return Err(DeviceError::OutOfRange {
                value: wavelength,
                min: 0.0,
                max: limit,
            });
        }
        let theta = wavelength_to_theta(wavelength, self.dspacing);
        self.set_theta(theta.to_degrees()).await
    }

    /// Select a photon energy in keV.
    pub async fn set_energy(&self, energy_kev: f64) -> Result<()> {
        let min = self.min_energy();
        if energy_kev < min {
            return Err(DeviceError::OutOfRange {
                value: energy_kev,
                min,
                max: f64::INFINITY,
            });
        }
        info!(energy_kev, "mono energy move");
        self.set_wavelength(energy_to_wavelength(energy_kev)).await
    }

    /// Select a photon energy and forward the request to the accelerator.
    ///
    /// The energy-request PV counts in eV. Requests within the deadband of
    /// the current request leave the PV untouched unless
    /// [`skip_small_moves`](Self::skip_small_moves) is disabled.
    pub async fn set_energy_with_vernier(&self, energy_kev: f64) -> Result<()> {
        let vernier = self.vernier.as_ref().ok_or_else(|| {
            DeviceError::Unsupported("no vernier energy-request PV configured".into())
        })?;

        self.set_energy(energy_kev).await?;

        let request_ev = energy_kev * 1000.0;
        let current_ev = vernier.get().await?;
        if self.skip_small_moves && (request_ev - current_ev).abs() < VERNIER_DEADBAND_EV {
            debug!(
                request_ev,
                current_ev, "vernier request within deadband, skipping"
            );
            return Ok(());
        }
        vernier.put(request_ev).await
    }
}
