//! Calibration-table lookup core.
//!
//! A [`CalibrationTable`] is an ordered set of (motor position, physical
//! quantity) pairs loaded from a two-column calibration file. It provides the
//! forward map (motor position to quantity) by piecewise-linear interpolation
//! and, when the quantity column is strictly monotonic, the inverse map used
//! by pseudo-positioners to turn a requested physical quantity into a motor
//! target.
//!
//! # File format
//!
//! Two columns of whitespace-delimited text, no header:
//!
//! ```text
//! # waveplate [mm]   pulse energy [uJ]
//! 0.0   1.0
//! 2.5  12.0
//! 5.0  40.0
//! ```
//!
//! Rows are sorted by motor position on load and need not be pre-sorted.
//! Blank lines and `#` comments are ignored.
//!
//! # Errors
//!
//! Interpolation never extrapolates or clamps: a value outside the table is
//! reported as [`DeviceError::OutOfRange`] carrying the violated bounds.

use std::path::Path;

use tracing::debug;

use crate::error::{DeviceError, Result};

/// An ordered two-column calibration table with forward and inverse
/// piecewise-linear interpolation.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    /// Rows sorted by motor position (column 1).
    rows: Vec<(f64, f64)>,
    /// Whether the quantity column is strictly monotonic.
    invertible: bool,
    /// Direction of the quantity column when invertible.
    increasing_quantity: bool,
}

impl CalibrationTable {
    /// Build a table from raw (motor, quantity) rows.
    ///
    /// Rows are sorted by motor position. At least two rows are required,
    /// all values must be finite, and duplicate motor positions are
    /// rejected because they make the forward map ambiguous.
    pub fn from_rows(mut rows: Vec<(f64, f64)>) -> Result<Self> {
        if rows.len() < 2 {
            return Err(DeviceError::Calibration(format!(
                "need at least 2 calibration rows, got {}",
                rows.len()
            )));
        }
        if let Some((x, y)) = rows
            .iter()
            .find(|(x, y)| !x.is_finite() || !y.is_finite())
        {
            return Err(DeviceError::Calibration(format!(
                "non-finite calibration row ({x}, {y})"
            )));
        }

        rows.sort_by(|a, b| a.0.total_cmp(&b.0));

        if let Some(pair) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(DeviceError::Calibration(format!(
                "duplicate motor position {} in calibration table",
                pair[0].0
            )));
        }

        let increasing = rows.windows(2).all(|w| w[1].1 > w[0].1);
        let decreasing = rows.windows(2).all(|w| w[1].1 < w[0].1);
        let invertible = increasing || decreasing;

        Ok(Self {
            rows,
            invertible,
            increasing_quantity: increasing,
        })
    }

    /// Load a calibration file (see module docs for the format).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let mut rows = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(a), Some(b)) = (fields.next(), fields.next()) else {
                return Err(DeviceError::Calibration(format!(
                    "{}:{}: expected two columns, got '{line}'",
                    path.display(),
                    lineno + 1
                )));
            };
            let parse = |field: &str| {
                field.parse::<f64>().map_err(|_| {
                    DeviceError::Calibration(format!(
                        "{}:{}: invalid number '{field}'",
                        path.display(),
                        lineno + 1
                    ))
                })
            };
            rows.push((parse(a)?, parse(b)?));
        }

        let table = Self::from_rows(rows)?;
        debug!(
            path = %path.display(),
            rows = table.rows.len(),
            invertible = table.invertible,
            "loaded calibration table"
        );
        Ok(table)
    }

    /// Number of calibration rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false: construction requires at least two rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted (motor, quantity) rows.
    pub fn rows(&self) -> &[(f64, f64)] {
        &self.rows
    }

    /// Covered motor range (min, max).
    pub fn motor_range(&self) -> (f64, f64) {
        (self.rows[0].0, self.rows[self.rows.len() - 1].0)
    }

    /// Reachable quantity range (min, max).
    pub fn quantity_range(&self) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &(_, q) in &self.rows {
            min = min.min(q);
            max = max.max(q);
        }
        (min, max)
    }

    /// Whether [`inverse`](Self::inverse) is available (strictly monotonic
    /// quantity column, in either direction).
    pub fn is_invertible(&self) -> bool {
        self.invertible
    }

    /// Rebuild the table with the two columns exchanged, for calibration
    /// files that list the physical quantity before the motor position.
    ///
    /// The quantity column becomes the sort key, so it must satisfy the
    /// usual motor-column constraints (no duplicates).
    pub fn swapped(&self) -> Result<Self> {
        Self::from_rows(self.rows.iter().map(|&(x, y)| (y, x)).collect())
    }

    /// Interpolate the physical quantity at a motor position.
    pub fn forward(&self, motor: f64) -> Result<f64> {
        let (min, max) = self.motor_range();
        if !(min..=max).contains(&motor) {
            return Err(DeviceError::OutOfRange {
                value: motor,
                min,
                max,
            });
        }
        let i = self.segment_index(|r| r.0 <= motor);
        let (x0, y0) = self.rows[i];
        let (x1, y1) = self.rows[i + 1];
        Ok(y0 + (motor - x0) * (y1 - y0) / (x1 - x0))
    }

    /// Invert the table: motor position producing the given quantity.
    ///
    /// Requires a strictly monotonic quantity column, which is checked once
    /// at construction. For every in-range motor position `x`,
    /// `inverse(forward(x))` recovers `x` up to f64 rounding.
    pub fn inverse(&self, quantity: f64) -> Result<f64> {
        if !self.invertible {
            return Err(DeviceError::NotInvertible(
                "quantity column is not strictly monotonic".into(),
            ));
        }
        let (min, max) = self.quantity_range();
        if !(min..=max).contains(&quantity) {
            return Err(DeviceError::OutOfRange {
                value: quantity,
                min,
                max,
            });
        }
        let i = if self.increasing_quantity {
            self.segment_index(|r| r.1 <= quantity)
        } else {
            self.segment_index(|r| r.1 >= quantity)
        };
        let (x0, y0) = self.rows[i];
        let (x1, y1) = self.rows[i + 1];
        Ok(x0 + (quantity - y0) * (x1 - x0) / (y1 - y0))
    }

    /// Index of the interpolation segment whose left edge satisfies `pred`
    /// for the longest prefix of rows. Clamped so `i + 1` is always valid.
    fn segment_index<F>(&self, pred: F) -> usize
    where
        F: Fn(&(f64, f64)) -> bool,
    {
        let idx = self.rows.partition_point(|r| pred(r));
        idx.saturating_sub(1).min(self.rows.len() - 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn waveplate_table() -> CalibrationTable {
        // Deliberately unsorted, as calibration files often are.
        CalibrationTable::from_rows(vec![
            (5.0, 40.0),
            (0.0, 1.0),
            (2.5, 12.0),
            (7.5, 52.0),
            (10.0, 58.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_rows_sorted_on_construction() {
        let table = waveplate_table();
        let motors: Vec<f64> = table.rows().iter().map(|r| r.0).collect();
        assert_eq!(motors, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        assert_eq!(table.motor_range(), (0.0, 10.0));
        assert_eq!(table.quantity_range(), (1.0, 58.0));
    }

    #[test]
    fn test_forward_endpoints_and_midpoints() {
        let table = waveplate_table();
        assert_relative_eq!(table.forward(0.0).unwrap(), 1.0);
        assert_relative_eq!(table.forward(10.0).unwrap(), 58.0);
        // Midpoint of the (0.0, 1.0) -> (2.5, 12.0) segment.
        assert_relative_eq!(table.forward(1.25).unwrap(), 6.5);
        // On a knot.
        assert_relative_eq!(table.forward(5.0).unwrap(), 40.0);
    }

    #[test]
    fn test_forward_out_of_range() {
        let table = waveplate_table();
        match table.forward(-0.1) {
            Err(DeviceError::OutOfRange { value, min, max }) => {
                assert_eq!(value, -0.1);
                assert_eq!(min, 0.0);
                assert_eq!(max, 10.0);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert!(table.forward(10.5).is_err());
    }

    #[test]
    fn test_inverse_round_trip() {
        let table = waveplate_table();
        assert!(table.is_invertible());
        for x in [0.0, 0.7, 2.5, 3.3, 6.1, 9.99, 10.0] {
            let q = table.forward(x).unwrap();
            assert_relative_eq!(table.inverse(q).unwrap(), x, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_inverse_decreasing_table() {
        // Past the transmission peak the energy falls with position.
        let table = CalibrationTable::from_rows(vec![
            (0.0, 50.0),
            (1.0, 30.0),
            (2.0, 10.0),
            (3.0, 2.0),
        ])
        .unwrap();
        assert!(table.is_invertible());
        assert_relative_eq!(table.inverse(50.0).unwrap(), 0.0);
        assert_relative_eq!(table.inverse(2.0).unwrap(), 3.0);
        assert_relative_eq!(table.inverse(20.0).unwrap(), 1.5);
        for x in [0.0, 0.4, 1.7, 2.8, 3.0] {
            let q = table.forward(x).unwrap();
            assert_relative_eq!(table.inverse(q).unwrap(), x, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_inverse_out_of_range_reports_quantity_bounds() {
        let table = waveplate_table();
        match table.inverse(100.0) {
            Err(DeviceError::OutOfRange { min, max, .. }) => {
                assert_eq!((min, max), (1.0, 58.0));
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_non_monotonic_quantity_not_invertible() {
        let table =
            CalibrationTable::from_rows(vec![(0.0, 1.0), (1.0, 5.0), (2.0, 3.0)]).unwrap();
        assert!(!table.is_invertible());
        // Forward still works.
        assert_relative_eq!(table.forward(0.5).unwrap(), 3.0);
        assert!(matches!(
            table.inverse(4.0),
            Err(DeviceError::NotInvertible(_))
        ));
    }

    #[test]
    fn test_swapped_exchanges_columns() {
        let table = waveplate_table().swapped().unwrap();
        assert_eq!(table.motor_range(), (1.0, 58.0));
        assert_eq!(table.quantity_range(), (0.0, 10.0));
        assert_relative_eq!(table.forward(12.0).unwrap(), 2.5);
        assert_relative_eq!(table.inverse(2.5).unwrap(), 12.0);
        // A duplicate in the quantity column blocks the swap.
        let flat = CalibrationTable::from_rows(vec![(0.0, 1.0), (1.0, 1.0), (2.0, 3.0)]).unwrap();
        assert!(flat.swapped().is_err());
    }

    #[test]
    fn test_duplicate_motor_position_rejected() {
        let err =
            CalibrationTable::from_rows(vec![(0.0, 1.0), (0.0, 2.0), (1.0, 3.0)]).unwrap_err();
        assert!(matches!(err, DeviceError::Calibration(_)));
    }

    #[test]
    fn test_too_few_rows_rejected() {
        assert!(CalibrationTable::from_rows(vec![(0.0, 1.0)]).is_err());
        assert!(CalibrationTable::from_rows(vec![]).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let err =
            CalibrationTable::from_rows(vec![(0.0, f64::NAN), (1.0, 2.0)]).unwrap_err();
        assert!(matches!(err, DeviceError::Calibration(_)));
    }

    #[test]
    fn test_load_file_with_comments_and_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# waveplate [mm]  energy [uJ]").unwrap();
        writeln!(file, "5.0 40.0").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "  2.5\t12.0  ").unwrap();
        file.flush().unwrap();

        let table = CalibrationTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.motor_range(), (0.0, 5.0));
        assert_relative_eq!(table.forward(2.5).unwrap(), 12.0);
    }

    #[test]
    fn test_load_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "oops").unwrap();
        file.flush().unwrap();

        let err = CalibrationTable::load(file.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = CalibrationTable::load("/no/such/calibration.txt").unwrap_err();
        assert!(matches!(err, DeviceError::Io(_)));
    }
}
