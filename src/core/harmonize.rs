use crate::types::{DnTimeSeries, TimeSeriesError, TsResult};
use ndarray::Axis;

/// Additive digital-number offset introduced with processing baseline 4.0
pub const BASELINE_OFFSET: u16 = 1000;

/// Baseline version at which the radiometric offset first applies
pub const OFFSET_BASELINE: f32 = 4.0;

/// Spectral bands carrying the baseline 4.0 offset
pub const OFFSET_AFFECTED_BANDS: [&str; 13] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B10", "B11", "B12",
];

/// Rewrites reflectance values acquired under processing baseline >= 4.0 to
/// the legacy baseline, so a series mixing both calibrations is expressed in
/// one set of units.
///
/// Affected observations are clipped to the offset floor and the offset is
/// subtracted, so harmonization never produces negative reflectance. Band
/// and time ordering are preserved. A series without per-time baseline
/// metadata cannot be harmonized and is rejected rather than passed through.
pub struct RadiometricHarmonizer;

impl RadiometricHarmonizer {
    /// Harmonize a digital-number series to the pre-4.0 baseline
    pub fn harmonize(series: DnTimeSeries) -> TsResult<DnTimeSeries> {
        let baseline = series.processing_baseline.as_ref().ok_or_else(|| {
            TimeSeriesError::MissingMetadata(
                "processing baseline attribute required for harmonization".to_string(),
            )
        })?;

        let new_flags = Self::parse_baseline_flags(baseline)?;

        // Fast path: every observation predates the offset
        if new_flags.iter().all(|&is_new| !is_new) {
            return Ok(series);
        }

        let affected: Vec<usize> = series
            .bands
            .iter()
            .enumerate()
            .filter(|(_, b)| OFFSET_AFFECTED_BANDS.contains(&b.as_str()))
            .map(|(i, _)| i)
            .collect();

        if affected.is_empty() {
            return Ok(series);
        }

        let n_new = new_flags.iter().filter(|&&f| f).count();
        log::info!(
            "Harmonizing {} post-baseline-4.0 time steps across {} bands",
            n_new,
            affected.len()
        );

        let mut series = series;
        for (ti, &is_new) in new_flags.iter().enumerate() {
            if !is_new {
                continue;
            }
            let mut step = series.data.index_axis_mut(Axis(0), ti);
            for &bi in &affected {
                step.index_axis_mut(Axis(0), bi)
                    .mapv_inplace(|v| v.max(BASELINE_OFFSET) - BASELINE_OFFSET);
            }
        }

        Ok(series)
    }

    /// Parse per-time baseline strings into "acquired under >= 4.0" flags
    fn parse_baseline_flags(baseline: &[String]) -> TsResult<Vec<bool>> {
        baseline
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let version: f32 = b.trim().parse().map_err(|_| {
                    TimeSeriesError::MissingMetadata(format!(
                        "unparseable processing baseline `{}` at time step {}",
                        b, i
                    ))
                })?;
                Ok(version >= OFFSET_BASELINE)
            })
            .collect()
    }
}
