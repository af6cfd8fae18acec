use crate::types::{DnTimeSeries, TimeSeriesError, TsResult, NODATA};
use ndarray::{ArrayViewMut1, Axis, Zip};

/// Fills no-data samples along the time axis, per pixel and band.
///
/// Zero samples (from masking or empty composite windows) are replaced by
/// linear interpolation between the nearest valid neighbors in time. A gap
/// at either boundary is filled with the nearest valid sample instead of
/// being left as no-data. Profiles with no valid sample at all stay zero.
pub struct Interpolator;

impl Interpolator {
    /// Gap-fill a series, returning a new series with the same shape
    pub fn apply(series: &DnTimeSeries) -> TsResult<DnTimeSeries> {
        if series.is_empty() {
            return Err(TimeSeriesError::EmptyTimeSeries(
                "cannot interpolate a series with no time steps".to_string(),
            ));
        }

        let mut out = series.clone();
        Zip::from(out.data.lanes_mut(Axis(0))).par_for_each(fill_lane);
        Ok(out)
    }
}

/// Linearly fill the zero samples of one temporal profile
fn fill_lane(mut lane: ArrayViewMut1<u16>) {
    let n = lane.len();
    let valid: Vec<usize> = (0..n).filter(|&i| lane[i] != NODATA).collect();
    if valid.is_empty() || valid.len() == n {
        return;
    }

    for i in 0..n {
        if lane[i] != NODATA {
            continue;
        }
        let next_pos = valid.partition_point(|&v| v < i);
        let prev = next_pos.checked_sub(1).map(|p| valid[p]);
        let next = valid.get(next_pos).copied();

        let value = match (prev, next) {
            (Some(p), Some(q)) => {
                let vp = f32::from(lane[p]);
                let vq = f32::from(lane[q]);
                vp + (vq - vp) * (i - p) as f32 / (q - p) as f32
            }
            // boundary gaps extend the nearest valid sample
            (Some(p), None) => f32::from(lane[p]),
            (None, Some(q)) => f32::from(lane[q]),
            (None, None) => unreachable!("profile has at least one valid sample"),
        };
        lane[i] = value.round() as u16;
    }
}
