use crate::types::{CloudMask, ImageTimeSeries, TimeSeriesError, TsResult};
use ndarray::{Axis, Zip};
use num_traits::Zero;

/// Zeroes pixels flagged invalid by a per-pixel classification mask.
///
/// The mask has shape (time, y, x) and is broadcast across the band axis:
/// a flagged pixel is zeroed in every band of that acquisition. Zero is the
/// no-data sentinel every downstream stage recognizes.
pub struct CloudMasker;

impl CloudMasker {
    /// Apply a cloud mask to a series, returning the masked series
    pub fn apply<T: Clone + Zero>(
        series: ImageTimeSeries<T>,
        mask: &CloudMask,
    ) -> TsResult<ImageTimeSeries<T>> {
        if series.len_time() != mask.len_time() {
            return Err(TimeSeriesError::ShapeMismatch(format!(
                "series has {} time steps but mask has {}",
                series.len_time(),
                mask.len_time()
            )));
        }
        if series.grid_shape() != mask.grid_shape() {
            return Err(TimeSeriesError::ShapeMismatch(format!(
                "series grid {:?} does not match mask grid {:?}",
                series.grid_shape(),
                mask.grid_shape()
            )));
        }

        let mut series = series;
        let (nt, nb, _, _) = series.data.dim();
        for ti in 0..nt {
            let flags = mask.data.index_axis(Axis(0), ti);
            let mut step = series.data.index_axis_mut(Axis(0), ti);
            for bi in 0..nb {
                Zip::from(&mut step.index_axis_mut(Axis(0), bi))
                    .and(&flags)
                    .for_each(|v, &flag| {
                        if flag != 0 {
                            *v = T::zero();
                        }
                    });
            }
        }

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::{Array3, Array4};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 6, day, 10, 0, 0).unwrap()
    }

    fn series(nt: usize, nb: usize, ny: usize, nx: usize, fill: u16) -> ImageTimeSeries<u16> {
        ImageTimeSeries::new(
            Array4::from_elem((nt, nb, ny, nx), fill),
            (1..=nt as u32).map(t).collect(),
            (0..nb).map(|i| format!("B{:02}", i + 2)).collect(),
            (0..ny).map(|i| -(i as f64)).collect(),
            (0..nx).map(|i| i as f64).collect(),
        )
        .unwrap()
    }

    fn mask(nt: usize, ny: usize, nx: usize) -> CloudMask {
        CloudMask::new(
            Array3::zeros((nt, ny, nx)),
            (1..=nt as u32).map(t).collect(),
            (0..ny).map(|i| -(i as f64)).collect(),
            (0..nx).map(|i| i as f64).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_flagged_pixels_zeroed_across_bands() {
        let ts = series(2, 3, 2, 2, 1234);
        let mut m = mask(2, 2, 2);
        m.data[[0, 1, 1]] = 1;

        let out = CloudMasker::apply(ts, &m).unwrap();
        for bi in 0..3 {
            assert_eq!(out.data[[0, bi, 1, 1]], 0);
        }
        // untouched positions keep their value
        assert_eq!(out.data[[0, 0, 0, 0]], 1234);
        assert_eq!(out.data[[1, 2, 1, 1]], 1234);
    }

    #[test]
    fn test_time_length_mismatch_rejected() {
        let ts = series(3, 1, 2, 2, 10);
        let m = mask(2, 2, 2);
        assert!(matches!(
            CloudMasker::apply(ts, &m),
            Err(TimeSeriesError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let ts = series(2, 1, 2, 2, 10);
        let m = mask(2, 4, 4);
        assert!(matches!(
            CloudMasker::apply(ts, &m),
            Err(TimeSeriesError::ShapeMismatch(_))
        ));
    }
}
