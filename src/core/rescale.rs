use crate::types::{CloudMask, DnTimeSeries, ImageTimeSeries, TimeSeriesError, TsResult};
use ndarray::{Array3, Array4, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Interpolation order for spatial resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleOrder {
    /// Order 0, block replication
    Nearest,
    /// Order 1, no-data aware
    Bilinear,
}

/// Parameters for integer-factor spatial upscaling
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RescaleParams {
    /// Integer refinement factor (2 maps a 20 m grid onto a 10 m grid)
    pub scale: u32,
    pub order: ResampleOrder,
    /// Sentinel value that must not bleed into valid pixels
    pub nodata: u16,
    /// Clamp interpolated values to the range of the contributing neighbors
    pub preserve_range: bool,
}

impl RescaleParams {
    pub fn new(scale: u32, order: ResampleOrder) -> Self {
        Self {
            scale,
            order,
            nodata: 0,
            preserve_range: true,
        }
    }
}

/// Changes the pixel grid pitch of a series by an integer scale factor.
///
/// Output coordinates are pixel centers at the refined pitch within the
/// input's spatial bounds. For bilinear resampling a no-data neighbor
/// contributes no weight, so no-data never bleeds into valid pixels; an
/// output pixel whose neighbors are all no-data stays no-data.
pub struct Resampler {
    scale: u32,
    order: ResampleOrder,
    nodata: u16,
    preserve_range: bool,
}

impl Resampler {
    pub fn new(params: &RescaleParams) -> TsResult<Self> {
        if params.scale == 0 {
            return Err(TimeSeriesError::Processing(
                "rescale factor must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            scale: params.scale,
            order: params.order,
            nodata: params.nodata,
            preserve_range: params.preserve_range,
        })
    }

    /// Upscale a series to the refined grid
    pub fn upsample_series(&self, series: &DnTimeSeries) -> TsResult<DnTimeSeries> {
        let y = refine_axis(&series.y, self.scale)?;
        let x = refine_axis(&series.x, self.scale)?;

        let (nt, nb, ny, nx) = series.data.dim();
        let s = self.scale as usize;
        log::debug!(
            "Rescaling {} steps x {} bands from {}x{} to {}x{} ({:?})",
            nt,
            nb,
            ny,
            nx,
            ny * s,
            nx * s,
            self.order
        );

        let mut out = Array4::<u16>::zeros((nt, nb, ny * s, nx * s));
        for ti in 0..nt {
            for bi in 0..nb {
                let src = series.data.index_axis(Axis(0), ti);
                let src = src.index_axis(Axis(0), bi);
                let mut dst = out.index_axis_mut(Axis(0), ti);
                let mut dst = dst.index_axis_mut(Axis(0), bi);
                match self.order {
                    ResampleOrder::Nearest => {
                        Zip::indexed(&mut dst).par_for_each(|(yi, xi), v| {
                            *v = src[[yi / s, xi / s]];
                        });
                    }
                    ResampleOrder::Bilinear => {
                        let nodata = self.nodata;
                        let preserve = self.preserve_range;
                        Zip::indexed(&mut dst).par_for_each(|(yi, xi), v| {
                            *v = bilinear_nodata(&src, yi, xi, s, nodata, preserve);
                        });
                    }
                }
            }
        }

        let mut result = ImageTimeSeries::new(
            out,
            series.time.clone(),
            series.bands.clone(),
            y,
            x,
        )?;
        result.ids = series.ids.clone();
        result.processing_baseline = series.processing_baseline.clone();
        result.attrs = series.attrs.clone();
        Ok(result)
    }

    /// Upscale a classification mask; categorical data is always replicated
    /// with nearest-neighbor sampling
    pub fn upsample_mask(&self, mask: &CloudMask) -> TsResult<CloudMask> {
        let y = refine_axis(&mask.y, self.scale)?;
        let x = refine_axis(&mask.x, self.scale)?;

        let (nt, ny, nx) = mask.data.dim();
        let s = self.scale as usize;
        let mut out = Array3::<u8>::zeros((nt, ny * s, nx * s));
        for ti in 0..nt {
            let src = mask.data.index_axis(Axis(0), ti);
            let mut dst = out.index_axis_mut(Axis(0), ti);
            Zip::indexed(&mut dst).par_for_each(|(yi, xi), v| {
                *v = src[[yi / s, xi / s]];
            });
        }

        CloudMask::new(out, mask.time.clone(), y, x)
    }
}

/// No-data aware bilinear sample of the coarse plane at fine pixel (yi, xi)
fn bilinear_nodata(
    src: &ArrayView2<u16>,
    yi: usize,
    xi: usize,
    scale: usize,
    nodata: u16,
    preserve_range: bool,
) -> u16 {
    let (ny, nx) = src.dim();
    let sy = (yi as f64 + 0.5) / scale as f64 - 0.5;
    let sx = (xi as f64 + 0.5) / scale as f64 - 0.5;

    let y0 = sy.floor();
    let x0 = sx.floor();
    let fy = sy - y0;
    let fx = sx - x0;

    let clamp = |i: f64, n: usize| (i.max(0.0) as usize).min(n - 1);
    let rows = [clamp(y0, ny), clamp(y0 + 1.0, ny)];
    let cols = [clamp(x0, nx), clamp(x0 + 1.0, nx)];
    let wy = [1.0 - fy, fy];
    let wx = [1.0 - fx, fx];

    let mut total = 0.0;
    let mut acc = 0.0;
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for (ri, &row) in rows.iter().enumerate() {
        for (ci, &col) in cols.iter().enumerate() {
            let v = src[[row, col]];
            if v == nodata {
                continue;
            }
            let w = wy[ri] * wx[ci];
            let v = f64::from(v);
            total += w;
            acc += w * v;
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }

    if total == 0.0 {
        return nodata;
    }
    let mut value = acc / total;
    if preserve_range {
        value = value.clamp(lo, hi);
    }
    value.round() as u16
}

/// Pixel-center coordinates of the refined axis within the same bounds
fn refine_axis(coords: &[f64], scale: u32) -> TsResult<Vec<f64>> {
    if coords.len() < 2 {
        return Err(TimeSeriesError::Processing(
            "cannot derive grid pitch from fewer than two coordinates".to_string(),
        ));
    }
    let pitch = coords[1] - coords[0]; // signed, y axes run downward
    let fine = pitch / scale as f64;
    let edge = coords[0] - pitch / 2.0;
    let n = coords.len() * scale as usize;
    Ok((0..n).map(|i| edge + (i as f64 + 0.5) * fine).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::{Array3, Array4};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, day, 0, 0, 0).unwrap()
    }

    fn plane_series(values: [[u16; 2]; 2]) -> DnTimeSeries {
        let mut data = Array4::zeros((1, 1, 2, 2));
        for yi in 0..2 {
            for xi in 0..2 {
                data[[0, 0, yi, xi]] = values[yi][xi];
            }
        }
        ImageTimeSeries::new(
            data,
            vec![t(1)],
            vec!["B05".to_string()],
            vec![55.0, 45.0],
            vec![10.0, 20.0],
        )
        .unwrap()
    }

    #[test]
    fn test_refined_coordinates() {
        let ts = plane_series([[1, 1], [1, 1]]);
        let resampler = Resampler::new(&RescaleParams::new(2, ResampleOrder::Nearest)).unwrap();
        let out = resampler.upsample_series(&ts).unwrap();
        assert_eq!(out.x, vec![7.5, 12.5, 17.5, 22.5]);
        assert_eq!(out.y, vec![57.5, 52.5, 47.5, 42.5]);
        assert_eq!(out.bounds(), ts.bounds());
    }

    #[test]
    fn test_nearest_replicates_blocks() {
        let ts = plane_series([[100, 200], [300, 400]]);
        let resampler = Resampler::new(&RescaleParams::new(2, ResampleOrder::Nearest)).unwrap();
        let out = resampler.upsample_series(&ts).unwrap();
        assert_eq!(out.data[[0, 0, 0, 0]], 100);
        assert_eq!(out.data[[0, 0, 0, 1]], 100);
        assert_eq!(out.data[[0, 0, 1, 1]], 100);
        assert_eq!(out.data[[0, 0, 2, 3]], 400);
        assert_eq!(out.data[[0, 0, 3, 3]], 400);
    }

    #[test]
    fn test_bilinear_interpolates_centers() {
        let ts = plane_series([[100, 200], [300, 400]]);
        let resampler = Resampler::new(&RescaleParams::new(2, ResampleOrder::Bilinear)).unwrap();
        let out = resampler.upsample_series(&ts).unwrap();
        // corners replicate, interior pixels blend all four neighbors
        assert_eq!(out.data[[0, 0, 0, 0]], 100);
        assert_eq!(out.data[[0, 0, 3, 3]], 400);
        assert_eq!(out.data[[0, 0, 1, 1]], 175);
        assert_eq!(out.data[[0, 0, 2, 2]], 325);
    }

    #[test]
    fn test_nodata_does_not_bleed() {
        let ts = plane_series([[0, 200], [300, 400]]);
        let resampler = Resampler::new(&RescaleParams::new(2, ResampleOrder::Bilinear)).unwrap();
        let out = resampler.upsample_series(&ts).unwrap();
        // weights of the no-data neighbor are dropped and renormalized
        assert_eq!(out.data[[0, 0, 1, 1]], 271);
        // the all-no-data corner stays no-data
        assert_eq!(out.data[[0, 0, 0, 0]], 0);
    }

    #[test]
    fn test_mask_upsample_nearest() {
        let mut data = Array3::zeros((1, 2, 2));
        data[[0, 0, 1]] = 1;
        let mask = CloudMask::new(data, vec![t(1)], vec![55.0, 45.0], vec![10.0, 20.0]).unwrap();
        let resampler = Resampler::new(&RescaleParams::new(2, ResampleOrder::Nearest)).unwrap();
        let out = resampler.upsample_mask(&mask).unwrap();
        assert_eq!(out.grid_shape(), (4, 4));
        assert_eq!(out.data[[0, 0, 2]], 1);
        assert_eq!(out.data[[0, 1, 3]], 1);
        assert_eq!(out.data[[0, 0, 0]], 0);
        assert_eq!(out.data[[0, 2, 2]], 0);
    }

    #[test]
    fn test_zero_scale_rejected() {
        assert!(Resampler::new(&RescaleParams::new(0, ResampleOrder::Nearest)).is_err());
    }
}
