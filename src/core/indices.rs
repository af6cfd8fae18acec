use crate::types::{ImageTimeSeries, ReflectanceTimeSeries, TimeSeriesError, TsResult};
use ndarray::{Array3, Array4, Axis, Zip};

/// Soil-adjustment factor for SAVI
const SAVI_L: f32 = 0.428;

/// Closed formula behind a spectral index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormula {
    /// (a - b) / (a + b)
    NormDiff,
    Evi,
    Evi2,
    Savi,
    Bsi,
    Brightness,
}

/// Descriptor of one spectral index: input bands in formula order, the
/// expected value range and the coarsest native resolution among its inputs
#[derive(Debug, Clone, Copy)]
pub struct IndexMeta {
    pub name: &'static str,
    pub bands: &'static [&'static str],
    pub range: (f32, f32),
    pub native_resolution: u32,
    pub formula: IndexFormula,
}

/// Supported Sentinel-2 spectral indices
pub const S2_INDICES: [IndexMeta; 15] = [
    IndexMeta {
        name: "ndvi",
        bands: &["B08", "B04"],
        range: (-1.0, 1.0),
        native_resolution: 10,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "ndmi",
        bands: &["B08", "B11"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "nbr",
        bands: &["B08", "B12"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "nbr2",
        bands: &["B11", "B12"],
        range: (-3.0, 3.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "ndwi",
        bands: &["B03", "B08"],
        range: (-1.0, 1.0),
        native_resolution: 10,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "mndwi",
        bands: &["B03", "B11"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "ndgi",
        bands: &["B03", "B04"],
        range: (-1.0, 1.0),
        native_resolution: 10,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "ndre1",
        bands: &["B08", "B05"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "ndre2",
        bands: &["B08", "B06"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "ndre3",
        bands: &["B08", "B07"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::NormDiff,
    },
    IndexMeta {
        name: "evi",
        bands: &["B08", "B04", "B02"],
        range: (-3.0, 3.0),
        native_resolution: 10,
        formula: IndexFormula::Evi,
    },
    IndexMeta {
        name: "evi2",
        bands: &["B08", "B04"],
        range: (-3.0, 3.0),
        native_resolution: 10,
        formula: IndexFormula::Evi2,
    },
    IndexMeta {
        name: "savi",
        bands: &["B08", "B04"],
        range: (-3.0, 3.0),
        native_resolution: 10,
        formula: IndexFormula::Savi,
    },
    IndexMeta {
        name: "bsi",
        bands: &["B02", "B04", "B08", "B11"],
        range: (-1.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::Bsi,
    },
    IndexMeta {
        name: "brightness",
        bands: &["B03", "B04", "B08", "B11"],
        range: (0.0, 1.0),
        native_resolution: 20,
        formula: IndexFormula::Brightness,
    },
];

/// Descriptor of an index by name, if supported
pub fn index_meta(name: &str) -> Option<&'static IndexMeta> {
    S2_INDICES.iter().find(|m| m.name == name)
}

/// Computes spectral indices from a merged physical-reflectance stack.
///
/// Each requested index becomes one output band, named after the index, on
/// the input's time axis and grid. Inputs are expected in physical units;
/// a formula dividing by zero yields NaN rather than a fabricated value.
/// With `clamp` enabled, results are clamped to the index's expected range.
pub struct SpectralIndices;

impl SpectralIndices {
    /// Compute the named indices, one output band per index
    pub fn compute(
        series: &ReflectanceTimeSeries,
        names: &[&str],
        clamp: bool,
    ) -> TsResult<ReflectanceTimeSeries> {
        if names.is_empty() {
            return Err(TimeSeriesError::Processing(
                "no spectral indices requested".to_string(),
            ));
        }
        if series.is_empty() {
            return Err(TimeSeriesError::EmptyTimeSeries(
                "cannot compute indices for a series with no time steps".to_string(),
            ));
        }

        let (nt, _, ny, nx) = series.data.dim();
        let mut out = Array4::<f32>::zeros((nt, names.len(), ny, nx));
        for (i, name) in names.iter().enumerate() {
            let meta = index_meta(name).ok_or_else(|| {
                TimeSeriesError::Processing(format!("unknown spectral index `{}`", name))
            })?;
            let wanted: Vec<String> = meta.bands.iter().map(|b| b.to_string()).collect();
            let sel = series.select_bands(&wanted)?;

            let mut plane = apply_formula(meta.formula, &sel);
            if clamp {
                let (lo, hi) = meta.range;
                plane.mapv_inplace(|v| v.clamp(lo, hi));
            }
            out.index_axis_mut(Axis(1), i).assign(&plane);
        }

        let mut result = ImageTimeSeries::new(
            out,
            series.time.clone(),
            names.iter().map(|n| n.to_string()).collect(),
            series.y.clone(),
            series.x.clone(),
        )?;
        result.ids = series.ids.clone();
        result.attrs = series.attrs.clone();
        Ok(result)
    }
}

/// Evaluate one formula over a band-selected series; bands are in the
/// order the descriptor declares them
fn apply_formula(formula: IndexFormula, sel: &ReflectanceTimeSeries) -> Array3<f32> {
    let band = |k: usize| sel.data.index_axis(Axis(1), k);
    match formula {
        IndexFormula::NormDiff => Zip::from(&band(0))
            .and(&band(1))
            .map_collect(|&a, &b| (a - b) / (a + b)),
        IndexFormula::Evi => Zip::from(&band(0))
            .and(&band(1))
            .and(&band(2))
            .map_collect(|&nir, &red, &blue| {
                2.5 * (nir - red) / (nir + 6.0 * red - 7.5 * blue + 1.0)
            }),
        IndexFormula::Evi2 => Zip::from(&band(0))
            .and(&band(1))
            .map_collect(|&nir, &red| 2.5 * (nir - red) / (nir + 2.4 * red + 1.0)),
        IndexFormula::Savi => Zip::from(&band(0))
            .and(&band(1))
            .map_collect(|&nir, &red| (nir - red) / (nir + red + SAVI_L) * (1.0 + SAVI_L)),
        IndexFormula::Bsi => Zip::from(&band(0))
            .and(&band(1))
            .and(&band(2))
            .and(&band(3))
            .map_collect(|&blue, &red, &nir, &swir| {
                ((swir + red) - (nir + blue)) / ((swir + red) + (nir + blue))
            }),
        IndexFormula::Brightness => Zip::from(&band(0))
            .and(&band(1))
            .and(&band(2))
            .and(&band(3))
            .map_collect(|&green, &red, &nir, &swir| {
                (green * green + red * red + nir * nir + swir * swir).sqrt()
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::Array4;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 7, day, 10, 30, 0).unwrap()
    }

    fn reflectance_series(bands: &[(&str, f32)]) -> ReflectanceTimeSeries {
        let mut data = Array4::zeros((1, bands.len(), 1, 1));
        for (bi, &(_, v)) in bands.iter().enumerate() {
            data[[0, bi, 0, 0]] = v;
        }
        ImageTimeSeries::new(
            data,
            vec![t(1)],
            bands.iter().map(|&(b, _)| b.to_string()).collect(),
            vec![0.0],
            vec![0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_ndvi_value() {
        let ts = reflectance_series(&[("B04", 0.4), ("B08", 0.8)]);
        let out = SpectralIndices::compute(&ts, &["ndvi"], true).unwrap();
        assert_eq!(out.bands, vec!["ndvi"]);
        let expected = (0.8 - 0.4) / (0.8 + 0.4);
        assert!((out.data[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_evi_value() {
        let ts = reflectance_series(&[("B02", 0.2), ("B04", 0.4), ("B08", 0.8)]);
        let out = SpectralIndices::compute(&ts, &["evi"], false).unwrap();
        let expected = 2.5 * (0.8 - 0.4) / (0.8 + 6.0 * 0.4 - 7.5 * 0.2 + 1.0);
        assert!((out.data[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_brightness_value() {
        let ts = reflectance_series(&[("B03", 0.3), ("B04", 0.4), ("B08", 0.8), ("B11", 0.1)]);
        let out = SpectralIndices::compute(&ts, &["brightness"], false).unwrap();
        let expected = (0.09f32 + 0.16 + 0.64 + 0.01).sqrt();
        assert!((out.data[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_multiple_indices_one_band_each() {
        let ts = reflectance_series(&[("B03", 0.3), ("B04", 0.4), ("B08", 0.8)]);
        let out = SpectralIndices::compute(&ts, &["ndvi", "ndgi"], true).unwrap();
        assert_eq!(out.bands, vec!["ndvi", "ndgi"]);
        assert_eq!(out.num_bands(), 2);
    }

    #[test]
    fn test_clamp_to_expected_range() {
        // negative denominator contribution pushes the raw value above 1
        let ts = reflectance_series(&[("B04", -0.5), ("B08", 1.0)]);
        let clamped = SpectralIndices::compute(&ts, &["ndvi"], true).unwrap();
        assert_eq!(clamped.data[[0, 0, 0, 0]], 1.0);
        let raw = SpectralIndices::compute(&ts, &["ndvi"], false).unwrap();
        assert!((raw.data[[0, 0, 0, 0]] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_denominator_yields_nan() {
        let ts = reflectance_series(&[("B04", 0.0), ("B08", 0.0)]);
        let out = SpectralIndices::compute(&ts, &["ndvi"], false).unwrap();
        assert!(out.data[[0, 0, 0, 0]].is_nan());
    }

    #[test]
    fn test_unknown_index_rejected() {
        let ts = reflectance_series(&[("B04", 0.4), ("B08", 0.8)]);
        assert!(matches!(
            SpectralIndices::compute(&ts, &["ndxi"], true),
            Err(TimeSeriesError::Processing(_))
        ));
    }

    #[test]
    fn test_missing_band_rejected() {
        let ts = reflectance_series(&[("B04", 0.4), ("B08", 0.8)]);
        assert!(matches!(
            SpectralIndices::compute(&ts, &["ndmi"], true),
            Err(TimeSeriesError::Processing(_))
        ));
    }
}
