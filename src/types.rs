use chrono::{DateTime, Utc};
use ndarray::{Array3, Array4, Axis};
use std::collections::HashMap;

/// Raw digital-number reflectance sample as delivered by the catalog
pub type DigitalNumber = u16;

/// Time series of digital numbers (pre-conversion)
pub type DnTimeSeries = ImageTimeSeries<DigitalNumber>;

/// Time series of physical reflectance values
pub type ReflectanceTimeSeries = ImageTimeSeries<f32>;

/// Value used to mark a sample as invalid or missing in every stage
pub const NODATA: u16 = 0;

/// Divisor converting digital numbers to physical reflectance
pub const REFLECTANCE_SCALE: f32 = 10000.0;

/// A satellite image time series with fixed dimension order (time, band, y, x).
///
/// Coordinate vectors are kept alongside the data array and are validated
/// against its shape at construction time. Spatial bounds are derived from
/// the coordinates, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTimeSeries<T> {
    /// Pixel values, shape (time, band, y, x)
    pub data: Array4<T>,
    /// Acquisition timestamps, unique after normalization
    pub time: Vec<DateTime<Utc>>,
    /// Spectral band identifiers, order is significant
    pub bands: Vec<String>,
    /// Spatial y coordinates (descending, pixel centers)
    pub y: Vec<f64>,
    /// Spatial x coordinates (ascending, pixel centers)
    pub x: Vec<f64>,
    /// Per-time acquisition identifiers
    pub ids: Vec<String>,
    /// Per-time processing baseline version, as float-like strings
    pub processing_baseline: Option<Vec<String>>,
    /// Free-form metadata attributes
    pub attrs: HashMap<String, String>,
}

impl<T: Clone> ImageTimeSeries<T> {
    /// Create a new series, validating coordinate lengths against the array shape
    pub fn new(
        data: Array4<T>,
        time: Vec<DateTime<Utc>>,
        bands: Vec<String>,
        y: Vec<f64>,
        x: Vec<f64>,
    ) -> TsResult<Self> {
        let (nt, nb, ny, nx) = data.dim();
        if time.len() != nt || bands.len() != nb || y.len() != ny || x.len() != nx {
            return Err(TimeSeriesError::ShapeMismatch(format!(
                "coordinates ({}, {}, {}, {}) do not match data shape ({}, {}, {}, {})",
                time.len(),
                bands.len(),
                y.len(),
                x.len(),
                nt,
                nb,
                ny,
                nx
            )));
        }
        let ids = vec![String::new(); nt];
        Ok(Self {
            data,
            time,
            bands,
            y,
            x,
            ids,
            processing_baseline: None,
            attrs: HashMap::new(),
        })
    }

    /// Attach per-time acquisition identifiers
    pub fn with_ids(mut self, ids: Vec<String>) -> TsResult<Self> {
        if ids.len() != self.len_time() {
            return Err(TimeSeriesError::ShapeMismatch(format!(
                "{} ids for {} time steps",
                ids.len(),
                self.len_time()
            )));
        }
        self.ids = ids;
        Ok(self)
    }

    /// Attach per-time processing baseline versions
    pub fn with_baseline(mut self, baseline: Vec<String>) -> TsResult<Self> {
        if baseline.len() != self.len_time() {
            return Err(TimeSeriesError::ShapeMismatch(format!(
                "{} baseline entries for {} time steps",
                baseline.len(),
                self.len_time()
            )));
        }
        self.processing_baseline = Some(baseline);
        Ok(self)
    }

    /// Number of time steps
    pub fn len_time(&self) -> usize {
        self.time.len()
    }

    /// True when the series has no time steps
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Number of spectral bands
    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    /// Spatial grid shape (rows, cols)
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    /// Grid pitch in coordinate units, from adjacent x coordinates
    pub fn pixel_size(&self) -> Option<f64> {
        if self.x.len() < 2 {
            return None;
        }
        Some((self.x[1] - self.x[0]).abs())
    }

    /// Spatial bounds (xmin, ymin, xmax, ymax): outer pixel edges,
    /// first/last coordinate plus/minus half the grid pitch
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let hres = self.pixel_size()? / 2.0;
        let xmin = self.x.first()? - hres;
        let xmax = self.x.last()? + hres;
        // y runs north to south
        let ymin = self.y.last()? - hres;
        let ymax = self.y.first()? + hres;
        Some((xmin, ymin, xmax, ymax))
    }

    /// Position of a band identifier, if present
    pub fn band_index(&self, band: &str) -> Option<usize> {
        self.bands.iter().position(|b| b == band)
    }

    /// Extract a sub-series containing only the named bands, in the given order
    pub fn select_bands(&self, bands: &[String]) -> TsResult<Self> {
        let idxs: Vec<usize> = bands
            .iter()
            .map(|b| {
                self.band_index(b).ok_or_else(|| {
                    TimeSeriesError::Processing(format!("band `{}` not present in series", b))
                })
            })
            .collect::<TsResult<Vec<_>>>()?;
        let data = self.data.select(Axis(1), &idxs);
        Ok(Self {
            data,
            time: self.time.clone(),
            bands: bands.to_vec(),
            y: self.y.clone(),
            x: self.x.clone(),
            ids: self.ids.clone(),
            processing_baseline: self.processing_baseline.clone(),
            attrs: self.attrs.clone(),
        })
    }

}

impl ImageTimeSeries<u16> {
    /// Convert digital numbers to physical reflectance (divide by 10000).
    /// Lossy and irreversible; per-time baseline metadata is dropped as it
    /// no longer describes the values.
    pub fn to_reflectance(&self) -> ReflectanceTimeSeries {
        let data = self.data.mapv(|v| v as f32 / REFLECTANCE_SCALE);
        ImageTimeSeries {
            data,
            time: self.time.clone(),
            bands: self.bands.clone(),
            y: self.y.clone(),
            x: self.x.clone(),
            ids: self.ids.clone(),
            processing_baseline: None,
            attrs: self.attrs.clone(),
        }
    }
}

/// Per-pixel cloud/invalid classification aligned with one resolution group.
/// Shape is (time, y, x); nonzero marks an invalid pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudMask {
    pub data: Array3<u8>,
    pub time: Vec<DateTime<Utc>>,
    pub y: Vec<f64>,
    pub x: Vec<f64>,
}

impl CloudMask {
    /// Create a new mask, validating coordinate lengths against the array shape
    pub fn new(
        data: Array3<u8>,
        time: Vec<DateTime<Utc>>,
        y: Vec<f64>,
        x: Vec<f64>,
    ) -> TsResult<Self> {
        let (nt, ny, nx) = data.dim();
        if time.len() != nt || y.len() != ny || x.len() != nx {
            return Err(TimeSeriesError::ShapeMismatch(format!(
                "mask coordinates ({}, {}, {}) do not match data shape ({}, {}, {})",
                time.len(),
                y.len(),
                x.len(),
                nt,
                ny,
                nx
            )));
        }
        Ok(Self { data, time, y, x })
    }

    /// Number of time steps
    pub fn len_time(&self) -> usize {
        self.time.len()
    }

    /// Spatial grid shape (rows, cols)
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }
}

/// Error types for time-series preprocessing
#[derive(Debug, thiserror::Error)]
pub enum TimeSeriesError {
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Empty time series: {0}")]
    EmptyTimeSeries(String),

    #[error("Staging I/O error: {0}")]
    StagingIo(#[from] std::io::Error),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("{stage} stage failed for the {resolution} m group: {source}")]
    Stage {
        resolution: u32,
        stage: &'static str,
        #[source]
        source: Box<TimeSeriesError>,
    },
}

/// Result type for preprocessing operations
pub type TsResult<T> = Result<T, TimeSeriesError>;
