//! s2prep: A Fast, Modular Sentinel-2 Reflectance Time-Series Preprocessor
//!
//! This library turns irregular, multi-resolution Sentinel-2 observations
//! into a single co-registered, temporally regular, gap-free reflectance
//! stack: timestamps are deduplicated, the baseline 4.0 radiometric offset
//! is removed, cloud-flagged pixels are masked, each resolution group is
//! composited and interpolated, and the groups are merged onto the 10 m grid.
//! Spectral indices can then be derived from the merged reflectance stack.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    CloudMask, DnTimeSeries, ImageTimeSeries, ReflectanceTimeSeries, TimeSeriesError, TsResult,
    NODATA, REFLECTANCE_SCALE,
};

pub use crate::core::{
    preprocess, CloudMasker, CompositeMode, CompositeParams, Compositor, Interpolator,
    MergeOrchestrator, PipelineTimer, PreprocessParams, PreprocessedStack, RadiometricHarmonizer,
    ResampleOrder, Resampler, RescaleParams, ResolutionPipeline, SpectralIndices,
    TimeIndexNormalizer,
};

pub use io::{CatalogQuery, Sentinel2Source, StagingContext, TileBundle};
