//! Core time-series preprocessing modules

pub mod composite;
pub mod harmonize;
pub mod indices;
pub mod interpolate;
pub mod mask;
pub mod pipeline;
pub mod rescale;
pub mod time_index;
pub mod timer;

// Re-export main types
pub use composite::{CompositeMode, CompositeParams, Compositor};
pub use harmonize::{RadiometricHarmonizer, BASELINE_OFFSET, OFFSET_AFFECTED_BANDS};
pub use indices::{index_meta, IndexMeta, SpectralIndices, S2_INDICES};
pub use interpolate::Interpolator;
pub use mask::CloudMasker;
pub use pipeline::{
    concat_bands, preprocess, MergeOrchestrator, PreprocessParams, PreprocessedStack,
    ResolutionPipeline,
};
pub use rescale::{ResampleOrder, Resampler, RescaleParams};
pub use time_index::TimeIndexNormalizer;
pub use timer::{PipelineTimer, StageTimer};
