use crate::core::composite::{CompositeParams, Compositor};
use crate::core::interpolate::Interpolator;
use crate::core::mask::CloudMasker;
use crate::core::rescale::{ResampleOrder, RescaleParams, Resampler};
use crate::core::timer::PipelineTimer;
use crate::io::staging::StagingContext;
use crate::types::{
    CloudMask, DnTimeSeries, ImageTimeSeries, ReflectanceTimeSeries, TimeSeriesError, TsResult,
};
use chrono::NaiveDate;
use ndarray::{concatenate, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Grid refinement factor between the 20 m and 10 m groups
const MERGE_SCALE: u32 = 2;

/// Parameters for the full preprocessing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Composite output interval in days
    pub composite_freq: u32,
    /// Composite aggregation window in days
    pub composite_window: u32,
    /// Convert the merged result to physical reflectance (lossy)
    pub reflectance: bool,
}

impl PreprocessParams {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            composite_freq: 10,
            composite_window: 20,
            reflectance: true,
        }
    }

    fn composite_params(&self) -> CompositeParams {
        CompositeParams::new(
            self.composite_freq,
            Some(self.composite_window),
            self.start,
            self.end,
        )
    }
}

/// The merged multi-resolution output. The element type depends on whether
/// physical-unit conversion was requested, so both variants are explicit.
#[derive(Debug, Clone)]
pub enum PreprocessedStack {
    DigitalNumber(DnTimeSeries),
    Reflectance(ReflectanceTimeSeries),
}

impl PreprocessedStack {
    pub fn bands(&self) -> &[String] {
        match self {
            Self::DigitalNumber(ts) => &ts.bands,
            Self::Reflectance(ts) => &ts.bands,
        }
    }

    pub fn len_time(&self) -> usize {
        match self {
            Self::DigitalNumber(ts) => ts.len_time(),
            Self::Reflectance(ts) => ts.len_time(),
        }
    }

    pub fn as_digital_number(&self) -> Option<&DnTimeSeries> {
        match self {
            Self::DigitalNumber(ts) => Some(ts),
            Self::Reflectance(_) => None,
        }
    }

    pub fn as_reflectance(&self) -> Option<&ReflectanceTimeSeries> {
        match self {
            Self::Reflectance(ts) => Some(ts),
            Self::DigitalNumber(_) => None,
        }
    }

    /// Physical reflectance view of the stack, converting if still in
    /// digital numbers
    pub fn into_reflectance(self) -> ReflectanceTimeSeries {
        match self {
            Self::Reflectance(ts) => ts,
            Self::DigitalNumber(ts) => ts.to_reflectance(),
        }
    }
}

/// Linear per-resolution pipeline: Loaded -> Masked -> Composited ->
/// Interpolated. Stages never run out of order or get skipped, every stage
/// output is materialized through the staging context, and a failure names
/// the stage and the resolution group it belongs to.
pub struct ResolutionPipeline {
    resolution: u32,
    compositor: Compositor,
}

impl ResolutionPipeline {
    pub fn new(resolution: u32, params: &CompositeParams) -> TsResult<Self> {
        Ok(Self {
            resolution,
            compositor: Compositor::new(params)?,
        })
    }

    /// Run the pipeline on one loaded resolution group
    pub fn run(
        &self,
        series: DnTimeSeries,
        mask: &CloudMask,
        staging: &StagingContext,
        timer: &mut PipelineTimer,
    ) -> TsResult<DnTimeSeries> {
        let res = self.resolution;
        if series.is_empty() {
            return Err(stage_failure(
                res,
                "mask",
                TimeSeriesError::EmptyTimeSeries(
                    "pipeline input has no time steps".to_string(),
                ),
            ));
        }

        timer.composite.start();
        log::info!("Masking {} m group", res);
        let masked = CloudMasker::apply(series, mask)
            .and_then(|s| staging.stage_series(&s, &format!("{}m-masked", res)))
            .map_err(|e| stage_failure(res, "mask", e))?;

        log::info!("Compositing {} m group", res);
        let composited = self
            .compositor
            .apply(&masked)
            .and_then(|s| staging.stage_series(&s, &format!("{}m-composited", res)))
            .map_err(|e| stage_failure(res, "composite", e))?;
        timer.composite.stop();

        timer.interpolate.start();
        log::info!("Interpolating {} m group", res);
        let interpolated = Interpolator::apply(&composited)
            .and_then(|s| staging.stage_series(&s, &format!("{}m-interpolated", res)))
            .map_err(|e| stage_failure(res, "interpolate", e))?;
        timer.interpolate.stop();

        Ok(interpolated)
    }
}

/// Runs both resolution pipelines and merges their results onto the 10 m
/// grid: the finished 20 m series is upsampled with order-1 no-data aware
/// interpolation, bands are concatenated (10 m native first) and the merged
/// cube is optionally converted to physical reflectance.
pub struct MergeOrchestrator {
    params: PreprocessParams,
}

impl MergeOrchestrator {
    pub fn new(params: PreprocessParams) -> Self {
        Self { params }
    }

    pub fn run(
        &self,
        ten_m: DnTimeSeries,
        twenty_m: DnTimeSeries,
        scl_20m: CloudMask,
        staging_dir: &Path,
    ) -> TsResult<PreprocessedStack> {
        let staging = StagingContext::new(staging_dir)?;
        let mut timer10 = PipelineTimer::new(10);
        let mut timer20 = PipelineTimer::new(20);
        let attrs = ten_m.attrs.clone();

        log::info!("Loading resolution groups");
        timer10.load.start();
        let ten_m = staging
            .stage_series(&ten_m, "10m-loaded")
            .map_err(|e| stage_failure(10, "load", e))?;
        timer10.load.stop();

        timer20.load.start();
        let twenty_m = staging
            .stage_series(&twenty_m, "20m-loaded")
            .map_err(|e| stage_failure(20, "load", e))?;
        let scl_20m = staging
            .stage_mask(&scl_20m, "20m-scl")
            .map_err(|e| stage_failure(20, "load", e))?;
        // the 20 m classification also masks the 10 m group
        let scl_10m = Resampler::new(&RescaleParams::new(MERGE_SCALE, ResampleOrder::Nearest))
            .and_then(|r| r.upsample_mask(&scl_20m))
            .and_then(|m| staging.stage_mask(&m, "10m-scl"))
            .map_err(|e| stage_failure(20, "load", e))?;
        timer20.load.stop();

        let composite_params = self.params.composite_params();
        let pipeline10 = ResolutionPipeline::new(10, &composite_params)?;
        let pipeline20 = ResolutionPipeline::new(20, &composite_params)?;

        // the two groups are independent until the merge
        let (ten_done, twenty_done) = rayon::join(
            || pipeline10.run(ten_m, &scl_10m, &staging, &mut timer10),
            || pipeline20.run(twenty_m, &scl_20m, &staging, &mut timer20),
        );
        let (ten_done, twenty_done) = (ten_done?, twenty_done?);

        log::info!("Merging 10 m and 20 m series");
        let twenty_on_10m = Resampler::new(&RescaleParams::new(
            MERGE_SCALE,
            ResampleOrder::Bilinear,
        ))
        .and_then(|r| r.upsample_series(&twenty_done))
        .map_err(|e| stage_failure(20, "merge", e))?;

        let mut merged =
            concat_bands(&ten_done, &twenty_on_10m).map_err(|e| stage_failure(10, "merge", e))?;
        merged.attrs = attrs;
        merged.processing_baseline = None;

        timer10.log();
        timer20.log();

        let out = if self.params.reflectance {
            let refl = staging
                .stage_series(&merged.to_reflectance(), "merged")
                .map_err(|e| stage_failure(10, "merge", e))?;
            PreprocessedStack::Reflectance(refl)
        } else {
            let dn = staging
                .stage_series(&merged, "merged")
                .map_err(|e| stage_failure(10, "merge", e))?;
            PreprocessedStack::DigitalNumber(dn)
        };
        Ok(out)
    }
}

/// Concatenate two co-registered series along the band axis. Both must
/// share the time axis and grid shape; the output keeps the first series'
/// coordinates.
pub fn concat_bands(a: &DnTimeSeries, b: &DnTimeSeries) -> TsResult<DnTimeSeries> {
    if a.time != b.time {
        return Err(TimeSeriesError::ShapeMismatch(format!(
            "time axes differ ({} vs {} steps)",
            a.len_time(),
            b.len_time()
        )));
    }
    if a.grid_shape() != b.grid_shape() {
        return Err(TimeSeriesError::ShapeMismatch(format!(
            "grids differ ({:?} vs {:?})",
            a.grid_shape(),
            b.grid_shape()
        )));
    }

    let data = concatenate(Axis(1), &[a.data.view(), b.data.view()])
        .map_err(|e| TimeSeriesError::Processing(format!("band concatenation: {}", e)))?;
    let mut bands = a.bands.clone();
    bands.extend(b.bands.iter().cloned());

    let mut out = ImageTimeSeries::new(data, a.time.clone(), bands, a.y.clone(), a.x.clone())?;
    out.ids = a.ids.clone();
    out.attrs = a.attrs.clone();
    Ok(out)
}

/// Preprocess one tile block: run both resolution pipelines, merge to the
/// 10 m grid and optionally convert to physical reflectance. This is the
/// library entry point mirroring the per-block processing flow.
pub fn preprocess(
    ten_m: DnTimeSeries,
    twenty_m: DnTimeSeries,
    scl_20m: CloudMask,
    params: &PreprocessParams,
    staging_dir: &Path,
) -> TsResult<PreprocessedStack> {
    MergeOrchestrator::new(params.clone()).run(ten_m, twenty_m, scl_20m, staging_dir)
}

fn stage_failure(resolution: u32, stage: &'static str, source: TimeSeriesError) -> TimeSeriesError {
    TimeSeriesError::Stage {
        resolution,
        stage,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::{Array3, Array4};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, day, 10, 30, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, d).unwrap()
    }

    fn series(nt: usize, bands: &[&str], ny: usize, nx: usize, fill: u16) -> DnTimeSeries {
        let pitch = 40.0 / ny as f64;
        ImageTimeSeries::new(
            Array4::from_elem((nt, bands.len(), ny, nx), fill),
            (0..nt).map(|i| t(2 + 3 * i as u32)).collect(),
            bands.iter().map(|b| b.to_string()).collect(),
            (0..ny).map(|i| 40.0 - (i as f64 + 0.5) * pitch).collect(),
            (0..nx).map(|i| (i as f64 + 0.5) * pitch).collect(),
        )
        .unwrap()
    }

    fn clear_mask(nt: usize, ny: usize, nx: usize) -> CloudMask {
        let pitch = 40.0 / ny as f64;
        CloudMask::new(
            Array3::zeros((nt, ny, nx)),
            (0..nt).map(|i| t(2 + 3 * i as u32)).collect(),
            (0..ny).map(|i| 40.0 - (i as f64 + 0.5) * pitch).collect(),
            (0..nx).map(|i| (i as f64 + 0.5) * pitch).collect(),
        )
        .unwrap()
    }

    fn test_params() -> PreprocessParams {
        let mut params = PreprocessParams::new(day(1), day(14));
        params.composite_freq = 7;
        params.composite_window = 7;
        params
    }

    #[test]
    fn test_resolution_pipeline_produces_regular_gap_free_series() {
        let staging = StagingContext::new(std::env::temp_dir()).unwrap();
        let mut timer = PipelineTimer::new(20);
        let pipeline =
            ResolutionPipeline::new(20, &test_params().composite_params()).unwrap();

        let ts = series(4, &["B05"], 2, 2, 800);
        let out = pipeline
            .run(ts, &clear_mask(4, 2, 2), &staging, &mut timer)
            .unwrap();
        assert_eq!(out.len_time(), 2);
        assert!(out.data.iter().all(|&v| v == 800));
    }

    #[test]
    fn test_pipeline_failure_names_stage_and_group() {
        let staging = StagingContext::new(std::env::temp_dir()).unwrap();
        let mut timer = PipelineTimer::new(10);
        let pipeline =
            ResolutionPipeline::new(10, &test_params().composite_params()).unwrap();

        // mask with the wrong time length trips the mask stage
        let ts = series(4, &["B02"], 2, 2, 800);
        let err = pipeline
            .run(ts, &clear_mask(3, 2, 2), &staging, &mut timer)
            .unwrap_err();
        match err {
            TimeSeriesError::Stage {
                resolution, stage, ..
            } => {
                assert_eq!(resolution, 10);
                assert_eq!(stage, "mask");
            }
            other => panic!("expected stage failure, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_bands_keeps_first_grid() {
        let a = series(2, &["B02", "B03"], 4, 4, 100);
        let b = series(2, &["B05"], 4, 4, 200);
        let merged = concat_bands(&a, &b).unwrap();
        assert_eq!(merged.bands, vec!["B02", "B03", "B05"]);
        assert_eq!(merged.data.dim(), (2, 3, 4, 4));
        assert_eq!(merged.data[[0, 2, 0, 0]], 200);
        assert_eq!(merged.x, a.x);
    }

    #[test]
    fn test_concat_bands_rejects_mismatched_time() {
        let a = series(2, &["B02"], 4, 4, 100);
        let b = series(3, &["B05"], 4, 4, 200);
        assert!(matches!(
            concat_bands(&a, &b),
            Err(TimeSeriesError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_merge_produces_combined_stack_on_10m_grid() {
        let tmp = tempfile::tempdir().unwrap();
        let ten = series(4, &["B02", "B03", "B04", "B08"], 4, 4, 2000);
        let twenty = series(4, &["B05", "B06"], 2, 2, 3000);
        let scl = clear_mask(4, 2, 2);

        let mut params = test_params();
        params.reflectance = false;
        let out = preprocess(ten, twenty, scl, &params, tmp.path()).unwrap();

        let dn = out.as_digital_number().unwrap();
        assert_eq!(dn.num_bands(), 6);
        assert_eq!(dn.bands[..4], ["B02", "B03", "B04", "B08"]);
        assert_eq!(dn.grid_shape(), (4, 4));
        assert_eq!(dn.len_time(), 2);
        assert!(dn.processing_baseline.is_none());
        // upsampled 20 m values land next to native 10 m values
        assert_eq!(dn.data[[0, 0, 0, 0]], 2000);
        assert_eq!(dn.data[[0, 4, 0, 0]], 3000);
    }

    #[test]
    fn test_unusable_staging_parent_surfaces_io_error() {
        let ten = series(4, &["B02"], 4, 4, 2000);
        let twenty = series(4, &["B05"], 2, 2, 3000);
        let scl = clear_mask(4, 2, 2);

        let missing = std::env::temp_dir().join("s2prep-missing-staging-parent");
        assert!(!missing.exists());
        let err = preprocess(ten, twenty, scl, &test_params(), &missing).unwrap_err();
        assert!(matches!(err, TimeSeriesError::StagingIo(_)));
    }

    #[test]
    fn test_reflectance_flag_converts_output() {
        let tmp = tempfile::tempdir().unwrap();
        let ten = series(4, &["B02"], 4, 4, 2000);
        let twenty = series(4, &["B05"], 2, 2, 3000);
        let scl = clear_mask(4, 2, 2);

        let params = test_params();
        let out = preprocess(ten, twenty, scl, &params, tmp.path()).unwrap();
        let refl = out.as_reflectance().unwrap();
        assert!((refl.data[[0, 0, 0, 0]] - 0.2).abs() < 1e-6);
        assert!((refl.data[[0, 1, 0, 0]] - 0.3).abs() < 1e-6);
    }
}
