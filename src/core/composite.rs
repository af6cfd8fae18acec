use crate::types::{DnTimeSeries, ImageTimeSeries, TimeSeriesError, TsResult, NODATA};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use ndarray::{Array4, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Aggregation applied within each compositing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeMode {
    Median,
    Mean,
    Sum,
    Min,
    Max,
}

/// Parameters for the moving-window composite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeParams {
    /// Interval between output composite dates, in days
    pub freq_days: u32,
    /// Moving window length in days; defaults to `freq_days`
    pub window_days: Option<u32>,
    /// First day of the composited period
    pub start: NaiveDate,
    /// Last day of the composited period
    pub end: NaiveDate,
    /// Window aggregation mode
    pub mode: CompositeMode,
    /// Fold observations after the last window into it instead of
    /// discarding them
    pub use_all_obs: bool,
}

impl CompositeParams {
    pub fn new(freq_days: u32, window_days: Option<u32>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            freq_days,
            window_days,
            start,
            end,
            mode: CompositeMode::Median,
            use_all_obs: false,
        }
    }
}

/// Reduces an irregular time series to a fixed-frequency regular one.
///
/// Output dates are midnight-anchored, spaced `freq_days` apart, and fully
/// determined by {start, end, freq}; each output step aggregates the
/// observations falling inside its window. Zero is treated as no-data: it
/// never contributes to an aggregate, and a window without valid samples
/// composites to zero.
pub struct Compositor {
    freq: u32,
    window: u32,
    start: NaiveDate,
    end: NaiveDate,
    mode: CompositeMode,
    use_all_obs: bool,
}

impl Compositor {
    /// Create a compositor, validating and resolving the window settings
    pub fn new(params: &CompositeParams) -> TsResult<Self> {
        if params.freq_days == 0 {
            return Err(TimeSeriesError::Processing(
                "composite frequency must be at least one day".to_string(),
            ));
        }

        let mut window = params.window_days.unwrap_or(params.freq_days);

        // Overlapping windows would double-count values for these modes
        if matches!(
            params.mode,
            CompositeMode::Sum | CompositeMode::Min | CompositeMode::Max
        ) && window != params.freq_days
        {
            log::warn!(
                "Window of {} days ignored for {:?} compositing, using the {} day frequency",
                window,
                params.mode,
                params.freq_days
            );
            window = params.freq_days;
        }

        if window < params.freq_days {
            return Err(TimeSeriesError::Processing(format!(
                "window of {} days is shorter than the {} day frequency",
                window, params.freq_days
            )));
        }

        Ok(Self {
            freq: params.freq_days,
            window,
            start: params.start,
            end: params.end,
            mode: params.mode,
            use_all_obs: params.use_all_obs,
        })
    }

    /// The regular output time axis this compositor produces
    pub fn date_range(&self) -> Vec<DateTime<Utc>> {
        let (before, _) = window_half_widths(self.window);
        let end = midnight(self.end);
        let mut d = midnight(self.start) + Duration::days(before);
        let mut dates = Vec::new();
        while d <= end {
            dates.push(d);
            d += Duration::days(self.freq as i64);
        }
        dates
    }

    /// Composite a series onto the regular time axis
    pub fn apply(&self, series: &DnTimeSeries) -> TsResult<DnTimeSeries> {
        if series.is_empty() {
            return Err(TimeSeriesError::EmptyTimeSeries(
                "cannot composite a series with no time steps".to_string(),
            ));
        }

        let dates = self.date_range();
        if dates.is_empty() {
            return Err(TimeSeriesError::EmptyTimeSeries(format!(
                "no composite dates between {} and {} at {} day frequency",
                self.start, self.end, self.freq
            )));
        }

        log::debug!(
            "Compositing {} observations onto {} regular steps ({:?}, {} day window)",
            series.len_time(),
            dates.len(),
            self.mode,
            self.window
        );

        let flags = self.interval_flags(&dates, &series.time);

        let (_, nb, ny, nx) = series.data.dim();
        let mut comp = Array4::<u16>::zeros((dates.len(), nb, ny, nx));

        for (di, step_flags) in flags.iter().enumerate() {
            let idxs: Vec<usize> = step_flags
                .iter()
                .enumerate()
                .filter(|(_, &f)| f)
                .map(|(i, _)| i)
                .collect();

            let mut out_step = comp.index_axis_mut(Axis(0), di);
            for bi in 0..nb {
                let views: Vec<_> = idxs
                    .iter()
                    .map(|&ti| {
                        series
                            .data
                            .index_axis(Axis(0), ti)
                            .index_axis_move(Axis(0), bi)
                    })
                    .collect();

                let mode = self.mode;
                Zip::indexed(&mut out_step.index_axis_mut(Axis(0), bi)).par_for_each(
                    |(yi, xi), out| {
                        let mut vals: Vec<f32> = views
                            .iter()
                            .map(|v| v[[yi, xi]])
                            .filter(|&v| v != NODATA)
                            .map(f32::from)
                            .collect();
                        // NaN-equivalent empty window composites to no-data
                        *out = reduce(&mut vals, mode) as u16;
                    },
                );
            }
        }

        let mut out = ImageTimeSeries::new(
            comp,
            dates,
            series.bands.clone(),
            series.y.clone(),
            series.x.clone(),
        )?;
        out.attrs = series.attrs.clone();
        Ok(out)
    }

    /// Per composite date, which observations fall inside its window
    fn interval_flags(
        &self,
        dates: &[DateTime<Utc>],
        time: &[DateTime<Utc>],
    ) -> Vec<Vec<bool>> {
        let (before, after) = window_half_widths(self.window);
        let mut flags: Vec<Vec<bool>> = dates
            .iter()
            .map(|d| {
                let lo = *d - Duration::days(before);
                let hi = *d + Duration::days(after + 1);
                time.iter().map(|t| *t >= lo && *t < hi).collect()
            })
            .collect();

        if self.use_all_obs {
            if let Some(last) = flags.last_mut() {
                include_trailing_obs(last);
            }
        }
        flags
    }
}

/// Extend the last window so trailing observations are not discarded
fn include_trailing_obs(flags: &mut [bool]) {
    if let Some(last_true) = flags.iter().rposition(|&f| f) {
        for f in flags[last_true..].iter_mut() {
            *f = true;
        }
    }
}

/// Days before and after a composite date covered by its window
fn window_half_widths(window: u32) -> (i64, i64) {
    let half = (window / 2) as i64;
    if window % 2 == 0 {
        (half, (half - 1).max(0))
    } else {
        (half, half)
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn reduce(vals: &mut Vec<f32>, mode: CompositeMode) -> f32 {
    if vals.is_empty() {
        return 0.0;
    }
    match mode {
        CompositeMode::Median => {
            vals.sort_by(|a, b| a.total_cmp(b));
            let mid = vals.len() / 2;
            if vals.len() % 2 == 1 {
                vals[mid]
            } else {
                (vals[mid - 1] + vals[mid]) / 2.0
            }
        }
        CompositeMode::Mean => vals.iter().sum::<f32>() / vals.len() as f32,
        CompositeMode::Sum => vals.iter().sum(),
        CompositeMode::Min => vals.iter().copied().fold(f32::INFINITY, f32::min),
        CompositeMode::Max => vals.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    }
}
