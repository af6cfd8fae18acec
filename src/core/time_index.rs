use crate::types::{CloudMask, ImageTimeSeries};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Deduplicates coincident timestamps within one resolution's time series.
///
/// Acquisitions from the same day can be split across multiple scenes and
/// arrive stamped with an identical timestamp. Downstream compositing uses
/// the time axis as a mapping key, so repeated values are nudged apart by
/// an increasing number of microseconds. Values that never repeat, and the
/// first occurrence of a repeated value, are left untouched.
pub struct TimeIndexNormalizer;

impl TimeIndexNormalizer {
    /// Make a time axis strictly unique in place, preserving positional order
    pub fn normalize_axis(time: &mut [DateTime<Utc>]) {
        let mut counts: HashMap<DateTime<Utc>, usize> = HashMap::new();
        for t in time.iter() {
            *counts.entry(*t).or_insert(0) += 1;
        }
        let duplicated: HashSet<DateTime<Utc>> = counts
            .into_iter()
            .filter(|&(_, c)| c > 1)
            .map(|(t, _)| t)
            .collect();

        if duplicated.is_empty() {
            return;
        }

        // a nudged value must not land on any timestamp already present
        let mut taken: HashSet<DateTime<Utc>> = time.iter().copied().collect();
        let mut seen: HashSet<DateTime<Utc>> = HashSet::new();
        let mut offset: i64 = 0;
        let mut adjusted = 0usize;
        for t in time.iter_mut() {
            if duplicated.contains(t) {
                if seen.contains(t) {
                    let base = *t;
                    loop {
                        offset += 1;
                        let candidate = base + Duration::microseconds(offset);
                        if !taken.contains(&candidate) {
                            *t = candidate;
                            break;
                        }
                    }
                    taken.insert(*t);
                    adjusted += 1;
                } else {
                    seen.insert(*t);
                }
            }
        }
        log::debug!("Adjusted {} duplicate timestamps", adjusted);
    }

    /// Deduplicate the time axis of an image time series
    pub fn normalize<T: Clone>(mut series: ImageTimeSeries<T>) -> ImageTimeSeries<T> {
        Self::normalize_axis(&mut series.time);
        series
    }

    /// Deduplicate the time axis of a cloud mask
    pub fn normalize_mask(mut mask: CloudMask) -> CloudMask {
        Self::normalize_axis(&mut mask.time);
        mask
    }
}
