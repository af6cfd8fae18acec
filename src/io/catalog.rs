use crate::core::harmonize::RadiometricHarmonizer;
use crate::core::time_index::TimeIndexNormalizer;
use crate::types::{CloudMask, DnTimeSeries, TimeSeriesError, TsResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Native 10 m reflectance bands
pub const BANDS_10M: [&str; 4] = ["B02", "B03", "B04", "B08"];

/// Native 20 m reflectance bands
pub const BANDS_20M: [&str; 7] = ["B05", "B06", "B07", "B8A", "B09", "B11", "B12"];

/// Native 60 m reflectance bands
pub const BANDS_60M: [&str; 2] = ["B01", "B09"];

/// Scene classification asset name
pub const SCL_BAND: &str = "SCL";

/// Tile query parameters for a catalog backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogQuery {
    /// MGRS tile identifier, e.g. "31UFS"
    pub tile: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Scenes above this cloud-cover percentage are skipped
    pub max_cloud_cover: u8,
}

impl CatalogQuery {
    pub fn new(tile: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            tile: tile.to_string(),
            start_date,
            end_date,
            max_cloud_cover: 90,
        }
    }
}

/// The four per-resolution arrays a catalog backend delivers for one tile
#[derive(Debug, Clone)]
pub struct TileBundle {
    pub ten_m: DnTimeSeries,
    pub twenty_m: DnTimeSeries,
    pub sixty_m: DnTimeSeries,
    pub scl: CloudMask,
}

impl TileBundle {
    /// Ingestion-time normalization: fail fast on an empty query result,
    /// deduplicate each group's time axis, and harmonize the reflectance
    /// groups to the legacy processing baseline.
    pub fn normalize(self) -> TsResult<Self> {
        if self.ten_m.is_empty() || self.twenty_m.is_empty() || self.sixty_m.is_empty() {
            return Err(TimeSeriesError::EmptyTimeSeries(
                "catalog query returned no acquisitions".to_string(),
            ));
        }

        Ok(Self {
            ten_m: RadiometricHarmonizer::harmonize(TimeIndexNormalizer::normalize(self.ten_m))?,
            twenty_m: RadiometricHarmonizer::harmonize(TimeIndexNormalizer::normalize(
                self.twenty_m,
            ))?,
            sixty_m: RadiometricHarmonizer::harmonize(TimeIndexNormalizer::normalize(
                self.sixty_m,
            ))?,
            scl: TimeIndexNormalizer::normalize_mask(self.scl),
        })
    }
}

/// A remote catalog capable of producing tile bundles. Search and asset
/// retrieval live behind this seam; the preprocessing core never talks to
/// the network itself.
pub trait Sentinel2Source {
    fn load_tile(&self, query: &CatalogQuery) -> TsResult<TileBundle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageTimeSeries;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::{Array3, Array4};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 4, day, 10, 0, 0).unwrap()
    }

    fn dn_series(times: Vec<DateTime<Utc>>, band: &str, fill: u16) -> DnTimeSeries {
        let nt = times.len();
        ImageTimeSeries::new(
            Array4::from_elem((nt, 1, 1, 1), fill),
            times,
            vec![band.to_string()],
            vec![0.0],
            vec![0.0],
        )
        .unwrap()
        .with_baseline(vec!["4.00".to_string(); nt])
        .unwrap()
    }

    fn bundle() -> TileBundle {
        let times = vec![t(1), t(1), t(8)];
        TileBundle {
            ten_m: dn_series(times.clone(), "B02", 1500),
            twenty_m: dn_series(times.clone(), "B05", 1500),
            sixty_m: dn_series(times.clone(), "B01", 1500),
            scl: CloudMask::new(
                Array3::zeros((3, 1, 1)),
                times,
                vec![0.0],
                vec![0.0],
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_normalize_dedups_and_harmonizes() {
        let out = bundle().normalize().unwrap();
        // duplicated timestamps pulled apart in every group
        assert_ne!(out.ten_m.time[0], out.ten_m.time[1]);
        assert_ne!(out.scl.time[0], out.scl.time[1]);
        // baseline 4.0 offset removed at ingestion
        assert_eq!(out.ten_m.data[[0, 0, 0, 0]], 500);
        assert_eq!(out.twenty_m.data[[0, 0, 0, 0]], 500);
    }

    #[test]
    fn test_empty_query_result_rejected() {
        let mut b = bundle();
        b.ten_m = dn_series(vec![], "B02", 0);
        assert!(matches!(
            b.normalize(),
            Err(TimeSeriesError::EmptyTimeSeries(_))
        ));
    }
}
