//! VIIRS DNB composite tile names.
//!
//! Monthly composites look like
//! `SVDNB_npp_20160101-20160131_75N180W_vcmcfg_v10_c201603132032.avg_rade9h.tif`
//! with a matching `.cvg.tif` coverage tile; annual composites span a whole
//! year and carry `avg_rade9` instead.

use crate::types::{NtlError, NtlResult, Period};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const TILE_PATTERN: &str =
    r"^SVDNB_npp_(\d{8})-(\d{8})_(\d{2}[NS]\d{3}[EW])_([A-Za-z0-9-]+)_v(\d+)_c(\d+)\.(avg_rade9h?|cvg)\.tif$";

fn tile_regex() -> NtlResult<Regex> {
    Regex::new(TILE_PATTERN).map_err(|e| NtlError::Processing(format!("Regex error: {}", e)))
}

/// Band carried by a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileProduct {
    Radiance,
    Coverage,
}

/// Parsed composite tile name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileName {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Tile extent code, e.g. `75N180W`
    pub extent: String,
    /// Processing configuration, e.g. `vcmcfg` or `vcmslcfg`
    pub config: String,
    pub version: u32,
    pub product: TileProduct,
}

impl TileName {
    pub fn parse(file_name: &str) -> NtlResult<Self> {
        Self::parse_with(&tile_regex()?, file_name)
    }

    fn parse_with(pattern: &Regex, file_name: &str) -> NtlResult<Self> {
        let caps = pattern.captures(file_name).ok_or_else(|| {
            NtlError::InvalidParameter(format!("'{}' is not a VIIRS composite tile", file_name))
        })?;

        let date = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|e| {
                NtlError::InvalidParameter(format!("bad date '{}' in {}: {}", s, file_name, e))
            })
        };
        let start = date(&caps[1])?;
        let end = date(&caps[2])?;
        if end < start {
            return Err(NtlError::InvalidParameter(format!(
                "tile {} ends before it starts",
                file_name
            )));
        }
        let version = caps[5]
            .parse()
            .map_err(|_| NtlError::InvalidParameter(format!("bad version in {}", file_name)))?;
        let product = match &caps[7] {
            "cvg" => TileProduct::Coverage,
            _ => TileProduct::Radiance,
        };

        Ok(Self {
            start,
            end,
            extent: caps[3].to_string(),
            config: caps[4].to_string(),
            version,
            product,
        })
    }

    /// Composite covering a whole calendar year
    pub fn is_annual(&self) -> bool {
        self.start.month() == 1
            && self.start.day() == 1
            && self.end.month() == 12
            && self.end.day() == 31
            && self.start.year() == self.end.year()
    }

    /// Calendar month of a monthly composite
    pub fn period(&self) -> Option<Period> {
        if self.is_annual() || self.start.month() != self.end.month() || self.start.year() != self.end.year() {
            None
        } else {
            Some(self.start.month() as Period)
        }
    }
}

/// Radiance and coverage tiles of one period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePair {
    pub period: Period,
    pub radiance: PathBuf,
    pub coverage: PathBuf,
}

/// Monthly tile extent covering a country, keyed by ISO3 code
pub fn extent_for_country(iso: &str) -> Option<&'static str> {
    match iso.to_ascii_uppercase().as_str() {
        "HTI" => Some("75N180W"),
        "GHA" => Some("75N060W"),
        "MOZ" | "NAM" => Some("00N060W"),
        "NPL" => Some("75N060E"),
        _ => None,
    }
}

/// Pair radiance and coverage tiles of one extent by period.
///
/// Files that are not monthly tiles of `extent` are ignored. A period with
/// only one of the two products fails with `MissingInput`.
pub fn pair_tiles<P: AsRef<Path>>(paths: &[P], extent: &str) -> NtlResult<Vec<TilePair>> {
    let pattern = tile_regex()?;
    let mut found: BTreeMap<Period, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();

    for path in paths {
        let path = path.as_ref();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let tile = match TileName::parse_with(&pattern, name) {
            Ok(tile) => tile,
            Err(_) => {
                log::debug!("Ignoring non-tile file {}", path.display());
                continue;
            }
        };
        if tile.extent != extent {
            continue;
        }
        let Some(period) = tile.period() else {
            log::debug!("Ignoring non-monthly tile {}", name);
            continue;
        };

        let slot = found.entry(period).or_default();
        let target = match tile.product {
            TileProduct::Radiance => &mut slot.0,
            TileProduct::Coverage => &mut slot.1,
        };
        if let Some(previous) = target.replace(path.to_path_buf()) {
            log::warn!(
                "Two {:?} tiles for period {:02}, keeping {} over {}",
                tile.product,
                period,
                name,
                previous.display()
            );
        }
    }

    found
        .into_iter()
        .map(|(period, pair)| match pair {
            (Some(radiance), Some(coverage)) => Ok(TilePair {
                period,
                radiance,
                coverage,
            }),
            _ => Err(NtlError::MissingInput {
                unit: extent.to_string(),
                period,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAD: &str = "SVDNB_npp_20160301-20160331_75N180W_vcmcfg_v10_c201604191144.avg_rade9h.tif";
    const CVG: &str = "SVDNB_npp_20160301-20160331_75N180W_vcmcfg_v10_c201604191144.cvg.tif";

    #[test]
    fn test_parse_monthly_tile() {
        let tile = TileName::parse(RAD).unwrap();
        assert_eq!(tile.start, NaiveDate::from_ymd_opt(2016, 3, 1).unwrap());
        assert_eq!(tile.extent, "75N180W");
        assert_eq!(tile.config, "vcmcfg");
        assert_eq!(tile.version, 10);
        assert_eq!(tile.product, TileProduct::Radiance);
        assert_eq!(tile.period(), Some(3));
        assert!(!tile.is_annual());

        assert_eq!(TileName::parse(CVG).unwrap().product, TileProduct::Coverage);
    }

    #[test]
    fn test_parse_annual_tile() {
        let tile = TileName::parse(
            "SVDNB_npp_20160101-20161231_75N180W_vcm-orm-ntl_v10_c201807311200.avg_rade9.tif",
        )
        .unwrap();
        assert!(tile.is_annual());
        assert_eq!(tile.period(), None);
        assert_eq!(tile.config, "vcm-orm-ntl");
    }

    #[test]
    fn test_rejects_other_files() {
        assert!(TileName::parse("HTI_03_rad.tif").is_err());
        assert!(TileName::parse("SVDNB_npp_20161301-20161331_75N180W_vcmcfg_v10_c1.cvg.tif").is_err());
    }

    #[test]
    fn test_pair_tiles() {
        let paths = vec![
            PathBuf::from(format!("/tiles/{}", RAD)),
            PathBuf::from(format!("/tiles/{}", CVG)),
            PathBuf::from("/tiles/SVDNB_npp_20160401-20160430_00N060W_vcmcfg_v10_c1.cvg.tif"),
            PathBuf::from("/tiles/readme.txt"),
        ];
        let pairs = pair_tiles(&paths, "75N180W").unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].period, 3);
        assert!(pairs[0].coverage.ends_with(CVG));
    }

    #[test]
    fn test_unpaired_tile_is_missing_input() {
        let paths = vec![PathBuf::from(RAD)];
        assert!(matches!(
            pair_tiles(&paths, "75N180W"),
            Err(NtlError::MissingInput { period: 3, .. })
        ));
    }

    #[test]
    fn test_country_extents() {
        assert_eq!(extent_for_country("hti"), Some("75N180W"));
        assert_eq!(extent_for_country("NAM"), extent_for_country("MOZ"));
        assert_eq!(extent_for_country("FRA"), None);
    }
}
