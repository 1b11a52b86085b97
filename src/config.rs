//! Run configuration loaded from JSON.
//!
//! Every field has a default, so a configuration file only needs to name
//! what differs from a standard monthly run:
//!
//! ```json
//! { "country": "HTI", "admin_level": 2, "base_dir": "/data/ntl" }
//! ```

use crate::core::area::AreaProjection;
use crate::core::calibrate::CalibrationParams;
use crate::core::mask::MaskParams;
use crate::core::outliers::OutlierPolicy;
use crate::core::pipeline::PipelineParams;
use crate::io::layout::CountryLayout;
use crate::types::{NtlError, NtlResult, MAX_PERIODS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// ISO3 country code
    pub country: String,
    /// Administrative level of the output units
    pub admin_level: u8,
    /// Root of the `datain/` and `dataout/` trees
    pub base_dir: PathBuf,
    pub periods: usize,
    pub mask: MaskParams,
    pub outliers: OutlierPolicy,
    /// Area projection override; the country's registered one when unset
    pub area_epsg: Option<u32>,
    pub normalize: bool,
    /// Run a threshold calibration against a reference raster
    pub calibration: Option<CalibrationParams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            country: String::new(),
            admin_level: 1,
            base_dir: PathBuf::from("."),
            periods: MAX_PERIODS,
            mask: MaskParams::default(),
            outliers: OutlierPolicy::default(),
            area_epsg: None,
            normalize: true,
            calibration: None,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> NtlResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> NtlResult<Self> {
        let mut config: PipelineConfig = serde_json::from_str(text)?;
        config.country = config.country.to_ascii_uppercase();
        config.validate()?;
        log::debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> NtlResult<()> {
        if self.country.len() != 3 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(NtlError::InvalidParameter(format!(
                "country must be an ISO3 code, got '{}'",
                self.country
            )));
        }
        if self.periods == 0 || self.periods > MAX_PERIODS {
            return Err(NtlError::InvalidParameter(format!(
                "periods must be in 1..={}, got {}",
                MAX_PERIODS, self.periods
            )));
        }
        if let OutlierPolicy::Interpolate(idw) = &self.outliers {
            if idw.max_search_distance == 0 || idw.min_neighbors == 0 || !(idw.power > 0.0) {
                return Err(NtlError::InvalidParameter(format!(
                    "invalid interpolation parameters: {:?}",
                    idw
                )));
            }
        }
        if let Some(epsg) = self.area_epsg {
            AreaProjection::from_epsg(epsg)?;
        }
        if let Some(calibration) = &self.calibration {
            calibration.validate()?;
        }
        Ok(())
    }

    pub fn area_projection(&self) -> NtlResult<AreaProjection> {
        match self.area_epsg {
            Some(epsg) => AreaProjection::from_epsg(epsg),
            None => Ok(AreaProjection::for_country(&self.country)),
        }
    }

    pub fn pipeline_params(&self) -> NtlResult<PipelineParams> {
        Ok(PipelineParams {
            periods: self.periods,
            mask: self.mask.clone(),
            outliers: self.outliers.clone(),
            area: Some(self.area_projection()?),
            normalize: self.normalize,
            calibration: self.calibration.clone(),
        })
    }

    pub fn layout(&self) -> CountryLayout {
        CountryLayout::new(&self.base_dir, &self.country)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mask::ValueComparison;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = PipelineConfig::from_json(r#"{ "country": "hti" }"#).unwrap();
        assert_eq!(config.country, "HTI");
        assert_eq!(config.periods, 12);
        assert_eq!(config.mask.quality_threshold, 1.0);
        assert_eq!(config.mask.comparison, ValueComparison::KeepAbove);
        assert!(matches!(config.outliers, OutlierPolicy::Suppress));
        assert!(config.calibration.is_none());
        assert_eq!(
            config.area_projection().unwrap(),
            AreaProjection::Utm { zone: 18, south: false }
        );
    }

    #[test]
    fn test_nested_sections() {
        let config = PipelineConfig::from_json(
            r#"{
                "country": "NPL",
                "admin_level": 3,
                "mask": { "quality_threshold": 2.0, "comparison": "StrictlyBelow" },
                "outliers": { "policy": "interpolate", "max_search_distance": 20 },
                "area_epsg": 6933,
                "calibration": { "threshold_max": 2.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.admin_level, 3);
        assert_eq!(config.mask.quality_threshold, 2.0);
        assert_eq!(config.mask.value_threshold, 0.0);
        match &config.outliers {
            OutlierPolicy::Interpolate(idw) => {
                assert_eq!(idw.max_search_distance, 20);
                assert_eq!(idw.min_neighbors, 8);
            }
            other => panic!("unexpected policy {:?}", other),
        }
        let params = config.pipeline_params().unwrap();
        assert_eq!(params.area, Some(AreaProjection::CylindricalEqualArea));
        assert_eq!(config.calibration.unwrap().threshold_step, 0.05);
    }

    #[test]
    fn test_validation_failures() {
        assert!(PipelineConfig::from_json(r#"{ "country": "HT" }"#).is_err());
        assert!(PipelineConfig::from_json(r#"{ "country": "HTI", "periods": 13 }"#).is_err());
        assert!(PipelineConfig::from_json(r#"{ "country": "HTI", "area_epsg": 4326 }"#).is_err());
        assert!(PipelineConfig::from_json(
            r#"{ "country": "HTI", "calibration": { "threshold_step": 0.0 } }"#
        )
        .is_err());
        assert!(matches!(
            PipelineConfig::from_json("{ not json"),
            Err(NtlError::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "country": "GHA", "base_dir": "/data/ntl" }}"#).unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/data/ntl"));
        assert_eq!(
            config.layout().output_table(config.admin_level),
            PathBuf::from("/data/ntl/dataout/GHA/GHA_viirs_L1.csv")
        );
    }
}
