//! On-disk layout of a country's inputs, intermediates and outputs.
//!
//! ```text
//! {base}/datain/{ISO}/{MM}/{ISO}_{MM}_rad_tmp.tif       clipped radiance
//! {base}/datain/{ISO}/{MM}/{ISO}_{MM}_cvg.tif           clipped coverage
//! {base}/datain/{ISO}/{MM}/{ISO}_{MM}_rad.tif           masked radiance
//! {base}/datain/{ISO}/{MM}/{ISO}_{MM}_rad_cap_smth.tif  outliers handled
//! {base}/datain/{ISO}/{MM}/subnational/{unit}_{MM}_norm.tif
//! {base}/dataout/{ISO}/{ISO}_viirs_L{level}.csv
//! ```

use crate::types::Period;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryLayout {
    base: PathBuf,
    iso: String,
}

impl CountryLayout {
    pub fn new<P: AsRef<Path>>(base: P, iso: &str) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            iso: iso.to_ascii_uppercase(),
        }
    }

    pub fn iso(&self) -> &str {
        &self.iso
    }

    pub fn input_dir(&self) -> PathBuf {
        self.base.join("datain").join(&self.iso)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base.join("dataout").join(&self.iso)
    }

    pub fn period_dir(&self, period: Period) -> PathBuf {
        self.input_dir().join(format!("{:02}", period))
    }

    pub fn radiance_raw(&self, period: Period) -> PathBuf {
        self.period_file(period, "rad_tmp")
    }

    pub fn coverage(&self, period: Period) -> PathBuf {
        self.period_file(period, "cvg")
    }

    pub fn radiance_masked(&self, period: Period) -> PathBuf {
        self.period_file(period, "rad")
    }

    pub fn radiance_suppressed(&self, period: Period) -> PathBuf {
        self.period_file(period, "rad_cap_smth")
    }

    pub fn normalized(&self, unit: &str, period: Period) -> PathBuf {
        self.period_dir(period)
            .join("subnational")
            .join(format!("{}_{:02}_norm.tif", sanitize(unit), period))
    }

    /// Zonal CSV for an admin level
    pub fn output_table(&self, admin_level: u8) -> PathBuf {
        self.output_dir()
            .join(format!("{}_viirs_L{}.csv", self.iso, admin_level))
    }

    /// Normalized-series zonal CSV for an admin level
    pub fn normalized_table(&self, admin_level: u8) -> PathBuf {
        self.output_dir()
            .join(format!("{}_viirs_L{}_norm.csv", self.iso, admin_level))
    }

    pub fn calibration_curve(&self) -> PathBuf {
        self.output_dir()
            .join(format!("{}_threshold_curve.csv", self.iso))
    }

    pub fn calibration_sweep(&self) -> PathBuf {
        self.output_dir()
            .join(format!("{}_threshold_sums.csv", self.iso))
    }

    fn period_file(&self, period: Period, suffix: &str) -> PathBuf {
        self.period_dir(period)
            .join(format!("{}_{:02}_{}.tif", self.iso, period, suffix))
    }
}

/// Unit names become file names: path separators and spaces are replaced
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            c => c,
        })
        .collect()
}
