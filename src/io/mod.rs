//! Input/output collaborators: tables, tile names, directory layout and,
//! with the `gdal` feature, raster and vector files.

pub mod layout;
pub mod table;
pub mod tiles;

#[cfg(feature = "gdal")]
pub mod raster;
#[cfg(feature = "gdal")]
pub mod vector;

pub use layout::CountryLayout;
pub use table::{
    read_threshold_curve, read_zonal_table, write_summary_table, write_threshold_curve,
    write_threshold_sweep, write_zonal_table,
};
pub use tiles::{extent_for_country, pair_tiles, TileName, TilePair, TileProduct};

#[cfg(feature = "gdal")]
pub use raster::{read_raster, write_raster};
#[cfg(feature = "gdal")]
pub use vector::read_zones;

use crate::types::{NtlError, NtlResult};
use std::path::Path;

/// Write `path` through a temporary file in the same directory.
///
/// `write` receives the temporary path; the file only appears under its
/// final name once `write` succeeded, so readers never see a partial file.
pub fn write_atomic<P, F>(path: P, write: F) -> NtlResult<()>
where
    P: AsRef<Path>,
    F: FnOnce(&Path) -> NtlResult<()>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut builder = tempfile::Builder::new();
    builder.prefix(".ntl-");
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    builder.suffix(&suffix);
    let tmp = builder.tempfile_in(dir)?;

    write(tmp.path())?;
    tmp.persist(path).map_err(|e| NtlError::Io(e.error))?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dataout/HTI/out.txt");
        write_atomic(&target, |tmp| Ok(std::fs::write(tmp, "ok")?)).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "ok");
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        let result = write_atomic(&target, |_| {
            Err(NtlError::Processing("interrupted".to_string()))
        });
        assert!(result.is_err());
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        std::fs::write(&target, "old").unwrap();
        write_atomic(&target, |tmp| Ok(std::fs::write(tmp, "new")?)).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }
}
