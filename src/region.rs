//! Persisted clean-region records.
//!
//! Every box or circle painted into a channel's clean mask is also recorded in
//! world coordinates and accumulated in a region file next to the image
//! products (`<imagename>.rgn`, or `<imagename>.channel.<n>.rgn` in cube
//! mode). The file is the clean-region history for the channel: it is only
//! ever grown by union, never subtracted from, and a file that exists but
//! cannot be read back is a fatal error rather than an empty history.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::AutocleanError;

/// A single clean region in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldRegion {
    /// An axis-aligned box from bottom-left to top-right corner
    Box {
        /// Bottom-left corner (world coordinates)
        blc: [f64; 2],
        /// Top-right corner (world coordinates)
        trc: [f64; 2],
    },
    /// A circle
    Circle {
        /// Centre (world coordinates)
        centre: [f64; 2],
        /// Radius (world units)
        radius: f64,
    },
}

/// The accumulated union of every region painted for a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionSet {
    regions: Vec<WorldRegion>,
}

impl RegionSet {
    /// Union a region into the set. Unioning a region that is already present
    /// is a no-op, so the union is idempotent.
    pub fn union_with(&mut self, region: WorldRegion) -> bool {
        if self.regions.contains(&region) {
            return false;
        }
        self.regions.push(region);
        true
    }

    /// Union every region of `other` into this set.
    pub fn merge(&mut self, other: &RegionSet) {
        for region in &other.regions {
            self.union_with(region.clone());
        }
    }

    /// The number of distinct regions in the set.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the set contains no regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterate over the regions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WorldRegion> {
        self.regions.iter()
    }
}

/// A region file on disk with a read-union-rewrite contract.
///
/// The store is exclusively owned by one channel's processing loop; the
/// read-union-rewrite cycle is not safe for concurrent writers.
#[derive(Debug, Clone)]
pub struct RegionStore {
    path: PathBuf,
}

impl RegionStore {
    /// A store backed by the given path. The file need not exist yet.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted region set. A missing file is an empty history; a
    /// file that exists but cannot be parsed is a fatal
    /// [`AutocleanError::RegionFile`].
    ///
    /// # Errors
    ///
    /// - [`AutocleanError::RegionFile`] if the file exists but is corrupt.
    /// - [`AutocleanError::IO`] for any other read failure.
    pub fn load(&self) -> Result<RegionSet, AutocleanError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!("no region file at {}, starting empty", self.path.display());
                return Ok(RegionSet::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_pickle::from_slice(&bytes, serde_pickle::DeOptions::new()).map_err(|e| {
            AutocleanError::RegionFile {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Overwrite the file with the given region set.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::Pickle`] or [`AutocleanError::IO`] if serialization
    /// or the write fails.
    pub fn save(&self, regions: &RegionSet) -> Result<(), AutocleanError> {
        let bytes = serde_pickle::to_vec(regions, serde_pickle::SerOptions::new())?;
        fs::write(&self.path, bytes)?;
        trace!(
            "wrote {} regions to {}",
            regions.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Union `regions` with whatever is already persisted and rewrite the
    /// file, returning the combined set.
    ///
    /// # Errors
    ///
    /// Propagates [`RegionStore::load`] and [`RegionStore::save`] failures.
    pub fn union_into(&self, regions: &RegionSet) -> Result<RegionSet, AutocleanError> {
        let mut combined = self.load()?;
        combined.merge(regions);
        self.save(&combined)?;
        Ok(combined)
    }

    /// Union the region files of every channel into a single cube region
    /// file. Missing channel files are skipped (a channel that never painted
    /// a box or circle has no file).
    ///
    /// # Errors
    ///
    /// Propagates load and save failures, including corrupt channel files.
    pub fn concat<P: AsRef<Path>>(parts: &[P], out: &Path) -> Result<RegionSet, AutocleanError> {
        let mut combined = RegionSet::default();
        for part in parts {
            let store = RegionStore::new(part.as_ref());
            combined.merge(&store.load()?);
        }
        RegionStore::new(out).save(&combined)?;
        Ok(combined)
    }
}
