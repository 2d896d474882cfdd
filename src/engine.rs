//! The interface the driver needs from a deconvolution engine.
//!
//! The engine is a black box: given a uv-data selection, an image name, a
//! mask and an iteration budget it updates the on-disk (or in-memory) image
//! products. By convention a call with `niter = 0` performs no minor cycles
//! and just makes the dirty image and psf. The driver never looks inside the
//! minor loop; it only reads back the residual and the mask plane between
//! calls.

use std::path::PathBuf;

use ndarray::{Array2, ArrayView2};

use crate::{coords::CoordSys, error::AutocleanError};

/// Spectral mode of an imaging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// A single multi-frequency-synthesis image
    Mfs,
    /// One image per frequency channel
    #[default]
    Channel,
}

impl std::str::FromStr for ImageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mfs" => Ok(ImageMode::Mfs),
            "channel" => Ok(ImageMode::Channel),
            _ => Err(format!("unknown image mode {s:?}, expected mfs or channel")),
        }
    }
}

impl std::fmt::Display for ImageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ImageMode::Mfs => "mfs",
            ImageMode::Channel => "channel",
        })
    }
}

/// One invocation of the deconvolution engine.
#[derive(Debug, Clone)]
pub struct CleanCall {
    /// Path of the input visibilities
    pub vis: String,
    /// Base name of the image products to create or update
    pub imagename: String,
    /// Field selection passed through to the engine
    pub field: String,
    /// Spectral window selection passed through to the engine
    pub spw: String,
    /// Spectral mode
    pub mode: ImageMode,
    /// Number of channels to image in this call
    pub nchan: usize,
    /// First channel of the selection
    pub start: usize,
    /// Channels averaged per image channel
    pub width: usize,
    /// Minor-cycle iteration budget; 0 means "make the dirty image"
    pub niter: usize,
    /// Path of the mask image to clean within, if any
    pub mask: Option<PathBuf>,
    /// Loop gain
    pub gain: f32,
    /// Flux level at which the engine stops its minor loop
    pub threshold: f32,
    /// Primary beam gain floor
    pub minpb: f32,
    /// Whether the engine may open an interactive viewer this call
    pub interactive: bool,
}

/// A blocking deconvolution/imaging backend.
///
/// Every call is synchronous; an error from any method is fatal for the
/// channel being processed, never retried.
pub trait CleanEngine {
    /// Run one bounded set of minor cycles (or make the dirty image when
    /// `call.niter == 0`), replacing the model/image/residual/psf products of
    /// `call.imagename`.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::Engine`] if the solver fails.
    fn run_clean(&mut self, call: &CleanCall) -> Result<(), AutocleanError>;

    /// Read the current residual plane of an image.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if no such image has been made.
    fn read_residual(&mut self, imagename: &str) -> Result<Array2<f32>, AutocleanError>;

    /// Read the current mask plane of an image. A freshly made image has an
    /// all-false mask unless the engine seeded it from user input.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if no such image has been made.
    fn read_mask(&mut self, imagename: &str) -> Result<Array2<bool>, AutocleanError>;

    /// Replace the mask plane of an image.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if no such image has been made,
    /// [`crate::error::BadArrayShape`] if the mask shape does not match.
    fn write_mask(&mut self, imagename: &str, mask: ArrayView2<bool>)
        -> Result<(), AutocleanError>;

    /// The world coordinate transform of an image.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if no such image has been made.
    fn coord_sys(&mut self, imagename: &str) -> Result<CoordSys, AutocleanError>;

    /// Concatenate per-channel products into cube products under `out` and
    /// delete the per-channel temporaries.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if a channel product is missing.
    fn concat_channels(&mut self, channels: &[String], out: &str) -> Result<(), AutocleanError>;

    /// Divide the final image and residual by the primary beam response,
    /// where that response is at least `minpb`.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if no such image has been made.
    fn apply_pbcor(&mut self, imagename: &str, minpb: f32) -> Result<(), AutocleanError>;
}

/// Names of the per-channel product files of one image.
///
/// In cube mode every channel gets its own set
/// (`<imagename>.channel.<n>.residual` and so on), concatenated into plain
/// `<imagename>.*` cube products at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelImageSet {
    imagename: String,
    chan: Option<usize>,
}

impl ChannelImageSet {
    /// Product names for a single (non-cube) image.
    pub fn single(imagename: &str) -> Self {
        Self {
            imagename: imagename.to_string(),
            chan: None,
        }
    }

    /// Product names for one channel of a cube.
    pub fn cube(imagename: &str, chan: usize) -> Self {
        Self {
            imagename: imagename.to_string(),
            chan: Some(chan),
        }
    }

    /// The channel index, if this is one channel of a cube.
    pub fn chan(&self) -> Option<usize> {
        self.chan
    }

    /// The base name all products of this channel share.
    pub fn base(&self) -> String {
        match self.chan {
            Some(chan) => format!("{}.channel.{}", self.imagename, chan),
            None => self.imagename.clone(),
        }
    }

    /// The model image name.
    pub fn model(&self) -> String {
        format!("{}.model", self.base())
    }

    /// The restored image name.
    pub fn image(&self) -> String {
        format!("{}.image", self.base())
    }

    /// The residual image name.
    pub fn residual(&self) -> String {
        format!("{}.residual", self.base())
    }

    /// The point spread function image name.
    pub fn psf(&self) -> String {
        format!("{}.psf", self.base())
    }

    /// The clean mask image name.
    pub fn mask(&self) -> String {
        format!("{}.mask", self.base())
    }

    /// The path of this channel's persisted region file.
    pub fn region_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.rgn", self.base()))
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelImageSet;
    use std::path::PathBuf;

    #[test]
    fn test_single_image_names() {
        let names = ChannelImageSet::single("out/m87");
        assert_eq!(names.base(), "out/m87");
        assert_eq!(names.residual(), "out/m87.residual");
        assert_eq!(names.mask(), "out/m87.mask");
        assert_eq!(names.region_path(), PathBuf::from("out/m87.rgn"));
    }

    #[test]
    fn test_cube_channel_names() {
        let names = ChannelImageSet::cube("out/m87", 3);
        assert_eq!(names.base(), "out/m87.channel.3");
        assert_eq!(names.model(), "out/m87.channel.3.model");
        assert_eq!(names.region_path(), PathBuf::from("out/m87.channel.3.rgn"));
        assert_eq!(names.chan(), Some(3));
    }
}
