#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Autoclean iteratively deconvolves radio interferometric images by growing
//! a clean mask from islands of bright residual emission, so that faint
//! structure can be cleaned without ever cleaning noise.
//!
//! Each channel of the input cube is processed independently: the residual
//! plane is measured, islands above a noise-derived threshold are flood
//! filled and painted into the mask, and the masked image is handed to a
//! deconvolution engine for a bounded batch of minor cycles. The loop repeats
//! until the residual converges, stops improving, or the iteration budget
//! runs out. Painted regions are persisted to a region file per channel and
//! unioned across cycles, so a run can be resumed or inspected afterwards.
//!
//! # Examples
//!
//! Here's an example of how to clean a single dirty plane with the in-memory
//! simulated engine:
//!
//! ```rust
//! use autoclean::{clean_cube, CleanParamsBuilder, CoordSys, SimulatedEngine};
//! use ndarray::Array2;
//! use tempfile::tempdir;
//!
//! // a dirty plane with a single bright source
//! let mut dirty = Array2::<f32>::zeros((16, 16));
//! dirty[[8, 8]] = 10.0;
//!
//! // define a temporary directory for output files
//! let tmp_dir = tempdir().unwrap();
//! let imagename = tmp_dir.path().join("demo").to_str().unwrap().to_string();
//!
//! let mut engine = SimulatedEngine::new(vec![dirty], CoordSys::default());
//!
//! let params = CleanParamsBuilder::default()
//!     .imagename(imagename)
//!     .clean_threshold(0.5)
//!     .nrms(0.0)
//!     .draw_progress(false)
//!     .build()
//!     .unwrap();
//!
//! let outcome = clean_cube(&mut engine, &params).unwrap();
//! assert!(outcome.all_ok());
//! ```
//!
//! # Details
//!
//! The driver only ever talks to a [`CleanEngine`]; the bundled
//! [`SimulatedEngine`] deconvolves pickled dirty cubes in memory with a
//! delta-function beam, which is enough to exercise the full masking loop.

pub mod controller;
pub mod coords;
pub mod engine;
pub mod error;
pub mod island;
pub mod mask;
pub mod region;
pub mod sim;
pub mod stats;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
pub(crate) mod test_common;

pub use controller::{
    clean_channel, clean_cube, ChannelOutcome, CleanParams, CleanParamsBuilder, ConvergenceState,
    CubeOutcome, StopReason,
};
pub use coords::CoordSys;
pub use engine::{ChannelImageSet, CleanCall, CleanEngine, ImageMode};
pub use error::AutocleanError;
pub use island::{BoundingBox, Island};
pub use mask::MaskShape;
pub use region::{RegionSet, RegionStore, WorldRegion};
pub use sim::SimulatedEngine;
pub use stats::Thresholds;
