//! An in-memory deconvolution engine for tests, benchmarks and the CLI.
//!
//! [`SimulatedEngine`] holds a dirty image cube and implements
//! [`CleanEngine`] with a Hogbom-style minor loop and a delta-function psf:
//! each iteration finds the strongest residual inside the mask and moves
//! `gain` of it into the model. That is nowhere near a real imaging backend,
//! but it exercises every part of the driver loop with realistic
//! convergence behaviour.

use std::{collections::BTreeMap, fs, path::Path};

use log::trace;
use ndarray::{Array2, ArrayView2};

use crate::{
    coords::CoordSys,
    engine::{CleanCall, CleanEngine},
    error::{AutocleanError, BadArrayShape},
};

/// The in-memory products of one image name.
#[derive(Debug, Clone)]
struct SimImage {
    residual: Array2<f32>,
    model: Array2<f32>,
    mask: Array2<bool>,
    coords: CoordSys,
}

/// An in-memory [`CleanEngine`] over a dirty image cube.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    dirty_cube: Vec<Array2<f32>>,
    coords: CoordSys,
    images: BTreeMap<String, SimImage>,
    cubes: BTreeMap<String, Vec<Array2<f32>>>,
    seed_masks: BTreeMap<usize, Array2<bool>>,
    primary_beam: Option<Array2<f32>>,
    pbcor_applied: Vec<String>,
    calls: Vec<CleanCall>,
}

impl SimulatedEngine {
    /// An engine over the given dirty planes, one per channel.
    pub fn new(dirty_cube: Vec<Array2<f32>>, coords: CoordSys) -> Self {
        Self {
            dirty_cube,
            coords,
            images: BTreeMap::new(),
            cubes: BTreeMap::new(),
            seed_masks: BTreeMap::new(),
            primary_beam: None,
            pbcor_applied: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Load a pickled dirty cube (a list of 2-D `f32` planes) from disk.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::IO`] if the file cannot be read,
    /// [`AutocleanError::Pickle`] if it is not a pickled cube.
    pub fn from_pickle(path: &Path, coords: CoordSys) -> Result<Self, AutocleanError> {
        let bytes = fs::read(path)?;
        let dirty_cube: Vec<Array2<f32>> =
            serde_pickle::from_slice(&bytes, serde_pickle::DeOptions::new())?;
        Ok(Self::new(dirty_cube, coords))
    }

    /// The number of channels in the dirty cube.
    pub fn num_channels(&self) -> usize {
        self.dirty_cube.len()
    }

    /// Pre-rasterize a user mask for a channel; it seeds the mask plane when
    /// that channel's dirty image is made.
    pub fn seed_mask(&mut self, chan: usize, mask: Array2<bool>) {
        self.seed_masks.insert(chan, mask);
    }

    /// Use a primary beam response for [`CleanEngine::apply_pbcor`].
    pub fn set_primary_beam(&mut self, primary_beam: Array2<f32>) {
        self.primary_beam = Some(primary_beam);
    }

    /// The image names primary beam correction has been applied to.
    pub fn pbcor_applied(&self) -> &[String] {
        &self.pbcor_applied
    }

    /// Every [`CleanCall`] made against this engine, in order.
    pub fn calls(&self) -> &[CleanCall] {
        &self.calls
    }

    /// The model plane of an image.
    ///
    /// # Errors
    ///
    /// [`AutocleanError::UnknownImage`] if no such image has been made.
    pub fn model(&self, imagename: &str) -> Result<&Array2<f32>, AutocleanError> {
        self.images
            .get(imagename)
            .map(|image| &image.model)
            .ok_or_else(|| AutocleanError::UnknownImage {
                imagename: imagename.to_string(),
            })
    }

    /// The concatenated residual cube written by
    /// [`CleanEngine::concat_channels`], if any.
    pub fn cube(&self, imagename: &str) -> Option<&[Array2<f32>]> {
        self.cubes.get(imagename).map(Vec::as_slice)
    }

    fn image_mut(&mut self, imagename: &str) -> Result<&mut SimImage, AutocleanError> {
        self.images
            .get_mut(imagename)
            .ok_or_else(|| AutocleanError::UnknownImage {
                imagename: imagename.to_string(),
            })
    }

    fn make_dirty(&mut self, call: &CleanCall) -> Result<(), AutocleanError> {
        let chan = call.start;
        let dirty = self
            .dirty_cube
            .get(chan)
            .ok_or_else(|| AutocleanError::Engine {
                imagename: call.imagename.clone(),
                reason: format!(
                    "channel {} out of range, cube has {} channels",
                    chan,
                    self.dirty_cube.len()
                ),
            })?
            .clone();
        let mask = self
            .seed_masks
            .get(&chan)
            .cloned()
            .unwrap_or_else(|| Array2::default(dirty.dim()));
        self.images.insert(
            call.imagename.clone(),
            SimImage {
                model: Array2::zeros(dirty.dim()),
                mask,
                coords: self.coords,
                residual: dirty,
            },
        );
        Ok(())
    }

    /// Hogbom minor loop with a delta-function psf, restricted to the mask.
    fn minor_cycles(image: &mut SimImage, call: &CleanCall) {
        for iteration in 0..call.niter {
            let mut peak: Option<((usize, usize), f32)> = None;
            for ((x, y), &masked) in image.mask.indexed_iter() {
                if !masked {
                    continue;
                }
                let value = image.residual[[x, y]];
                match peak {
                    Some((_, best)) if value.abs() <= best.abs() => {}
                    _ => peak = Some(((x, y), value)),
                }
            }
            let ((x, y), value) = match peak {
                Some(found) => found,
                // an empty mask means there is nothing the engine may touch
                None => break,
            };
            if value.abs() <= call.threshold {
                trace!(
                    "minor loop hit threshold {:.4e} after {} iterations",
                    call.threshold,
                    iteration
                );
                break;
            }
            let flux = call.gain * value;
            image.residual[[x, y]] -= flux;
            image.model[[x, y]] += flux;
        }
    }
}

impl CleanEngine for SimulatedEngine {
    fn run_clean(&mut self, call: &CleanCall) -> Result<(), AutocleanError> {
        self.calls.push(call.clone());
        if call.niter == 0 || !self.images.contains_key(&call.imagename) {
            self.make_dirty(call)?;
        }
        if call.niter > 0 {
            let image = self.image_mut(&call.imagename)?;
            Self::minor_cycles(image, call);
        }
        Ok(())
    }

    fn read_residual(&mut self, imagename: &str) -> Result<Array2<f32>, AutocleanError> {
        Ok(self.image_mut(imagename)?.residual.clone())
    }

    fn read_mask(&mut self, imagename: &str) -> Result<Array2<bool>, AutocleanError> {
        Ok(self.image_mut(imagename)?.mask.clone())
    }

    fn write_mask(
        &mut self,
        imagename: &str,
        mask: ArrayView2<bool>,
    ) -> Result<(), AutocleanError> {
        let image = self.image_mut(imagename)?;
        if mask.dim() != image.residual.dim() {
            return Err(BadArrayShape {
                argument: "mask".into(),
                function: "SimulatedEngine::write_mask".into(),
                expected: format!("{:?}", image.residual.dim()),
                received: format!("{:?}", mask.dim()),
            }
            .into());
        }
        image.mask.assign(&mask);
        Ok(())
    }

    fn coord_sys(&mut self, imagename: &str) -> Result<CoordSys, AutocleanError> {
        Ok(self.image_mut(imagename)?.coords)
    }

    fn concat_channels(&mut self, channels: &[String], out: &str) -> Result<(), AutocleanError> {
        let mut residuals = Vec::with_capacity(channels.len());
        for channel in channels {
            let image =
                self.images
                    .get(channel)
                    .ok_or_else(|| AutocleanError::UnknownImage {
                        imagename: channel.clone(),
                    })?;
            residuals.push(image.residual.clone());
        }
        // per-channel temporaries are deleted once the cube exists
        for channel in channels {
            self.images.remove(channel);
        }
        self.cubes.insert(out.to_string(), residuals);
        Ok(())
    }

    fn apply_pbcor(&mut self, imagename: &str, minpb: f32) -> Result<(), AutocleanError> {
        if let Some(primary_beam) = self.primary_beam.clone() {
            if let Some(planes) = self.cubes.get_mut(imagename) {
                for plane in planes.iter_mut() {
                    for (value, &response) in plane.iter_mut().zip(primary_beam.iter()) {
                        if response >= minpb {
                            *value /= response;
                        }
                    }
                }
            } else {
                let image = self.image_mut(imagename)?;
                for (value, &response) in image.residual.iter_mut().zip(primary_beam.iter()) {
                    if response >= minpb {
                        *value /= response;
                    }
                }
            }
        }
        self.pbcor_applied.push(imagename.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SimulatedEngine;
    use crate::{
        coords::CoordSys,
        engine::{CleanCall, CleanEngine, ImageMode},
    };
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn call(imagename: &str, niter: usize) -> CleanCall {
        CleanCall {
            vis: "sim.ms".into(),
            imagename: imagename.into(),
            field: String::new(),
            spw: String::new(),
            mode: ImageMode::Mfs,
            nchan: 1,
            start: 0,
            width: 1,
            niter,
            mask: None,
            gain: 0.5,
            threshold: 0.0,
            minpb: 0.1,
            interactive: false,
        }
    }

    fn one_source_engine() -> SimulatedEngine {
        let mut plane = Array2::<f32>::zeros((8, 8));
        plane[[3, 5]] = 4.0;
        SimulatedEngine::new(vec![plane], CoordSys::default())
    }

    #[test]
    fn test_niter_zero_makes_dirty_image() {
        let mut engine = one_source_engine();
        engine.run_clean(&call("img", 0)).unwrap();
        let residual = engine.read_residual("img").unwrap();
        assert_abs_diff_eq!(residual[[3, 5]], 4.0);
        assert!(engine.read_mask("img").unwrap().iter().all(|&m| !m));
    }

    #[test]
    fn test_minor_loop_respects_mask() {
        let mut engine = one_source_engine();
        engine.run_clean(&call("img", 0)).unwrap();

        // empty mask: the minor loop may not touch anything
        engine.run_clean(&call("img", 10)).unwrap();
        assert_abs_diff_eq!(engine.read_residual("img").unwrap()[[3, 5]], 4.0);

        let mut mask = Array2::<bool>::default((8, 8));
        mask[[3, 5]] = true;
        engine.write_mask("img", mask.view()).unwrap();
        engine.run_clean(&call("img", 2)).unwrap();
        // two iterations at gain 0.5: 4 -> 2 -> 1
        assert_abs_diff_eq!(engine.read_residual("img").unwrap()[[3, 5]], 1.0);
        assert_abs_diff_eq!(engine.model("img").unwrap()[[3, 5]], 3.0);
    }

    #[test]
    fn test_unknown_image_is_an_error() {
        let mut engine = one_source_engine();
        assert!(engine.read_residual("nope").is_err());
    }

    #[test]
    fn test_concat_drops_channel_temporaries() {
        let planes = vec![Array2::<f32>::zeros((4, 4)), Array2::<f32>::ones((4, 4))];
        let mut engine = SimulatedEngine::new(planes, CoordSys::default());
        let mut call_0 = call("img.channel.0", 0);
        call_0.start = 0;
        let mut call_1 = call("img.channel.1", 0);
        call_1.start = 1;
        engine.run_clean(&call_0).unwrap();
        engine.run_clean(&call_1).unwrap();

        engine
            .concat_channels(&["img.channel.0".into(), "img.channel.1".into()], "img")
            .unwrap();
        assert_eq!(engine.cube("img").unwrap().len(), 2);
        assert!(engine.read_residual("img.channel.0").is_err());
    }
}
