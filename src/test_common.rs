//! Shared fixtures for unit and integration tests.

use std::{
    fs,
    path::{Path, PathBuf},
};

use ndarray::Array2;

use crate::controller::CleanParamsBuilder;

/// A 16x16 plane with a single bright source on a noiseless background.
///
/// The source is a 2x2 blob peaking at 10.0, so its island is compact and
/// near-square. Everything else is exactly zero.
pub fn one_source_plane() -> Array2<f32> {
    let mut plane = Array2::<f32>::zeros((16, 16));
    plane[[8, 8]] = 10.0;
    plane[[8, 9]] = 8.0;
    plane[[9, 8]] = 8.0;
    plane[[9, 9]] = 6.0;
    plane
}

/// Pickle an `nchan`-channel dirty cube of [`one_source_plane`]s into `dir`
/// and return its path.
pub fn write_dirty_cube(dir: &Path, nchan: usize) -> PathBuf {
    let dirty_cube: Vec<Array2<f32>> = (0..nchan).map(|_| one_source_plane()).collect();
    let bytes = serde_pickle::to_vec(&dirty_cube, serde_pickle::SerOptions::new())
        .expect("a dirty cube always pickles");
    let path = dir.join("dirty.pkl");
    fs::write(&path, bytes).expect("failed to write dirty cube");
    path
}

/// A parameter builder whose image products land under `dir`.
pub fn params_in(dir: &Path) -> CleanParamsBuilder {
    let mut builder = CleanParamsBuilder::default();
    builder
        .vis("sim.ms".into())
        .imagename(dir.join("sim").to_str().unwrap().into())
        .draw_progress(false);
    builder
}
