//! Linear world coordinate transforms for image planes.
//!
//! The real coordinate machinery lives in the imaging backend; the driver only
//! needs enough of a transform to serialize clean regions in world
//! coordinates and read them back. A linear (reference pixel, reference value,
//! increment) transform covers that, and round-trips exactly for pixel
//! centres.

use serde::{Deserialize, Serialize};

/// A linear pixel <-> world transform for a 2-D image plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordSys {
    /// The reference pixel (x, y)
    pub ref_pixel: [f64; 2],
    /// The world coordinate at the reference pixel
    pub ref_world: [f64; 2],
    /// World units per pixel along each axis
    pub increment: [f64; 2],
}

impl Default for CoordSys {
    fn default() -> Self {
        Self {
            ref_pixel: [0.0, 0.0],
            ref_world: [0.0, 0.0],
            increment: [1.0, 1.0],
        }
    }
}

impl CoordSys {
    /// Convert a pixel coordinate to a world coordinate.
    pub fn pixel_to_world(&self, pixel: [f64; 2]) -> [f64; 2] {
        [
            self.ref_world[0] + (pixel[0] - self.ref_pixel[0]) * self.increment[0],
            self.ref_world[1] + (pixel[1] - self.ref_pixel[1]) * self.increment[1],
        ]
    }

    /// Convert a world coordinate back to a (fractional) pixel coordinate.
    pub fn world_to_pixel(&self, world: [f64; 2]) -> [f64; 2] {
        [
            self.ref_pixel[0] + (world[0] - self.ref_world[0]) / self.increment[0],
            self.ref_pixel[1] + (world[1] - self.ref_world[1]) / self.increment[1],
        ]
    }

    /// The world-unit length of one pixel along the x axis, used to scale
    /// circular region radii.
    pub fn pixel_scale(&self) -> f64 {
        self.increment[0].abs()
    }
}
