//! Painting accepted islands into the clean mask.
//!
//! An island becomes mask geometry in one of three ways: its exact pixel
//! footprint (for large irregular sources), a circle, or a stretched bounding
//! box. Boxes and circles are additionally recorded in world coordinates in
//! the channel's [`RegionSet`](crate::region::RegionSet); exact footprints
//! live only in the mask plane itself.

use std::str::FromStr;

use log::debug;
use ndarray::Array2;

use crate::{
    coords::CoordSys,
    island::Island,
    region::{RegionSet, WorldRegion},
};

/// The geometry used to abstract an island into clean-mask shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskShape {
    /// Bounding box, stretched by `boxstretch`
    Box,
    /// Circle circumscribing the bounding box
    Circle,
    /// Box when the bounding box is clearly elongated, circle otherwise
    Auto,
    /// Exact pixel footprint for islands at least `irregsize` across;
    /// smaller islands fall back to [`MaskShape::Auto`]
    ExactFootprint,
}

impl FromStr for MaskShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "box" => Ok(MaskShape::Box),
            "circle" => Ok(MaskShape::Circle),
            "auto" => Ok(MaskShape::Auto),
            "exact" => Ok(MaskShape::ExactFootprint),
            _ => Err(format!(
                "unknown mask shape {s:?}, expected box, circle, auto or exact"
            )),
        }
    }
}

impl std::fmt::Display for MaskShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MaskShape::Box => "box",
            MaskShape::Circle => "circle",
            MaskShape::Auto => "auto",
            MaskShape::ExactFootprint => "exact",
        })
    }
}

/// How islands are turned into mask geometry.
#[derive(Debug, Clone, Copy)]
pub struct PaintOpts {
    /// The shape policy
    pub shape: MaskShape,
    /// Pixels to stretch a box by on every side (may be negative)
    pub boxstretch: i64,
    /// Minimum bounding-box extent for an exact footprint
    pub irregsize: usize,
}

/// Paint one island into the mask plane, and for box/circle geometry also
/// union the equivalent world-coordinate region into `regions`.
pub fn paint(
    mask: &mut Array2<bool>,
    regions: &mut RegionSet,
    coords: &CoordSys,
    island: &Island,
    opts: &PaintOpts,
) {
    let bbox = island.bbox;
    let (width, height) = (bbox.width(), bbox.height());

    if opts.shape == MaskShape::ExactFootprint && width.min(height) >= opts.irregsize {
        // the footprint is implicit in the mask plane alone; no region-file
        // entry is written for it
        debug!(
            "painting exact footprint of {} pixels at ({}, {})",
            island.pixels.len(),
            island.peak_pos.0,
            island.peak_pos.1
        );
        for &(x, y) in &island.pixels {
            mask[[x, y]] = true;
        }
        return;
    }

    let shape = match opts.shape {
        MaskShape::Box => MaskShape::Box,
        MaskShape::Circle => MaskShape::Circle,
        // measured from the bounding box, elongated islands get a box
        MaskShape::Auto | MaskShape::ExactFootprint => {
            if width.abs_diff(height) > 1 {
                MaskShape::Box
            } else {
                MaskShape::Circle
            }
        }
    };

    match shape {
        MaskShape::Circle => paint_circle(mask, regions, coords, island, opts.boxstretch),
        _ => paint_box(mask, regions, coords, island, opts.boxstretch),
    }
}

fn paint_circle(
    mask: &mut Array2<bool>,
    regions: &mut RegionSet,
    coords: &CoordSys,
    island: &Island,
    boxstretch: i64,
) {
    let bbox = island.bbox;
    let centre_x = (bbox.x_min + bbox.x_max) as f64 / 2.0;
    let centre_y = (bbox.y_min + bbox.y_max) as f64 / 2.0;
    let diagonal = ((bbox.width().pow(2) + bbox.height().pow(2)) as f64).sqrt();
    let radius = (diagonal / 2.0 + boxstretch as f64).max(1.0);
    debug!(
        "painting circle at ({:.1}, {:.1}) radius {:.1}",
        centre_x, centre_y, radius
    );

    let (n_x, n_y) = mask.dim();
    let x_lo = ((centre_x - radius).floor().max(0.0)) as usize;
    let y_lo = ((centre_y - radius).floor().max(0.0)) as usize;
    let x_hi = ((centre_x + radius).ceil() as usize).min(n_x - 1);
    let y_hi = ((centre_y + radius).ceil() as usize).min(n_y - 1);
    for x in x_lo..=x_hi {
        for y in y_lo..=y_hi {
            let dx = x as f64 - centre_x;
            let dy = y as f64 - centre_y;
            if dx * dx + dy * dy <= radius * radius {
                mask[[x, y]] = true;
            }
        }
    }

    regions.union_with(WorldRegion::Circle {
        centre: coords.pixel_to_world([centre_x, centre_y]),
        radius: radius * coords.pixel_scale(),
    });
}

fn paint_box(
    mask: &mut Array2<bool>,
    regions: &mut RegionSet,
    coords: &CoordSys,
    island: &Island,
    boxstretch: i64,
) {
    let bbox = island.bbox;
    let mut x_lo = bbox.x_min as i64 - boxstretch;
    let mut x_hi = bbox.x_max as i64 + boxstretch;
    let mut y_lo = bbox.y_min as i64 - boxstretch;
    let mut y_hi = bbox.y_max as i64 + boxstretch;
    // a negative stretch can invert a 1-pixel axis; re-contract that axis only
    if x_lo > x_hi {
        x_lo += boxstretch;
        x_hi -= boxstretch;
    }
    if y_lo > y_hi {
        y_lo += boxstretch;
        y_hi -= boxstretch;
    }

    let (n_x, n_y) = mask.dim();
    let x_lo = x_lo.max(0) as usize;
    let y_lo = y_lo.max(0) as usize;
    let x_hi = (x_hi.max(0) as usize).min(n_x - 1);
    let y_hi = (y_hi.max(0) as usize).min(n_y - 1);
    debug!(
        "painting box ({}, {}) to ({}, {})",
        x_lo, y_lo, x_hi, y_hi
    );
    for x in x_lo..=x_hi {
        for y in y_lo..=y_hi {
            mask[[x, y]] = true;
        }
    }

    regions.union_with(WorldRegion::Box {
        blc: coords.pixel_to_world([x_lo as f64, y_lo as f64]),
        trc: coords.pixel_to_world([x_hi as f64, y_hi as f64]),
    });
}

#[cfg(test)]
mod tests {
    use super::{paint, MaskShape, PaintOpts};
    use crate::{
        coords::CoordSys,
        island::{BoundingBox, Island},
        region::{RegionSet, WorldRegion},
    };
    use ndarray::Array2;

    fn island(bbox: BoundingBox, pixels: Vec<(usize, usize)>) -> Island {
        let peak_pos = pixels[0];
        Island {
            bbox,
            peak: 10.0,
            peak_pos,
            pixels,
            already_masked: false,
        }
    }

    fn blob_island() -> Island {
        // 3 wide x 1 high (in extent: width 2, height 0)
        island(
            BoundingBox {
                x_min: 4,
                y_min: 6,
                x_max: 6,
                y_max: 6,
            },
            vec![(4, 6), (5, 6), (6, 6)],
        )
    }

    fn paint_opts(shape: MaskShape, boxstretch: i64) -> PaintOpts {
        PaintOpts {
            shape,
            boxstretch,
            irregsize: 100,
        }
    }

    #[test]
    fn test_box_paints_stretched_bounding_box() {
        let mut mask = Array2::<bool>::default((16, 16));
        let mut regions = RegionSet::default();
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &blob_island(),
            &paint_opts(MaskShape::Box, 1),
        );
        // (3..=7) x (5..=7)
        assert_eq!(mask.iter().filter(|&&m| m).count(), 15);
        assert!(mask[[3, 5]] && mask[[7, 7]]);
        assert!(!mask[[2, 6]]);
        assert_eq!(regions.len(), 1);
        assert_eq!(
            regions.iter().next().unwrap(),
            &WorldRegion::Box {
                blc: [3.0, 5.0],
                trc: [7.0, 7.0],
            }
        );
    }

    #[test]
    fn test_box_clips_at_plane_edge() {
        let mut mask = Array2::<bool>::default((8, 8));
        let mut regions = RegionSet::default();
        let near_edge = island(
            BoundingBox {
                x_min: 0,
                y_min: 6,
                x_max: 1,
                y_max: 7,
            },
            vec![(0, 6), (0, 7), (1, 6), (1, 7)],
        );
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &near_edge,
            &paint_opts(MaskShape::Box, 2),
        );
        // clipped to (0..=3) x (4..=7)
        assert_eq!(mask.iter().filter(|&&m| m).count(), 16);
    }

    #[test]
    fn test_negative_stretch_recontracts_single_pixel_axis() {
        let mut mask = Array2::<bool>::default((16, 16));
        let mut regions = RegionSet::default();
        // 1 pixel wide in x, 5 pixels in y
        let sliver = island(
            BoundingBox {
                x_min: 8,
                y_min: 2,
                x_max: 8,
                y_max: 6,
            },
            vec![(8, 2), (8, 3), (8, 4), (8, 5), (8, 6)],
        );
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &sliver,
            &paint_opts(MaskShape::Box, -1),
        );
        // x re-contracted to 8..=8, y shrunk to 3..=5
        assert_eq!(mask.iter().filter(|&&m| m).count(), 3);
        assert!(mask[[8, 3]] && mask[[8, 4]] && mask[[8, 5]]);
    }

    #[test]
    fn test_circle_covers_bounding_box_diagonal() {
        let mut mask = Array2::<bool>::default((32, 32));
        let mut regions = RegionSet::default();
        let square = island(
            BoundingBox {
                x_min: 10,
                y_min: 10,
                x_max: 14,
                y_max: 14,
            },
            vec![(10, 10), (14, 14)],
        );
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &square,
            &paint_opts(MaskShape::Circle, 0),
        );
        // every bounding box corner is inside the circumscribing circle
        assert!(mask[[10, 10]] && mask[[14, 14]] && mask[[10, 14]] && mask[[14, 10]]);
        assert!(matches!(
            regions.iter().next().unwrap(),
            WorldRegion::Circle { centre, .. } if *centre == [12.0, 12.0]
        ));
    }

    #[test]
    fn test_circle_radius_floor_is_one_pixel() {
        let mut mask = Array2::<bool>::default((8, 8));
        let mut regions = RegionSet::default();
        let dot = island(
            BoundingBox {
                x_min: 4,
                y_min: 4,
                x_max: 4,
                y_max: 4,
            },
            vec![(4, 4)],
        );
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &dot,
            &paint_opts(MaskShape::Circle, 0),
        );
        // radius 1: centre plus 4-neighbours
        assert_eq!(mask.iter().filter(|&&m| m).count(), 5);
    }

    #[test]
    fn test_auto_picks_box_only_when_elongated() {
        let mut mask = Array2::<bool>::default((16, 16));
        let mut regions = RegionSet::default();
        // width 2, height 0: |w - h| = 2 > 1, a box
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &blob_island(),
            &paint_opts(MaskShape::Auto, 0),
        );
        assert!(matches!(
            regions.iter().next().unwrap(),
            WorldRegion::Box { .. }
        ));

        let mut regions = RegionSet::default();
        let square = island(
            BoundingBox {
                x_min: 2,
                y_min: 2,
                x_max: 4,
                y_max: 4,
            },
            vec![(3, 3)],
        );
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &square,
            &paint_opts(MaskShape::Auto, 0),
        );
        assert!(matches!(
            regions.iter().next().unwrap(),
            WorldRegion::Circle { .. }
        ));
    }

    #[test]
    fn test_exact_footprint_skips_region_file() {
        let mut mask = Array2::<bool>::default((16, 16));
        let mut regions = RegionSet::default();
        let pixels: Vec<_> = (2..=6).flat_map(|x| (3..=8).map(move |y| (x, y))).collect();
        let big = island(
            BoundingBox {
                x_min: 2,
                y_min: 3,
                x_max: 6,
                y_max: 8,
            },
            pixels.clone(),
        );
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &big,
            &PaintOpts {
                shape: MaskShape::ExactFootprint,
                boxstretch: 1,
                irregsize: 4,
            },
        );
        // exactly the pixel set, no stretch, and no region entry
        assert_eq!(mask.iter().filter(|&&m| m).count(), pixels.len());
        assert!(regions.is_empty());
    }

    #[test]
    fn test_small_island_falls_back_from_exact_to_auto() {
        let mut mask = Array2::<bool>::default((16, 16));
        let mut regions = RegionSet::default();
        paint(
            &mut mask,
            &mut regions,
            &CoordSys::default(),
            &blob_island(),
            &PaintOpts {
                shape: MaskShape::ExactFootprint,
                boxstretch: 0,
                irregsize: 100,
            },
        );
        // too small for a footprint, so it was abstracted and recorded
        assert_eq!(regions.len(), 1);
    }
}
