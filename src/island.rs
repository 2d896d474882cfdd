//! Island detection: flood-fill segmentation of bright residual emission.
//!
//! An island is a maximal connected set of pixels all exceeding the island
//! threshold, grown by flood fill from a local peak. Detection walks the
//! residual from the brightest remaining peak down, consuming candidate
//! pixels as it goes, until the peak budget is spent, the next peak drops
//! below the peak threshold, or no candidates remain.

use log::{debug, info};
use ndarray::{Array2, ArrayView2};

use crate::stats::Thresholds;

/// An isolated hot pixel is only believed when its peak clears this multiple
/// of the peak threshold.
const LONE_PIXEL_PEAK_FACTOR: f32 = 2.5;

/// Pixel-space bounding box of an island (inclusive corners).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Smallest x of any island pixel
    pub x_min: usize,
    /// Smallest y of any island pixel
    pub y_min: usize,
    /// Largest x of any island pixel
    pub x_max: usize,
    /// Largest y of any island pixel
    pub y_max: usize,
}

impl BoundingBox {
    /// Fit the smallest box around a non-empty pixel set.
    fn around(pixels: &[(usize, usize)]) -> Self {
        let mut bbox = BoundingBox {
            x_min: usize::MAX,
            y_min: usize::MAX,
            x_max: 0,
            y_max: 0,
        };
        for &(x, y) in pixels {
            bbox.x_min = bbox.x_min.min(x);
            bbox.y_min = bbox.y_min.min(y);
            bbox.x_max = bbox.x_max.max(x);
            bbox.y_max = bbox.y_max.max(y);
        }
        bbox
    }

    /// Extent along x. A single column has width 0.
    pub fn width(&self) -> usize {
        self.x_max - self.x_min
    }

    /// Extent along y. A single row has height 0.
    pub fn height(&self) -> usize {
        self.y_max - self.y_min
    }
}

/// One detected island. Transient: produced by [`detect`], consumed by the
/// mask painter within the same major cycle.
#[derive(Debug, Clone)]
pub struct Island {
    /// Bounding box of the island's pixel set
    pub bbox: BoundingBox,
    /// Value of the seed peak
    pub peak: f32,
    /// Position of the seed peak
    pub peak_pos: (usize, usize),
    /// Every pixel in the island, in flood-fill discovery order
    pub pixels: Vec<(usize, usize)>,
    /// Whether the seed already lies inside the cumulative clean mask
    pub already_masked: bool,
}

/// Tunables for one detection pass.
#[derive(Debug, Clone, Copy)]
pub struct IslandOpts {
    /// Maximum number of accepted islands per pass
    pub npeak: usize,
    /// Grow islands with 8-connectivity instead of 4-connectivity
    pub diag: bool,
}

/// The result of one detection pass over a residual plane.
#[derive(Debug, Clone, Default)]
pub struct IslandScan {
    /// Accepted islands, brightest seed first
    pub islands: Vec<Island>,
    /// Whether any pixel at all exceeded the island threshold
    pub any_candidates: bool,
}

impl IslandScan {
    /// The number of accepted islands not already inside the clean mask,
    /// i.e. the islands that will paint new mask geometry.
    pub fn fresh(&self) -> usize {
        self.islands.iter().filter(|i| !i.already_masked).count()
    }
}

/// Grow a maximal connected component from `seed`, consuming candidate flags.
///
/// Worklist flood fill: each candidate flag is cleared exactly once, when the
/// pixel is first discovered, so the candidate set shrinks monotonically and
/// no pixel can be claimed twice within one detection pass. `seed` must be a
/// candidate.
pub fn flood_fill(
    candidates: &mut Array2<bool>,
    seed: (usize, usize),
    diag: bool,
) -> Vec<(usize, usize)> {
    let (n_x, n_y) = candidates.dim();
    debug_assert!(candidates[[seed.0, seed.1]]);

    candidates[[seed.0, seed.1]] = false;
    let mut pixels = vec![seed];
    let mut worklist = vec![seed];

    while let Some((x, y)) = worklist.pop() {
        let x_lo = x.saturating_sub(1);
        let y_lo = y.saturating_sub(1);
        let x_hi = (x + 1).min(n_x - 1);
        let y_hi = (y + 1).min(n_y - 1);
        for nx in x_lo..=x_hi {
            for ny in y_lo..=y_hi {
                if !diag && nx != x && ny != y {
                    continue;
                }
                if candidates[[nx, ny]] {
                    candidates[[nx, ny]] = false;
                    pixels.push((nx, ny));
                    worklist.push((nx, ny));
                }
            }
        }
    }

    pixels
}

/// The brightest remaining candidate pixel, first in lexicographic (x, y)
/// scan order on ties.
fn brightest_candidate(
    residual: ArrayView2<f32>,
    candidates: &Array2<bool>,
) -> Option<((usize, usize), f32)> {
    let mut best: Option<((usize, usize), f32)> = None;
    for ((x, y), &flagged) in candidates.indexed_iter() {
        if !flagged {
            continue;
        }
        let value = residual[[x, y]];
        match best {
            // strict comparison keeps the first pixel on ties
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some(((x, y), value)),
        }
    }
    best
}

/// Find up to `npeak` islands of above-threshold emission in a residual
/// plane.
///
/// Pixels must strictly exceed the island threshold to become candidates, and
/// detection stops as soon as the brightest remaining candidate no longer
/// strictly exceeds the peak threshold. Single-row or
/// single-column islands are discarded as isolated hot pixels unless their
/// peak clears 2.5x the peak threshold; discarded islands do not count against
/// `npeak`. Islands whose seed is already inside `mask` are accepted (and do
/// count against `npeak`) but flagged as [`Island::already_masked`] so the
/// painter can skip them.
pub fn detect(
    residual: ArrayView2<f32>,
    mask: ArrayView2<bool>,
    thresholds: &Thresholds,
    opts: &IslandOpts,
) -> IslandScan {
    let mut candidates = Array2::from_shape_fn(residual.dim(), |(x, y)| {
        residual[[x, y]] > thresholds.island
    });
    let any_candidates = candidates.iter().any(|&c| c);

    let mut scan = IslandScan {
        islands: Vec::new(),
        any_candidates,
    };

    while scan.islands.len() < opts.npeak {
        let (seed, peak) = match brightest_candidate(residual, &candidates) {
            Some(found) => found,
            None => break,
        };
        if peak <= thresholds.peak {
            debug!(
                "next peak {:.4e} at ({}, {}) is below the peak threshold {:.4e}, stopping",
                peak, seed.0, seed.1, thresholds.peak
            );
            break;
        }

        let pixels = flood_fill(&mut candidates, seed, opts.diag);
        let bbox = BoundingBox::around(&pixels);

        // a single row or column is an isolated hot pixel unless it is very
        // bright
        if (bbox.width() == 0 || bbox.height() == 0)
            && peak < LONE_PIXEL_PEAK_FACTOR * thresholds.peak
        {
            debug!(
                "discarding degenerate island at ({}, {}), peak {:.4e}",
                seed.0, seed.1, peak
            );
            continue;
        }

        let already_masked = mask[[seed.0, seed.1]];
        if already_masked {
            info!(
                "island at ({}, {}) is already being cleaned, not painting",
                seed.0, seed.1
            );
        }
        scan.islands.push(Island {
            bbox,
            peak,
            peak_pos: seed,
            pixels,
            already_masked,
        });
    }

    scan
}

#[cfg(test)]
mod tests {
    use super::{detect, flood_fill, IslandOpts};
    use crate::stats::Thresholds;
    use ndarray::Array2;
    use std::collections::HashSet;

    fn thresholds(island: f32, peak: f32) -> Thresholds {
        Thresholds {
            rms: 1.0,
            max_residual: 0.0,
            peak,
            island,
        }
    }

    fn opts() -> IslandOpts {
        IslandOpts {
            npeak: 10,
            diag: false,
        }
    }

    #[test]
    fn test_flood_fill_consumes_candidates_once() {
        // L-shaped blob plus a disconnected pixel
        let mut candidates = Array2::<bool>::default((5, 5));
        for &(x, y) in &[(1, 1), (2, 1), (3, 1), (3, 2), (0, 4)] {
            candidates[[x, y]] = true;
        }
        let pixels = flood_fill(&mut candidates, (1, 1), false);
        assert_eq!(pixels.len(), 4);
        // only the disconnected pixel is left as a candidate
        assert_eq!(candidates.iter().filter(|&&c| c).count(), 1);
        assert!(candidates[[0, 4]]);
    }

    #[test]
    fn test_flood_fill_diagonal_connectivity() {
        let mut candidates = Array2::<bool>::default((4, 4));
        candidates[[0, 0]] = true;
        candidates[[1, 1]] = true;

        let mut four = candidates.clone();
        assert_eq!(flood_fill(&mut four, (0, 0), false).len(), 1);
        assert_eq!(flood_fill(&mut candidates, (0, 0), true).len(), 2);
    }

    #[test]
    fn test_every_candidate_lands_in_exactly_one_island() {
        // a plane with three separated blobs over a zero background
        let mut residual = Array2::<f32>::zeros((16, 16));
        for &(x, y) in &[(2, 2), (2, 3), (3, 2), (10, 10), (10, 11), (5, 13), (6, 13)] {
            residual[[x, y]] = 5.0;
        }
        residual[[2, 2]] = 9.0;
        residual[[10, 10]] = 8.0;
        residual[[5, 13]] = 7.0;

        let mask = Array2::<bool>::default((16, 16));
        let scan = detect(residual.view(), mask.view(), &thresholds(1.0, 2.0), &opts());
        assert_eq!(scan.islands.len(), 3);

        let mut claimed = HashSet::new();
        for island in &scan.islands {
            for &pixel in &island.pixels {
                assert!(claimed.insert(pixel), "pixel {:?} claimed twice", pixel);
            }
        }
        let above: HashSet<_> = residual
            .indexed_iter()
            .filter(|&(_, &v)| v > 1.0)
            .map(|(p, _)| p)
            .collect();
        assert_eq!(claimed, above);
        // brightest seed first
        assert_eq!(scan.islands[0].peak_pos, (2, 2));
        assert_eq!(scan.islands[1].peak_pos, (10, 10));
        assert_eq!(scan.islands[2].peak_pos, (5, 13));
    }

    #[test]
    fn test_lone_pixel_rejected_below_snr_cut() {
        let mut residual = Array2::<f32>::zeros((8, 8));
        residual[[4, 4]] = 1.5;
        let mask = Array2::<bool>::default((8, 8));

        // peak threshold 1.0: 1.5 < 2.5, so the lone pixel is rejected
        let scan = detect(residual.view(), mask.view(), &thresholds(0.5, 1.0), &opts());
        assert!(scan.islands.is_empty());
        assert!(scan.any_candidates);

        // at 3.0 the same pixel clears the cut and becomes a 1x1 island
        residual[[4, 4]] = 3.0;
        let scan = detect(residual.view(), mask.view(), &thresholds(0.5, 1.0), &opts());
        assert_eq!(scan.islands.len(), 1);
        let bbox = scan.islands[0].bbox;
        assert_eq!((bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max), (4, 4, 4, 4));
    }

    #[test]
    fn test_threshold_comparisons_are_strict() {
        let mut residual = Array2::<f32>::zeros((4, 4));
        residual[[1, 1]] = 2.0;
        let mask = Array2::<bool>::default((4, 4));

        // exactly equal to the island threshold: not a candidate
        let scan = detect(residual.view(), mask.view(), &thresholds(2.0, 1.0), &opts());
        assert!(!scan.any_candidates);
        assert!(scan.islands.is_empty());
    }

    #[test]
    fn test_npeak_bounds_accepted_islands() {
        let mut residual = Array2::<f32>::zeros((16, 16));
        // four 2x1 islands, distinct peaks
        for (i, &x) in [1_usize, 5, 9, 13].iter().enumerate() {
            residual[[x, 2]] = 10.0 - i as f32;
            residual[[x, 3]] = 4.0;
            residual[[x + 1, 2]] = 4.0;
        }
        let mask = Array2::<bool>::default((16, 16));
        let scan = detect(
            residual.view(),
            mask.view(),
            &thresholds(1.0, 2.0),
            &IslandOpts {
                npeak: 2,
                diag: false,
            },
        );
        assert_eq!(scan.islands.len(), 2);
        assert_eq!(scan.islands[0].peak_pos, (1, 2));
        assert_eq!(scan.islands[1].peak_pos, (5, 2));
    }

    #[test]
    fn test_masked_islands_still_count_against_npeak() {
        let mut residual = Array2::<f32>::zeros((16, 16));
        residual[[2, 2]] = 10.0;
        residual[[2, 3]] = 9.0;
        residual[[8, 8]] = 5.0;
        residual[[8, 9]] = 4.0;
        let mut mask = Array2::<bool>::default((16, 16));
        mask[[2, 2]] = true;

        let scan = detect(
            residual.view(),
            mask.view(),
            &thresholds(1.0, 2.0),
            &IslandOpts {
                npeak: 1,
                diag: false,
            },
        );
        // the already-masked island used up the whole budget
        assert_eq!(scan.islands.len(), 1);
        assert!(scan.islands[0].already_masked);
        assert_eq!(scan.fresh(), 0);
    }
}
