//! The autoclean cycle controller.
//!
//! Each channel runs the same loop: make the dirty image, then repeatedly
//! measure the residual, flood-fill new islands of bright emission into the
//! clean mask, hand the mask to the deconvolution engine for a bounded batch
//! of minor cycles, and re-evaluate. The loop stops on an iteration budget, a
//! residual threshold, stalled improvement, or a divergence guard. Channels
//! of a cube are processed strictly sequentially and fail independently: one
//! bad channel is logged and skipped, the rest of the cube still completes.

use derive_builder::Builder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{debug, error, info};
use ndarray::ArrayView2;

use crate::{
    engine::{ChannelImageSet, CleanCall, CleanEngine, ImageMode},
    error::AutocleanError,
    island::{self, IslandOpts},
    mask::{self, MaskShape, PaintOpts},
    region::RegionStore,
    stats::{self, ThresholdOpts},
};

/// When no new islands appear, the next minor-cycle batch grows by this
/// factor to clean the existing regions more aggressively.
const CYCLE_SPEEDUP: usize = 2;

/// Everything the driver needs to know to clean one image or cube.
#[derive(Builder, Debug, Clone)]
#[builder(default)]
pub struct CleanParams {
    /// Path of the input visibilities, passed through to the engine
    pub vis: String,
    /// Base name of the output image products
    pub imagename: String,
    /// Field selection, passed through to the engine
    pub field: String,
    /// Spectral window selection, passed through to the engine
    pub spw: String,
    /// Spectral mode
    pub mode: ImageMode,
    /// Number of channels to image
    pub nchan: usize,
    /// First channel of the selection
    pub start: usize,
    /// Channels averaged per image channel
    pub width: usize,

    /// Total minor-cycle budget per channel
    pub niter: usize,
    /// Minor cycles per engine call while new islands keep appearing
    pub npercycle: usize,
    /// Loop gain, passed through to the engine
    pub gain: f32,
    /// Primary beam gain floor
    pub minpb: f32,

    /// Maximum islands accepted per detection pass
    pub npeak: usize,
    /// Shape policy for painting islands
    pub shape: MaskShape,
    /// Pixels to stretch island boxes by on every side
    pub boxstretch: i64,
    /// Minimum island extent for an exact-footprint mask
    pub irregsize: usize,
    /// Grow islands with 8-connectivity
    pub diag: bool,

    /// Island threshold in units of the unmasked rms
    pub island_rms: f32,
    /// Peak threshold in units of the unmasked rms
    pub peak_rms: f32,
    /// Peak threshold as a fraction of the maximum residual
    pub gain_threshold: f32,
    /// Absolute cleaning threshold (flux units)
    pub clean_threshold: f32,
    /// Stop cleaning when the maximum residual falls below this multiple of
    /// the rms
    pub nrms: f32,

    /// Relative change in maximum residual below which a channel is declared
    /// converged
    pub eps_maxres: f32,
    /// How many maximum-residual increases to tolerate before stopping
    pub allow_maxres_inc: usize,
    /// Track `max(max, |min|)` instead of the plain maximum residual
    pub use_abs_resid: bool,
    /// Evaluate residual convergence after every engine call
    pub track_residuals: bool,

    /// Allow the engine to open an interactive viewer on cycles that painted
    /// new regions
    pub interactive: bool,
    /// Divide the final products by the primary beam response
    pub pbcor: bool,
    /// Concatenate per-channel products into cube products at the end
    pub concat: bool,
    /// Draw a progress bar over channels
    pub draw_progress: bool,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            vis: String::new(),
            imagename: "autoclean".into(),
            field: String::new(),
            spw: String::new(),
            mode: ImageMode::Channel,
            nchan: 1,
            start: 0,
            width: 1,
            niter: 500,
            npercycle: 100,
            gain: 0.1,
            minpb: 0.1,
            npeak: 3,
            shape: MaskShape::Auto,
            boxstretch: 1,
            irregsize: 100,
            diag: false,
            island_rms: 4.0,
            peak_rms: 6.0,
            gain_threshold: 0.1,
            clean_threshold: 0.0,
            nrms: 2.0,
            eps_maxres: 0.01,
            allow_maxres_inc: 3,
            use_abs_resid: false,
            track_residuals: true,
            interactive: false,
            pbcor: false,
            concat: true,
            draw_progress: true,
        }
    }
}

impl CleanParams {
    fn threshold_opts(&self) -> ThresholdOpts {
        ThresholdOpts {
            island_rms: self.island_rms,
            peak_rms: self.peak_rms,
            gain_threshold: self.gain_threshold,
            use_abs_resid: self.use_abs_resid,
        }
    }

    fn island_opts(&self) -> IslandOpts {
        IslandOpts {
            npeak: self.npeak,
            diag: self.diag,
        }
    }

    fn paint_opts(&self) -> PaintOpts {
        PaintOpts {
            shape: self.shape,
            boxstretch: self.boxstretch,
            irregsize: self.irregsize,
        }
    }

    /// Detected lazily, when a channel first uses the parameters.
    fn validate(&self) -> Result<(), AutocleanError> {
        if self.niter == 0 {
            return Err(AutocleanError::InvalidParameter {
                param: "niter".into(),
                expected: "at least 1 minor cycle".into(),
                received: "0".into(),
            });
        }
        if self.npercycle == 0 {
            return Err(AutocleanError::InvalidParameter {
                param: "npercycle".into(),
                expected: "at least 1 minor cycle per engine call".into(),
                received: "0".into(),
            });
        }
        if self.npeak == 0 {
            return Err(AutocleanError::InvalidParameter {
                param: "npeak".into(),
                expected: "at least 1 island per detection pass".into(),
                received: "0".into(),
            });
        }
        Ok(())
    }
}

/// Why a channel stopped cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing exceeded the detection thresholds on the very first cycle
    NothingToClean,
    /// The total minor-cycle budget is spent
    IterationLimit,
    /// The maximum residual fell below the cleaning threshold
    ThresholdReached,
    /// The maximum residual stopped changing
    NoFurtherImprovement,
    /// The maximum residual increased more times than allowed
    DivergenceGuard,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopReason::NothingToClean => "nothing to clean",
            StopReason::IterationLimit => "reached iteration limit",
            StopReason::ThresholdReached => "reached residual threshold",
            StopReason::NoFurtherImprovement => "no further improvement",
            StopReason::DivergenceGuard => "residual diverging",
        })
    }
}

/// Per-channel scalar state threaded across major cycles.
#[derive(Debug, Clone)]
pub struct ConvergenceState {
    /// Minor cycles consumed so far
    pub iterations_done: usize,
    /// Size of the next minor-cycle batch
    pub npercycle: usize,
    /// How many times the maximum residual has increased
    pub maxres_increase_count: usize,
    /// Maximum residual after the previous engine call (a very large
    /// sentinel before the first)
    pub previous_max_residual: f32,
}

impl ConvergenceState {
    fn new(npercycle: usize) -> Self {
        Self {
            iterations_done: 0,
            npercycle,
            maxres_increase_count: 0,
            previous_max_residual: f32::MAX,
        }
    }
}

/// How one channel's cleaning ended.
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    /// The channel index, if this was one channel of a cube
    pub chan: Option<usize>,
    /// Why the channel stopped
    pub stop: StopReason,
    /// Minor cycles consumed
    pub iterations: usize,
    /// Major (detect-paint-deconvolve) cycles run
    pub cycles: usize,
    /// Islands painted into the mask over the channel's lifetime
    pub islands_painted: usize,
}

/// The outcome of a whole run.
#[derive(Debug)]
pub struct CubeOutcome {
    /// Outcomes of the channels that completed
    pub channels: Vec<ChannelOutcome>,
    /// Channels that failed, with the error that stopped them
    pub failures: Vec<(usize, AutocleanError)>,
}

impl CubeOutcome {
    /// Whether every channel completed.
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

fn plane_max(residual: ArrayView2<f32>, use_abs_resid: bool) -> f32 {
    let mut max = f32::MIN;
    let mut min = f32::MAX;
    for &value in residual.iter() {
        max = max.max(value);
        min = min.min(value);
    }
    if use_abs_resid {
        max.max(min.abs())
    } else {
        max
    }
}

/// Clean a single channel to convergence.
///
/// Runs the full state machine: dirty image, then detect / paint /
/// deconvolve / evaluate until a stop condition fires. The channel's mask
/// plane and region file accumulate monotonically across cycles.
///
/// # Errors
///
/// Any engine, plane-statistics or region-file error is fatal for the
/// channel and returned as-is; [`clean_cube`] turns these into per-channel
/// failures.
pub fn clean_channel(
    engine: &mut dyn CleanEngine,
    names: &ChannelImageSet,
    params: &CleanParams,
) -> Result<ChannelOutcome, AutocleanError> {
    params.validate()?;
    let base = names.base();
    let start = params.start + names.chan().unwrap_or(0) * params.width;

    let mut call = CleanCall {
        vis: params.vis.clone(),
        imagename: base.clone(),
        field: params.field.clone(),
        spw: params.spw.clone(),
        mode: params.mode,
        nchan: 1,
        start,
        width: params.width,
        niter: 0,
        mask: None,
        gain: params.gain,
        threshold: params.clean_threshold,
        minpb: params.minpb,
        interactive: false,
    };
    // make the dirty image and psf without any minor cycles
    engine.run_clean(&call)?;

    let coords = engine.coord_sys(&base)?;
    // all zero unless the engine seeded it from a user-supplied mask
    let mut mask = engine.read_mask(&base)?;
    let store = RegionStore::new(names.region_path());
    let mut regions = store.load()?;

    let threshold_opts = params.threshold_opts();
    let island_opts = params.island_opts();
    let paint_opts = params.paint_opts();

    let mut state = ConvergenceState::new(params.npercycle);
    let mut cycles = 0_usize;
    let mut islands_painted = 0_usize;
    let outcome = |stop: StopReason, state: &ConvergenceState, cycles, islands_painted| {
        info!(
            "{}: stopping after {} minor cycles in {} major cycles: {}",
            base, state.iterations_done, cycles, stop
        );
        ChannelOutcome {
            chan: names.chan(),
            stop,
            iterations: state.iterations_done,
            cycles,
            islands_painted,
        }
    };

    loop {
        let residual = engine.read_residual(&base)?;
        let thresholds = stats::evaluate(residual.view(), mask.view(), &threshold_opts)?;
        let clean_threshold = params.clean_threshold.max(params.nrms * thresholds.rms);
        debug!(
            "{}: cycle {}: rms {:.4e}, max residual {:.4e}, island threshold {:.4e}, peak threshold {:.4e}",
            base, cycles, thresholds.rms, thresholds.max_residual, thresholds.island, thresholds.peak
        );

        if thresholds.max_residual < clean_threshold {
            return Ok(outcome(
                StopReason::ThresholdReached,
                &state,
                cycles,
                islands_painted,
            ));
        }

        let scan = island::detect(residual.view(), mask.view(), &thresholds, &island_opts);
        if cycles == 0 && scan.islands.is_empty() && !mask.iter().any(|&m| m) {
            // nothing above threshold and nothing to resume cleaning
            info!(
                "{}: no emission above the detection thresholds, the given parameters do not induce cleaning",
                base
            );
            return Ok(outcome(
                StopReason::NothingToClean,
                &state,
                cycles,
                islands_painted,
            ));
        }

        let mut painted = 0_usize;
        for found in scan.islands.iter().filter(|i| !i.already_masked) {
            mask::paint(&mut mask, &mut regions, &coords, found, &paint_opts);
            painted += 1;
        }
        if painted > 0 {
            engine.write_mask(&base, mask.view())?;
            regions = store.union_into(&regions)?;
        }
        islands_painted += painted;
        let had_new_regions = painted > 0;

        // reset the batch size when new structure appeared, otherwise grow it
        // to clean the existing regions more aggressively
        if had_new_regions {
            state.npercycle = params.npercycle;
        } else {
            state.npercycle = state.npercycle.saturating_mul(CYCLE_SPEEDUP);
        }
        let remaining = params.niter - state.iterations_done;
        let this_cycle = state.npercycle.min(remaining);

        call.niter = this_cycle;
        call.mask = Some(names.mask().into());
        call.threshold = clean_threshold;
        call.interactive = params.interactive && had_new_regions;
        engine.run_clean(&call)?;
        state.iterations_done += this_cycle;
        cycles += 1;

        if state.iterations_done >= params.niter {
            return Ok(outcome(
                StopReason::IterationLimit,
                &state,
                cycles,
                islands_painted,
            ));
        }

        if params.track_residuals {
            let residual = engine.read_residual(&base)?;
            let post_max = plane_max(residual.view(), params.use_abs_resid);
            let pre_max = state.previous_max_residual;
            if (post_max - pre_max).abs() / pre_max < params.eps_maxres {
                return Ok(outcome(
                    StopReason::NoFurtherImprovement,
                    &state,
                    cycles,
                    islands_painted,
                ));
            }
            if post_max >= pre_max {
                state.maxres_increase_count += 1;
                debug!(
                    "{}: max residual increased {:.4e} -> {:.4e} ({} of {} allowed)",
                    base, pre_max, post_max, state.maxres_increase_count, params.allow_maxres_inc
                );
                if state.maxres_increase_count > params.allow_maxres_inc {
                    return Ok(outcome(
                        StopReason::DivergenceGuard,
                        &state,
                        cycles,
                        islands_painted,
                    ));
                }
            }
            state.previous_max_residual = post_max;
        }
    }
}

/// Clean every channel of an image or cube, sequentially and independently.
///
/// A failing channel is logged with its index and recorded in the outcome;
/// the run carries on with the next channel. After all channels, per-channel
/// products are concatenated into cube products (when requested and more than
/// one channel was imaged) and primary beam correction is applied.
///
/// # Errors
///
/// Parameter validation, concatenation and primary-beam failures abort the
/// run; per-channel errors do not.
pub fn clean_cube(
    engine: &mut dyn CleanEngine,
    params: &CleanParams,
) -> Result<CubeOutcome, AutocleanError> {
    params.validate()?;
    let cube = params.mode == ImageMode::Channel && params.nchan > 1;

    let channel_names: Vec<ChannelImageSet> = if cube {
        (0..params.nchan)
            .map(|chan| ChannelImageSet::cube(&params.imagename, chan))
            .collect()
    } else {
        vec![ChannelImageSet::single(&params.imagename)]
    };

    let progress = ProgressBar::with_draw_target(
        Some(channel_names.len() as u64),
        if params.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        },
    );
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:3}/{len:3}")
            .unwrap()
            .progress_chars("=> "),
    );
    progress.set_message("cleaning");

    let mut channels = Vec::with_capacity(channel_names.len());
    let mut failures = Vec::new();
    for (chan, names) in channel_names.iter().enumerate() {
        match clean_channel(engine, names, params) {
            Ok(chan_outcome) => channels.push(chan_outcome),
            Err(e) => {
                error!("channel {} failed: {}", chan, e);
                failures.push((chan, e));
            }
        }
        progress.inc(1);
    }
    progress.finish();

    if cube && params.concat {
        let completed: Vec<String> = channels
            .iter()
            .filter_map(|outcome| outcome.chan)
            .map(|chan| ChannelImageSet::cube(&params.imagename, chan).base())
            .collect();
        if !completed.is_empty() {
            engine.concat_channels(&completed, &params.imagename)?;
            let region_paths: Vec<_> = channels
                .iter()
                .filter_map(|outcome| outcome.chan)
                .map(|chan| ChannelImageSet::cube(&params.imagename, chan).region_path())
                .collect();
            RegionStore::concat(
                &region_paths,
                &ChannelImageSet::single(&params.imagename).region_path(),
            )?;
        }
    }
    if params.pbcor {
        engine.apply_pbcor(&params.imagename, params.minpb)?;
    }

    if failures.is_empty() {
        info!("all {} channels completed", channels.len());
    } else {
        error!(
            "completed with errors in channel(s) {}",
            failures.iter().map(|(chan, _)| chan).join(", ")
        );
    }
    Ok(CubeOutcome { channels, failures })
}
