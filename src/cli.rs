//! Command Line Interface helpers for autoclean

use crate::{
    controller::{clean_cube, CleanParams, CleanParamsBuilder, CubeOutcome},
    coords::CoordSys,
    engine::ImageMode,
    error::{
        AutocleanError,
        AutocleanError::{ClapError, DryRun},
        CLIError::InvalidCommandLineArgument,
    },
    mask::MaskShape,
    sim::SimulatedEngine,
};
use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    PossibleValue,
    ValueHint::FilePath,
};
use log::{debug, info, trace};
use prettytable::{format as prettyformat, table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
};

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match GIT_HEAD_REF {
        Some(hr) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                GIT_COMMIT_HASH.unwrap(),
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {}", hr)?;
        }
        None => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

/// Args for cleaning a dirty cube.
pub struct AutocleanContext {
    /// Cleaning parameters for the whole run
    pub params: CleanParams,
    /// Path of the pickled dirty cube the simulated engine deconvolves
    pub dirty_path: PathBuf,
    /// Pixel increment of the image coordinate system [deg]
    pub cell_deg: Option<f64>,
}

impl Display for AutocleanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        writeln!(f, "Input dirty cube:     {}", self.dirty_path.display())?;
        writeln!(f, "Output images:        {}.*", self.params.imagename)?;
        writeln!(
            f,
            "Spectral selection:   mode={} nchan={} start={} width={}",
            self.params.mode, self.params.nchan, self.params.start, self.params.width
        )?;
        if let Some(cell_deg) = self.cell_deg {
            writeln!(f, "Cell size:            {:.6e} deg", cell_deg)?;
        }

        let mut param_table = table!(
            ["niter", "npercycle", "gain", "threshold", "nrms", "minpb"],
            [
                self.params.niter,
                self.params.npercycle,
                self.params.gain,
                self.params.clean_threshold,
                self.params.nrms,
                self.params.minpb
            ]
        );
        param_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        writeln!(f, "Cleaning parameters:\n{}", param_table)?;

        let mut detect_table = table!(
            [
                "npeak",
                "island_rms",
                "peak_rms",
                "gain_threshold",
                "shape",
                "boxstretch",
                "irregsize"
            ],
            [
                self.params.npeak,
                self.params.island_rms,
                self.params.peak_rms,
                self.params.gain_threshold,
                self.params.shape,
                self.params.boxstretch,
                self.params.irregsize
            ]
        );
        detect_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        writeln!(f, "Detection parameters:\n{}", detect_table)?;

        writeln!(
            f,
            "Convergence:          eps_maxres={} allow_maxres_inc={} track_residuals={} use_abs_resid={}",
            self.params.eps_maxres,
            self.params.allow_maxres_inc,
            self.params.track_residuals,
            self.params.use_abs_resid
        )?;
        writeln!(
            f,
            "Finishing:            concat={} pbcor={} interactive={}",
            self.params.concat, self.params.pbcor, self.params.interactive
        )?;

        Ok(())
    }
}

impl AutocleanContext {
    #[allow(clippy::cognitive_complexity)]
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, AutocleanError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Iteratively deconvolve a dirty image cube, growing the \
                    clean mask from islands of bright residual emission.")
            .args(&[
                // input options
                arg!(-d --dirty <PATH> "Pickled dirty cube to deconvolve")
                    .required(true)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(--vis <PATH> "Visibility path recorded in engine calls")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(--field <FIELD> "Field selection passed to the engine")
                    .required(false)
                    .help_heading("INPUT"),
                arg!(--spw <SPW> "Spectral window selection passed to the engine")
                    .required(false)
                    .help_heading("INPUT"),

                // output options
                arg!(-o --imagename <NAME> "Base name of the output image products")
                    .required(false)
                    .help_heading("OUTPUT"),
                arg!(--pbcor "Apply primary beam correction to the final products")
                    .help_heading("OUTPUT"),
                arg!(--"no-concat" "Do not concatenate channel products into a cube")
                    .help_heading("OUTPUT"),

                // spectral selection
                arg!(--mode <MODE> "Spectral mode")
                    .required(false)
                    .possible_values([
                        PossibleValue::new("mfs").help("a single multi-frequency-synthesis image"),
                        PossibleValue::new("channel").help("one image per channel"),
                    ])
                    .default_value("channel")
                    .help_heading("SELECTION"),
                arg!(--nchan <COUNT> "Number of channels to image (0: every channel of the cube)")
                    .required(false)
                    .help_heading("SELECTION"),
                arg!(--start <CHAN> "First channel of the selection")
                    .required(false)
                    .help_heading("SELECTION"),
                arg!(--width <COUNT> "Channels averaged per image channel")
                    .required(false)
                    .help_heading("SELECTION"),
                arg!(--cell <DEGREES> "Pixel size of the image coordinate system")
                    .required(false)
                    .help_heading("SELECTION"),

                // cleaning options
                arg!(--niter <COUNT> "Total minor-cycle budget per channel")
                    .required(false)
                    .help_heading("CLEANING"),
                arg!(--npercycle <COUNT> "Minor cycles per engine call while new islands appear")
                    .required(false)
                    .help_heading("CLEANING"),
                arg!(--gain <GAIN> "Deconvolution loop gain")
                    .required(false)
                    .help_heading("CLEANING"),
                arg!(--threshold <FLUX> "Absolute cleaning threshold")
                    .required(false)
                    .help_heading("CLEANING"),
                arg!(--nrms <FACTOR> "Stop when the max residual falls below <FACTOR> * rms")
                    .required(false)
                    .help_heading("CLEANING"),
                arg!(--minpb <GAIN> "Primary beam gain floor")
                    .required(false)
                    .help_heading("CLEANING"),
                arg!(--interactive "Allow the engine to open a viewer on cycles with new regions")
                    .help_heading("CLEANING"),

                // detection options
                arg!(--npeak <COUNT> "Maximum islands accepted per detection pass")
                    .required(false)
                    .help_heading("DETECTION"),
                arg!(--"island-rms" <FACTOR> "Island threshold in units of the unmasked rms")
                    .required(false)
                    .help_heading("DETECTION"),
                arg!(--"peak-rms" <FACTOR> "Peak threshold in units of the unmasked rms")
                    .required(false)
                    .help_heading("DETECTION"),
                arg!(--"gain-threshold" <FRACTION> "Peak threshold as a fraction of the max residual")
                    .required(false)
                    .help_heading("DETECTION"),
                arg!(--diag "Grow islands with 8-connectivity")
                    .help_heading("DETECTION"),
                arg!(--"use-abs-resid" "Track max(max, |min|) instead of the plain max residual")
                    .help_heading("DETECTION"),

                // masking options
                arg!(--shape <SHAPE> "Shape painted over each island")
                    .required(false)
                    .possible_values([
                        PossibleValue::new("box").help("bounding box, stretched by boxstretch"),
                        PossibleValue::new("circle").help("circumscribed circle"),
                        PossibleValue::new("auto")
                            .help("box for elongated islands, circle for round ones"),
                        PossibleValue::new("exact")
                            .help("exact island footprint for large islands, auto otherwise"),
                    ])
                    .default_value("auto")
                    .help_heading("MASKING"),
                arg!(--boxstretch <PIXELS> "Pixels to stretch island boxes by on every side (-1..5)")
                    .required(false)
                    .allow_hyphen_values(true)
                    .help_heading("MASKING"),
                arg!(--irregsize <PIXELS> "Minimum island extent for an exact-footprint mask")
                    .required(false)
                    .help_heading("MASKING"),

                // convergence options
                arg!(--"eps-maxres" <FRACTION> "Relative max-residual change declared as converged")
                    .required(false)
                    .help_heading("CONVERGENCE"),
                arg!(--"allow-maxres-inc" <COUNT> "Max-residual increases tolerated before stopping")
                    .required(false)
                    .help_heading("CONVERGENCE"),
                arg!(--"no-track-residuals" "Do not evaluate convergence between engine calls")
                    .help_heading("CONVERGENCE"),

                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
            ]);

        Ok(app.try_get_matches_from(args)?)
    }

    fn parse_params_matches(
        matches: &clap::ArgMatches,
    ) -> Result<CleanParams, AutocleanError> {
        let mut builder = CleanParamsBuilder::default();
        // on the command line, nchan 0 means every channel of the cube;
        // run() resolves it once the cube is loaded
        builder.nchan(0);

        if let Some(imagename) = matches.value_of("imagename") {
            builder.imagename(imagename.into());
        }
        if let Some(vis) = matches.value_of("vis") {
            builder.vis(vis.into());
        }
        if let Some(field) = matches.value_of("field") {
            builder.field(field.into());
        }
        if let Some(spw) = matches.value_of("spw") {
            builder.spw(spw.into());
        }

        match matches.value_of_t::<ImageMode>("mode") {
            Ok(mode) => {
                builder.mode(mode);
            }
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => {}
                _ => return Err(err.into()),
            },
        }
        match matches.value_of_t::<MaskShape>("shape") {
            Ok(shape) => {
                builder.shape(shape);
            }
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => {}
                _ => return Err(err.into()),
            },
        }

        macro_rules! parse_value {
            ($name:literal, $ty:ty, $setter:ident) => {
                match matches.value_of_t::<$ty>($name) {
                    Ok(value) => {
                        builder.$setter(value);
                    }
                    Err(err) => match err.kind() {
                        ArgumentNotFound { .. } => {}
                        _ => return Err(err.into()),
                    },
                }
            };
        }
        parse_value!("nchan", usize, nchan);
        parse_value!("start", usize, start);
        parse_value!("width", usize, width);
        parse_value!("niter", usize, niter);
        parse_value!("npercycle", usize, npercycle);
        parse_value!("gain", f32, gain);
        parse_value!("threshold", f32, clean_threshold);
        parse_value!("nrms", f32, nrms);
        parse_value!("minpb", f32, minpb);
        parse_value!("npeak", usize, npeak);
        parse_value!("island-rms", f32, island_rms);
        parse_value!("peak-rms", f32, peak_rms);
        parse_value!("gain-threshold", f32, gain_threshold);
        parse_value!("boxstretch", i64, boxstretch);
        parse_value!("irregsize", usize, irregsize);
        parse_value!("eps-maxres", f32, eps_maxres);
        parse_value!("allow-maxres-inc", usize, allow_maxres_inc);

        builder.diag(matches.is_present("diag"));
        builder.use_abs_resid(matches.is_present("use-abs-resid"));
        builder.interactive(matches.is_present("interactive"));
        builder.pbcor(matches.is_present("pbcor"));
        builder.concat(!matches.is_present("no-concat"));
        builder.track_residuals(!matches.is_present("no-track-residuals"));
        builder.draw_progress(!matches.is_present("no-draw-progress"));

        // The builder has a default for every field, so this cannot fail.
        let params = builder
            .build()
            .expect("CleanParamsBuilder has defaults for all fields");

        if !(-1..=5).contains(&params.boxstretch) {
            return Err(AutocleanError::CLIError(InvalidCommandLineArgument {
                option: "--boxstretch <PIXELS>".into(),
                expected: "an integer between -1 and 5".into(),
                received: format!("{}", params.boxstretch),
            }));
        }
        if params.niter == 0 {
            return Err(AutocleanError::CLIError(InvalidCommandLineArgument {
                option: "--niter <COUNT>".into(),
                expected: "a positive, non-zero integer".into(),
                received: format!("{}", params.niter),
            }));
        }
        if params.npercycle == 0 {
            return Err(AutocleanError::CLIError(InvalidCommandLineArgument {
                option: "--npercycle <COUNT>".into(),
                expected: "a positive, non-zero integer".into(),
                received: format!("{}", params.npercycle),
            }));
        }
        if !(0.0..=1.0).contains(&params.gain) || params.gain == 0.0 {
            return Err(AutocleanError::CLIError(InvalidCommandLineArgument {
                option: "--gain <GAIN>".into(),
                expected: "a loop gain in (0, 1]".into(),
                received: format!("{}", params.gain),
            }));
        }

        Ok(params)
    }

    /// Parse an [`AutocleanContext`] from the command line.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `AutocleanError::CLIError` if the arguments are invalid.
    /// - `AutocleanError::DryRun` if `--dry-run` was given.
    pub fn from_args<I, T>(args: I) -> Result<Self, AutocleanError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let params = Self::parse_params_matches(&matches)?;
        let dirty_path = PathBuf::from(
            matches
                .value_of("dirty")
                .expect("--dirty is a required argument"),
        );
        let cell_deg = match matches.value_of_t::<f64>("cell") {
            Ok(cell_deg) => Some(cell_deg),
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => None,
                _ => return Err(err.into()),
            },
        };

        let result = Self {
            params,
            dirty_path,
            cell_deg,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Load the dirty cube and clean every selected channel.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `AutocleanError::Pickle` if the dirty cube cannot be deserialized.
    /// - any error from [`clean_cube`].
    pub fn run(self) -> Result<CubeOutcome, AutocleanError> {
        let AutocleanContext {
            mut params,
            dirty_path,
            cell_deg,
        } = self;

        let coords = match cell_deg {
            Some(cell_deg) => CoordSys {
                ref_pixel: [0.0, 0.0],
                ref_world: [0.0, 0.0],
                increment: [-cell_deg, cell_deg],
            },
            None => CoordSys::default(),
        };
        let mut engine = SimulatedEngine::from_pickle(&dirty_path, coords)?;
        info!(
            "loaded {} channel dirty cube from {}",
            engine.num_channels(),
            dirty_path.display()
        );
        if params.mode == ImageMode::Channel && params.nchan == 0 {
            params.nchan = engine.num_channels();
        }

        clean_cube(&mut engine, &params)
    }
}

/// Run autoclean over the given command line arguments.
///
/// Returns an exit code.
#[allow(clippy::field_reassign_with_default)]
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    I: Debug,
{
    let ctx = match AutocleanContext::from_args(args) {
        Ok(ctx) => ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match ctx.run() {
        Ok(outcome) => {
            for channel in &outcome.channels {
                info!(
                    "channel {}: {} after {} minor cycles, {} islands",
                    channel.chan.map_or_else(|| "-".into(), |c| c.to_string()),
                    channel.stop,
                    channel.iterations,
                    channel.islands_painted
                );
            }
            if outcome.all_ok() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("error cleaning: {e}");
            1
        }
    }
}
