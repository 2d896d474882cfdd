//! Errors that can occur in autoclean

use thiserror::Error;

/// Error for bad array shapes passed to a function
#[derive(Error, Debug)]
#[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
pub struct BadArrayShape {
    /// The argument name within the function
    pub argument: String,
    /// The function name
    pub function: String,
    /// The expected shape
    pub expected: String,
    /// The shape that was received instead
    pub received: String,
}

/// An error related to command line arguments
#[derive(Error, Debug)]
pub enum CLIError {
    /// Error when a particular combination of command line arguments is invalid
    #[error("Invalid command line argument {option}, expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The option that was invalid
        option: String,
        /// What was expected of the option
        expected: String,
        /// What was actually received
        received: String,
    },
}

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur in autoclean
pub enum AutocleanError {
    /// Error for a bad array shape
    #[error(transparent)]
    BadArrayShape(#[from] BadArrayShape),

    /// Error for an invalid cleaning parameter, detected when first used
    #[error("invalid parameter {param}, expected {expected}, received {received}")]
    InvalidParameter {
        /// The parameter name
        param: String,
        /// What was expected of the parameter
        expected: String,
        /// What was actually received
        received: String,
    },

    /// Error when a plane has no pixels outside the clean mask, so no rms can
    /// be estimated
    #[error("no pixels outside the clean mask of {imagename}, cannot estimate rms")]
    EmptyStatistics {
        /// The name of the image whose statistics were requested
        imagename: String,
    },

    /// Error when the external deconvolution engine fails
    #[error("clean engine failed on {imagename}: {reason}")]
    Engine {
        /// The image the engine was working on
        imagename: String,
        /// The reason the engine gave for failing
        reason: String,
    },

    /// Error when an engine is asked about an image it has never made
    #[error("unknown image {imagename}, was the dirty image ever made?")]
    UnknownImage {
        /// The name of the unknown image
        imagename: String,
    },

    /// Error when a persisted region file exists but cannot be read back.
    /// This is fatal for the channel: the file is the accumulated clean-region
    /// history and must never be silently reset.
    #[error("region file {path} is unreadable: {reason}")]
    RegionFile {
        /// The path of the offending region file
        path: String,
        /// Why it could not be read
        reason: String,
    },

    /// An IO error
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// An error serializing or deserializing a region record
    #[error(transparent)]
    Pickle(#[from] serde_pickle::Error),

    /// An error parsing command line arguments
    #[error(transparent)]
    #[cfg(feature = "cli")]
    CLIError(#[from] CLIError),

    /// An error derived from clap
    #[error(transparent)]
    #[cfg(feature = "cli")]
    ClapError(#[from] clap::Error),

    /// Dry run: parsing succeeded, nothing was written
    #[error("dry run")]
    #[cfg(feature = "cli")]
    DryRun {},
}
