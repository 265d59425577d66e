//! Error types.

use thiserror::Error;

/// Error while loading a scaling-list description.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScalingListError {
    /// The scaling-list file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required section header was not found.
    #[error("missing scaling-list section {0}")]
    MissingSection(String),

    /// A section ended before all of its values were read.
    #[error("section {section} ended after {found} of {expected} values")]
    Truncated {
        /// Section header.
        section: String,
        /// Number of values read.
        found: usize,
        /// Number of values the section must hold.
        expected: usize,
    },

    /// A value could not be parsed as an integer.
    #[error("malformed value {value:?} in section {section}")]
    Malformed {
        /// Section header.
        section: String,
        /// Offending token.
        value: String,
    },

    /// A value lies outside 1..=255.
    #[error("value {value} out of range 1..=255 in section {section}")]
    OutOfRange {
        /// Section header.
        section: String,
        /// Offending value.
        value: i64,
    },
}

/// Error returned by configuration and initialisation entry points.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TqError {
    /// The scaling list could not be loaded.
    #[error(transparent)]
    ScalingList(#[from] ScalingListError),

    /// A configuration value is outside its legal range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No backend is registered for an operation.
    #[error("no implementation available for {0}")]
    NoImplementation(&'static str),

    /// The kernel table was already initialised with different options.
    #[error("strategies already initialised for bitdepth {0}")]
    AlreadyInitialized(u8),
}
