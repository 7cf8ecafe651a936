//! Error types shared across the crate.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A required header keyword is absent.
    #[error("keyword {0} not found")]
    MissingKeyword(String),
    /// A reference table required for this disperser was not supplied.
    #[error("{0} reference table not found")]
    MissingReference(&'static str),
    /// No row of a reference table matched the selection keys.
    #[error("matching row not found in {table}: {detail}")]
    RowNotFound {
        /// Table keyword, e.g. "LAMPTAB".
        table: &'static str,
        /// The selection values that failed to match.
        detail: String,
    },
    /// A row was found but its contents are unusable.
    #[error("bad row in {table}: {detail}")]
    BadRow {
        /// Table keyword.
        table: &'static str,
        /// What was wrong with it.
        detail: String,
    },
    /// The shift could not be determined from the data.  This is not
    /// fatal for an imset; the driver degrades the affected shift to
    /// the undefined-shift sentinel.
    #[error("no good data")]
    NoGoodData,
    /// Cross-correlation preconditions violated (range not odd, too
    /// small, or larger than the data).
    #[error("invalid cross-correlation range {range} for {nelem} elements")]
    CrossCorrRange {
        /// Requested window size.
        range: usize,
        /// Number of data elements.
        nelem: usize,
    },
    /// SCI and DQ buffers disagree in shape, or an image section is
    /// degenerate.
    #[error("bad image geometry: {0}")]
    Geometry(String),
    /// Error raised by the I/O layer behind the `Exposure` trait.
    #[error("{0}")]
    Io(String),
}

/// Shorthand for results returned throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
