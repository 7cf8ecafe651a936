#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! Wavecal shift determination for STIS-style spectroscopic exposures.
//!
//! Given a calibration-lamp exposure, this crate measures the two-axis
//! pixel shift introduced by mode-select-mechanism uncertainty and
//! hands the result back through a narrow I/O interface, one imset at
//! a time.  Three shift-finding algorithms share the scaffolding: 1-D
//! template cross-correlation for gratings and the prism, bar/edge
//! location along the slit, and FFT-based 2-D cross-correlation for
//! echelle data.

pub mod bars;
pub mod crflag;
pub mod debug;
pub mod dispersion;
pub mod dq;
pub mod driver;
pub mod echelle;
pub mod error;
pub mod exposure;
pub mod refdata;
pub mod spatial;
pub mod spline;
pub mod stats;
pub mod template;
pub mod trace;
pub mod wave;
pub mod xcorr;

pub use driver::{wavecal, Outcome, RunConfig, UNDEFINED_SHIFT, UNREASONABLE_SHIFT};
pub use error::{Error, Result};
