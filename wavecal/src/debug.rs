//! Debug-output dispatch.
//!
//! Grating and prism data produce a human-readable text file; echelle
//! data produce image planes (the synthesised template, the flagged DQ
//! array).  The driver talks to one [`DebugSink`] and the concrete
//! implementation decides what to do with each kind.

use ndarray::Array2;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Receiver for debug artifacts.
pub trait DebugSink {
    /// Whether anything is listening; lets callers skip building
    /// expensive dumps.
    fn active(&self) -> bool {
        true
    }

    /// One line of diagnostic text (no trailing newline).
    fn text(&mut self, line: &str);

    /// A named image plane, e.g. the echelle template.
    fn image(&mut self, name: &str, extver: usize, data: &Array2<f32>);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DebugSink for NullSink {
    fn active(&self) -> bool {
        false
    }

    fn text(&mut self, _line: &str) {}

    fn image(&mut self, _name: &str, _extver: usize, _data: &Array2<f32>) {}
}

/// Appends text lines to a file; image planes are announced but not
/// stored (the FITS-capable sink lives in the I/O layer).
#[derive(Debug)]
pub struct TextFileSink {
    writer: BufWriter<std::fs::File>,
}

impl TextFileSink {
    /// Opens `path` for appending.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or created.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl DebugSink for TextFileSink {
    fn text(&mut self, line: &str) {
        // debug output is best-effort; a full disk should not kill the run
        let _ = writeln!(self.writer, "{line}");
        let _ = self.writer.flush();
    }

    fn image(&mut self, name: &str, extver: usize, data: &Array2<f32>) {
        let _ = writeln!(
            self.writer,
            "# image `{name}' (imset {extver}, {} x {}) omitted from text debug output",
            data.ncols(),
            data.nrows()
        );
    }
}
