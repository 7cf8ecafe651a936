//! Exposure data model and the narrow interface to the I/O layer.
//!
//! The core never touches bytes on disk.  It asks an [`Exposure`]
//! implementation for the primary-header description, then for each
//! imset a header plus SCI/DQ pixel buffers, and finally hands back two
//! keyword values and (once) a set of history lines.

use crate::dq::{serious_flags, ALL_SERIOUS};
use crate::error::{Error, Result};
use ndarray::Array2;

/// Detector in use for the exposure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Detector {
    /// Near-UV MAMA.
    NuvMama,
    /// Far-UV MAMA.
    FuvMama,
    /// The CCD; the only detector subject to cosmic-ray flagging.
    Ccd,
}

impl Detector {
    /// Parses the DETECTOR keyword value by prefix.
    pub fn parse(name: &str) -> Result<Self> {
        if name.starts_with("NUV-MAMA") {
            Ok(Self::NuvMama)
        } else if name.starts_with("FUV-MAMA") {
            Ok(Self::FuvMama)
        } else if name.starts_with("CCD") {
            Ok(Self::Ccd)
        } else {
            Err(Error::Io(format!("unknown DETECTOR `{name}'")))
        }
    }
}

/// Disperser class, decided from the OPT_ELEM keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disperser {
    /// First-order grating; the input has been 2-D rectified.
    Rectified,
    /// Objective prism.
    Prism,
    /// Cross-dispersed echelle.
    Echelle,
}

impl Disperser {
    /// Classifies a grating/prism name: "PRISM" is the prism, a name
    /// beginning with 'E' or 'e' is an echelle, anything else is taken
    /// to be a rectified first-order grating.
    #[must_use]
    pub fn from_opt_elem(opt_elem: &str) -> Self {
        if opt_elem == "PRISM" {
            Self::Prism
        } else if opt_elem.starts_with(['E', 'e']) {
            Self::Echelle
        } else {
            Self::Rectified
        }
    }
}

/// Values read from the primary header that drive reference selection.
#[derive(Clone, Debug)]
pub struct PrimaryInfo {
    /// Root name of the observation set, for messages.
    pub rootname: String,
    /// Aperture (slit) name, e.g. "52X0.1".
    pub aperture: String,
    /// Aperture field of view, "WxH" in arcseconds.
    pub aper_fov: String,
    /// Grating or prism name.
    pub opt_elem: String,
    /// Detector keyword value.
    pub detector: Detector,
    /// Central wavelength in Angstroms.
    pub cenwave: i32,
    /// Calibration lamp in use.  For prism data this is forced to
    /// "PRISM" so the lamp-table row is unique.
    pub sclamp: String,
    /// Lamp current setting.
    pub lampset: String,
    /// Number of imsets in the file.
    pub nimages: usize,
}

impl PrimaryInfo {
    /// The disperser class implied by the grating name.
    #[must_use]
    pub fn disperser(&self) -> Disperser {
        Disperser::from_opt_elem(&self.opt_elem)
    }
}

/// Keyword values from one SCI extension header.  All coordinate
/// parameters are zero-indexed; the I/O layer converts any one-indexed
/// on-disk values when it builds this struct.
#[derive(Clone, Debug)]
pub struct ImsetHeader {
    /// Dispersion axis, 1 (X) or 2 (Y).
    pub dispaxis: i32,
    /// Serious data-quality flags.  Use [`ImsetHeader::new`] so that
    /// the bits ignored by wavecal processing are cleared.
    pub sdqflags: u16,
    /// Reference pixel in each axis.
    pub crpix: [f64; 2],
    /// Coordinate value at the reference pixel.
    pub crval: [f64; 2],
    /// Coordinate increment per pixel.
    pub cdelt: [f64; 2],
    /// Matrix part of the reference-to-image transformation.
    pub ltm: [f64; 2],
    /// Offset part of the reference-to-image transformation.
    pub ltv: [f64; 2],
    /// Exposure time in seconds.
    pub exptime: f64,
    /// Exposure start, modified Julian day.
    pub expstart: f64,
    /// False when the imset was flagged unusable upstream.
    pub imset_ok: bool,
}

impl ImsetHeader {
    /// Builds a header, masking the DQ bits that must never be treated
    /// as serious here (behind-bar, hot pixel, small blemish).
    #[must_use]
    pub fn new(dispaxis: i32, sdqflags: Option<u16>, imset_ok: bool) -> Self {
        Self {
            dispaxis,
            sdqflags: serious_flags(sdqflags.unwrap_or(ALL_SERIOUS)),
            crpix: [0.0; 2],
            crval: [0.0; 2],
            cdelt: [1.0; 2],
            ltm: [1.0; 2],
            ltv: [0.0; 2],
            exptime: 0.0,
            expstart: 0.0,
            imset_ok,
        }
    }

    /// Multiplicative factors converting image pixels to reference
    /// pixels (the inverse of the LTM diagonal).
    #[must_use]
    pub fn scale(&self) -> [f64; 2] {
        [1.0 / self.ltm[0], 1.0 / self.ltm[1]]
    }

    /// Whether the imset should be processed at all.
    #[must_use]
    pub fn usable(&self) -> bool {
        self.imset_ok && self.exptime > 0.0
    }
}

/// SCI and DQ buffers for one imset, same shape, indexed `[y, x]`.
#[derive(Clone, Debug)]
pub struct PixelFrame {
    /// Science pixel values.
    pub sci: Array2<f32>,
    /// Data-quality flags.
    pub dq: Array2<u16>,
}

impl PixelFrame {
    /// Wraps SCI and DQ buffers after checking that they agree in
    /// shape.
    ///
    /// # Errors
    ///
    /// Fails when the two buffers have different dimensions.
    pub fn new(sci: Array2<f32>, dq: Array2<u16>) -> Result<Self> {
        if sci.dim() != dq.dim() {
            return Err(Error::Geometry(format!(
                "SCI is {:?} but DQ is {:?}",
                sci.dim(),
                dq.dim()
            )));
        }
        Ok(Self { sci, dq })
    }

    /// Image width (first axis, X).
    #[must_use]
    pub fn nx(&self) -> usize {
        self.sci.ncols()
    }

    /// Image height (second axis, Y).
    #[must_use]
    pub fn ny(&self) -> usize {
        self.sci.nrows()
    }
}

/// The narrow surface the driver needs from the container format.
///
/// Imsets are numbered from 1 (`extver`), matching the on-disk
/// convention.
pub trait Exposure {
    /// Reads the primary-header description.
    ///
    /// # Errors
    ///
    /// Fails when a required keyword is absent or unparsable.
    fn primary(&mut self) -> Result<PrimaryInfo>;

    /// Reads the header and pixel buffers of one imset.  Cosmic-ray
    /// flagging mutates only this in-memory copy of the DQ plane; the
    /// on-disk DQ extension is never rewritten.
    ///
    /// # Errors
    ///
    /// Fails when the extension cannot be read.
    fn read_imset(&mut self, extver: usize) -> Result<(ImsetHeader, PixelFrame)>;

    /// Updates SHIFTA1 and SHIFTA2 on the SCI extension header.
    ///
    /// # Errors
    ///
    /// Fails when the header cannot be updated.
    fn write_shifts(&mut self, extver: usize, shifta1: f64, shifta2: f64) -> Result<()>;

    /// Appends history lines to the primary header and records the
    /// outcome of the step in the WAVECORR switch keyword.
    ///
    /// # Errors
    ///
    /// Fails when the primary header cannot be updated.
    fn append_history(&mut self, wavecorr: &str, lines: &[String]) -> Result<()>;
}

/// An in-memory exposure: used by the test suite and by callers that
/// assemble wavecal data programmatically rather than from a file.
#[derive(Clone, Debug, Default)]
pub struct MemExposure {
    /// Primary description; must be set before running the driver.
    pub info: Option<PrimaryInfo>,
    /// One entry per imset.
    pub imsets: Vec<(ImsetHeader, PixelFrame)>,
    /// Shift keyword pairs written back, indexed by extver − 1.
    pub shifts: Vec<Option<(f64, f64)>>,
    /// WAVECORR value written with the history block.
    pub wavecorr: Option<String>,
    /// History lines appended to the primary header.
    pub history: Vec<String>,
}

impl MemExposure {
    /// Creates an exposure from a primary description and its imsets.
    #[must_use]
    pub fn new(mut info: PrimaryInfo, imsets: Vec<(ImsetHeader, PixelFrame)>) -> Self {
        info.nimages = imsets.len();
        let shifts = vec![None; imsets.len()];
        Self {
            info: Some(info),
            imsets,
            shifts,
            wavecorr: None,
            history: Vec::new(),
        }
    }
}

impl Exposure for MemExposure {
    fn primary(&mut self) -> Result<PrimaryInfo> {
        self.info
            .clone()
            .ok_or_else(|| Error::Io("no primary header".into()))
    }

    fn read_imset(&mut self, extver: usize) -> Result<(ImsetHeader, PixelFrame)> {
        self.imsets
            .get(extver - 1)
            .cloned()
            .ok_or_else(|| Error::Io(format!("no imset {extver}")))
    }

    fn write_shifts(&mut self, extver: usize, shifta1: f64, shifta2: f64) -> Result<()> {
        match self.shifts.get_mut(extver - 1) {
            Some(slot) => {
                *slot = Some((shifta1, shifta2));
                Ok(())
            }
            None => Err(Error::Io(format!("no imset {extver}"))),
        }
    }

    fn append_history(&mut self, wavecorr: &str, lines: &[String]) -> Result<()> {
        self.wavecorr = Some(wavecorr.to_owned());
        self.history.extend_from_slice(lines);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disperser_classification() {
        assert_eq!(Disperser::from_opt_elem("PRISM"), Disperser::Prism);
        assert_eq!(Disperser::from_opt_elem("E230M"), Disperser::Echelle);
        assert_eq!(Disperser::from_opt_elem("G430L"), Disperser::Rectified);
    }

    #[test]
    fn detector_parse() {
        assert_eq!(Detector::parse("CCD").unwrap(), Detector::Ccd);
        assert_eq!(Detector::parse("NUV-MAMA").unwrap(), Detector::NuvMama);
        assert!(Detector::parse("BOLOMETER").is_err());
    }

    #[test]
    fn header_masks_ignored_bits() {
        let hdr = ImsetHeader::new(1, Some(ALL_SERIOUS), true);
        assert_eq!(hdr.sdqflags & crate::dq::DqFlags::DATAMASKED.bits(), 0);
    }

    #[test]
    fn frame_shape_mismatch_is_rejected() {
        let sci = Array2::<f32>::zeros((4, 5));
        let dq = Array2::<u16>::zeros((4, 4));
        assert!(PixelFrame::new(sci, dq).is_err());
    }
}
