//! Reference-table rows, row selection, and the per-exposure loader.
//!
//! Tables arrive as typed row vectors; how they were read off disk is
//! the I/O layer's business.  Selection semantics follow the calibration
//! conventions: string keys compare case-insensitively, the literal
//! "ANY" matches anything, and an absent selection column is a wildcard
//! for backward compatibility.  A row whose pedigree starts with
//! "DUMMY" is disabled; on a required table that turns the whole step
//! into a clean nothing-to-do outcome.

use crate::dispersion::{DispersionRelation, MAX_DISP_COEFF};
use crate::error::{Error, Result};
use crate::exposure::{Detector, Disperser, PrimaryInfo};
use crate::trace::{TraceList, TraceRecord};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// String that matches any selection value.
pub const WILDCARD: &str = "ANY";

/// Reference-file binding meaning "deliberately omitted".
pub const NOT_APPLICABLE: &str = "N/A";

/// Y line used to break ties between DISPTAB rows.  This bakes in the
/// 1024-row detector convention of the source data.
pub const DETECTOR_MIDDLE_Y: f64 = 512.0;

/// Default cross-dispersion reference pixel for prism data
/// (one-indexed), used when the SDC table has nothing better.
pub const PRISM_CRPIX2: f64 = 512.0;

/// Default cross-dispersion scale for prism data, degrees per pixel.
pub const PRISM_CDELT2: f64 = 0.02915 / 3600.0;

/// Maximum number of occulting bars on a slit.
pub const MAX_BARS: usize = 3;

/// Case-insensitive match against a selection cell; `None` (column
/// absent) and the literal "ANY" match anything.
#[must_use]
pub fn wildcard_eq(cell: Option<&str>, want: &str) -> bool {
    cell.map_or(true, |c| {
        c.eq_ignore_ascii_case(WILDCARD) || c.eq_ignore_ascii_case(want)
    })
}

/// Whether a pedigree string disables its row: true when the first
/// token is "DUMMY" (any case).
#[must_use]
pub fn is_dummy(pedigree: Option<&str>) -> bool {
    pedigree
        .and_then(|p| p.split_whitespace().next())
        .is_some_and(|tok| tok.eq_ignore_ascii_case("DUMMY"))
}

/// One row of the wavecal-processing-parameters table (WCPTAB).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WcpRow {
    /// Detector name selection key.
    pub detector: Option<String>,
    /// Grating name selection key.
    pub opt_elem: Option<String>,
    /// Pixels to trim from the dispersion axis.
    pub wl_trim1: i32,
    /// Pixels to trim from the cross-dispersion axis.
    pub wl_trim2: i32,
    /// Trim for the spatial-shift collapse, dispersion axis.
    pub sp_trim1: i32,
    /// Trim for the spatial-shift collapse, cross-dispersion axis.
    pub sp_trim2: i32,
    /// Cross-correlation half-range in the dispersion direction.
    pub wl_range: i32,
    /// Cross-correlation half-range in the spatial direction.
    pub sp_range: i32,
    /// Sigma threshold for cosmic-ray rejection.
    pub nsigma_cr: f64,
    /// Sigma threshold against the illuminated mean.
    pub nsigma_illum: f64,
    /// MAD multiples for outlier rejection in the clean mean.
    pub mad_reject: f64,
    /// Floor for the median absolute deviation.
    pub min_mad: f64,
    /// Row provenance; "DUMMY ..." disables the row.
    pub pedigree: Option<String>,
}

/// One row of the template-lamp table (LAMPTAB).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LampRow {
    /// Lamp current selection key.
    pub lampset: Option<String>,
    /// Lamp name selection key.
    pub sclamp: Option<String>,
    /// Grating name selection key.
    pub opt_elem: Option<String>,
    /// Tabulated wavelengths, Angstroms, monotonically increasing.
    pub wavelength: Vec<f64>,
    /// Tabulated intensities, one per wavelength.
    pub flux: Vec<f64>,
    /// Row provenance.
    pub pedigree: Option<String>,
}

/// One row of the aperture-description table (APDESTAB).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApDesRow {
    /// Aperture name.
    pub aperture: String,
    /// Slit width along the dispersion axis, arcsec.
    pub width1: f64,
    /// Slit width along the cross-dispersion axis, arcsec.
    pub width2: f64,
    /// Offset from the nominal position, arcsec; feeds the
    /// incidence-angle correction.
    #[serde(default)]
    pub offset1: f64,
    /// Occulting-bar centres, arcsec from the slit centre.
    #[serde(default)]
    pub bar_locn: Vec<f64>,
    /// Occulting-bar widths, arcsec.
    #[serde(default)]
    pub bar_width: Vec<f64>,
    /// Row provenance.
    pub pedigree: Option<String>,
}

/// One row of the dispersion-coefficients table (DISPTAB).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DispRow {
    /// Grating name selection key.
    pub opt_elem: Option<String>,
    /// Central wavelength selection key.
    pub cenwave: Option<i32>,
    /// Y location the solution was measured at.
    pub a2center: f64,
    /// Aperture the solution was measured through.
    pub ref_aper: String,
    /// Dispersion coefficients (up to 10).
    pub coeff: Vec<f64>,
    /// Reference spectral order for the a4 correction.
    pub mref: Option<i32>,
    /// Y location (one-indexed) of order `mref`.
    pub yref: Option<f64>,
    /// a4 correction slope.
    pub a4corr: Option<f64>,
    /// Row provenance.
    pub pedigree: Option<String>,
}

/// One row of the incidence-angle-correction table (INANGTAB).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InangRow {
    /// Grating name selection key.
    pub opt_elem: Option<String>,
    /// Central wavelength selection key.
    pub cenwave: Option<i32>,
    /// First coefficient array; adds to the dispersion coefficients
    /// in proportion to the angle.
    pub coeff1: Vec<f64>,
    /// Second coefficient array; adds to the zeroth coefficient in
    /// proportion to the angle and its square.
    pub coeff2: Vec<f64>,
    /// Row provenance.
    pub pedigree: Option<String>,
}

/// One row of the spectrum-trace table (SPTRCTAB).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SpTraceRow {
    /// Grating name selection key.
    pub opt_elem: Option<String>,
    /// Central wavelength selection key.
    pub cenwave: Option<i32>,
    /// Y location of this order on the detector.
    pub a2center: f64,
    /// X centre of the trace.
    pub a1center: f64,
    /// Spectral order number.
    pub sporder: i32,
    /// Y displacement versus X, reference pixels.
    pub a2displ: Vec<f64>,
    /// Row provenance.
    pub pedigree: Option<String>,
}

/// One row of the cross-dispersion-scale table (SDCTAB), prism only.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SdcRow {
    /// Grating name selection key.
    pub opt_elem: Option<String>,
    /// Y reference pixel, one-indexed.
    pub a2center: f64,
    /// Cross-dispersion scale, arcsec per pixel.
    pub cdelt2: f64,
    /// Row provenance.
    pub pedigree: Option<String>,
}

/// All reference tables the I/O layer resolved for one exposure.  A
/// `None` table means its binding was absent or "N/A".
#[derive(Clone, Debug, Default)]
pub struct RefTables {
    /// Wavecal processing parameters.
    pub wcp: Option<Vec<WcpRow>>,
    /// Template lamp spectra.
    pub lamp: Option<Vec<LampRow>>,
    /// Aperture descriptions.
    pub apdes: Option<Vec<ApDesRow>>,
    /// Dispersion coefficients.
    pub disp: Option<Vec<DispRow>>,
    /// Incidence-angle corrections.
    pub inang: Option<Vec<InangRow>>,
    /// Spectrum traces.
    pub sptrc: Option<Vec<SpTraceRow>>,
    /// Prism cross-dispersion scale.
    pub sdc: Option<Vec<SdcRow>>,
    /// File names per table keyword, for history records.
    pub names: Vec<(String, String)>,
}

/// Processing parameters, either from the WCPTAB or the built-in
/// defaults.
#[derive(Clone, Copy, Debug)]
pub struct WcpParameters {
    /// Trim from the dispersion axis for the wavelength collapse.
    pub wl_trim1: i32,
    /// Trim from the cross-dispersion axis for the wavelength collapse.
    pub wl_trim2: i32,
    /// Trim from the dispersion axis for the spatial collapse.
    pub sp_trim1: i32,
    /// Trim from the cross-dispersion axis for the spatial collapse.
    pub sp_trim2: i32,
    /// Wavelength cross-correlation window (forced odd downstream).
    pub wl_range: i32,
    /// Spatial cross-correlation window (forced odd downstream).
    pub sp_range: i32,
    /// Cosmic-ray sigma threshold.
    pub nsigma_cr: f64,
    /// Sigma threshold against the illuminated mean.
    pub nsigma_illum: f64,
    /// MAD multiples for clean-mean rejection.
    pub mad_reject: f64,
    /// Floor for the MAD.
    pub min_mad: f64,
}

impl Default for WcpParameters {
    fn default() -> Self {
        Self {
            wl_trim1: 0,
            wl_trim2: 300,
            sp_trim1: 200,
            sp_trim2: 0,
            wl_range: 63,
            sp_range: 61,
            nsigma_cr: 3.0,
            nsigma_illum: 2.0,
            mad_reject: 3.0,
            min_mad: 1.0,
        }
    }
}

/// Calibration-lamp spectrum in pixel-edge form: `wl` holds `n + 1`
/// monotonically increasing edges and `flux[i]` is the integrated flux
/// between `wl[i]` and `wl[i + 1]`.
#[derive(Clone, Debug)]
pub struct LampSpectrum {
    /// Pixel-edge wavelengths, length `flux.len() + 1`.
    pub wl: Vec<f64>,
    /// Per-interval fluxes.
    pub flux: Vec<f64>,
}

impl LampSpectrum {
    /// Builds the edge representation from tabulated centre
    /// wavelengths: midpoints between successive values, with the two
    /// ends extrapolated by half the neighbouring spacing.
    ///
    /// # Errors
    ///
    /// Fails when fewer than two points are given, the arrays differ
    /// in length, or the wavelengths do not increase.
    pub fn from_tabulated(wavelength: &[f64], flux: &[f64]) -> Result<Self> {
        let n = wavelength.len();
        if n < 2 || flux.len() != n {
            return Err(Error::BadRow {
                table: "LAMPTAB",
                detail: format!("{} wavelengths, {} fluxes", n, flux.len()),
            });
        }
        if wavelength.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::BadRow {
                table: "LAMPTAB",
                detail: "wavelengths not increasing".into(),
            });
        }

        let mut wl = Vec::with_capacity(n + 1);
        wl.push(wavelength[0] - (wavelength[1] - wavelength[0]) / 2.0);
        for j in 1..n {
            wl.push((wavelength[j - 1] + wavelength[j]) / 2.0);
        }
        wl.push(wavelength[n - 1] + (wavelength[n - 1] - wavelength[n - 2]) / 2.0);

        Ok(Self {
            wl,
            flux: flux.to_vec(),
        })
    }

    /// Number of flux intervals.
    #[must_use]
    pub fn nelem(&self) -> usize {
        self.flux.len()
    }
}

/// An occulting bar on a long slit.
#[derive(Clone, Copy, Debug)]
pub struct Bar {
    /// Centre, arcsec from the slit centre.
    pub locn: f64,
    /// Width, arcsec.
    pub width: f64,
}

/// Slit geometry from the APDESTAB.
#[derive(Clone, Debug)]
pub struct ApertureDescription {
    /// Widths along the dispersion and cross-dispersion axes, arcsec.
    pub width: [f64; 2],
    /// Occulting bars, up to three.
    pub bars: ArrayVec<Bar, MAX_BARS>,
}

/// Prism cross-dispersion coordinate defaults from the SDCTAB.
#[derive(Clone, Copy, Debug)]
pub struct SdcInfo {
    /// Y reference pixel, one-indexed.
    pub a2center: f64,
    /// Cross-dispersion scale, degrees per pixel.
    pub cdelt2: f64,
}

impl Default for SdcInfo {
    fn default() -> Self {
        Self {
            a2center: PRISM_CRPIX2,
            cdelt2: PRISM_CDELT2,
        }
    }
}

/// Everything the driver needs from the reference tables, loaded once
/// per exposure.
#[derive(Clone, Debug)]
pub struct ReferenceSet {
    /// Processing parameters.
    pub wcp: WcpParameters,
    /// True when the parameters came from a WCP table row.
    pub wcp_from_table: bool,
    /// Lamp spectrum in pixel-edge form.
    pub lamp: LampSpectrum,
    /// Slit description (absent for echelle data).
    pub slit: Option<ApertureDescription>,
    /// Dispersion relation (echelle and prism only).
    pub disp: Option<DispersionRelation>,
    /// Spectrum traces (echelle and prism only).
    pub traces: Option<TraceList>,
    /// Cross-dispersion coordinate info (prism only).
    pub sdc: Option<SdcInfo>,
}

/// Result of resolving the reference tables: either a usable set, or
/// "nothing to do" because a required table row is DUMMY.
#[derive(Clone, Debug)]
pub enum LoadOutcome {
    /// All required tables resolved.
    Loaded(Box<ReferenceSet>),
    /// A required table had a DUMMY pedigree; the step is skipped
    /// cleanly.  Carries the table keyword for diagnostics.
    Dummy(&'static str),
}

/// Resolves every reference table needed for this exposure.
///
/// # Errors
///
/// Setup failures are hard errors: a required table absent, a required
/// row not found, unusable row contents.  A DUMMY row on a required
/// table is not an error; it yields [`LoadOutcome::Dummy`].
pub fn load(tables: &RefTables, info: &PrimaryInfo) -> Result<LoadOutcome> {
    let disperser = info.disperser();

    let (wcp, wcp_from_table) = load_wcp(tables, info)?;

    let lamp = match load_lamp(tables, info, disperser)? {
        Some(lamp) => lamp,
        None => return Ok(LoadOutcome::Dummy("LAMPTAB")),
    };

    let mut disp = None;
    let mut traces = None;
    if matches!(disperser, Disperser::Echelle | Disperser::Prism) {
        let (rel, ref_aper) = match load_disp(tables, info)? {
            Some(pair) => pair,
            None => return Ok(LoadOutcome::Dummy("DISPTAB")),
        };
        let mut rel = rel;

        let angle = load_angle(tables, info, &ref_aper)?;
        if !apply_inang(tables, info, &mut rel, angle)? {
            return Ok(LoadOutcome::Dummy("INANGTAB"));
        }
        rel.save_coeff();
        disp = Some(rel);

        traces = match load_traces(tables, info)? {
            Some(list) => Some(list),
            None => return Ok(LoadOutcome::Dummy("SPTRCTAB")),
        };
    }

    let mut slit = None;
    if disperser != Disperser::Echelle {
        slit = match load_apdes(tables, info)? {
            Some(ap) => Some(ap),
            None => return Ok(LoadOutcome::Dummy("APDESTAB")),
        };
    }

    let sdc = if disperser == Disperser::Prism {
        Some(load_sdc(tables, info))
    } else {
        None
    };

    Ok(LoadOutcome::Loaded(Box::new(ReferenceSet {
        wcp,
        wcp_from_table,
        lamp,
        slit,
        disp,
        traces,
        sdc,
    })))
}

fn load_wcp(tables: &RefTables, info: &PrimaryInfo) -> Result<(WcpParameters, bool)> {
    let Some(rows) = &tables.wcp else {
        return Ok((WcpParameters::default(), false));
    };

    let row = rows.iter().find(|r| {
        wildcard_eq(r.detector.as_deref(), detector_name(info.detector))
            && wildcard_eq(r.opt_elem.as_deref(), &info.opt_elem)
    });
    let Some(row) = row else {
        return Err(Error::RowNotFound {
            table: "WCPTAB",
            detail: format!(
                "DETECTOR {}, OPT_ELEM {}",
                detector_name(info.detector),
                info.opt_elem
            ),
        });
    };

    if is_dummy(row.pedigree.as_deref()) {
        println!("Warning  WCPTAB has PEDIGREE = DUMMY;");
        println!("Warning  default parameters will be used.");
        return Ok((WcpParameters::default(), false));
    }

    Ok((
        WcpParameters {
            wl_trim1: row.wl_trim1,
            wl_trim2: row.wl_trim2,
            sp_trim1: row.sp_trim1,
            sp_trim2: row.sp_trim2,
            wl_range: row.wl_range,
            sp_range: row.sp_range,
            nsigma_cr: row.nsigma_cr,
            nsigma_illum: row.nsigma_illum,
            mad_reject: row.mad_reject,
            min_mad: row.min_mad,
        },
        true,
    ))
}

fn load_lamp(
    tables: &RefTables,
    info: &PrimaryInfo,
    disperser: Disperser,
) -> Result<Option<LampSpectrum>> {
    let rows = tables
        .lamp
        .as_ref()
        .ok_or(Error::MissingReference("LAMPTAB"))?;

    // the prism shares lamps with the gratings; forcing the lamp name
    // keeps the row selection unique
    let sclamp = if disperser == Disperser::Prism {
        "PRISM"
    } else {
        info.sclamp.as_str()
    };

    let row = rows.iter().find(|r| {
        wildcard_eq(r.lampset.as_deref(), &info.lampset)
            && wildcard_eq(r.sclamp.as_deref(), sclamp)
            && wildcard_eq(r.opt_elem.as_deref(), &info.opt_elem)
    });
    let Some(row) = row else {
        return Err(Error::RowNotFound {
            table: "LAMPTAB",
            detail: format!("LAMP {sclamp}, LAMPSET {}", info.lampset),
        });
    };

    if is_dummy(row.pedigree.as_deref()) {
        println!("Warning  LAMPTAB has PEDIGREE = DUMMY.");
        return Ok(None);
    }

    Ok(Some(LampSpectrum::from_tabulated(
        &row.wavelength,
        &row.flux,
    )?))
}

fn load_disp(
    tables: &RefTables,
    info: &PrimaryInfo,
) -> Result<Option<(DispersionRelation, String)>> {
    let rows = tables
        .disp
        .as_ref()
        .ok_or(Error::MissingReference("DISPTAB"))?;

    // among matching rows, prefer the one measured closest to the
    // middle line of the detector
    let best = rows
        .iter()
        .filter(|r| {
            wildcard_eq(r.opt_elem.as_deref(), &info.opt_elem)
                && r.cenwave.map_or(true, |cw| cw == info.cenwave)
        })
        .min_by(|p, q| {
            let dp = (p.a2center - DETECTOR_MIDDLE_Y).abs();
            let dq = (q.a2center - DETECTOR_MIDDLE_Y).abs();
            dp.partial_cmp(&dq).unwrap()
        });
    let Some(row) = best else {
        return Err(Error::RowNotFound {
            table: "DISPTAB",
            detail: format!("OPT_ELEM {}, CENWAVE {}", info.opt_elem, info.cenwave),
        });
    };

    if row.coeff.len() > MAX_DISP_COEFF {
        return Err(Error::BadRow {
            table: "DISPTAB",
            detail: format!("{} dispersion coefficients", row.coeff.len()),
        });
    }

    if is_dummy(row.pedigree.as_deref()) {
        println!("Warning  DISPTAB has PEDIGREE = DUMMY.");
        return Ok(None);
    }

    let mut rel = DispersionRelation::from_coeff(&row.coeff);
    if let (Some(mref), Some(yref), Some(a4corr)) = (row.mref, row.yref, row.a4corr) {
        rel.mref = mref;
        rel.yref = yref - 1.0; // one-indexed in the table
        rel.a4corr = a4corr;
    }

    Ok(Some((rel, row.ref_aper.clone())))
}

/// Offset between the observation aperture and the aperture the
/// dispersion relation was measured through, arcsec.
fn load_angle(tables: &RefTables, info: &PrimaryInfo, ref_aper: &str) -> Result<f64> {
    let rows = tables
        .apdes
        .as_ref()
        .ok_or(Error::MissingReference("APDESTAB"))?;

    let find = |name: &str| {
        rows.iter()
            .find(|r| r.aperture.eq_ignore_ascii_case(name))
            .map(|r| r.offset1)
    };

    let ap_offset = find(&info.aperture).ok_or_else(|| Error::RowNotFound {
        table: "APDESTAB",
        detail: format!("APERTURE {}", info.aperture),
    })?;
    let ref_offset = find(ref_aper).ok_or_else(|| Error::RowNotFound {
        table: "APDESTAB",
        detail: format!("REF_APER {ref_aper}"),
    })?;

    Ok(ap_offset - ref_offset)
}

/// Applies the incidence-angle correction in place.  Returns false when
/// the matching row is DUMMY.
fn apply_inang(
    tables: &RefTables,
    info: &PrimaryInfo,
    disp: &mut DispersionRelation,
    angle: f64,
) -> Result<bool> {
    let rows = tables
        .inang
        .as_ref()
        .ok_or(Error::MissingReference("INANGTAB"))?;

    let row = rows.iter().find(|r| {
        wildcard_eq(r.opt_elem.as_deref(), &info.opt_elem)
            && r.cenwave.map_or(true, |cw| cw == info.cenwave)
    });
    let Some(row) = row else {
        return Err(Error::RowNotFound {
            table: "INANGTAB",
            detail: format!("OPT_ELEM {}, CENWAVE {}", info.opt_elem, info.cenwave),
        });
    };

    if is_dummy(row.pedigree.as_deref()) {
        println!("Warning  INANGTAB has PEDIGREE = DUMMY.");
        return Ok(false);
    }

    let ncoeff = if disp.ncoeff < row.coeff1.len() {
        println!(
            "Warning  {} dispersion coefficients, but {} incidence-angle coeff.",
            disp.ncoeff,
            row.coeff1.len()
        );
        disp.ncoeff
    } else {
        row.coeff1.len()
    };

    for i in 0..ncoeff {
        disp.coeff[i] += row.coeff1[i] * angle;
    }
    if !row.coeff2.is_empty() {
        disp.coeff[0] += row.coeff2[0] * angle;
    }
    if row.coeff2.len() > 1 {
        disp.coeff[0] += row.coeff2[1] * angle * angle;
    }
    if row.coeff2.len() > 2 {
        println!(
            "Warning  {} incidence-angle second coefficients, limit is 2;",
            row.coeff2.len()
        );
        println!("  the remaining coefficients will not be applied.");
    }

    Ok(true)
}

fn load_apdes(tables: &RefTables, info: &PrimaryInfo) -> Result<Option<ApertureDescription>> {
    let rows = tables
        .apdes
        .as_ref()
        .ok_or(Error::MissingReference("APDESTAB"))?;

    let row = rows
        .iter()
        .find(|r| r.aperture.eq_ignore_ascii_case(&info.aperture));
    let Some(row) = row else {
        return Err(Error::RowNotFound {
            table: "APDESTAB",
            detail: format!("APERTURE {}", info.aperture),
        });
    };

    if is_dummy(row.pedigree.as_deref()) {
        println!("Warning  APDESTAB has PEDIGREE = DUMMY.");
        return Ok(None);
    }

    if row.bar_locn.len() != row.bar_width.len() || row.bar_locn.len() > MAX_BARS {
        return Err(Error::BadRow {
            table: "APDESTAB",
            detail: format!(
                "{} bar locations, {} bar widths",
                row.bar_locn.len(),
                row.bar_width.len()
            ),
        });
    }

    let bars = row
        .bar_locn
        .iter()
        .zip(&row.bar_width)
        .map(|(&locn, &width)| Bar { locn, width })
        .collect();

    Ok(Some(ApertureDescription {
        width: [row.width1, row.width2],
        bars,
    }))
}

fn load_traces(tables: &RefTables, info: &PrimaryInfo) -> Result<Option<TraceList>> {
    let rows = tables
        .sptrc
        .as_ref()
        .ok_or(Error::MissingReference("SPTRCTAB"))?;

    let mut list = TraceList::new();
    for row in rows.iter().filter(|r| {
        wildcard_eq(r.opt_elem.as_deref(), &info.opt_elem)
            && r.cenwave.map_or(true, |cw| cw == info.cenwave)
    }) {
        if is_dummy(row.pedigree.as_deref()) {
            println!("Warning  SPTRCTAB has PEDIGREE = DUMMY.");
            return Ok(None);
        }
        list.insert(TraceRecord {
            a2center: row.a2center,
            a1center: row.a1center,
            sporder: row.sporder,
            a2displ: row.a2displ.clone(),
        });
    }

    if list.is_empty() {
        return Err(Error::RowNotFound {
            table: "SPTRCTAB",
            detail: format!("OPT_ELEM {}, CENWAVE {}", info.opt_elem, info.cenwave),
        });
    }

    Ok(Some(list))
}

fn load_sdc(tables: &RefTables, info: &PrimaryInfo) -> SdcInfo {
    let Some(rows) = &tables.sdc else {
        println!("Warning  SDCTAB not found; default values used.");
        return SdcInfo::default();
    };

    let row = rows
        .iter()
        .find(|r| wildcard_eq(r.opt_elem.as_deref(), &info.opt_elem));
    match row {
        Some(row) if !is_dummy(row.pedigree.as_deref()) => SdcInfo {
            a2center: row.a2center,
            cdelt2: row.cdelt2 / 3600.0, // arcsec to degrees per pixel
        },
        Some(_) => {
            println!("Warning  SDCTAB has PEDIGREE = DUMMY; defaults used.");
            SdcInfo::default()
        }
        None => {
            println!("Warning  PRISM not found in SDCTAB; defaults used.");
            SdcInfo::default()
        }
    }
}

/// Canonical keyword value for a detector, as used in WCPTAB rows.
#[must_use]
pub const fn detector_name(detector: Detector) -> &'static str {
    match detector {
        Detector::NuvMama => "NUV-MAMA",
        Detector::FuvMama => "FUV-MAMA",
        Detector::Ccd => "CCD",
    }
}
