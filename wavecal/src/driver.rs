//! The imset loop: resolve reference data once, then find and record
//! the shifts for every imset of the exposure.

use crate::debug::DebugSink;
use crate::dq::DqFlags;
use crate::echelle::EchelleFinder;
use crate::error::Result;
use crate::exposure::{Detector, Disperser, Exposure, ImsetHeader, PrimaryInfo};
use crate::refdata::{load, LoadOutcome, RefTables, ReferenceSet, WcpParameters};
use crate::spatial::spatial_shift;
use crate::stats::nint;
use crate::template::TemplateParams;
use crate::trace::TraceList;
use crate::wave::wave_shift;

/// Keyword value recorded when a shift could not be determined.
pub const UNDEFINED_SHIFT: f64 = -9999.0;

/// Any shift at least this large (absolute value) is certainly wrong
/// and is degraded to [`UNDEFINED_SHIFT`].
pub const UNREASONABLE_SHIFT: f64 = 1000.0;

/// Per-run options, populated from the command line by the caller.
#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    /// Input name, used in messages only.
    pub input: String,
    /// Print extra diagnostics.
    pub verbose: bool,
    /// Print a timestamp after each major step.
    pub print_time: bool,
    /// Angle of a long slit used with an echelle, radians.
    pub slit_angle: f64,
    /// Time-dependent trace rotation, degrees; zero disables it.
    pub trace_rotation: f64,
}

impl RunConfig {
    /// Configuration for a named input with everything else default.
    #[must_use]
    pub fn for_input(input: &str) -> Self {
        Self {
            input: input.to_owned(),
            ..Self::default()
        }
    }
}

/// How the run ended, when it did not fail outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Shifts were determined (or recorded as undefined) for every
    /// imset.
    Completed,
    /// A required reference table was DUMMY; sentinel shifts were
    /// recorded and the step was skipped cleanly.
    Skipped,
}

/// Image sections used for the two collapses, zero-indexed inclusive.
#[derive(Clone, Copy, Debug)]
struct Sections {
    wl1: [usize; 2],
    wl2: [usize; 2],
    sp1: [usize; 2],
    sp2: [usize; 2],
}

/// Processes one wavecal exposure end to end.
///
/// # Errors
///
/// Setup failures (missing keywords, missing reference rows, I/O) are
/// returned; shift-finding failures are recorded per imset as
/// [`UNDEFINED_SHIFT`] and do not fail the run.
pub fn wavecal(
    exposure: &mut dyn Exposure,
    tables: &RefTables,
    config: &RunConfig,
    dbg: &mut dyn DebugSink,
) -> Result<Outcome> {
    let info = exposure.primary()?;
    let disperser = info.disperser();

    let refs = match load(tables, &info)? {
        LoadOutcome::Loaded(refs) => refs,
        LoadOutcome::Dummy(keyword) => {
            println!("Warning  {keyword} has PEDIGREE = DUMMY; wavecal processing skipped.");
            return skip_all(exposure, tables, &info);
        }
    };

    if config.verbose {
        print_wcp(&refs.wcp, disperser, info.detector, config.slit_angle);
    }

    let started = std::time::Instant::now();
    let mut finder = EchelleFinder::new();
    let mut ref_names_printed = false;

    for extver in 1..=info.nimages {
        println!();
        println!("         Begin imset {extver}");
        if dbg.active() {
            dbg.text(&format!("# Begin imset {extver} ###"));
        }

        let (mut header, mut frame) = exposure.read_imset(extver)?;
        let (nx, ny) = (frame.nx(), frame.ny());

        // prism coordinates in the header describe the sky; replace the
        // cross-dispersion axis with values from the SDC table
        if let Some(sdc) = &refs.sdc {
            header.crpix[1] = (sdc.a2center - 1.0) * header.ltm[1] + header.ltv[1];
            header.cdelt[1] = sdc.cdelt2 / header.ltm[1];
            header.crpix[0] = 0.0;
            header.cdelt[0] = 0.0;
            header.crval = [0.0; 2];
        }

        // traces may be rotated by a time-dependent angle supplied by
        // the caller
        let traces: Option<TraceList> = refs.traces.as_ref().map(|list| {
            let mut list = list.clone();
            if config.trace_rotation != 0.0 {
                list.rotate(config.trace_rotation);
                if config.verbose {
                    println!(
                        "         trace was rotated by = {:.6} degree.",
                        config.trace_rotation
                    );
                }
            }
            list
        });

        let (mut w_shift, mut s_shift);

        if header.usable() && nx > 0 && ny > 0 {
            let sections = scale_trim(&refs.wcp, &header, nx, ny);
            if config.verbose {
                print_sections(&sections, &header, disperser);
            }

            println!();
            println!("         WAVECORR performing ...");
            if !ref_names_printed {
                print_ref_names(tables);
                ref_names_printed = true;
            }

            // flag cosmic rays on the CCD before any collapse
            if info.detector == Detector::Ccd
                && header.sdqflags & DqFlags::DATAREJECT.bits() != 0
            {
                println!();
                println!("         FLAGCR performing ...");
                let ncr =
                    crate::crflag::flag_cr(&header, &refs.wcp, &mut frame, extver, dbg);
                if config.verbose {
                    println!("         {ncr} pixels flagged as cosmic rays.");
                }
            }

            let shifts = find_shifts(
                &info, &header, &frame, &refs, traces.as_ref(), disperser, config,
                &sections, &mut finder, extver, dbg,
            )?;
            w_shift = shifts.0;
            s_shift = shifts.1;

            report_shift("dispersion", w_shift);
            report_shift("spatial", s_shift);
        } else {
            let msg = format!("wavecal imset {extver} skipped (IMSET_OK = F)");
            println!("Warning  {msg}");
            if dbg.active() {
                dbg.text(&format!("# Warning:  {msg}"));
            }
            w_shift = UNDEFINED_SHIFT;
            s_shift = UNDEFINED_SHIFT;
        }

        // convert from image pixels to reference pixels
        scale_ref(&header, &mut w_shift, &mut s_shift);

        // the keyword assignment follows the dispersion axis
        if header.dispaxis == 2 {
            exposure.write_shifts(extver, s_shift, w_shift)?;
        } else {
            exposure.write_shifts(extver, w_shift, s_shift)?;
        }

        if extver == 1 {
            exposure.append_history("COMPLETE", &history_lines(tables, "complete"))?;
        }

        if config.print_time {
            println!(
                "         {:.1} s elapsed, ending imset {extver}",
                started.elapsed().as_secs_f64()
            );
        }
    }

    Ok(Outcome::Completed)
}

/// Runs the shift finders appropriate to the disperser class.
#[allow(clippy::too_many_arguments)]
fn find_shifts(
    info: &PrimaryInfo,
    header: &ImsetHeader,
    frame: &crate::exposure::PixelFrame,
    refs: &ReferenceSet,
    traces: Option<&TraceList>,
    disperser: Disperser,
    config: &RunConfig,
    sections: &Sections,
    finder: &mut EchelleFinder,
    extver: usize,
    dbg: &mut dyn DebugSink,
) -> Result<(f64, f64)> {
    let (w_shift, s_shift);

    if disperser == Disperser::Echelle {
        let disp = refs
            .disp
            .as_ref()
            .ok_or(crate::error::Error::MissingReference("DISPTAB"))?;
        let traces = traces.ok_or(crate::error::Error::MissingReference("SPTRCTAB"))?;
        let params = TemplateParams {
            lamp: &refs.lamp,
            disp,
            traces,
            cenwave: info.cenwave,
            ltm: header.ltm,
            ltv: header.ltv,
            cdelt2: header.cdelt[1],
            aper_fov: &info.aper_fov,
            slit_angle: config.slit_angle,
        };
        let (w, s) =
            finder.find_shifts(&params, frame, sections.wl1, sections.wl2, extver, dbg)?;
        w_shift = sanitize(Some(w));
        s_shift = sanitize(Some(s));
    } else {
        let slit = refs
            .slit
            .as_ref()
            .ok_or(crate::error::Error::MissingReference("APDESTAB"))?;

        let wave = wave_shift(
            header,
            frame,
            slit,
            refs.disp.as_ref(),
            &refs.lamp,
            disperser,
            &refs.wcp,
            sections.wl1,
            sections.wl2,
            dbg,
        )?;
        w_shift = sanitize(wave.shift);

        let spatial = spatial_shift(
            header,
            frame,
            slit,
            traces,
            &wave.specweight,
            &info.aperture,
            disperser,
            &refs.wcp,
            sections.sp1,
            sections.sp2,
            config.verbose,
            dbg,
        )?;
        s_shift = sanitize(spatial);
    }

    Ok((w_shift, s_shift))
}

/// Maps an optional shift to the keyword value, policing the
/// plausibility limit.
fn sanitize(shift: Option<f64>) -> f64 {
    match shift {
        Some(s) if s.is_finite() && s.abs() < UNREASONABLE_SHIFT => s,
        _ => UNDEFINED_SHIFT,
    }
}

fn report_shift(direction: &str, shift: f64) {
    if shift == UNDEFINED_SHIFT {
        println!("Warning  Shift in {direction} direction could not be determined.");
    } else {
        println!("         Shift in {direction} direction is {shift:.3} pixels.");
    }
}

/// Writes sentinel shifts for every imset when a required reference
/// table is DUMMY, so downstream tooling still finds the keywords.
fn skip_all(
    exposure: &mut dyn Exposure,
    tables: &RefTables,
    info: &PrimaryInfo,
) -> Result<Outcome> {
    for extver in 1..=info.nimages {
        exposure.write_shifts(extver, UNDEFINED_SHIFT, UNDEFINED_SHIFT)?;
    }
    exposure.append_history(
        "SKIPPED",
        &history_lines(tables, "skipped due to dummy reference file"),
    )?;
    Ok(Outcome::Skipped)
}

fn history_lines(tables: &RefTables, disposition: &str) -> Vec<String> {
    let mut lines = vec![format!("WAVECORR {disposition} ...")];
    for (keyword, name) in &tables.names {
        lines.push(format!("  {keyword}={name}"));
    }
    lines
}

/// Scales the trim margins by the binning factors and converts them to
/// inclusive image sections; margins too large for the image fall back
/// to the full extent.
fn scale_trim(wcp: &WcpParameters, header: &ImsetHeader, nx: usize, ny: usize) -> Sections {
    let scale = header.scale();
    Sections {
        wl1: scale_one(wcp.wl_trim1, scale[0], nx),
        wl2: scale_one(wcp.wl_trim2, scale[1], ny),
        sp1: scale_one(wcp.sp_trim1, scale[0], nx),
        sp2: scale_one(wcp.sp_trim2, scale[1], ny),
    }
}

fn scale_one(trim: i32, scale: f64, npix: usize) -> [usize; 2] {
    let itrim = nint(f64::from(trim) / scale).max(0) as usize;

    let first = itrim.min(npix.saturating_sub(1));
    let last = npix.saturating_sub(1).saturating_sub(itrim);

    if last <= first {
        [0, npix.saturating_sub(1)]
    } else {
        [first, last]
    }
}

/// Multiplies defined shifts by the binning scale so they are recorded
/// in reference pixels.
fn scale_ref(header: &ImsetHeader, w_shift: &mut f64, s_shift: &mut f64) {
    let scale = header.scale();
    let (w_scale, s_scale) = match header.dispaxis {
        1 => (scale[0], scale[1]),
        2 => (scale[1], scale[0]),
        _ => return,
    };
    if *w_shift != UNDEFINED_SHIFT {
        *w_shift *= w_scale;
    }
    if *s_shift != UNDEFINED_SHIFT {
        *s_shift *= s_scale;
    }
}

fn print_wcp(wcp: &WcpParameters, disperser: Disperser, detector: Detector, slit_angle: f64) {
    if disperser == Disperser::Echelle {
        if slit_angle != 0.0 {
            println!(
                "         Slit angle = {:.5} degrees",
                slit_angle.to_degrees()
            );
        }
        println!("         Wavecal parameters are:");
        println!("         WL_TRIM1 = {}", wcp.wl_trim1);
        println!("         WL_TRIM2 = {}", wcp.wl_trim2);
    } else {
        if slit_angle != 0.0 {
            println!(
                "Warning  Slit angle was specified for non-echelle data, will be ignored."
            );
        }
        println!("         Wavecal parameters are:");
        println!("         WL_TRIM1 = {}", wcp.wl_trim1);
        println!("         WL_TRIM2 = {}", wcp.wl_trim2);
        println!("         SP_TRIM1 = {}", wcp.sp_trim1);
        println!("         SP_TRIM2 = {}", wcp.sp_trim2);
        println!("         WL_RANGE = {}", wcp.wl_range);
        println!("         SP_RANGE = {}", wcp.sp_range);
    }
    if detector == Detector::Ccd {
        println!("         NSIGMA_CR = {:.6}", wcp.nsigma_cr);
        println!("         NSIGMA_ILLUM = {:.6}", wcp.nsigma_illum);
        println!("         MAD_REJECT = {:.6}", wcp.mad_reject);
        println!("         MIN_MAD = {:.6}", wcp.min_mad);
    }
}

fn print_sections(sections: &Sections, header: &ImsetHeader, disperser: Disperser) {
    if disperser == Disperser::Echelle {
        println!("         Section to use for finding shift:");
        println!(
            "             {}:{}, {}:{}",
            sections.wl1[0] + 1,
            sections.wl1[1] + 1,
            sections.wl2[0] + 1,
            sections.wl2[1] + 1
        );
    } else {
        println!("         Section to use for finding shift in dispersion direction:");
        println!(
            "             {}:{}, {}:{}",
            sections.wl1[0] + 1,
            sections.wl1[1] + 1,
            sections.wl2[0] + 1,
            sections.wl2[1] + 1
        );
        println!("         Section to use for finding shift in spatial direction:");
        println!(
            "             {}:{}, {}:{}",
            sections.sp1[0] + 1,
            sections.sp1[1] + 1,
            sections.sp2[0] + 1,
            sections.sp2[1] + 1
        );
    }

    let scale = header.scale();
    if scale[0] == 1.0 && scale[1] == 1.0 {
        println!("         Image pixels are reference pixel size.");
    } else {
        println!(
            "         Image pixel size is {:.2} by {:.2} reference pixels.",
            scale[0], scale[1]
        );
    }
}

fn print_ref_names(tables: &RefTables) {
    for (keyword, name) in &tables.names {
        println!("         {keyword}  {name}");
    }
}
