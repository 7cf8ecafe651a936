//! Shift determination in the cross-dispersion (slit) direction.

use crate::bars::find_bars;
use crate::debug::DebugSink;
use crate::error::{Error, Result};
use crate::exposure::{Disperser, ImsetHeader, PixelFrame};
use crate::refdata::{ApertureDescription, WcpParameters};
use crate::stats::nint;
use crate::trace::TraceList;
use crate::xcorr::{find_ends, xc_short_slit};

/// Slit classification from the aperture name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlitType {
    /// Shorter than 5 arcsec; correlated against a boxcar model.
    ShortEchelle,
    /// Between 5 and 7 arcsec; located by its two edges.
    MediumEchelle,
    /// 7 arcsec or longer; located by its occulting bars.
    Long,
    /// The aperture name could not be interpreted.
    Unknown,
}

/// Boundary between short and medium echelle slits, arcsec.
const MEDIUM_SHORT: f64 = 5.0;
/// Boundary between medium and long slits, arcsec.
const MEDIUM_LONG: f64 = 7.0;

/// Reads the slit length out of the aperture name ("52X0.1" is 52
/// arcsec long) and classifies it.  The length precedes the 'X' when
/// the dispersion is along the first axis and follows it otherwise.
#[must_use]
pub fn which_slit(aperture: &str, dispaxis: i32) -> SlitType {
    let text = if dispaxis == 1 {
        aperture
    } else {
        match aperture.split_once(['X', 'x']) {
            Some((_, rest)) => rest,
            None => return SlitType::Unknown,
        }
    };

    let length = leading_number(text);
    if length == 0.0 {
        SlitType::Unknown
    } else if length < MEDIUM_SHORT {
        SlitType::ShortEchelle
    } else if length < MEDIUM_LONG {
        SlitType::MediumEchelle
    } else {
        SlitType::Long
    }
}

/// Parses the leading numeric prefix of `text`, zero when there is
/// none (the conversion rule of the original code).
fn leading_number(text: &str) -> f64 {
    let end = text
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(text.len());
    text[..end].parse().unwrap_or(0.0)
}

/// Finds the shift of the aperture along the slit.  `specweight` is
/// the collapsed spectrum from the wavelength finder, used to weight
/// the collapse along the dispersion axis.
///
/// Returns `Ok(None)` when the shift could not be determined for a
/// non-fatal reason (unknown slit type, no bars, bad data).
///
/// # Errors
///
/// Hard failures only; "could not measure" is `Ok(None)`.
#[allow(clippy::too_many_arguments)]
pub fn spatial_shift(
    header: &ImsetHeader,
    frame: &PixelFrame,
    slit: &ApertureDescription,
    traces: Option<&TraceList>,
    specweight: &[f64],
    aperture: &str,
    disperser: Disperser,
    wcp: &WcpParameters,
    sect1: [usize; 2],
    sect2: [usize; 2],
    verbose: bool,
    dbg: &mut dyn DebugSink,
) -> Result<Option<f64>> {
    let nv = frame.ny();
    if nv == 0 {
        println!("Warning  No data for spatial shift.");
        return Ok(None);
    }

    let crpix = header.crpix[1];
    let cdelt = header.cdelt[1];
    let length = slit.width[1];

    let mut v = vec![0.0_f64; nv];
    let mut qv = vec![0_u16; nv];

    if disperser == Disperser::Prism {
        let traces = traces.ok_or(Error::MissingReference("SPTRCTAB"))?;
        collapse_prism(header, frame, traces, sect1, sect2, &mut v, &mut qv);
    } else {
        // weighted average along each row; a row is bad only when
        // every contributing pixel was flagged
        for j in sect2[0]..=sect2[1] {
            let mut sumw = 0.0;
            for i in sect1[0]..=sect1[1] {
                if frame.dq[(j, i)] & header.sdqflags == 0 {
                    v[j] += f64::from(frame.sci[(j, i)]) * specweight[i];
                    sumw += specweight[i];
                }
            }
            if sumw > 0.0 {
                v[j] /= sumw;
            } else {
                qv[j] = header.sdqflags;
            }
        }
    }
    for (j, q) in qv.iter_mut().enumerate() {
        if j < sect2[0] || j > sect2[1] {
            *q = header.sdqflags;
        }
    }

    let slittype = which_slit(aperture, header.dispaxis);

    if dbg.active() {
        dbg.text("");
        let name = match slittype {
            SlitType::ShortEchelle => "short echelle slit",
            SlitType::MediumEchelle => "medium echelle slit",
            SlitType::Long => "long slit",
            SlitType::Unknown => "unknown",
        };
        dbg.text(&format!("# (spatial_shift) Slit type is:  {name}"));
        if slittype != SlitType::Long {
            dbg.text("# (spatial_shift) pixel, slit illumination, DQ:");
            for j in 0..nv {
                dbg.text(&format!("{} {:.6} {}", j + 1, v[j], qv[j]));
            }
        }
    }

    let result = match slittype {
        SlitType::ShortEchelle => xc_short_slit(
            length,
            &v,
            &qv,
            header.sdqflags,
            crpix,
            cdelt,
            wcp.sp_range,
            dbg,
        ),
        SlitType::MediumEchelle => find_ends(
            length,
            &v,
            &qv,
            crpix,
            cdelt,
            wcp.sp_range,
            verbose,
            dbg,
        ),
        SlitType::Long => {
            if slit.bars.is_empty() {
                println!(
                    "Warning  Aperture `{aperture}' has no occulting bars, and without them"
                );
                println!("         we can't find the shift in the spatial direction.");
                return Ok(None);
            }
            find_bars(
                &slit.bars,
                &v,
                &qv,
                crpix,
                cdelt,
                wcp.sp_range,
                verbose,
                dbg,
            )
        }
        SlitType::Unknown => {
            println!("Warning  Aperture `{aperture}' is not supported for a wavecal.");
            Err(Error::NoGoodData)
        }
    };

    match result {
        Ok(shift) => Ok(Some(shift)),
        Err(Error::NoGoodData) => Ok(None),
        Err(other) => Err(other),
    }
}

/// Prism collapse: the spectrum is not rectified, so each row is
/// sampled along the interpolated spectral trace rather than straight
/// across, with linear interpolation in Y.
fn collapse_prism(
    header: &ImsetHeader,
    frame: &PixelFrame,
    traces: &TraceList,
    sect1: [usize; 2],
    sect2: [usize; 2],
    v: &mut [f64],
    qv: &mut [u16],
) {
    let in_ref_coords = header.ltm[0] == 1.0
        && header.ltm[1] == 1.0
        && header.ltv[0] == 0.0
        && header.ltv[1] == 0.0;

    for j in sect2[0]..=sect2[1] {
        let y = if in_ref_coords {
            j as f64
        } else {
            (j as f64 - header.ltv[1]) / header.ltm[1]
        };
        let Some(trace_y) = traces.interpolate(y) else {
            qv[j] = header.sdqflags;
            continue;
        };

        let mut ngood = 0_usize;
        for i in sect1[0]..=sect1[1] {
            let ydispl = if in_ref_coords {
                trace_y.a2displ.get(i).copied().unwrap_or(0.0)
            } else {
                let x = (i as f64 - header.ltv[0]) / header.ltm[0];
                let i_r = nint(x).max(0) as usize;
                trace_y.a2displ.get(i_r).copied().unwrap_or(0.0) * header.ltm[1]
            };
            let y_im = j as f64 + ydispl;

            let (value, flag) = sample_column(frame, i, y_im);
            if flag & header.sdqflags == 0 {
                v[j] += value;
                ngood += 1;
            }
        }
        qv[j] = if ngood == 0 { header.sdqflags } else { 0 };
    }
}

/// Linear interpolation of the science value at fractional row `y_im`
/// of column `i`; the DQ flag comes from the nearer pixel.  Off the
/// image the value is zero with a non-zero flag.
fn sample_column(frame: &PixelFrame, i: usize, y_im: f64) -> (f64, u16) {
    let ny = frame.ny();
    if y_im < 0.0 {
        return (0.0, 1);
    }
    let j = y_im as usize;
    if j + 1 >= ny {
        return (0.0, 1);
    }

    let p = y_im - j as f64;
    let q = 1.0 - p;
    let value = q * f64::from(frame.sci[(j, i)]) + p * f64::from(frame.sci[(j + 1, i)]);
    let flag = if p > 0.5 {
        frame.dq[(j + 1, i)]
    } else {
        frame.dq[(j, i)]
    };
    (value, flag)
}
