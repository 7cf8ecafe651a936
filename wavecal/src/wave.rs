//! Shift determination in the dispersion direction.
//!
//! The image is collapsed across the slit into a 1-D spectrum, a
//! template is synthesised from the lamp spectrum through the
//! dispersion relation, and the two are cross-correlated.

use crate::debug::DebugSink;
use crate::dispersion::{DispersionRelation, MAX_PRISM_WAVELENGTH};
use crate::error::{Error, Result};
use crate::exposure::{Disperser, ImsetHeader, PixelFrame};
use crate::refdata::{ApertureDescription, LampSpectrum, WcpParameters};
use crate::template::{conv_slit, integrate_lamp};
use crate::xcorr::{clamp_range, xc_peak};

/// Extra pixels chopped off the template beyond the first/last good
/// data pixel, to allow for mode-select slop.
pub const CHOP_EXTRA: usize = 10;

/// Output of the wavelength finder: the shift (when it could be
/// determined) and the collapsed 1-D spectrum, which the spatial
/// finder reuses as weights.
pub struct WaveShiftResult {
    /// Shift in image pixels; `None` when the data did not support a
    /// measurement.
    pub shift: Option<f64>,
    /// Median-subtracted, non-negative collapsed spectrum.
    pub specweight: Vec<f64>,
}

/// Finds the shift of the wavecal spectrum in the dispersion
/// direction.  `sect1`/`sect2` are the inclusive pixel ranges (first
/// axis, second axis) to use; everything outside is treated as bad.
///
/// # Errors
///
/// Hard failures only (geometry, bad cross-correlation setup); running
/// out of usable data degrades `shift` to `None` instead.
#[allow(clippy::too_many_arguments)]
pub fn wave_shift(
    header: &ImsetHeader,
    frame: &PixelFrame,
    slit: &ApertureDescription,
    disp: Option<&DispersionRelation>,
    lamp: &LampSpectrum,
    disperser: Disperser,
    wcp: &WcpParameters,
    sect1: [usize; 2],
    sect2: [usize; 2],
    dbg: &mut dyn DebugSink,
) -> Result<WaveShiftResult> {
    let nwl = frame.nx();
    if nwl == 0 {
        println!("Warning  No data for shift in dispersion direction.");
        return Ok(WaveShiftResult {
            shift: None,
            specweight: Vec::new(),
        });
    }

    // collapse across the slit; a column is bad only if every pixel in
    // the sum was flagged
    let mut v = vec![0.0_f64; nwl];
    let mut qv = vec![0_u16; nwl];
    for i in 0..nwl {
        if i < sect1[0] || i > sect1[1] {
            qv[i] = header.sdqflags;
            continue;
        }
        let mut ngood = 0_usize;
        for j in sect2[0]..=sect2[1] {
            if frame.dq[(j, i)] & header.sdqflags == 0 {
                v[i] += f64::from(frame.sci[(j, i)]);
                ngood += 1;
            }
        }
        if ngood > 0 {
            v[i] /= ngood as f64;
        } else {
            qv[i] = header.sdqflags;
        }
    }

    // the spectrum doubles as the weight array for the spatial finder
    let median = crate::stats::median(&v);
    for value in &mut v {
        *value = (*value - median).max(0.0);
    }
    if dbg.active() {
        dbg.text(&format!(
            "# (wave_shift) {median:.6} has been subtracted from the observed spectrum,"
        ));
        dbg.text("# and values below zero truncated to zero.");
    }

    // slit width in pixels along the dispersion axis; the cross
    // dispersion cdelt is in degrees, and the two axes may be binned
    // differently
    let scale = header.scale();
    let slitwidth =
        slit.width[0] / (header.cdelt[1] * (scale[0] / scale[1]) * 3600.0);

    let shift = match xc_wave(
        header, &v, &qv, slitwidth, disp, lamp, disperser, wcp, dbg,
    ) {
        Ok(shift) => Some(shift),
        Err(Error::NoGoodData) => None,
        Err(other) => return Err(other),
    };

    Ok(WaveShiftResult {
        shift,
        specweight: v,
    })
}

/// Wavelength of image pixel coordinate `pixel` (dispersion axis).
fn pix_to_wl(
    header: &ImsetHeader,
    disp: Option<&DispersionRelation>,
    disperser: Disperser,
    max_pixel: f64,
    pixel: f64,
) -> f64 {
    match disperser {
        Disperser::Rectified => {
            header.crval[0] + (pixel - header.crpix[0]) * header.cdelt[0]
        }
        Disperser::Prism => {
            let Some(disp) = disp else { return 0.0 };
            if pixel > max_pixel {
                // the dispersion relation is unreliable out here
                MAX_PRISM_WAVELENGTH
            } else {
                let x_ref = (pixel - header.ltv[0]) / header.ltm[0];
                disp.prism_wavelength(x_ref)
            }
        }
        Disperser::Echelle => 0.0,
    }
}

/// Builds the 1-D template, chops its flagged ends, and locates the
/// cross-correlation peak.
#[allow(clippy::too_many_arguments)]
fn xc_wave(
    header: &ImsetHeader,
    v: &[f64],
    qv: &[u16],
    slitwidth: f64,
    disp: Option<&DispersionRelation>,
    lamp: &LampSpectrum,
    disperser: Disperser,
    wcp: &WcpParameters,
    dbg: &mut dyn DebugSink,
) -> Result<f64> {
    let nwl = v.len();
    let range = clamp_range(wcp.wl_range, nwl);

    // the prism relation turns over at large pixel numbers; find where
    let max_pixel = match (disperser, disp) {
        (Disperser::Prism, Some(d)) => {
            d.prism_turnover(nwl, header.ltm[0], header.ltv[0])
        }
        _ => f64::from(u32::MAX),
    };

    let mut tspec = integrate_lamp(
        lamp,
        |pixel| pix_to_wl(header, disp, disperser, max_pixel, pixel),
        nwl,
    );
    conv_slit(slitwidth, &mut tspec);
    chop_template(&mut tspec, qv, header.sdqflags);

    if dbg.active() {
        dbg.text("# (xc_wave) pixel, wavelength, convolved template, observed spectrum, DQ:");
        for i in 0..nwl {
            let wl = pix_to_wl(header, disp, disperser, max_pixel, i as f64);
            dbg.text(&format!(
                "{} {:.4} {:.6} {:.6} {}",
                i + 1,
                wl,
                tspec[i],
                v[i],
                qv[i]
            ));
        }
    }

    xc_peak(v, qv, &tspec, range, header.sdqflags, dbg)
}

/// Zeroes the template wherever the observed spectrum is flagged bad
/// at the ends of the array, stepping [`CHOP_EXTRA`] pixels further
/// inward.  If the whole template would vanish, it is left untouched.
fn chop_template(tspec: &mut [f64], qv: &[u16], sdqflags: u16) {
    let nwl = tspec.len();
    let first_good = qv
        .iter()
        .position(|&q| q & sdqflags == 0)
        .unwrap_or(0);
    let last_good = qv
        .iter()
        .rposition(|&q| q & sdqflags == 0)
        .unwrap_or(nwl - 1);

    let first_good = first_good + CHOP_EXTRA;
    if first_good >= nwl {
        return;
    }
    let Some(last_good) = last_good.checked_sub(CHOP_EXTRA) else {
        return;
    };

    for t in &mut tspec[..first_good] {
        *t = 0.0;
    }
    for t in &mut tspec[last_good + 1..] {
        *t = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NullSink;
    use crate::dq::ALL_SERIOUS;
    use arrayvec::ArrayVec;
    use float_cmp::assert_approx_eq;
    use ndarray::Array2;

    fn lamp_with_lines() -> LampSpectrum {
        // smooth emission lines on a flat floor, 1 Angstrom sampling
        let wavelength: Vec<f64> = (0..2000).map(|i| 3000.0 + f64::from(i)).collect();
        let flux: Vec<f64> = wavelength
            .iter()
            .map(|&wl| {
                let mut f = 5.0;
                for line in [3500.0, 3800.0, 4100.0] {
                    f += 400.0 * (-((wl - line) / 6.0_f64).powi(2) / 2.0).exp();
                }
                f
            })
            .collect();
        LampSpectrum::from_tabulated(&wavelength, &flux).unwrap()
    }

    fn narrow_slit() -> ApertureDescription {
        ApertureDescription {
            width: [0.1, 25.0],
            bars: ArrayVec::new(),
        }
    }

    /// Rectified header with 2 Angstroms per pixel along X and
    /// 0.05 arcsec per pixel along Y.
    fn rectified_header(crpix1: f64) -> ImsetHeader {
        let mut hdr = ImsetHeader::new(1, Some(ALL_SERIOUS), true);
        hdr.crpix = [crpix1, 32.0];
        hdr.crval = [3800.0, 0.0];
        hdr.cdelt = [2.0, 0.05 / 3600.0];
        hdr.exptime = 1.0;
        hdr
    }

    /// Paints the lamp template (per the same integration the finder
    /// uses) into every row of a synthetic frame, shifted by `shift`
    /// pixels: a wavecal observed at a slightly wrong mechanism
    /// position.
    fn synthetic_frame(nx: usize, ny: usize, shift: f64) -> PixelFrame {
        let lamp = lamp_with_lines();
        let hdr = rectified_header(nx as f64 / 2.0 - 1.0 + shift);
        let spec = integrate_lamp(
            &lamp,
            |pixel| hdr.crval[0] + (pixel - hdr.crpix[0]) * hdr.cdelt[0],
            nx,
        );
        let mut sci = Array2::<f32>::zeros((ny, nx));
        for j in 0..ny {
            for i in 0..nx {
                sci[(j, i)] = spec[i] as f32;
            }
        }
        PixelFrame::new(sci, Array2::zeros((ny, nx))).unwrap()
    }

    #[test]
    fn recovers_known_shift() {
        let nx = 400;
        let ny = 64;
        let shift = 3.2;
        let frame = synthetic_frame(nx, ny, shift);
        let hdr = rectified_header(nx as f64 / 2.0 - 1.0);

        let result = wave_shift(
            &hdr,
            &frame,
            &narrow_slit(),
            None,
            &lamp_with_lines(),
            Disperser::Rectified,
            &WcpParameters::default(),
            [0, nx - 1],
            [0, ny - 1],
            &mut NullSink,
        )
        .unwrap();

        assert_approx_eq!(f64, result.shift.unwrap(), shift, epsilon = 0.1);
        assert_eq!(result.specweight.len(), nx);
        // the weights are non-negative by construction
        assert!(result.specweight.iter().all(|&w| w >= 0.0));
    }

    #[test]
    fn all_bad_columns_give_no_shift() {
        let nx = 200;
        let ny = 16;
        let mut frame = synthetic_frame(nx, ny, 0.0);
        frame.dq.fill(4); // DETECTORPROB everywhere
        let hdr = rectified_header(nx as f64 / 2.0 - 1.0);

        let result = wave_shift(
            &hdr,
            &frame,
            &narrow_slit(),
            None,
            &lamp_with_lines(),
            Disperser::Rectified,
            &WcpParameters::default(),
            [0, nx - 1],
            [0, ny - 1],
            &mut NullSink,
        )
        .unwrap();

        assert!(result.shift.is_none());
    }

    #[test]
    fn shift_outside_window_fails_cleanly() {
        let nx = 400;
        let ny = 16;
        // far beyond the 63-pixel search window
        let frame = synthetic_frame(nx, ny, 80.0);
        let hdr = rectified_header(nx as f64 / 2.0 - 1.0);

        let result = wave_shift(
            &hdr,
            &frame,
            &narrow_slit(),
            None,
            &lamp_with_lines(),
            Disperser::Rectified,
            &WcpParameters::default(),
            [0, nx - 1],
            [0, ny - 1],
            &mut NullSink,
        )
        .unwrap();

        assert!(result.shift.is_none());
    }

    #[test]
    fn chop_zeroes_flagged_ends() {
        let mut tspec = vec![1.0; 60];
        let mut qv = vec![0_u16; 60];
        for q in &mut qv[..5] {
            *q = 4;
        }
        for q in &mut qv[55..] {
            *q = 4;
        }
        chop_template(&mut tspec, &qv, 4);
        // zero through first_good + CHOP_EXTRA - 1 = 14
        assert_approx_eq!(f64, tspec[14], 0.0);
        assert_approx_eq!(f64, tspec[15], 1.0);
        assert_approx_eq!(f64, tspec[44], 1.0);
        assert_approx_eq!(f64, tspec[45], 0.0);
    }

    #[test]
    fn chop_leaves_template_when_everything_would_vanish() {
        // only one good pixel, so close to the end that chopping would
        // wipe the whole template
        let mut tspec = vec![1.0; 15];
        let mut qv = vec![4_u16; 15];
        qv[8] = 0;
        chop_template(&mut tspec, &qv, 4);
        assert!(tspec.iter().all(|&t| t == 1.0));
    }
}
