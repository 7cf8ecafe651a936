//! One-dimensional cross-correlation and sub-pixel peak location.

use crate::debug::DebugSink;
use crate::error::{Error, Result};
use crate::stats::nint;
use itertools::Itertools;

/// Smallest usable cross-correlation window: a quadratic needs three
/// points around the peak.
pub const MIN_RANGE: usize = 3;

/// Maximum spread between two edge measurements before a warning.
pub const MAX_DIFF_WARNING: f64 = 5.0;

/// Maximum spread between two edge measurements before the result is
/// rejected.
pub const MAX_DIFF_ERROR: f64 = 10.0;

/// Clamps a requested window to a legal odd size for `nelem` data
/// elements.
#[must_use]
pub fn clamp_range(range: i32, nelem: usize) -> usize {
    let mut range = range.max(0) as usize;
    if range > nelem / 2 {
        range = nelem / 2;
    }
    if range < MIN_RANGE {
        range = MIN_RANGE;
    }
    if range % 2 == 0 {
        range += 1;
    }
    range
}

/// Sub-pixel offset of the vertex of the parabola through three
/// equally spaced samples, relative to the middle one.  Zero when the
/// samples have no curvature.
#[must_use]
pub fn peak_quad3(y: &[f64; 3]) -> f64 {
    let denom = y[0] - 2.0 * y[1] + y[2];
    if denom == 0.0 {
        0.0
    } else {
        (y[0] - y[2]) / (2.0 * denom)
    }
}

/// Cross-correlates `x` against `y` over an odd window of `range`
/// lags.  The middle element of the result corresponds to zero shift.
/// Elements of `x` flagged by `qx & sdqflags` are treated as zero, and
/// `(range - 1) / 2` elements are skipped at each end so every lag sums
/// the same number of products.
///
/// # Errors
///
/// Fails when the window is not odd, smaller than [`MIN_RANGE`], or
/// larger than the data, and with [`Error::NoGoodData`] when every
/// usable element of `x` is flagged.
pub fn cross_corr(
    x: &[f64],
    qx: &[u16],
    y: &[f64],
    sdqflags: u16,
    range: usize,
) -> Result<Vec<f64>> {
    let nv = x.len();
    if range < MIN_RANGE || range % 2 == 0 || range > nv {
        return Err(Error::CrossCorrRange { range, nelem: nv });
    }

    let skip = (range - 1) / 2;

    let mut tx = vec![0.0; nv];
    let mut ngood = 0_usize;
    for i in skip..nv - skip {
        if qx[i] & sdqflags == 0 {
            tx[i] = x[i];
            ngood += 1;
        }
    }
    if ngood == 0 {
        return Err(Error::NoGoodData);
    }

    let xc = (0..range)
        .map(|j| {
            (skip..nv - skip)
                .map(|i| tx[i] * y[i + skip - j])
                .sum::<f64>()
        })
        .collect();

    Ok(xc)
}

/// Cross-correlates, locates the peak, and refines it with a
/// three-point quadratic.  Returns the shift of `v` relative to
/// `tspec` in pixels; positive means the data sit at larger pixel
/// numbers than the template.
///
/// # Errors
///
/// Propagates [`cross_corr`] failures and returns
/// [`Error::NoGoodData`] when the peak lands on either end of the
/// window, which means the search range was too small for the actual
/// shift.
pub fn xc_peak(
    v: &[f64],
    qv: &[u16],
    tspec: &[f64],
    range: usize,
    sdqflags: u16,
    dbg: &mut dyn DebugSink,
) -> Result<f64> {
    let middle = range / 2;
    let xc = cross_corr(v, qv, tspec, sdqflags, range)?;

    let imax = xc
        .iter()
        .position_max_by(|p, q| p.partial_cmp(q).unwrap())
        .unwrap_or(0);

    let result = if imax == 0 || imax == range - 1 {
        println!("Warning  Peak in cross correlation is at end of range.");
        Err(Error::NoGoodData)
    } else {
        let i = imax - 1;
        let peak = peak_quad3(&[xc[i], xc[i + 1], xc[i + 2]]);
        Ok(peak + (i + 1) as f64 - middle as f64)
    };

    if dbg.active() {
        dbg.text("");
        dbg.text("# (xc_peak) cross correlation:");
        for (ii, val) in xc.iter().enumerate() {
            let mut line = format!("{val:.6}");
            if ii == middle {
                line.push_str(" <-- nominal peak is here");
            }
            if ii == imax {
                line.push_str(" <-- peak found here");
            }
            dbg.text(&line);
        }
    }

    result
}

/// Direction of an edge crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeSense {
    /// Intensity rises with pixel number (lower end of the slit).
    LowToHigh,
    /// Intensity falls with pixel number (upper end of the slit).
    HighToLow,
}

/// Finds a sharp edge in a 1-D slit profile by correlating with a
/// `{-1, 0, +1}` mask around the expected location `locn0` and
/// refining the extremum with a quadratic.
///
/// # Errors
///
/// Returns [`Error::NoGoodData`] when the expected location is off the
/// image, bad pixels crowd the edge, or the extremum sits at the end
/// of the search range.  None of these is fatal on its own; the caller
/// may still succeed with the other edge.
pub fn find_edge(
    v: &[f64],
    qv: &[u16],
    sense: EdgeSense,
    locn0: f64,
    sp_range: i32,
    verbose: bool,
    dbg: &mut dyn DebugSink,
) -> Result<f64> {
    let nv = v.len();
    let ilocn0 = nint(locn0);
    if ilocn0 < 0 || ilocn0 >= nv as i64 {
        if verbose {
            println!(
                "         Estimated location ({}) of edge is off the image.",
                ilocn0 + 1
            );
        }
        return Err(Error::NoGoodData);
    }
    let ilocn0 = ilocn0 as usize;

    const EDGE: [f64; 3] = [-1.0, 0.0, 1.0];
    let half = EDGE.len() / 2;

    let mut first = ((locn0 + 0.5) as i64 - i64::from(sp_range) / 2).max(0) as usize;
    let mut last = (first + sp_range.max(0) as usize).saturating_sub(1).min(nv - 1);

    // shrink the window to the contiguous run of good pixels around
    // the expected location
    let mut i_min = last;
    let mut i_max = first;
    for i in ilocn0..=last {
        if qv[i] != 0 {
            break;
        }
        i_max = i;
    }
    for i in (first..=ilocn0).rev() {
        if qv[i] != 0 {
            break;
        }
        i_min = i;
    }
    if i_max.saturating_sub(i_min) < EDGE.len() + 1 {
        return Err(Error::NoGoodData);
    }
    first = i_min;
    last = i_max;

    if dbg.active() {
        dbg.text(&format!(
            "# (find_edge) Searching for an edge between {first} and {last} inclusive"
        ));
    }

    // correlate the whole profile with the edge mask
    let mut xc = vec![0.0; nv];
    for i in half..nv.saturating_sub(half + 3) + 1 {
        xc[i] = (0..EDGE.len())
            .map(|j| EDGE[j] * v[i + j - half])
            .sum::<f64>();
    }

    let mut ipeak = first;
    let mut extreme = xc[first];
    for (i, &val) in xc.iter().enumerate().take(last + 1).skip(first) {
        let better = match sense {
            EdgeSense::LowToHigh => val > extreme,
            EdgeSense::HighToLow => val < extreme,
        };
        if better {
            ipeak = i;
            extreme = val;
        }
    }

    if ipeak <= first || ipeak >= last {
        println!("Warning  Edge not found, appears to be at end of range.");
        return Err(Error::NoGoodData);
    }

    let i = ipeak - 1;
    let peak = peak_quad3(&[xc[i], xc[i + 1], xc[i + 2]]);
    Ok(peak + (i + 1) as f64)
}

/// Finds the spatial shift of a medium echelle slit by locating both
/// slit ends independently and averaging.
///
/// # Errors
///
/// Returns [`Error::NoGoodData`] when neither edge could be measured
/// or the two measurements disagree by more than [`MAX_DIFF_ERROR`]
/// pixels.
pub fn find_ends(
    length: f64,
    v: &[f64],
    qv: &[u16],
    crpix: f64,
    cdelt: f64,
    sp_range: i32,
    verbose: bool,
    dbg: &mut dyn DebugSink,
) -> Result<f64> {
    let scale = cdelt * 3600.0; // arcsec per pixel
    let slit_end = crpix - length / scale / 2.0;

    let mut sum = 0.0;
    let mut shifts: Vec<f64> = Vec::with_capacity(2);

    for (locn0, sense, label) in [
        (slit_end, EdgeSense::LowToHigh, "lower"),
        (slit_end + length / scale, EdgeSense::HighToLow, "upper"),
    ] {
        match find_edge(v, qv, sense, locn0, sp_range, verbose, dbg) {
            Ok(locn) => {
                let shift = locn - locn0;
                if verbose {
                    println!("         shift of {label} edge is {shift:.2}");
                }
                sum += shift;
                shifts.push(shift);
            }
            Err(Error::NoGoodData) => {
                if verbose {
                    println!("         shift of {label} edge is undetermined");
                }
            }
            Err(other) => return Err(other),
        }
    }

    if shifts.is_empty() {
        return Err(Error::NoGoodData);
    }
    if shifts.len() == 2 {
        let spread = (shifts[0] - shifts[1]).abs();
        if spread > MAX_DIFF_WARNING {
            println!("Warning  Shifts of lower and upper edges differ by {spread:.2}");
        }
        if spread > MAX_DIFF_ERROR {
            return Err(Error::NoGoodData);
        }
    }

    Ok(sum / shifts.len() as f64)
}

/// Finds the spatial shift of a short echelle slit by correlating the
/// collapsed profile with a boxcar model of the slit.
///
/// # Errors
///
/// Returns [`Error::NoGoodData`] when the nominal slit position is off
/// the image or the correlation peak cannot be located.
#[allow(clippy::too_many_arguments)]
pub fn xc_short_slit(
    length: f64,
    v: &[f64],
    qv: &[u16],
    sdqflags: u16,
    crpix: f64,
    cdelt: f64,
    sp_range: i32,
    dbg: &mut dyn DebugSink,
) -> Result<f64> {
    let nv = v.len();
    let length = length / (cdelt * 3600.0); // arcsec to pixels
    let range = clamp_range(sp_range, nv);

    let center = crpix;
    let low = center - length / 2.0;
    let high = center + length / 2.0;
    let ilow = nint(low);
    let ihigh = nint(high);

    if ilow < 0 || ilow >= nv as i64 || ihigh < 0 || ihigh >= nv as i64 {
        return Err(Error::NoGoodData);
    }
    let (ilow, ihigh) = (ilow as usize, ihigh as usize);

    let mut tslit = vec![0.0; nv];
    for t in tslit.iter_mut().take(ihigh).skip(ilow + 1) {
        *t = 1.0;
    }
    // fractional coverage at the two ends
    tslit[ilow] = low + 0.5 - ilow as f64;
    tslit[ihigh] = ihigh as f64 - (high - 0.5);

    xc_peak(v, qv, &tslit, range, sdqflags, dbg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NullSink;
    use float_cmp::assert_approx_eq;

    #[test]
    fn quad3_vertex() {
        // parabola y = -(x - 0.25)^2 sampled at -1, 0, 1
        let y = [-(1.25_f64).powi(2), -0.0625, -(0.75_f64).powi(2)];
        assert_approx_eq!(f64, peak_quad3(&y), 0.25, epsilon = 1e-12);
        assert_approx_eq!(f64, peak_quad3(&[1.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn range_clamping() {
        assert_eq!(clamp_range(63, 1024), 63);
        assert_eq!(clamp_range(64, 1024), 65);
        assert_eq!(clamp_range(63, 40), 21);
        assert_eq!(clamp_range(1, 1024), 3);
    }

    fn gaussian(n: usize, center: f64, sigma: f64) -> Vec<f64> {
        (0..n)
            .map(|i| (-((i as f64 - center) / sigma).powi(2) / 2.0).exp())
            .collect()
    }

    #[test]
    fn peak_recovers_known_shift() {
        let n = 200;
        let template = gaussian(n, 100.0, 3.0);
        let data = gaussian(n, 104.0, 3.0);
        let qv = vec![0_u16; n];
        let shift = xc_peak(&data, &qv, &template, 21, 32767, &mut NullSink).unwrap();
        assert_approx_eq!(f64, shift, 4.0, epsilon = 0.05);
    }

    #[test]
    fn fractional_shift_is_subpixel() {
        let n = 200;
        let template = gaussian(n, 100.0, 3.0);
        let data = gaussian(n, 102.6, 3.0);
        let qv = vec![0_u16; n];
        let shift = xc_peak(&data, &qv, &template, 21, 32767, &mut NullSink).unwrap();
        assert_approx_eq!(f64, shift, 2.6, epsilon = 0.1);
    }

    #[test]
    fn peak_at_window_end_fails() {
        let n = 200;
        let template = gaussian(n, 100.0, 3.0);
        let data = gaussian(n, 130.0, 3.0);
        let qv = vec![0_u16; n];
        // the shift is far outside the 21-pixel window
        assert!(matches!(
            xc_peak(&data, &qv, &template, 21, 32767, &mut NullSink),
            Err(Error::NoGoodData)
        ));
    }

    #[test]
    fn all_flagged_is_no_good_data() {
        let v = vec![1.0; 50];
        let qv = vec![4_u16; 50];
        assert!(matches!(
            cross_corr(&v, &qv, &v, 4, 21),
            Err(Error::NoGoodData)
        ));
    }

    #[test]
    fn bad_range_is_rejected() {
        let v = vec![1.0; 10];
        let qv = vec![0_u16; 10];
        assert!(cross_corr(&v, &qv, &v, 4, 4).is_err());
        assert!(cross_corr(&v, &qv, &v, 4, 11).is_err());
    }

    fn step_profile(n: usize, lo: usize, hi: usize) -> Vec<f64> {
        (0..n)
            .map(|i| if i >= lo && i < hi { 10.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn edges_of_shifted_slit() {
        let n = 120;
        // illuminated pixels 32..=87: edge midpoints at 31.5 and 87.5,
        // i.e. both edges sit 1.5 pixels above the nominal 30 and 86
        let v = step_profile(n, 32, 88);
        let qv = vec![0_u16; n];
        let shift = find_ends(
            // length 56 pixels at 1 arcsec/pixel
            56.0,
            &v,
            &qv,
            58.0,
            1.0 / 3600.0,
            31,
            false,
            &mut NullSink,
        )
        .unwrap();
        assert_approx_eq!(f64, shift, 1.5, epsilon = 0.1);
    }

    #[test]
    fn short_slit_shift() {
        let n = 120;
        // slit is 34 pixels long, nominally centred at 58; the
        // illuminated pixels 44..=77 are centred at 60.5, so +2.5
        let v = step_profile(n, 44, 78);
        let qv = vec![0_u16; n];
        let shift = xc_short_slit(
            34.0,
            &v,
            &qv,
            32767,
            58.0,
            1.0 / 3600.0,
            31,
            &mut NullSink,
        )
        .unwrap();
        assert_approx_eq!(f64, shift, 2.5, epsilon = 0.1);
    }
}
