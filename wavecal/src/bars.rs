//! Occulting-bar location for long-slit wavecals.
//!
//! The collapsed slit profile is normalised by a smooth fit to the
//! slit illumination and inverted, so that a bar stands out as a bump
//! of height ~1 on a floor of ~0.  Each bar is then located by
//! cross-correlating with a unit template of the bar and centroiding
//! the correlation peak.

use crate::debug::DebugSink;
use crate::error::{Error, Result};
use crate::refdata::Bar;
use crate::spline::spline_eval;
use crate::stats::{median, median_good, nint};
use itertools::Itertools;

/// Sections used for the first slit-illumination fit.
const NPARTS1: usize = 8;
/// Sections used for the refit after outlier rejection.
const NPARTS2: usize = 12;
/// MAD multiples beyond which a pixel is excluded from the refit.
const MAX_MAD: f64 = 6.0;

/// Acceptance window for the correlation peak, as a fraction of the
/// expected height (the bar width in pixels).
const MIN_BARWEIGHT: f64 = 0.5;
const MAX_BARWEIGHT: f64 = 1.5;

/// The centroid walks horizontal slices from the peak down to this
/// fraction of the peak value.
const CENTROID_CUTOFF: f64 = 0.5;
/// Slice midpoints farther than this from their median are dropped.
const OUTLIER_CUTOFF: f64 = 0.3;

/// Per-bar shift spreads beyond these trigger a warning or reject the
/// whole measurement.
const MAX_DIFF_WARNING: f64 = 5.0;
const MAX_DIFF_ERROR: f64 = 10.0;

/// Normalises and inverts the slit pattern: the result is near zero in
/// lit regions and near one inside an occulting bar.
///
/// The slit illumination is estimated with a natural cubic spline
/// through section medians, twice: pixels deviating from the first fit
/// by more than `6 * MAD` (the bars themselves, mostly) are excluded
/// from the second.  Non-positive medians are replaced working outward
/// from the middle before the second fit.
///
/// # Errors
///
/// Returns [`Error::NoGoodData`] when every pixel is flagged or too
/// few sections have usable medians.
pub fn invert_slit(
    v: &[f64],
    qv: &[u16],
    dbg: &mut dyn DebugSink,
) -> Result<Vec<f64>> {
    let nv = v.len();

    let mut qvtemp: Vec<u16> = qv.iter().map(|&q| u16::from(q != 0)).collect();

    let first_good = qv.iter().position(|&q| q == 0).ok_or(Error::NoGoodData)?;
    let last_good = nv - 1 - qv.iter().rev().position(|&q| q == 0).unwrap();

    let xslit: Vec<f64> = (0..nv).map(|i| i as f64).collect();

    // initial rejection cycle
    let (xmed, med) = median_sections(v, qv, first_good, last_good, NPARTS1)?;
    let sm_slit = spline_eval(&xmed, &med, &xslit);
    let absdiff: Vec<f64> = v
        .iter()
        .zip(&sm_slit)
        .map(|(&a, &b)| (a - b).abs())
        .collect();
    let mad = median_good(&absdiff, qv).ok_or(Error::NoGoodData)?;
    for ((&vi, &si), q) in v.iter().zip(&sm_slit).zip(&mut qvtemp) {
        if (vi - si).abs() > MAX_MAD * mad {
            *q = 1;
        }
    }

    // refit without the outliers, which should include the bars
    let (xmed, med) = median_sections(v, &qvtemp, first_good, last_good, NPARTS2)?;
    let global_median = median_good(v, &qvtemp).ok_or(Error::NoGoodData)?;
    let med_ok = check_medians(&med, global_median);
    let sm_slit = spline_eval(&xmed, &med_ok, &xslit);

    // invert on qv, not qvtemp: the bar pixels themselves are wanted
    let inv: Vec<f64> = (0..nv)
        .map(|i| {
            if qv[i] == 0 && sm_slit[i] > 0.0 {
                (sm_slit[i] - v[i]) / sm_slit[i]
            } else {
                0.0
            }
        })
        .collect();

    if dbg.active() {
        dbg.text("# (invert_slit) pixel, median of slit illumination, corrected median:");
        for i in 0..xmed.len() {
            dbg.text(&format!("{:6.1} {:.6} {:.6}", xmed[i] + 1.0, med[i], med_ok[i]));
        }
        dbg.text("# pixel, slit illumination, smoothed slit, inverted slit, dq, dq_local:");
        for i in 0..nv {
            dbg.text(&format!(
                "{} {:.6} {:.6} {:.6} {} {}",
                i + 1,
                v[i],
                sm_slit[i],
                inv[i],
                qv[i],
                qvtemp[i]
            ));
        }
    }

    Ok(inv)
}

/// Medians of up to `nparts` sections of `v` between `first_good` and
/// `last_good`.  Sections without any good pixel are skipped, so the
/// returned knots need not be regularly spaced.
fn median_sections(
    v: &[f64],
    qv: &[u16],
    first_good: usize,
    last_good: usize,
    nparts: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let span = last_good - first_good + 1;
    let mut nvals = span / nparts;
    if nvals * nparts < span {
        nvals += 1;
    }
    if nvals == 0 {
        return Err(Error::NoGoodData);
    }

    let mut xmed = Vec::with_capacity(nparts);
    let mut med = Vec::with_capacity(nparts);
    let mut start = first_good;
    for _ in 0..nparts {
        if start >= last_good {
            break;
        }
        let n = nvals.min(last_good - start + 1);
        if let Some(y) = median_good(&v[start..start + n], &qv[start..start + n]) {
            xmed.push(start as f64 + (n - 1) as f64 / 2.0);
            med.push(y);
        }
        start += n;
    }

    if med.len() < 2 {
        return Err(Error::NoGoodData);
    }
    Ok((xmed, med))
}

/// Replaces non-positive section medians with neighbouring values,
/// working outward from the middle; the global median stands in when
/// the middle itself is bad.
fn check_medians(med: &[f64], global_median: f64) -> Vec<f64> {
    let nmed = med.len();
    let mut med_ok = med.to_vec();

    let mut previous = med[nmed / 2];
    let mut first = true;
    for i in nmed / 2..nmed {
        if med[i] <= 0.0 {
            med_ok[i] = if first { global_median } else { previous };
        }
        previous = med_ok[i];
        first = false;
    }

    previous = med[nmed / 2];
    first = true;
    for i in (0..nmed / 2).rev() {
        if med[i] <= 0.0 {
            med_ok[i] = if first { global_median } else { previous };
        }
        previous = med_ok[i];
        first = false;
    }

    med_ok
}

/// Unit template for one bar: one where the bar should be, with linear
/// fractions at the edge pixels, zero elsewhere.
fn make_template_bar(pbarlocn: f64, pbarwidth: f64, nv: usize) -> Vec<f64> {
    let lower = pbarlocn - pbarwidth / 2.0;
    let upper = pbarlocn + pbarwidth / 2.0;
    let i_lower = nint(lower);
    let i_upper = nint(upper);

    let mut template = vec![0.0; nv];

    if i_upper > 0 && i_lower < nv as i64 - 1 {
        let lower_ch = if i_lower < 0 { 0 } else { i_lower + 1 } as usize;
        let upper_ch = if i_upper >= nv as i64 {
            nv - 1
        } else {
            (i_upper - 1) as usize
        };
        for t in template.iter_mut().take(upper_ch + 1).skip(lower_ch) {
            *t = 1.0;
        }
    }

    if i_lower >= 0 && i_lower < nv as i64 {
        template[i_lower as usize] = 0.5 - lower + i_lower as f64;
    }
    if i_upper >= 0 && i_upper < nv as i64 {
        template[i_upper as usize] = upper + 0.5 - i_upper as f64;
    }

    template
}

/// Cross-correlation of the inverted slit with a one-bar template.
/// The middle element corresponds to zero shift; non-overlapping
/// regions are simply dropped from the sums, which is appropriate
/// because the inverted pattern is near zero away from the bars.
fn bar_xcorr(inv: &[f64], template: &[f64], range: usize) -> Vec<f64> {
    let nv = inv.len();
    let half = (range - 1) / 2;
    let mut xc = vec![0.0; range];

    xc[half] = inv.iter().zip(template).map(|(&a, &b)| a * b).sum();

    for j in 1..=half {
        xc[half - j] = (0..nv - j).map(|i| inv[i] * template[i + j]).sum();
        xc[half + j] = (j..nv).map(|i| inv[i] * template[i - j]).sum();
    }

    xc
}

/// Locates the peak of the bar correlation by the horizontal-slice
/// midpoint method.  Returns `(shift, weight)`; a zero weight means
/// the bar was not found.
fn centroid(xc: &[f64], pbarwidth: f64, dbg: &mut dyn DebugSink) -> (f64, f64) {
    let range = xc.len();
    let middle = range / 2;

    let imax = xc
        .iter()
        .position_max_by(|p, q| p.partial_cmp(q).unwrap())
        .unwrap_or(0);
    let maxval = xc[imax];

    let weight = maxval / pbarwidth;

    if imax == 0 || imax == range - 1 {
        println!("Warning  Skipping current occulting bar ...");
        println!("Warning  Peak of cross correlation is at end of search range.");
        println!("Warning  This probably means the search range is too small;");
        println!("Warning  check the value of SP_RANGE in the WCPTAB.");
        return (0.0, 0.0);
    }
    if !(MIN_BARWEIGHT..=MAX_BARWEIGHT).contains(&weight) {
        println!("Warning  Skipping current occulting bar ...");
        println!(
            "Warning  Peak of cross correlation is {weight:.6} of the expected value,"
        );
        println!(
            "Warning  which is outside the allowed range {MIN_BARWEIGHT} to {MAX_BARWEIGHT}"
        );
        return (0.0, 0.0);
    }

    // The nominal correlation curve rises with slope +1 to the peak and
    // falls with slope -1 after it.  A horizontal line below the peak
    // crosses it twice; the midpoint of the crossings measures the bar
    // position.  Collect midpoints at unit steps below the peak.
    let minval = maxval * CENTROID_CUTOFF;
    let mut cent: Vec<f64> = Vec::new();
    let mut value = maxval - 1.0;
    while value > minval {
        let Some(x_left) = (1..imax)
            .rev()
            .find(|&i| xc[i] <= value && xc[i + 1] > value)
            .map(|i| i as f64 + (value - xc[i]) / (xc[i + 1] - xc[i]))
        else {
            break;
        };
        let Some(x_right) = (imax..range - 1)
            .find(|&i| xc[i] >= value && xc[i + 1] < value)
            .map(|i| i as f64 + (xc[i] - value) / (xc[i] - xc[i + 1]))
        else {
            break;
        };
        cent.push((x_left + x_right) / 2.0);
        value -= 1.0;
    }

    let result = match cent.len() {
        0 => (0.0, 0.0),
        1 => {
            println!("Warning  Only one point used for bar location.");
            (cent[0] - middle as f64, weight)
        }
        _ => {
            let med = median(&cent);
            let survivors: Vec<f64> = cent
                .iter()
                .copied()
                .filter(|c| (c - med).abs() <= OUTLIER_CUTOFF)
                .collect();
            if survivors.is_empty() {
                (0.0, 0.0)
            } else {
                let peak = survivors.iter().sum::<f64>() / survivors.len() as f64;
                (peak - middle as f64, weight)
            }
        }
    };

    if dbg.active() {
        dbg.text(&format!(
            "# (find_bars) height of cross correlation should be {pbarwidth:.6}"
        ));
        dbg.text(&format!(
            "# (find_bars) weight for current bar = {:.6}",
            result.1
        ));
        dbg.text("# (find_bars) cross correlation:");
        for (i, val) in xc.iter().enumerate() {
            let mut line = format!("{val:.6}");
            if i == middle {
                line.push_str(" <-- nominal peak is here");
            }
            if i == imax {
                line.push_str(" <-- peak found here");
            }
            dbg.text(&line);
        }
    }

    result
}

/// Combines per-bar shifts into a single spatial shift.
///
/// # Errors
///
/// Returns [`Error::NoGoodData`] when no bar was found or the
/// per-bar shifts spread over more than [`MAX_DIFF_ERROR`] pixels.
fn avg_shifts(barshift: &[f64], barweight: &[f64]) -> Result<f64> {
    if barweight.iter().sum::<f64>() < MIN_BARWEIGHT {
        return Err(Error::NoGoodData);
    }

    let mut min_shift = f64::MAX;
    let mut max_shift = f64::MIN;
    let mut wmin: Option<usize> = None;
    let mut min_weight = f64::MAX;
    let mut ngood = 0;
    for (i, (&s, &w)) in barshift.iter().zip(barweight).enumerate() {
        if w > MIN_BARWEIGHT {
            min_shift = min_shift.min(s);
            max_shift = max_shift.max(s);
            if w < min_weight {
                min_weight = w;
                wmin = Some(i);
            }
            ngood += 1;
        }
    }
    if ngood < 1 {
        return Err(Error::NoGoodData);
    }

    let spread = max_shift - min_shift;
    if spread > MAX_DIFF_WARNING {
        println!("Warning  Shifts of individual bars differ by {spread:.2}");
    }
    if spread > MAX_DIFF_ERROR {
        return Err(Error::NoGoodData);
    }
    // only drop the weakest bar when the spread is worrying
    if spread <= MAX_DIFF_WARNING {
        wmin = None;
    }

    let mut sumw = 0.0;
    let mut sumsw = 0.0;
    for (i, (&s, &w)) in barshift.iter().zip(barweight).enumerate() {
        if Some(i) == wmin {
            println!("Warning  bar {} excluded due to low weight", i + 1);
            continue;
        }
        if w > MIN_BARWEIGHT {
            sumw += w;
            sumsw += s * w;
        }
    }

    if sumw > 0.0 {
        Ok(sumsw / sumw)
    } else {
        Err(Error::NoGoodData)
    }
}

/// Finds the spatial shift of a long-slit wavecal from its occulting
/// bars.
///
/// # Errors
///
/// Returns [`Error::NoGoodData`] when the slit pattern cannot be
/// normalised, no bar is found, or the per-bar shifts are
/// inconsistent.
#[allow(clippy::too_many_arguments)]
pub fn find_bars(
    bars: &[Bar],
    v: &[f64],
    qv: &[u16],
    crpix: f64,
    cdelt: f64,
    sp_range: i32,
    verbose: bool,
    dbg: &mut dyn DebugSink,
) -> Result<f64> {
    let nv = v.len();
    let scale = cdelt * 3600.0; // arcsec per pixel
    let range = crate::xcorr::clamp_range(sp_range, nv);

    let inv = invert_slit(v, qv, dbg)?;

    let mut barshift = Vec::with_capacity(bars.len());
    let mut barweight = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let pbarlocn = crpix + bar.locn / scale;
        let pbarwidth = bar.width / scale;

        let (shift, weight) = if pbarwidth > 0.0 {
            let template = make_template_bar(pbarlocn, pbarwidth, nv);
            let xc = bar_xcorr(&inv, &template, range);
            centroid(&xc, pbarwidth, dbg)
        } else {
            (0.0, 0.0)
        };
        barshift.push(shift);
        barweight.push(weight);

        if verbose {
            if weight == 0.0 {
                println!("Warning  Bar {} could not be found.", i + 1);
            } else {
                println!(
                    "         shift of bar {} is {shift:.3}, weight = {weight:.5}",
                    i + 1
                );
            }
        }
    }

    avg_shifts(&barshift, &barweight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NullSink;
    use float_cmp::assert_approx_eq;

    /// Flat slit of 100 counts with bars carved out at the given
    /// pixel centres (width in pixels, depth as a fraction of full).
    fn slit_profile(nv: usize, bars: &[(f64, f64, f64)]) -> Vec<f64> {
        let mut v = vec![100.0; nv];
        for &(center, width, depth) in bars {
            for (i, value) in v.iter_mut().enumerate() {
                let d = (i as f64 - center).abs();
                if d <= width / 2.0 {
                    *value = 100.0 * (1.0 - depth);
                }
            }
        }
        v
    }

    const SCALE: f64 = 1.0 / 3600.0; // 1 arcsec per pixel

    #[test]
    fn inverted_slit_is_one_in_bar() {
        let v = slit_profile(128, &[(64.0, 9.0, 1.0)]);
        let qv = vec![0_u16; 128];
        let inv = invert_slit(&v, &qv, &mut NullSink).unwrap();
        assert_approx_eq!(f64, inv[64], 1.0, epsilon = 0.05);
        assert_approx_eq!(f64, inv[20], 0.0, epsilon = 0.05);
        assert_approx_eq!(f64, inv[100], 0.0, epsilon = 0.05);
    }

    #[test]
    fn all_flagged_slit_fails() {
        let v = vec![1.0; 64];
        let qv = vec![4_u16; 64];
        assert!(matches!(
            invert_slit(&v, &qv, &mut NullSink),
            Err(Error::NoGoodData)
        ));
    }

    #[test]
    fn single_bar_shift_recovered() {
        // bar nominally at the slit centre, observed 4 pixels higher
        let v = slit_profile(128, &[(68.0, 7.0, 1.0)]);
        let qv = vec![0_u16; 128];
        let bars = [Bar {
            locn: 0.0,
            width: 7.0,
        }];
        let shift = find_bars(&bars, &v, &qv, 64.0, SCALE, 31, false, &mut NullSink).unwrap();
        assert_approx_eq!(f64, shift, 4.0, epsilon = OUTLIER_CUTOFF);
    }

    #[test]
    fn three_bars_average() {
        let v = slit_profile(
            256,
            &[(66.0, 7.0, 1.0), (130.0, 7.0, 1.0), (194.0, 7.0, 1.0)],
        );
        let qv = vec![0_u16; 256];
        let bars = [
            Bar { locn: -64.0, width: 7.0 },
            Bar { locn: 0.0, width: 7.0 },
            Bar { locn: 64.0, width: 7.0 },
        ];
        let shift = find_bars(&bars, &v, &qv, 128.0, SCALE, 31, false, &mut NullSink).unwrap();
        assert_approx_eq!(f64, shift, 2.0, epsilon = OUTLIER_CUTOFF);
    }

    #[test]
    fn discrepant_weak_bar_is_dropped() {
        // two strong bars shifted +2, one weak bar off by 8 pixels
        let v = slit_profile(
            256,
            &[(66.0, 7.0, 1.0), (130.0, 7.0, 1.0), (202.0, 7.0, 0.7)],
        );
        let qv = vec![0_u16; 256];
        let bars = [
            Bar { locn: -64.0, width: 7.0 },
            Bar { locn: 0.0, width: 7.0 },
            Bar { locn: 64.0, width: 7.0 },
        ];
        let shift = find_bars(&bars, &v, &qv, 128.0, SCALE, 31, false, &mut NullSink).unwrap();
        assert_approx_eq!(f64, shift, 2.0, epsilon = OUTLIER_CUTOFF);
    }

    #[test]
    fn wildly_inconsistent_bars_fail() {
        // the second bar lands 12 pixels from the first
        let v = slit_profile(256, &[(66.0, 7.0, 1.0), (142.0, 7.0, 1.0)]);
        let qv = vec![0_u16; 256];
        let bars = [
            Bar { locn: -64.0, width: 7.0 },
            Bar { locn: 0.0, width: 7.0 },
        ];
        // a wide window so both peaks stay in range
        let result = find_bars(&bars, &v, &qv, 128.0, SCALE, 41, false, &mut NullSink);
        assert!(matches!(result, Err(Error::NoGoodData)));
    }
}
