//! Robust statistics helpers: medians and outlier-clipped means.

/// Returns the median of `v`.  The input is copied and sorted; for an
/// even count the two middle values are averaged.  An empty slice
/// yields zero.
#[must_use]
pub fn median(v: &[f64]) -> f64 {
    match v.len() {
        0 => 0.0,
        1 => v[0],
        2 => (v[0] + v[1]) / 2.0,
        n => {
            let mut vt = v.to_vec();
            vt.sort_by(|p, q| p.partial_cmp(q).unwrap());
            let i = n / 2;
            if n % 2 == 0 {
                (vt[i - 1] + vt[i]) / 2.0
            } else {
                vt[i]
            }
        }
    }
}

/// Median of the elements of `v` whose DQ flag is zero.  Returns `None`
/// when every element is flagged.
#[must_use]
pub fn median_good(v: &[f64], qv: &[u16]) -> Option<f64> {
    let good: Vec<f64> = v
        .iter()
        .zip(qv)
        .filter(|&(_, &q)| q == 0)
        .map(|(&x, _)| x)
        .collect();
    if good.is_empty() {
        None
    } else {
        Some(median(&good))
    }
}

/// Mean and standard deviation with outliers ignored.
pub struct CleanMean {
    /// Mean of the surviving values.
    pub mean: f64,
    /// Standard deviation of the surviving values.
    pub stddev: f64,
    /// How many values survived the rejection.
    pub nsum: usize,
}

/// Computes the mean and standard deviation of `v`, ignoring outliers.
///
/// The median and the median absolute deviation (floored at `min_mad`)
/// define the acceptance band `mad_reject * MAD` around the median;
/// only values inside the band contribute to the returned moments.
/// Small samples are special-cased: one element is its own mean with
/// zero spread, and for two elements the smaller one is taken as the
/// mean with their absolute difference as the spread.
#[must_use]
pub fn clean_mean(v: &[f64], min_mad: f64, mad_reject: f64) -> CleanMean {
    let nelem = v.len();
    if nelem < 3 {
        return match nelem {
            1 => CleanMean {
                mean: v[0],
                stddev: 0.0,
                nsum: 1,
            },
            2 => CleanMean {
                mean: v[0].min(v[1]),
                stddev: (v[0] - v[1]).abs(),
                nsum: 2,
            },
            _ => CleanMean {
                mean: 0.0,
                stddev: 0.0,
                nsum: 0,
            },
        };
    }

    let med = median(v);
    let absdiff: Vec<f64> = v.iter().map(|&x| (x - med).abs()).collect();
    let mad = median(&absdiff).max(min_mad);

    let mut sum = 0.0;
    let mut sumsq = 0.0;
    let mut nsum = 0_usize;
    for &x in v {
        if (x - med).abs() < mad_reject * mad {
            sum += x;
            sumsq += x * x;
            nsum += 1;
        }
    }

    match nsum {
        0 => CleanMean {
            mean: 0.0,
            stddev: 0.0,
            nsum: 0,
        },
        1 => CleanMean {
            mean: sum,
            stddev: 0.0,
            nsum: 1,
        },
        _ => {
            let dsum = nsum as f64;
            let mean = sum / dsum;
            let stddev = (dsum / (dsum - 1.0) * (sumsq / dsum - mean * mean))
                .max(0.0)
                .sqrt();
            CleanMean {
                mean,
                stddev,
                nsum,
            }
        }
    }
}

/// Nearest-integer rounding with the half-away-from-zero convention
/// used throughout the calibration code.
#[must_use]
pub fn nint(x: f64) -> i64 {
    if x >= 0.0 {
        (x + 0.5) as i64
    } else {
        (x - 0.5) as i64
    }
}
