//! Natural cubic spline interpolation.

/// Fits a natural cubic spline through (`xa`, `ya`) and evaluates it at
/// every element of `x`.  Values of `x` outside the range of `xa` are
/// extrapolated and can be quite wild; callers are expected to police
/// the endpoints themselves.
///
/// # Panics
///
/// Panics if `xa` and `ya` differ in length or contain fewer than two
/// points, or if two consecutive `xa` values coincide.
#[must_use]
pub fn spline_eval(xa: &[f64], ya: &[f64], x: &[f64]) -> Vec<f64> {
    assert_eq!(xa.len(), ya.len());
    let n = xa.len();
    assert!(n >= 2, "spline needs at least two knots");

    let y2a = second_derivatives(xa, ya);

    x.iter()
        .map(|&xi| {
            // bisect for the segment containing xi
            let mut klo = 0;
            let mut khi = n - 1;
            while khi - klo > 1 {
                let k = (klo + khi) / 2;
                if xa[k] > xi {
                    khi = k;
                } else {
                    klo = k;
                }
            }

            let h = xa[khi] - xa[klo];
            assert!(h != 0.0, "repeated spline knot");
            let a = (xa[khi] - xi) / h;
            let b = (xi - xa[klo]) / h;
            a * ya[klo]
                + b * ya[khi]
                + ((a * a * a - a) * y2a[klo] + (b * b * b - b) * y2a[khi]) * h * h / 6.0
        })
        .collect()
}

/// Tridiagonal solve for the second derivatives of a natural spline.
fn second_derivatives(xa: &[f64], ya: &[f64]) -> Vec<f64> {
    let n = xa.len();
    let mut y2a = vec![0.0; n];
    let mut ua = vec![0.0; n];

    for i in 1..n - 1 {
        let sig = (xa[i] - xa[i - 1]) / (xa[i + 1] - xa[i - 1]);
        let p = sig * y2a[i - 1] + 2.0;
        y2a[i] = (sig - 1.0) / p;
        ua[i] = (6.0
            * ((ya[i + 1] - ya[i]) / (xa[i + 1] - xa[i])
                - (ya[i] - ya[i - 1]) / (xa[i] - xa[i - 1]))
            / (xa[i + 1] - xa[i - 1])
            - sig * ua[i - 1])
            / p;
    }

    for i in (0..n - 1).rev() {
        y2a[i] = y2a[i] * y2a[i + 1] + ua[i];
    }

    y2a
}
