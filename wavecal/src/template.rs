//! Template synthesis: lamp-spectrum resampling, slit convolution, and
//! the 2-D echelle template painter.

use crate::dispersion::DispersionRelation;
use crate::refdata::LampSpectrum;
use crate::stats::nint;
use crate::trace::TraceList;
use ndarray::Array2;

/// Tolerance (Angstroms) for inverting the dispersion relation while
/// building templates.
pub const INVERSION_TOLERANCE: f64 = 1e-6;

/// Locates the lamp interval containing `target`: returns `j` such
/// that `edges[j] <= target < edges[j + 1]`, `-1` below the first
/// edge, or `nelem` at or beyond the last.  `start` seeds the search;
/// successive calls with increasing targets walk forward
/// incrementally.
#[must_use]
pub fn find_wl(target: f64, edges: &[f64], start: isize) -> isize {
    let nelem = edges.len() as isize - 1;
    if target < edges[0] {
        return -1;
    }
    if target >= edges[nelem as usize] {
        return nelem;
    }

    let mut j = start.clamp(0, nelem - 1);
    while target < edges[j as usize] {
        j -= 1;
    }
    while target >= edges[(j + 1) as usize] {
        j += 1;
    }
    j
}

/// Integrates the lamp spectrum over the wavelength interval of each
/// output pixel.  `wl_at` maps a pixel-edge coordinate (`i - 0.5` is
/// the left edge of pixel `i`) to a wavelength; the lamp is
/// piecewise-constant on its tabulated intervals, so each output value
/// is a fraction of the left cell, the full middle cells, and a
/// fraction of the right cell.  Pixels mapping beyond the lamp leave
/// zeros behind.
pub fn integrate_lamp(
    lamp: &LampSpectrum,
    mut wl_at: impl FnMut(f64) -> f64,
    nwl: usize,
) -> Vec<f64> {
    let nelem = lamp.nelem() as isize;
    let edges = &lamp.wl;
    let mut tspec = vec![0.0; nwl];

    let mut wl_left = wl_at(-0.5);
    let mut jl = find_wl(wl_left, edges, 0);
    let mut jr = jl;

    for i in 0..nwl {
        let wl_right = wl_at(i as f64 + 0.5);
        jr = find_wl(wl_right, edges, jr.max(0));

        if jr >= nelem {
            break;
        }

        if jl >= 0 {
            let (jl_u, jr_u) = (jl as usize, jr as usize);
            if jl == jr {
                tspec[i] = lamp.flux[jl_u] * (wl_right - wl_left);
            } else {
                tspec[i] = lamp.flux[jl_u] * (edges[jl_u + 1] - wl_left);
                for j in jl_u + 1..jr_u {
                    tspec[i] += lamp.flux[j] * (edges[j + 1] - edges[j]);
                }
                tspec[i] += lamp.flux[jr_u] * (wl_right - edges[jr_u]);
            }
        }

        jl = jr;
        wl_left = wl_right;
    }

    tspec
}

/// Convolves a spectrum in place with a boxcar whose width is the slit
/// width in pixels (nearest integer).  The convolution is a moving
/// sum, so a constant input comes out multiplied by the boxcar width.
pub fn conv_slit(slitwidth: f64, spec: &mut [f64]) {
    let n = nint(slitwidth).max(1) as usize;
    if n <= 1 || spec.is_empty() {
        return;
    }

    let len = spec.len();
    let half = n / 2;
    let input = spec.to_vec();
    for (i, out) in spec.iter_mut().enumerate() {
        let lo = i.saturating_sub(half);
        let hi = (i + n - half).min(len);
        *out = input[lo..hi].iter().sum();
    }
}

/// Aperture size in image pixels, parsed from the APER_FOV keyword
/// ("HxW" in arcseconds, cross-dispersion extent first).  Unparsable
/// strings fall back to one pixel in each axis with a warning.
#[must_use]
pub fn read_width(aper_fov: &str, cdelt2: f64) -> [f64; 2] {
    let mut parts = aper_fov.splitn(2, ['X', 'x']);
    let ywidth = parts
        .next()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let xwidth = parts
        .next()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    if ywidth == 0.0 || xwidth == 0.0 {
        println!("Warning  Can't interpret APER_FOV = `{aper_fov}'");
        return [1.0, 1.0];
    }

    // 3600 converts cdelt from degrees per pixel to arcsec per pixel
    [xwidth / (3600.0 * cdelt2), ywidth / (3600.0 * cdelt2)]
}

/// Inputs for painting the 2-D echelle template.
pub struct TemplateParams<'a> {
    /// Lamp spectrum in pixel-edge form.
    pub lamp: &'a LampSpectrum,
    /// Dispersion relation with the incidence-angle correction applied.
    pub disp: &'a DispersionRelation,
    /// One trace per spectral order.
    pub traces: &'a TraceList,
    /// Central wavelength, the seed for inverting the dispersion
    /// relation.
    pub cenwave: i32,
    /// Reference-to-image transformation, matrix part.
    pub ltm: [f64; 2],
    /// Reference-to-image transformation, offset part.
    pub ltv: [f64; 2],
    /// Cross-dispersion scale, degrees per pixel.
    pub cdelt2: f64,
    /// APER_FOV keyword value.
    pub aper_fov: &'a str,
    /// Slit tilt for a long slit used with an echelle, radians.
    pub slit_angle: f64,
}

/// Paints every in-range spectral order into a zero-initialised
/// template image of shape `(ny, nx)`.  Pixels falling outside the
/// image are silently clipped.
#[must_use]
pub fn make_template(p: &TemplateParams, nx: usize, ny: usize) -> Array2<f32> {
    let mut clamp = Array2::<f32>::zeros((ny, nx));
    let slitwidth = read_width(p.aper_fov, p.cdelt2);

    for trace in p.traces.records() {
        add_trace(p, trace, slitwidth, &mut clamp);
    }

    clamp
}

fn add_trace(
    p: &TemplateParams,
    trace: &crate::trace::TraceRecord,
    slitwidth: [f64; 2],
    clamp: &mut Array2<f32>,
) {
    let (ny, nx) = clamp.dim();
    if trace.a2displ.is_empty() {
        return;
    }

    // skip the order when the middle of its trace is off the image
    let mid = ((trace.a1center / 2.0) as usize).min(trace.a2displ.len() - 1);
    let y_mid = trace.a2displ[mid] + trace.a2center;
    let j_mid = (p.ltm[1] * y_mid + p.ltv[1]) as i64;
    if j_mid < 0 || j_mid >= ny as i64 {
        return;
    }

    // integrate the lamp over image pixels along this order
    let disp = p.disp.for_order(trace.sporder, trace.a2center);
    let m = f64::from(trace.sporder);
    let mut estimate = f64::from(p.cenwave);
    let (ltm0, ltv0) = (p.ltm[0], p.ltv[0]);
    let mut tspec = integrate_lamp(
        p.lamp,
        |pixel| {
            let x_ref = (pixel - ltv0) / ltm0;
            match disp.wavelength(m, x_ref, estimate, INVERSION_TOLERANCE) {
                Ok(wl) => {
                    estimate = wl;
                    wl
                }
                Err(_) => {
                    println!(
                        "Warning  Can't invert the dispersion relation for order {m}, estimate {estimate}"
                    );
                    estimate
                }
            }
        },
        nx,
    );

    conv_slit(slitwidth[0], &mut tspec);

    // paint the convolved spectrum into a stripe along the trace
    for i in 0..nx {
        let x_ref = (i as f64 - p.ltv[0]) / p.ltm[0];
        let ix_ref = nint(x_ref);
        if ix_ref < 0 || ix_ref >= trace.a2displ.len() as i64 {
            continue;
        }
        let y_ref = trace.a2center + trace.a2displ[ix_ref as usize];
        let y_im = p.ltm[1] * y_ref + p.ltv[1];

        let y_low = nint(y_im - slitwidth[1] / 2.0).max(0);
        let y_high = nint(y_im + slitwidth[1] / 2.0).min(ny as i64 - 1);
        if y_low > y_high {
            continue;
        }

        for j in y_low..=y_high {
            if p.slit_angle == 0.0 {
                clamp[(j as usize, i)] += tspec[i] as f32;
            } else {
                let dtilt = p.slit_angle * (j as f64 - y_im);
                let i_tilt = i as i64 - nint(dtilt);
                if i_tilt >= 0 && i_tilt < nx as i64 {
                    clamp[(j as usize, i)] += tspec[i_tilt as usize] as f32;
                }
            }
        }
    }
}
