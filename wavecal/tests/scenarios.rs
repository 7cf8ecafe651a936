//! End-to-end scenarios: synthetic wavecal exposures run through the
//! full driver, checking the recorded SHIFTA1/SHIFTA2 values.

#![allow(missing_docs)]

use float_cmp::assert_approx_eq;
use ndarray::Array2;
use rand::Rng;
use rand_pcg::Pcg64;
use wavecal::debug::NullSink;
use wavecal::dq::ALL_SERIOUS;
use wavecal::exposure::{Detector, ImsetHeader, MemExposure, PixelFrame, PrimaryInfo};
use wavecal::refdata::{
    ApDesRow, DispRow, InangRow, LampRow, RefTables, SdcRow, SpTraceRow,
};
use wavecal::template::{conv_slit, integrate_lamp};
use wavecal::{wavecal, Outcome, RunConfig, UNDEFINED_SHIFT};

const CCD_ARCSEC_PER_PIXEL: f64 = 0.05;

/// Emission-line lamp tabulation covering `wl0..wl1` at 1 Angstrom
/// steps.
fn lamp_tabulation(wl0: f64, wl1: f64, lines: &[f64], sigma: f64) -> (Vec<f64>, Vec<f64>) {
    let n = (wl1 - wl0) as usize;
    let wavelength: Vec<f64> = (0..n).map(|i| wl0 + i as f64).collect();
    let flux: Vec<f64> = wavelength
        .iter()
        .map(|&wl| {
            let mut f = 2.0;
            for &line in lines {
                f += 500.0 * (-((wl - line) / sigma).powi(2) / 2.0).exp();
            }
            f
        })
        .collect();
    (wavelength, flux)
}

fn g430l_lamp_row() -> LampRow {
    let (wavelength, flux) = lamp_tabulation(
        2800.0,
        5800.0,
        &[3270.0, 3610.0, 4050.0, 4320.0, 4800.0, 5100.0, 5330.0],
        8.0,
    );
    LampRow {
        lampset: Some("20".into()),
        sclamp: Some("HITM1".into()),
        opt_elem: Some("G430L".into()),
        wavelength,
        flux,
        pedigree: None,
    }
}

fn long_slit_row(aperture: &str, bars: &[(f64, f64)]) -> ApDesRow {
    ApDesRow {
        aperture: aperture.into(),
        width1: 0.2,
        width2: 52.0,
        offset1: 0.0,
        bar_locn: bars.iter().map(|&(locn, _)| locn).collect(),
        bar_width: bars.iter().map(|&(_, width)| width).collect(),
        pedigree: None,
    }
}

fn grating_info(aperture: &str, detector: Detector) -> PrimaryInfo {
    PrimaryInfo {
        rootname: "oabc0101x".into(),
        aperture: aperture.into(),
        aper_fov: aperture.into(),
        opt_elem: "G430L".into(),
        detector,
        cenwave: 4300,
        sclamp: "HITM1".into(),
        lampset: "20".into(),
        nimages: 1,
    }
}

fn grating_header(ny_center: f64) -> ImsetHeader {
    let mut hdr = ImsetHeader::new(1, Some(ALL_SERIOUS), true);
    hdr.crpix = [511.0, ny_center];
    hdr.crval = [4300.0, 0.0];
    hdr.cdelt = [2.75, CCD_ARCSEC_PER_PIXEL / 3600.0];
    hdr.exptime = 30.0;
    hdr.expstart = 51000.0;
    hdr
}

/// 1-D lamp spectrum on the G430L pixel grid, shifted by `shift`
/// pixels and convolved with the slit width.
fn g430l_spectrum(nx: usize, shift: f64, slitwidth_px: f64) -> Vec<f64> {
    let lamp_row = g430l_lamp_row();
    let lamp =
        wavecal::refdata::LampSpectrum::from_tabulated(&lamp_row.wavelength, &lamp_row.flux)
            .unwrap();
    let crpix = 511.0 + shift;
    let mut spec = integrate_lamp(&lamp, |pixel| 4300.0 + (pixel - crpix) * 2.75, nx);
    conv_slit(slitwidth_px, &mut spec);
    spec
}

/// Fraction of pixel `j` covered by the slit-minus-bars pattern: 1.0
/// when lit, 0.0 inside a bar, linear across bar edges.
fn slit_profile_value(j: usize, bar_edges: &[(f64, f64)]) -> f64 {
    let lo = j as f64 - 0.5;
    let hi = j as f64 + 0.5;
    let mut lit = 1.0;
    for &(b_lo, b_hi) in bar_edges {
        let overlap = (hi.min(b_hi) - lo.max(b_lo)).max(0.0);
        lit -= overlap;
    }
    lit.max(0.0)
}

/// A rectified long-slit frame: lamp spectrum along X times the slit
/// pattern along Y.
fn long_slit_frame(
    nx: usize,
    ny: usize,
    w_shift: f64,
    s_shift: f64,
    bar_centers_px: &[f64],
    bar_width_px: f64,
) -> PixelFrame {
    let spec = g430l_spectrum(nx, w_shift, 4.0);
    let bar_edges: Vec<(f64, f64)> = bar_centers_px
        .iter()
        .map(|&c| {
            (
                c + s_shift - bar_width_px / 2.0,
                c + s_shift + bar_width_px / 2.0,
            )
        })
        .collect();

    let mut sci = Array2::<f32>::zeros((ny, nx));
    for j in 0..ny {
        let p = slit_profile_value(j, &bar_edges);
        for i in 0..nx {
            sci[(j, i)] = (spec[i] * p) as f32;
        }
    }
    PixelFrame::new(sci, Array2::zeros((ny, nx))).unwrap()
}

fn grating_tables(apertures: Vec<ApDesRow>) -> RefTables {
    RefTables {
        lamp: Some(vec![g430l_lamp_row()]),
        apdes: Some(apertures),
        names: vec![
            ("LAMPTAB".into(), "lamp.yaml".into()),
            ("APDESTAB".into(), "apdes.yaml".into()),
        ],
        ..RefTables::default()
    }
}

#[test]
fn grating_ccd_known_shift() {
    // 1024x1024 CCD frame translated by (+3.2, -1.7)
    let (nx, ny) = (1024, 1024);
    let bar_centers = [256.0, 766.0];
    let frame = long_slit_frame(nx, ny, 3.2, -1.7, &bar_centers, 10.0);

    let info = grating_info("52X0.2", Detector::Ccd);
    let header = grating_header(511.0);
    // bar centres 256 and 766 correspond to -12.75 and +12.75 arcsec
    let tables = grating_tables(vec![long_slit_row(
        "52X0.2",
        &[(-12.75, 0.5), (12.75, 0.5)],
    )]);

    let mut exposure = MemExposure::new(info, vec![(header, frame)]);
    let outcome = wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("scenario1"),
        &mut NullSink,
    )
    .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    let (shifta1, shifta2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, shifta1, 3.2, epsilon = 0.1);
    assert_approx_eq!(f64, shifta2, -1.7, epsilon = 0.2);
    assert_eq!(exposure.wavecorr.as_deref(), Some("COMPLETE"));
}

#[test]
fn long_slit_single_bar() {
    // one centred bar, bar pattern translated by (0, +4.4)
    let (nx, ny) = (512, 512);
    let frame = long_slit_frame(nx, ny, 0.0, 4.4, &[255.0], 10.0);

    let info = grating_info("52X0.2", Detector::NuvMama);
    let header = grating_header(255.0);
    let tables = grating_tables(vec![long_slit_row("52X0.2", &[(0.0, 0.5)])]);

    let mut exposure = MemExposure::new(info, vec![(header, frame)]);
    wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("scenario2"),
        &mut NullSink,
    )
    .unwrap();

    let (shifta1, shifta2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, shifta2, 4.4, epsilon = 0.2);
    // the spectrum itself is unshifted
    assert_approx_eq!(f64, shifta1, 0.0, epsilon = 0.1);
}

#[test]
fn medium_slit_with_bad_pixels() {
    let (nx, ny) = (256, 512);
    // 6 arcsec slit is 120 pixels; band shifted +2
    let spec = g430l_spectrum(nx, 0.0, 4.0);
    let (lo_edge, hi_edge) = (255.0 - 60.0 + 2.0, 255.0 + 60.0 + 2.0);

    let mut sci = Array2::<f32>::zeros((ny, nx));
    for j in 0..ny {
        let lo = j as f64 - 0.5;
        let hi = j as f64 + 0.5;
        let p = ((hi.min(hi_edge) - lo.max(lo_edge)) / (hi - lo)).clamp(0.0, 1.0);
        for i in 0..nx {
            sci[(j, i)] = (spec[i] * p) as f32;
        }
    }
    // 5 percent of pixels carry a serious flag
    let mut dq = Array2::<u16>::zeros((ny, nx));
    let mut rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7);
    for q in &mut dq {
        if rng.gen::<f64>() < 0.05 {
            *q = 4; // DETECTORPROB
        }
    }
    let frame = PixelFrame::new(sci, dq).unwrap();

    let info = grating_info("6X0.2", Detector::NuvMama);
    let header = grating_header(255.0);
    let tables = grating_tables(vec![ApDesRow {
        aperture: "6X0.2".into(),
        width1: 0.2,
        width2: 6.0,
        offset1: 0.0,
        bar_locn: vec![],
        bar_width: vec![],
        pedigree: None,
    }]);

    let mut exposure = MemExposure::new(info, vec![(header, frame)]);
    wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("scenario3"),
        &mut NullSink,
    )
    .unwrap();

    let (_, shifta2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, shifta2, 2.0, epsilon = 0.2);
}

/// Reference tables for a small synthetic echelle mode patterned on
/// E230M: x = -6000 + 0.025 * m * lambda, flat traces stacked 50 rows
/// apart.
fn echelle_tables(orders: &[i32]) -> RefTables {
    let (wavelength, flux) = lamp_tabulation(
        2300.0,
        3100.0,
        &[2450.0, 2520.0, 2610.0, 2690.0, 2750.0, 2830.0, 2905.0, 2980.0],
        1.5,
    );
    let lamp = LampRow {
        lampset: Some("10".into()),
        sclamp: Some("LINE".into()),
        opt_elem: Some("E230M".into()),
        wavelength,
        flux,
        pedigree: None,
    };

    let disp = DispRow {
        opt_elem: Some("E230M".into()),
        cenwave: Some(2707),
        a2center: 512.0,
        ref_aper: "0.2X0.2".into(),
        coeff: vec![-6000.0, 0.025],
        mref: None,
        yref: None,
        a4corr: None,
        pedigree: None,
    };

    let inang = InangRow {
        opt_elem: Some("E230M".into()),
        cenwave: Some(2707),
        coeff1: vec![0.0, 0.0],
        coeff2: vec![0.0],
        pedigree: None,
    };

    let apdes = ApDesRow {
        aperture: "0.2X0.2".into(),
        width1: 0.2,
        width2: 0.2,
        offset1: 0.0,
        bar_locn: vec![],
        bar_width: vec![],
        pedigree: None,
    };

    let sptrc = orders
        .iter()
        .map(|&m| SpTraceRow {
            opt_elem: Some("E230M".into()),
            cenwave: Some(2707),
            a2center: 256.0 + (f64::from(m) - 92.5) * 50.0,
            a1center: 256.0,
            sporder: m,
            a2displ: vec![0.0; 512],
            pedigree: None,
        })
        .collect();

    RefTables {
        lamp: Some(vec![lamp]),
        apdes: Some(vec![apdes]),
        disp: Some(vec![disp]),
        inang: Some(vec![inang]),
        sptrc: Some(sptrc),
        names: vec![
            ("LAMPTAB".into(), "lamp.yaml".into()),
            ("APDESTAB".into(), "apdes.yaml".into()),
            ("DISPTAB".into(), "disp.yaml".into()),
            ("INANGTAB".into(), "inang.yaml".into()),
            ("SPTRCTAB".into(), "sptrc.yaml".into()),
        ],
        ..RefTables::default()
    }
}

fn echelle_info() -> PrimaryInfo {
    PrimaryInfo {
        rootname: "oech0101x".into(),
        aperture: "0.2X0.2".into(),
        aper_fov: "0.2X0.2".into(),
        opt_elem: "E230M".into(),
        detector: Detector::NuvMama,
        cenwave: 2707,
        sclamp: "LINE".into(),
        lampset: "10".into(),
        nimages: 1,
    }
}

fn echelle_header() -> ImsetHeader {
    let mut hdr = ImsetHeader::new(1, Some(ALL_SERIOUS), true);
    hdr.crpix = [255.0, 255.0];
    hdr.cdelt = [1.0, CCD_ARCSEC_PER_PIXEL / 3600.0];
    hdr.exptime = 10.0;
    hdr.expstart = 51500.0;
    hdr
}

#[test]
fn echelle_two_dimensional_path() {
    let size = 512;
    let orders = [90, 91, 92, 93, 94, 95];
    let tables = echelle_tables(&orders);
    let info = echelle_info();

    // paint the observed frame by hand with fractional pixel coverage,
    // every order shifted by (+1.5, +0.8) from its nominal place
    let (dx, dy) = (1.5, 0.8);
    let lamp_row = &tables.lamp.as_ref().unwrap()[0];
    let lamp =
        wavecal::refdata::LampSpectrum::from_tabulated(&lamp_row.wavelength, &lamp_row.flux)
            .unwrap();
    let disp = wavecal::dispersion::DispersionRelation::from_coeff(&[-6000.0, 0.025]);
    let hdr = echelle_header();
    let slit_px = 4.0; // 0.2 arcsec at 0.05 arcsec per pixel

    let mut sci = Array2::<f32>::zeros((size, size));
    for row in tables.sptrc.as_ref().unwrap() {
        let m = f64::from(row.sporder);
        let mut estimate = 2707.0;
        let mut tspec = integrate_lamp(
            &lamp,
            |pixel| {
                let wl = disp
                    .wavelength(m, pixel - dx, estimate, 1e-6)
                    .unwrap_or(estimate);
                estimate = wl;
                wl
            },
            size,
        );
        conv_slit(slit_px, &mut tspec);

        let y_im = row.a2center + dy;
        for j in 0..size {
            let lo = j as f64 - 0.5;
            let hi = j as f64 + 0.5;
            let coverage =
                (hi.min(y_im + slit_px / 2.0) - lo.max(y_im - slit_px / 2.0)).max(0.0);
            if coverage > 0.0 {
                for i in 0..size {
                    sci[(j, i)] += (tspec[i] * coverage) as f32;
                }
            }
        }
    }
    let frame = PixelFrame::new(sci, Array2::zeros((size, size))).unwrap();

    let mut exposure = MemExposure::new(info, vec![(hdr, frame)]);
    wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("scenario4"),
        &mut NullSink,
    )
    .unwrap();

    let (shifta1, shifta2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, shifta1, 1.5, epsilon = 0.1);
    assert_approx_eq!(f64, shifta2, 0.8, epsilon = 0.1);
}

#[test]
fn prism_unreasonable_shift_yields_sentinels() {
    let size = 256;

    let (wavelength, flux) =
        lamp_tabulation(1390.0, 1480.0, &[1410.0, 1432.0, 1455.0], 2.0);
    let tables = RefTables {
        lamp: Some(vec![LampRow {
            lampset: Some("5".into()),
            sclamp: Some("PRISM".into()),
            opt_elem: Some("PRISM".into()),
            wavelength,
            flux,
            pedigree: None,
        }]),
        apdes: Some(vec![long_slit_row("52X0.1", &[(0.0, 0.5)])]),
        disp: Some(vec![DispRow {
            opt_elem: Some("PRISM".into()),
            cenwave: Some(1200),
            a2center: 512.0,
            ref_aper: "52X0.1".into(),
            coeff: vec![1000.0, 1200.0, -2.0e5, 0.0, 0.0],
            mref: None,
            yref: None,
            a4corr: None,
            pedigree: None,
        }]),
        inang: Some(vec![InangRow {
            opt_elem: Some("PRISM".into()),
            cenwave: Some(1200),
            coeff1: vec![0.0],
            coeff2: vec![0.0],
            pedigree: None,
        }]),
        sptrc: Some(vec![SpTraceRow {
            opt_elem: Some("PRISM".into()),
            cenwave: Some(1200),
            a2center: 128.0,
            a1center: 128.0,
            sporder: 1,
            a2displ: vec![0.0; 256],
            pedigree: None,
        }]),
        sdc: Some(vec![SdcRow {
            opt_elem: Some("PRISM".into()),
            a2center: 129.0,
            cdelt2: CCD_ARCSEC_PER_PIXEL,
            pedigree: None,
        }]),
        names: vec![("LAMPTAB".into(), "lamp.yaml".into())],
        ..RefTables::default()
    };

    let info = PrimaryInfo {
        rootname: "oprs0101x".into(),
        aperture: "52X0.1".into(),
        aper_fov: "52X0.1".into(),
        opt_elem: "PRISM".into(),
        detector: Detector::NuvMama,
        cenwave: 1200,
        sclamp: "PRISM".into(),
        lampset: "5".into(),
        nimages: 1,
    };

    let mut hdr = ImsetHeader::new(1, Some(ALL_SERIOUS), true);
    hdr.exptime = 10.0;
    // a shift of +2000 pixels moves every feature off the frame, so
    // the observed image is featureless
    let sci = Array2::<f32>::from_elem((size, size), 100.0);
    let frame = PixelFrame::new(sci, Array2::zeros((size, size))).unwrap();

    let mut exposure = MemExposure::new(info, vec![(hdr, frame)]);
    let outcome = wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("scenario5"),
        &mut NullSink,
    )
    .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    let (shifta1, shifta2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, shifta1, UNDEFINED_SHIFT);
    assert_approx_eq!(f64, shifta2, UNDEFINED_SHIFT);
}

#[test]
fn skipped_imset_then_good_imset() {
    let (nx, ny) = (512, 512);
    let good_frame = long_slit_frame(nx, ny, 1.0, -0.5, &[135.0, 375.0], 10.0);
    let bad_frame = PixelFrame::new(
        Array2::zeros((ny, nx)),
        Array2::zeros((ny, nx)),
    )
    .unwrap();

    let mut info = grating_info("52X0.2", Detector::NuvMama);
    info.nimages = 2;
    let good_header = grating_header(255.0);
    let mut bad_header = good_header.clone();
    bad_header.imset_ok = false;

    // bar centres 135 and 375 are at -6 and +6 arcsec from row 255
    let tables = grating_tables(vec![long_slit_row(
        "52X0.2",
        &[(-6.0, 0.5), (6.0, 0.5)],
    )]);

    let mut exposure = MemExposure::new(
        info,
        vec![(bad_header, bad_frame), (good_header, good_frame)],
    );
    wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("scenario6"),
        &mut NullSink,
    )
    .unwrap();

    let (s1, s2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, s1, UNDEFINED_SHIFT);
    assert_approx_eq!(f64, s2, UNDEFINED_SHIFT);

    let (s1, s2) = exposure.shifts[1].unwrap();
    assert_approx_eq!(f64, s1, 1.0, epsilon = 0.1);
    assert_approx_eq!(f64, s2, -0.5, epsilon = 0.2);

    // history was written once, on the first imset
    assert_eq!(exposure.wavecorr.as_deref(), Some("COMPLETE"));
    assert!(exposure
        .history
        .iter()
        .any(|line| line.contains("LAMPTAB")));
}

#[test]
fn dummy_required_table_skips_cleanly() {
    let (nx, ny) = (256, 256);
    let frame = long_slit_frame(nx, ny, 0.0, 0.0, &[128.0], 10.0);

    let info = grating_info("52X0.2", Detector::NuvMama);
    let header = grating_header(127.0);

    let mut lamp = g430l_lamp_row();
    lamp.pedigree = Some("DUMMY calibration".into());
    let tables = RefTables {
        lamp: Some(vec![lamp]),
        apdes: Some(vec![long_slit_row("52X0.2", &[(0.0, 0.5)])]),
        names: vec![("LAMPTAB".into(), "lamp.yaml".into())],
        ..RefTables::default()
    };

    let mut exposure = MemExposure::new(info, vec![(header, frame)]);
    let outcome = wavecal(
        &mut exposure,
        &tables,
        &RunConfig::for_input("dummy"),
        &mut NullSink,
    )
    .unwrap();

    assert_eq!(outcome, Outcome::Skipped);
    let (s1, s2) = exposure.shifts[0].unwrap();
    assert_approx_eq!(f64, s1, UNDEFINED_SHIFT);
    assert_approx_eq!(f64, s2, UNDEFINED_SHIFT);
    assert_eq!(exposure.wavecorr.as_deref(), Some("SKIPPED"));
}

#[test]
fn shifts_are_deterministic() {
    let (nx, ny) = (512, 512);
    let build = || {
        let frame = long_slit_frame(nx, ny, 2.5, 1.25, &[135.0, 375.0], 10.0);
        let info = grating_info("52X0.2", Detector::NuvMama);
        let header = grating_header(255.0);
        MemExposure::new(info, vec![(header, frame)])
    };
    let tables = grating_tables(vec![long_slit_row(
        "52X0.2",
        &[(-6.0, 0.5), (6.0, 0.5)],
    )]);

    let mut first = build();
    let mut second = build();
    wavecal(&mut first, &tables, &RunConfig::for_input("a"), &mut NullSink).unwrap();
    wavecal(&mut second, &tables, &RunConfig::for_input("b"), &mut NullSink).unwrap();

    // bitwise identical, not merely close
    assert_eq!(first.shifts[0].unwrap(), second.shifts[0].unwrap());
}
