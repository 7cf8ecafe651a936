//! Cosmic-ray flagging for CCD wavecals.
//!
//! The data are 2-D rectified, so a single column (dispaxis 1) or row
//! (dispaxis 2) is statistically homogeneous apart from pixels beyond
//! the slit ends or behind an occulting bar.  Outliers along each
//! vector are flagged with DATAREJECT in place; bits are only ever
//! set, never cleared.

use crate::debug::DebugSink;
use crate::dq::DqFlags;
use crate::exposure::{ImsetHeader, PixelFrame};
use crate::refdata::WcpParameters;
use crate::stats::clean_mean;

/// Flags cosmic rays in the DQ plane of `frame` and returns the number
/// of pixels newly flagged.  The caller is responsible for gating on
/// detector type and on DATAREJECT being part of the serious flags.
pub fn flag_cr(
    header: &ImsetHeader,
    wcp: &WcpParameters,
    frame: &mut PixelFrame,
    extver: usize,
    dbg: &mut dyn DebugSink,
) -> usize {
    let mut ncr = 0;

    match header.dispaxis {
        1 => {
            for i in 0..frame.nx() {
                let sci: Vec<f32> = frame.sci.column(i).to_vec();
                let mut dq: Vec<u16> = frame.dq.column(i).to_vec();
                if flag_line(header, wcp, &sci, &mut dq) > 0 {
                    ncr += count_and_store(&mut frame.dq.column_mut(i), &dq);
                }
            }
        }
        2 => {
            for j in 0..frame.ny() {
                let sci: Vec<f32> = frame.sci.row(j).to_vec();
                let mut dq: Vec<u16> = frame.dq.row(j).to_vec();
                if flag_line(header, wcp, &sci, &mut dq) > 0 {
                    ncr += count_and_store(&mut frame.dq.row_mut(j), &dq);
                }
            }
        }
        _ => {}
    }

    if dbg.active() {
        let dq_f32 = frame.dq.mapv(f32::from);
        dbg.image("dq", extver, &dq_f32);
    }

    ncr
}

fn count_and_store(dest: &mut ndarray::ArrayViewMut1<u16>, src: &[u16]) -> usize {
    let reject = DqFlags::DATAREJECT.bits();
    let mut n = 0;
    for (d, &s) in dest.iter_mut().zip(src) {
        if s & reject != 0 && *d & reject == 0 {
            n += 1;
        }
        *d |= s;
    }
    n
}

/// Flags cosmic rays in one 1-D vector; returns how many were found.
///
/// A pixel through the slit is a hit when it exceeds the clean mean of
/// the illuminated pixels by `nsigma_cr` sigma.  A masked pixel (behind
/// a bar or off the slit) must pass two tests: exceed the masked mean
/// by `nsigma_cr` sigma AND sit farther than `nsigma_illum` sigma from
/// the illuminated mean.  The second test exists because mode-select
/// slop means a pixel flagged as masked may in fact be illuminated.
fn flag_line(header: &ImsetHeader, wcp: &WcpParameters, sci: &[f32], dq: &mut [u16]) -> usize {
    let datamasked = DqFlags::DATAMASKED.bits();
    let reject = DqFlags::DATAREJECT.bits();
    // sdqflags already excludes DATAMASKED, but be explicit about it
    let sdqflags = header.sdqflags & !datamasked;

    let mut illum: Vec<f64> = Vec::with_capacity(sci.len());
    let mut masked: Vec<f64> = Vec::with_capacity(sci.len());
    for (&value, &flag) in sci.iter().zip(dq.iter()) {
        if flag & sdqflags == 0 {
            if flag & datamasked != 0 {
                masked.push(f64::from(value));
            } else {
                illum.push(f64::from(value));
            }
        }
    }

    let cm_illum = clean_mean(&illum, wcp.min_mad, wcp.mad_reject);
    let cm_masked = clean_mean(&masked, wcp.min_mad, wcp.mad_reject);

    if cm_illum.nsum == 0 && cm_masked.nsum == 0 {
        return 0;
    }
    // borrow a spread estimate when one group is empty
    let i_stddev = if cm_illum.nsum == 0 {
        cm_masked.stddev
    } else {
        cm_illum.stddev
    };
    let m_stddev = if cm_masked.nsum == 0 {
        cm_illum.stddev
    } else {
        cm_masked.stddev
    };

    let mut ncr = 0;
    for (&value, flag) in sci.iter().zip(dq.iter_mut()) {
        let v = f64::from(value);
        if *flag & datamasked != 0 {
            if v > cm_masked.mean + wcp.nsigma_cr * m_stddev
                && (v - cm_illum.mean).abs() > wcp.nsigma_illum * i_stddev
            {
                *flag |= reject;
                ncr += 1;
            }
        } else if *flag & header.sdqflags == 0
            && v > cm_illum.mean + wcp.nsigma_cr * i_stddev
        {
            *flag |= reject;
            ncr += 1;
        }
    }

    ncr
}
