//! Data-quality bit definitions.

use bitflags::bitflags;

bitflags! {
    /// Per-pixel data-quality flags.  The numeric values follow the
    /// STIS convention and are stored on disk in 16-bit DQ extensions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DqFlags: u16 {
        /// Reed-Solomon decoding error.
        const SOFTERR = 1;
        /// Data replaced by fill value.
        const DATALOST = 2;
        /// Bad detector pixel.
        const DETECTORPROB = 4;
        /// Behind an occulting bar or beyond the end of the slit.
        const DATAMASKED = 8;
        /// Hot (but probably only warm) pixel.
        const HOTPIX = 16;
        /// Large blemish.
        const LARGEBLEM = 32;
        /// Overscan region.
        const OVERSCAN = 128;
        /// Saturated pixel.
        const SATPIX = 256;
        /// Bad pixel in a calibration reference file.
        const CALIBDEFECT = 512;
        /// Small blemish.
        const SMALLBLEM = 1024;
        /// Rejected during image combination or cosmic-ray flagging.
        const DATAREJECT = 8192;
    }
}

/// Default SDQFLAGS value when the keyword is absent: all 15 bits set.
pub const ALL_SERIOUS: u16 = 32767;

/// Reduce an SDQFLAGS keyword value to the mask actually used by the
/// wavecal step.  Pixels behind a bar, hot pixels, and small blemishes
/// must still participate in the shift determination, so those bits are
/// never treated as serious here.
#[must_use]
pub const fn serious_flags(sdqflags: u16) -> u16 {
    sdqflags
        & !DqFlags::DATAMASKED.bits()
        & !DqFlags::HOTPIX.bits()
        & !DqFlags::SMALLBLEM.bits()
}
