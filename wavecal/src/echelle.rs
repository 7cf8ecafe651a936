//! Echelle shift determination: both axes at once through
//! Fourier-domain cross-correlation of the observed frame with a
//! synthesised template.

use crate::debug::DebugSink;
use crate::error::{Error, Result};
use crate::exposure::PixelFrame;
use crate::template::{make_template, TemplateParams};
use crate::xcorr::peak_quad3;
use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

/// A contiguous complex image with in-place 2-D FFTs.  Pixels are
/// indexed `(x, y)`; rows are contiguous.
pub struct ComplexImage {
    nx: usize,
    ny: usize,
    data: Vec<Complex<f32>>,
}

impl ComplexImage {
    /// A zero-filled complex image.
    #[must_use]
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            data: vec![Complex::new(0.0, 0.0); nx * ny],
        }
    }

    /// Embeds a rectangular section of a real image, `sect1` columns
    /// by `sect2` rows, both inclusive.
    ///
    /// # Errors
    ///
    /// Fails when the section is degenerate or extends beyond the
    /// image.
    pub fn from_real_section(
        image: &Array2<f32>,
        sect1: [usize; 2],
        sect2: [usize; 2],
    ) -> Result<Self> {
        if sect1[1] < sect1[0] || sect2[1] < sect2[0] {
            return Err(Error::Geometry(format!(
                "empty section {sect1:?} x {sect2:?}"
            )));
        }
        if sect1[1] >= image.ncols() || sect2[1] >= image.nrows() {
            return Err(Error::Geometry(format!(
                "section {sect1:?} x {sect2:?} exceeds {:?}",
                image.dim()
            )));
        }

        let nx = sect1[1] - sect1[0] + 1;
        let ny = sect2[1] - sect2[0] + 1;
        let mut out = Self::zeros(nx, ny);
        for j in 0..ny {
            for i in 0..nx {
                out.data[j * nx + i] =
                    Complex::new(image[(j + sect2[0], i + sect1[0])], 0.0);
            }
        }
        Ok(out)
    }

    /// Image width.
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Image height.
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// The complex value at `(i, j)`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Complex<f32> {
        self.data[j * self.nx + i]
    }

    /// In-place 2-D FFT, forward or inverse.  Neither direction
    /// normalises; only peak locations matter here.  Any dimensions
    /// are supported, powers of two or not.
    pub fn fft2d(&mut self, inverse: bool) {
        let mut planner = FftPlanner::<f32>::new();
        let row_fft = if inverse {
            planner.plan_fft_inverse(self.nx)
        } else {
            planner.plan_fft_forward(self.nx)
        };
        let col_fft = if inverse {
            planner.plan_fft_inverse(self.ny)
        } else {
            planner.plan_fft_forward(self.ny)
        };

        // rows are contiguous
        row_fft.process(&mut self.data);

        // columns through a scratch vector
        let mut column = vec![Complex::new(0.0, 0.0); self.ny];
        for i in 0..self.nx {
            for (j, c) in column.iter_mut().enumerate() {
                *c = self.data[j * self.nx + i];
            }
            col_fft.process(&mut column);
            for (j, &c) in column.iter().enumerate() {
                self.data[j * self.nx + i] = c;
            }
        }
    }
}

/// Cross-correlates two forward transforms and returns `(w_shift,
/// s_shift)`: the displacement of the image relative to the template
/// in image pixels, positive when features sit at larger pixel
/// numbers.
///
/// # Errors
///
/// Fails when the two transforms disagree in shape.
pub fn xc_wavecal(template_fft: &ComplexImage, image_fft: &ComplexImage) -> Result<(f64, f64)> {
    let (nx, ny) = (template_fft.nx, template_fft.ny);
    if image_fft.nx != nx || image_fft.ny != ny {
        return Err(Error::Geometry(format!(
            "template is {}x{} but image is {}x{}",
            nx, ny, image_fft.nx, image_fft.ny
        )));
    }

    // template times conjugate of image: cross-correlation in the
    // frequency domain
    let mut product = ComplexImage::zeros(nx, ny);
    for (z, (&t, &w)) in product
        .data
        .iter_mut()
        .zip(template_fft.data.iter().zip(&image_fft.data))
    {
        *z = t * w.conj();
    }

    product.fft2d(true);

    // shift so that zero lag lands at the centre
    let (cx, cy) = (nx / 2, ny / 2);
    let mut xc = Array2::<f64>::zeros((ny, nx));
    for j in 0..ny {
        for i in 0..nx {
            let src = product.data[((j + ny - cy) % ny) * nx + ((i + nx - cx) % nx)];
            xc[(j, i)] = f64::from(src.re);
        }
    }

    // peak of the real part
    let mut px = 0;
    let mut py = 0;
    let mut best = f64::MIN;
    for j in 0..ny {
        for i in 0..nx {
            if xc[(j, i)] > best {
                best = xc[(j, i)];
                px = i;
                py = j;
            }
        }
    }

    // sub-pixel refinement along each axis
    let dx = if px > 0 && px < nx - 1 {
        peak_quad3(&[xc[(py, px - 1)], xc[(py, px)], xc[(py, px + 1)]])
    } else {
        0.0
    };
    let dy = if py > 0 && py < ny - 1 {
        peak_quad3(&[xc[(py - 1, px)], xc[(py, px)], xc[(py + 1, px)]])
    } else {
        0.0
    };

    // the correlation peak sits at centre minus the applied shift
    let w_shift = cx as f64 - (px as f64 + dx);
    let s_shift = cy as f64 - (py as f64 + dy);

    Ok((w_shift, s_shift))
}

/// Echelle shift finder.  The template (and its transform) is built on
/// the first imset and reused for the rest of the exposure.
#[derive(Default)]
pub struct EchelleFinder {
    clamp: Option<ComplexImage>,
}

impl EchelleFinder {
    /// A finder with no template yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Determines both shifts for one imset.
    ///
    /// # Errors
    ///
    /// Fails on geometry mismatches; an off-centre or absent
    /// correlation peak shows up as an unreasonable shift value, which
    /// the driver rejects.
    pub fn find_shifts(
        &mut self,
        params: &TemplateParams,
        frame: &PixelFrame,
        sect1: [usize; 2],
        sect2: [usize; 2],
        extver: usize,
        dbg: &mut dyn DebugSink,
    ) -> Result<(f64, f64)> {
        let mut cwave = ComplexImage::from_real_section(&frame.sci, sect1, sect2)?;

        if self.clamp.is_none() {
            let template = make_template(params, frame.nx(), frame.ny());
            if dbg.active() {
                dbg.image("template", extver, &template);
            }
            let mut clamp =
                ComplexImage::from_real_section(&template, sect1, sect2)?;
            clamp.fft2d(false);
            self.clamp = Some(clamp);
        }

        cwave.fft2d(false);

        let Some(clamp) = self.clamp.as_ref() else {
            return Err(Error::Geometry("echelle template unavailable".to_owned()));
        };
        xc_wavecal(clamp, &cwave)
    }
}
