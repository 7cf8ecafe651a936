//! FITS implementation of the core's exposure interface.
//!
//! The container is a multi-extension FITS file: a primary header with
//! the observation keywords and reference-table bindings, then
//! SCI/ERR/DQ extension triplets, one per imset.  On-disk coordinate
//! keywords are one-indexed; they are converted to the zero-indexed
//! internal convention here, at read time.

use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::Array2;
use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use wavecal::debug::DebugSink;
use wavecal::error::{Error, Result};
use wavecal::exposure::{Detector, Exposure, ImsetHeader, PixelFrame, PrimaryInfo};

use crate::tables::TABLE_KEYWORDS;

fn io_err(err: &fitsio::errors::Error) -> Error {
    Error::Io(err.to_string())
}

/// A wavecal exposure stored in a FITS file, opened for update.
pub struct FitsExposure {
    file: FitsFile,
    bindings: HashMap<String, String>,
    sci_hdus: HashMap<usize, usize>,
    dq_hdus: HashMap<usize, usize>,
}

impl FitsExposure {
    /// Opens `path` for in-place update and indexes its extensions.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened as FITS.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = FitsFile::edit(path).map_err(|e| io_err(&e))?;

        let mut sci_hdus = HashMap::new();
        let mut dq_hdus = HashMap::new();
        let mut idx = 1;
        while let Ok(hdu) = file.hdu(idx) {
            let extname: String = hdu
                .read_key(&mut file, "EXTNAME")
                .unwrap_or_default();
            let extver: i64 = hdu.read_key(&mut file, "EXTVER").unwrap_or(1);
            match extname.trim() {
                "SCI" => {
                    sci_hdus.insert(extver.max(1) as usize, idx);
                }
                "DQ" => {
                    dq_hdus.insert(extver.max(1) as usize, idx);
                }
                _ => {}
            }
            idx += 1;
        }

        let mut bindings = HashMap::new();
        let primary = file.hdu(0).map_err(|e| io_err(&e))?;
        for keyword in TABLE_KEYWORDS {
            if let Ok(name) = primary.read_key::<String>(&mut file, keyword) {
                bindings.insert(keyword.to_owned(), name);
            }
        }

        Ok(Self {
            file,
            bindings,
            sci_hdus,
            dq_hdus,
        })
    }

    /// Reference-table bindings found in the primary header.
    #[must_use]
    pub fn bindings(&self) -> HashMap<String, String> {
        self.bindings.clone()
    }

    fn key_string(&mut self, hdu_idx: usize, name: &str) -> Result<String> {
        let hdu = self.file.hdu(hdu_idx).map_err(|e| io_err(&e))?;
        hdu.read_key::<String>(&mut self.file, name)
            .map(|s| s.trim().to_owned())
            .map_err(|_| Error::MissingKeyword(name.to_owned()))
    }

    fn key_f64_or(&mut self, hdu_idx: usize, name: &str, default: f64) -> f64 {
        self.file
            .hdu(hdu_idx)
            .and_then(|hdu| hdu.read_key::<f64>(&mut self.file, name))
            .unwrap_or(default)
    }

    fn key_i64_or(&mut self, hdu_idx: usize, name: &str, default: i64) -> i64 {
        self.file
            .hdu(hdu_idx)
            .and_then(|hdu| hdu.read_key::<i64>(&mut self.file, name))
            .unwrap_or(default)
    }

    fn key_bool_or(&mut self, hdu_idx: usize, name: &str, default: bool) -> bool {
        let Ok(hdu) = self.file.hdu(hdu_idx) else {
            return default;
        };
        if let Ok(value) = hdu.read_key::<bool>(&mut self.file, name) {
            return value;
        }
        // tolerate the keyword written as a string
        hdu.read_key::<String>(&mut self.file, name)
            .map_or(default, |s| {
                matches!(s.trim(), "T" | "t" | "TRUE" | "true" | "1")
            })
    }

    fn read_plane_f32(&mut self, hdu_idx: usize) -> Result<Array2<f32>> {
        let hdu = self.file.hdu(hdu_idx).map_err(|e| io_err(&e))?;
        let shape = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => {
                (shape[0], shape[1])
            }
            _ => {
                return Err(Error::Geometry(
                    "extension is not a 2-D image".to_owned(),
                ))
            }
        };
        let data: Vec<f32> = hdu.read_image(&mut self.file).map_err(|e| io_err(&e))?;
        Array2::from_shape_vec(shape, data)
            .map_err(|e| Error::Geometry(e.to_string()))
    }

    fn read_plane_u16(&mut self, hdu_idx: usize) -> Result<Array2<u16>> {
        let hdu = self.file.hdu(hdu_idx).map_err(|e| io_err(&e))?;
        let shape = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => {
                (shape[0], shape[1])
            }
            _ => {
                return Err(Error::Geometry(
                    "extension is not a 2-D image".to_owned(),
                ))
            }
        };
        let data: Vec<i32> = hdu.read_image(&mut self.file).map_err(|e| io_err(&e))?;
        let data = data.into_iter().map(|v| v.max(0) as u16).collect();
        Array2::from_shape_vec(shape, data)
            .map_err(|e| Error::Geometry(e.to_string()))
    }

    fn sci_hdu(&self, extver: usize) -> Result<usize> {
        self.sci_hdus
            .get(&extver)
            .copied()
            .ok_or_else(|| Error::Io(format!("no SCI extension with EXTVER {extver}")))
    }
}

impl Exposure for FitsExposure {
    fn primary(&mut self) -> Result<PrimaryInfo> {
        let opt_elem = self.key_string(0, "OPT_ELEM")?;
        let detector = Detector::parse(&self.key_string(0, "DETECTOR")?)?;
        let aperture = self.key_string(0, "APERTURE")?;
        let aper_fov = self
            .key_string(0, "APER_FOV")
            .unwrap_or_else(|_| aperture.clone());
        let cenwave = self
            .key_i64_or(0, "CENWAVE", i64::MIN)
            .try_into()
            .map_err(|_| Error::MissingKeyword("CENWAVE".to_owned()))?;

        // a prism observation shares lamps with the gratings; the
        // forced name keeps the lamp-table row unique
        let sclamp = if opt_elem == "PRISM" {
            "PRISM".to_owned()
        } else {
            self.key_string(0, "SCLAMP")?
        };
        let lampset = self.key_string(0, "LAMPSET")?;
        let rootname = self
            .key_string(0, "ROOTNAME")
            .unwrap_or_default();

        Ok(PrimaryInfo {
            rootname,
            aperture,
            aper_fov,
            opt_elem,
            detector,
            cenwave,
            sclamp,
            lampset,
            nimages: self.sci_hdus.len(),
        })
    }

    fn read_imset(&mut self, extver: usize) -> Result<(ImsetHeader, PixelFrame)> {
        let sci_idx = self.sci_hdu(extver)?;

        let dispaxis = self.key_i64_or(sci_idx, "DISPAXIS", 1) as i32;
        let sdqflags = self.key_i64_or(sci_idx, "SDQFLAGS", 32767) as u16;
        let imset_ok = self.key_bool_or(sci_idx, "IMSET_OK", true);

        let mut header = ImsetHeader::new(dispaxis, Some(sdqflags), imset_ok);
        // CRPIX is one-indexed on disk
        header.crpix = [
            self.key_f64_or(sci_idx, "CRPIX1", 0.0) - 1.0,
            self.key_f64_or(sci_idx, "CRPIX2", 0.0) - 1.0,
        ];
        header.crval = [
            self.key_f64_or(sci_idx, "CRVAL1", 0.0),
            self.key_f64_or(sci_idx, "CRVAL2", 0.0),
        ];
        header.cdelt = [
            self.key_f64_or(sci_idx, "CD1_1", 1.0),
            self.key_f64_or(sci_idx, "CD2_2", 1.0),
        ];
        let ltm = [
            self.key_f64_or(sci_idx, "LTM1_1", 1.0),
            self.key_f64_or(sci_idx, "LTM2_2", 1.0),
        ];
        let ltv = [
            self.key_f64_or(sci_idx, "LTV1", 0.0),
            self.key_f64_or(sci_idx, "LTV2", 0.0),
        ];
        // one-indexed transform to the zero-indexed convention
        header.ltm = ltm;
        header.ltv = [ltv[0] + ltm[0] - 1.0, ltv[1] + ltm[1] - 1.0];
        header.exptime = self.key_f64_or(sci_idx, "EXPTIME", 0.0);
        header.expstart = self.key_f64_or(sci_idx, "EXPSTART", 0.0);

        let sci = self.read_plane_f32(sci_idx)?;
        let dq = match self.dq_hdus.get(&extver).copied() {
            Some(dq_idx) => self.read_plane_u16(dq_idx)?,
            None => Array2::zeros(sci.dim()),
        };

        Ok((header, PixelFrame::new(sci, dq)?))
    }

    fn write_shifts(&mut self, extver: usize, shifta1: f64, shifta2: f64) -> Result<()> {
        let sci_idx = self.sci_hdu(extver)?;
        let hdu = self.file.hdu(sci_idx).map_err(|e| io_err(&e))?;
        hdu.write_key(&mut self.file, "SHIFTA1", shifta1)
            .map_err(|e| io_err(&e))?;
        hdu.write_key(&mut self.file, "SHIFTA2", shifta2)
            .map_err(|e| io_err(&e))?;
        Ok(())
    }

    fn append_history(&mut self, wavecorr: &str, lines: &[String]) -> Result<()> {
        let primary = self.file.hdu(0).map_err(|e| io_err(&e))?;
        primary
            .write_key(&mut self.file, "WAVECORR", wavecorr.to_owned())
            .map_err(|e| io_err(&e))?;

        // the high-level interface has no HISTORY support; talk to
        // cfitsio directly, with the primary as the current HDU
        let mut status = 0;
        let mut hdutype = 0;
        unsafe {
            fitsio_sys::ffmahd(self.file.as_raw(), 1, &mut hdutype, &mut status);
        }
        for line in lines {
            let text = CString::new(line.as_str())
                .map_err(|e| Error::Io(e.to_string()))?;
            unsafe {
                fitsio_sys::ffphis(self.file.as_raw(), text.as_ptr(), &mut status);
            }
        }
        if status == 0 {
            Ok(())
        } else {
            Err(Error::Io(format!(
                "cfitsio status {status} while writing history"
            )))
        }
    }
}

/// Debug sink for echelle data: image planes go to a FITS file, one
/// extension per plane.  The file name gets a `.fits` suffix when it
/// has none, and it is created on first use.
pub struct FitsImageSink {
    path: PathBuf,
    file: Option<FitsFile>,
}

impl FitsImageSink {
    /// A sink writing to `path` (suffixed `.fits` if needed).
    #[must_use]
    pub fn new(path: &Path) -> Self {
        let mut path = path.to_path_buf();
        let suffixed = path
            .extension()
            .is_some_and(|ext| ext == "fit" || ext == "fits");
        if !suffixed {
            let mut name = path.as_os_str().to_owned();
            name.push(".fits");
            path = PathBuf::from(name);
        }
        Self { path, file: None }
    }

    fn ensure_file(&mut self) -> Option<&mut FitsFile> {
        if self.file.is_none() {
            match FitsFile::create(&self.path).overwrite().open() {
                Ok(file) => self.file = Some(file),
                Err(err) => {
                    println!(
                        "Warning  Can't create debug image {}: {err}",
                        self.path.display()
                    );
                    return None;
                }
            }
        }
        self.file.as_mut()
    }
}

impl DebugSink for FitsImageSink {
    fn text(&mut self, _line: &str) {
        // echelle debug output is image-only
    }

    fn image(&mut self, name: &str, extver: usize, data: &Array2<f32>) {
        let (ny, nx) = data.dim();
        let extname = format!("{}{}", name.to_uppercase(), extver);
        let Some(slice) = data.as_slice() else {
            return;
        };
        let path = self.path.clone();
        let Some(file) = self.ensure_file() else {
            return;
        };

        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[ny, nx],
        };
        let result = match file.create_image(extname, &description) {
            Ok(hdu) => hdu.write_image(file, slice),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            println!("Warning  Can't write debug image {}: {err}", path.display());
        }
    }
}
