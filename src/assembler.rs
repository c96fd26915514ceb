//! Document Assembler - PDF and Proof Export
//!
//! Artifacts are written to a temporary file in the destination directory and
//! renamed into place. A reader never sees a half-written file.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::canvas::{CanvasAdapter, DrawCommand, PtRect};
use crate::color::CmykColor;
use crate::geometry::{pixels_for, POINTS_PER_INCH};
use crate::hashing::sha256_hex;
use crate::pdf::PdfWriter;
use crate::print::FinalizationMode;
use crate::spec::DeliverableSpec;

/// Proof resolution. Proofs are for layout review, not color.
pub const DEFAULT_PROOF_DPI: u32 = 10;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Proof encoding failed: {0}")]
    Proof(#[from] image::ImageError),

    #[error("Proof would be empty at {dpi} dpi")]
    EmptyProof { dpi: u32 },

    #[error("PDF serialization failed: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// Paths and digests of one exported deliverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedArtifacts {
    pub pdf: PathBuf,
    pub pdf_sha256: String,
    pub proof: PathBuf,
    pub proof_sha256: String,
}

/// Writes a file atomically: temp file in the same directory, then rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// `Backwall` from `backwall`.
fn display_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct DocumentAssembler {
    output_dir: PathBuf,
    finalization: FinalizationMode,
    proof_dpi: u32,
}

impl DocumentAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, finalization: FinalizationMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            finalization,
            proof_dpi: DEFAULT_PROOF_DPI,
        }
    }

    pub fn with_proof_dpi(mut self, dpi: u32) -> Self {
        self.proof_dpi = dpi;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn finalization(&self) -> FinalizationMode {
        self.finalization
    }

    /// `<Name>_<W>x<H>cm_bleed<B>mm_<COLOR>.pdf` and `<Name>_<W>x<H>cm_proof.png`.
    pub fn artifact_names(&self, name: &str, spec: &DeliverableSpec) -> (String, String) {
        let stem = format!(
            "{}_{}x{}cm",
            display_name(name),
            spec.trim.width / 10.0,
            spec.trim.height / 10.0
        );
        (
            format!(
                "{stem}_bleed{}mm_{}.pdf",
                spec.bleed.all_sides,
                self.finalization.color_mode().label()
            ),
            format!("{stem}_proof.png"),
        )
    }

    pub fn export(
        &self,
        name: &str,
        spec: &DeliverableSpec,
        canvas: &CanvasAdapter,
    ) -> Result<ExportedArtifacts, ExportError> {
        let (pdf_name, proof_name) = self.artifact_names(name, spec);

        let pdf = PdfWriter::new(canvas, self.finalization).write()?;
        let pdf_path = self.output_dir.join(pdf_name);
        atomic_write(&pdf_path, &pdf)?;
        tracing::info!(path = %pdf_path.display(), bytes = pdf.len(), "pdf written");

        let proof = render_proof(canvas, self.proof_dpi)?;
        let proof_path = self.output_dir.join(proof_name);
        atomic_write(&proof_path, &proof)?;
        tracing::info!(path = %proof_path.display(), bytes = proof.len(), "proof written");

        Ok(ExportedArtifacts {
            pdf: pdf_path,
            pdf_sha256: sha256_hex(&pdf),
            proof: proof_path,
            proof_sha256: sha256_hex(&proof),
        })
    }
}

/// Low-resolution RGB rendition of the canvas as PNG bytes.
pub fn render_proof(canvas: &CanvasAdapter, dpi: u32) -> Result<Vec<u8>, ExportError> {
    let doc = canvas.document_rect();
    let (width, height) = (pixels_for(doc.width(), dpi), pixels_for(doc.height(), dpi));
    if width == 0 || height == 0 {
        return Err(ExportError::EmptyProof { dpi });
    }

    let mut proof = ProofSurface::new(width, height, dpi);
    for command in canvas.commands() {
        match command {
            DrawCommand::Rect { page, fill, .. } => proof.fill(page, fill),
            DrawCommand::Image { page, raster, .. } => {
                let rgb = raster.to_rgb8();
                let (rw, rh) = (raster.width(), raster.height());
                proof.each_pixel(page, |u, v| {
                    let sx = ((u * f64::from(rw)) as u32).min(rw - 1);
                    let sy = ((v * f64::from(rh)) as u32).min(rh - 1);
                    let at = (sy as usize * rw as usize + sx as usize) * 3;
                    [rgb[at], rgb[at + 1], rgb[at + 2]]
                });
            }
            DrawCommand::Text { page, style, .. } => proof.outline(page, &style.color),
            DrawCommand::Guide { page, .. } => proof.outline(page, &CmykColor::MAGENTA),
            DrawCommand::CropMarks { .. } => {}
        }
    }

    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(proof.image).write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    Ok(png)
}

struct ProofSurface {
    image: image::RgbImage,
    scale: f64,
}

impl ProofSurface {
    fn new(width: u32, height: u32, dpi: u32) -> Self {
        Self {
            image: image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])),
            scale: f64::from(dpi) / POINTS_PER_INCH,
        }
    }

    /// Pixel bounds `[x0, x1) x [y0, y1)` of a page rect, rows from the top.
    fn bounds(&self, page: &PtRect) -> (u32, u32, u32, u32) {
        let (w, h) = self.image.dimensions();
        let px = |v: f64, max: u32| ((v * self.scale).round().max(0.0) as u32).min(max);
        let x0 = px(page.x, w);
        let x1 = px(page.x + page.width, w);
        let y0 = h - px(page.y + page.height, h);
        let y1 = h - px(page.y, h);
        (x0, x1, y0, y1)
    }

    /// Paint every covered pixel with `sample(u, v)`, `u, v` in [0, 1) from the
    /// rect's top-left.
    fn each_pixel(&mut self, page: &PtRect, sample: impl Fn(f64, f64) -> [u8; 3]) {
        let (x0, x1, y0, y1) = self.bounds(page);
        let (span_x, span_y) = (f64::from((x1 - x0).max(1)), f64::from((y1 - y0).max(1)));
        for y in y0..y1 {
            for x in x0..x1 {
                let u = (f64::from(x - x0) + 0.5) / span_x;
                let v = (f64::from(y - y0) + 0.5) / span_y;
                self.image.put_pixel(x, y, image::Rgb(sample(u, v)));
            }
        }
    }

    fn fill(&mut self, page: &PtRect, color: &CmykColor) {
        let rgb = color.to_rgb8();
        self.each_pixel(page, |_, _| rgb);
    }

    fn outline(&mut self, page: &PtRect, color: &CmykColor) {
        let rgb = image::Rgb(color.to_rgb8());
        let (x0, x1, y0, y1) = self.bounds(page);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        for x in x0..x1 {
            self.image.put_pixel(x, y0, rgb);
            self.image.put_pixel(x, y1 - 1, rgb);
        }
        for y in y0..y1 {
            self.image.put_pixel(x0, y, rgb);
            self.image.put_pixel(x1 - 1, y, rgb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Size, ZoneRect};
    use crate::spec::GraphicsSpec;
    use tempfile::tempdir;

    #[test]
    fn test_artifact_names() {
        let spec = GraphicsSpec::exhibit_default().unwrap();
        let assembler = DocumentAssembler::new("out", FinalizationMode::DeviceCmyk);
        let (pdf, proof) = assembler.artifact_names("backwall", spec.deliverable("backwall").unwrap());
        assert_eq!(pdf, "Backwall_100x217cm_bleed5mm_CMYK.pdf");
        assert_eq!(proof, "Backwall_100x217cm_proof.png");

        let rgb = DocumentAssembler::new("out", FinalizationMode::RgbForPrinterConversion);
        let (pdf, _) = rgb.artifact_names("counter", spec.deliverable("counter").unwrap());
        assert_eq!(pdf, "Counter_30x80cm_bleed5mm_RGB.pdf");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("a.pdf");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_proof_paints_fills() {
        let mut canvas = CanvasAdapter::new(Size::new(300.0, 800.0), 5.0);
        let doc = canvas.document_rect();
        canvas.rect(doc, CmykColor::KEY_BLACK).unwrap();
        canvas
            .rect(ZoneRect::from_corners(0.0, 0.0, 100.0, 100.0), CmykColor::PAPER)
            .unwrap();

        let png = render_proof(&canvas, 10).unwrap();
        let proof = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(proof.dimensions(), (pixels_for(310.0, 10), pixels_for(810.0, 10)));
        assert_eq!(proof.get_pixel(0, 0).0, [0, 0, 0]);
        let (_, h) = proof.dimensions();
        assert_eq!(proof.get_pixel(10, h - 10).0, [255, 255, 255]);
    }

    #[test]
    fn test_zero_dpi_proof_rejected() {
        let canvas = CanvasAdapter::new(Size::new(300.0, 800.0), 5.0);
        assert!(matches!(render_proof(&canvas, 0), Err(ExportError::EmptyProof { dpi: 0 })));
    }
}
