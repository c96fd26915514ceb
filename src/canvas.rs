//! Canvas Adapter - Millimeter Drawing Surface
//!
//! Callers draw in trim-relative millimeters. The adapter records commands in
//! PDF points with the origin at the document's bottom-left (the outer bleed
//! corner). Nothing is clipped: a draw reaching outside the document rect is
//! rejected.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::assets::{PixelSpace, RasterImage};
use crate::cache::CacheError;
use crate::color::{CmykColor, ColorConversionError};
use crate::geometry::{self, mm_to_pt, Size, ZoneRect, MM_PER_INCH};

/// Crop mark length measured from the document edge.
pub const CROP_MARK_LENGTH_MM: f64 = 10.0;

/// Placeholder glyph metrics in em units.
pub const AVERAGE_ADVANCE_EM: f64 = 0.6;
pub const ASCENT_EM: f64 = 0.718;
pub const DESCENT_EM: f64 = 0.207;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{what} at {target} falls outside the document {document}")]
    OutOfBounds {
        what: String,
        target: ZoneRect,
        document: ZoneRect,
    },

    #[error("Required source image missing: {0}")]
    MissingSource(String),

    #[error("Failed to read source image {name}: {source}")]
    SourceIo {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Asset {asset} unavailable: {source}")]
    AssetUnavailable {
        asset: String,
        #[source]
        source: CacheError,
    },

    #[error("Image is {actual:?} but {expected:?} was requested")]
    ColorSpaceMismatch {
        expected: ImageColorSpace,
        actual: PixelSpace,
    },

    #[error(transparent)]
    Color(#[from] ColorConversionError),
}

/// Rectangle on the page in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PtRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageColorSpace {
    DeviceCmyk,
    DeviceRgb,
    DeviceGray,
}

impl ImageColorSpace {
    pub fn of(space: PixelSpace) -> Self {
        match space {
            PixelSpace::Cmyk => ImageColorSpace::DeviceCmyk,
            PixelSpace::Rgb => ImageColorSpace::DeviceRgb,
            PixelSpace::Gray => ImageColorSpace::DeviceGray,
        }
    }

    pub fn pdf_name(&self) -> &'static str {
        match self {
            ImageColorSpace::DeviceCmyk => "DeviceCMYK",
            ImageColorSpace::DeviceRgb => "DeviceRGB",
            ImageColorSpace::DeviceGray => "DeviceGray",
        }
    }
}

/// Background rasters (page fills and panels) are exempt from the
/// effective-DPI check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Background,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideKind {
    Trim,
    SafeArea,
    NoContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStyle {
    pub font: String,
    pub size_pt: f64,
    pub color: CmykColor,
}

/// Baseline metrics of a placeholder text box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextMetrics {
    pub ascent_pt: f64,
    pub descent_pt: f64,
    pub line_height_pt: f64,
    /// First baseline, measured up from the page origin.
    pub first_baseline_pt: f64,
    pub widest_line_pt: f64,
}

impl TextMetrics {
    fn for_box(lines: &[String], size_pt: f64, page: &PtRect) -> Self {
        let ascent_pt = ASCENT_EM * size_pt;
        let descent_pt = DESCENT_EM * size_pt;
        Self {
            ascent_pt,
            descent_pt,
            line_height_pt: ascent_pt + descent_pt,
            first_baseline_pt: page.y + page.height - ascent_pt,
            widest_line_pt: widest_line_pt(lines.iter().map(String::as_str), size_pt),
        }
    }
}

fn widest_line_pt<'a>(lines: impl Iterator<Item = &'a str>, size_pt: f64) -> f64 {
    lines
        .map(|line| line.chars().count() as f64 * AVERAGE_ADVANCE_EM * size_pt)
        .fold(0.0, f64::max)
}

/// Largest size, stepping down 1 pt from `start_pt`, at which every line fits
/// `max_width_pt`. Never goes below `min_pt`.
pub fn fit_font_size(lines: &[&str], max_width_pt: f64, start_pt: f64, min_pt: f64) -> f64 {
    let mut size = start_pt;
    while size > min_pt {
        if widest_line_pt(lines.iter().copied(), size) <= max_width_pt {
            break;
        }
        size -= 1.0;
    }
    size.max(min_pt)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    Rect {
        target: ZoneRect,
        page: PtRect,
        fill: CmykColor,
    },
    Image {
        target: ZoneRect,
        page: PtRect,
        #[serde(skip)]
        raster: Arc<RasterImage>,
        color_space: ImageColorSpace,
        role: ImageRole,
    },
    Text {
        target: ZoneRect,
        page: PtRect,
        lines: Vec<String>,
        style: TextStyle,
        metrics: TextMetrics,
    },
    Guide {
        target: ZoneRect,
        page: PtRect,
        kind: GuideKind,
    },
    /// Line segments `[x0, y0, x1, y1]` in points.
    CropMarks { lines: Vec<[f64; 4]> },
}

impl DrawCommand {
    /// Pixels per inch of a placed raster, the lower of both axes.
    pub fn effective_dpi(&self) -> Option<f64> {
        match self {
            DrawCommand::Image { target, raster, .. } => {
                let x = f64::from(raster.width()) / (target.width() / MM_PER_INCH);
                let y = f64::from(raster.height()) / (target.height() / MM_PER_INCH);
                Some(x.min(y))
            }
            _ => None,
        }
    }
}

/// Records draw commands for one document.
#[derive(Debug)]
pub struct CanvasAdapter {
    trim: ZoneRect,
    document: ZoneRect,
    bleed: f64,
    commands: Vec<DrawCommand>,
}

impl CanvasAdapter {
    pub fn new(trim: Size, bleed: f64) -> Self {
        Self {
            trim: geometry::trim_rect(trim),
            document: geometry::document_rect(trim, bleed),
            bleed,
            commands: vec![],
        }
    }

    pub fn document_rect(&self) -> ZoneRect {
        self.document
    }

    pub fn trim_rect(&self) -> ZoneRect {
        self.trim
    }

    pub fn page_size_pt(&self) -> (f64, f64) {
        (mm_to_pt(self.document.width()), mm_to_pt(self.document.height()))
    }

    /// Trim-relative millimeters to page points.
    pub fn to_page(&self, rect: &ZoneRect) -> PtRect {
        PtRect {
            x: mm_to_pt(rect.x0 + self.bleed),
            y: mm_to_pt(rect.y0 + self.bleed),
            width: mm_to_pt(rect.width()),
            height: mm_to_pt(rect.height()),
        }
    }

    fn checked(&self, what: &str, target: &ZoneRect) -> Result<PtRect, RenderError> {
        if target.is_finite() && self.document.contains(target) {
            Ok(self.to_page(target))
        } else {
            Err(RenderError::OutOfBounds {
                what: what.to_string(),
                target: *target,
                document: self.document,
            })
        }
    }

    pub fn rect(&mut self, target: ZoneRect, fill: CmykColor) -> Result<(), RenderError> {
        let page = self.checked("rect", &target)?;
        self.commands.push(DrawCommand::Rect { target, page, fill });
        Ok(())
    }

    /// Place a raster stretched to `target`. Its pixel space must match `color_space`.
    pub fn image(
        &mut self,
        raster: Arc<RasterImage>,
        target: ZoneRect,
        color_space: ImageColorSpace,
        role: ImageRole,
    ) -> Result<(), RenderError> {
        let page = self.checked("image", &target)?;
        if ImageColorSpace::of(raster.space()) != color_space {
            return Err(RenderError::ColorSpaceMismatch {
                expected: color_space,
                actual: raster.space(),
            });
        }
        self.commands.push(DrawCommand::Image {
            target,
            page,
            raster,
            color_space,
            role,
        });
        Ok(())
    }

    /// Placeholder text box; glyphs are set by the outlining post-process.
    pub fn text_block(&mut self, lines: &[String], target: ZoneRect, style: TextStyle) -> Result<(), RenderError> {
        let page = self.checked("text", &target)?;
        let metrics = TextMetrics::for_box(lines, style.size_pt, &page);
        self.commands.push(DrawCommand::Text {
            target,
            page,
            lines: lines.to_vec(),
            style,
            metrics,
        });
        Ok(())
    }

    pub fn guide(&mut self, target: ZoneRect, kind: GuideKind) -> Result<(), RenderError> {
        let page = self.checked("guide", &target)?;
        self.commands.push(DrawCommand::Guide { target, page, kind });
        Ok(())
    }

    /// Marks along each trim line, starting at the document edge.
    pub fn crop_marks(&mut self, document: ZoneRect, trim: ZoneRect) -> Result<(), RenderError> {
        self.checked("crop marks", &document)?;
        let page = self.to_page(&document);
        let len = mm_to_pt(CROP_MARK_LENGTH_MM.min(document.width() / 2.0).min(document.height() / 2.0));
        let (left, bottom) = (page.x, page.y);
        let (right, top) = (page.x + page.width, page.y + page.height);
        let trim_page = self.to_page(&trim);
        let (tx0, ty0) = (trim_page.x, trim_page.y);
        let (tx1, ty1) = (trim_page.x + trim_page.width, trim_page.y + trim_page.height);

        let lines = vec![
            [left, ty0, left + len, ty0],
            [tx0, bottom, tx0, bottom + len],
            [right - len, ty0, right, ty0],
            [tx1, bottom, tx1, bottom + len],
            [left, ty1, left + len, ty1],
            [tx0, top - len, tx0, top],
            [right - len, ty1, right, ty1],
            [tx1, top - len, tx1, top],
        ];
        self.commands.push(DrawCommand::CropMarks { lines });
        Ok(())
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<DrawCommand> {
        self.commands
    }

    pub fn draw_call_count(&self) -> usize {
        self.commands.len()
    }

    pub fn image_draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Image { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> CanvasAdapter {
        CanvasAdapter::new(Size::new(300.0, 800.0), 5.0)
    }

    #[test]
    fn test_page_origin_is_bleed_corner() {
        let canvas = counter();
        let page = canvas.to_page(&ZoneRect::from_corners(-5.0, -5.0, 0.0, 0.0));
        assert_eq!((page.x, page.y), (0.0, 0.0));
        let (w, h) = canvas.page_size_pt();
        assert!((w - mm_to_pt(310.0)).abs() < 1e-9);
        assert!((h - mm_to_pt(810.0)).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_bounds_rejected_not_clipped() {
        let mut canvas = counter();
        let err = canvas
            .rect(ZoneRect::from_corners(-6.0, 0.0, 10.0, 10.0), CmykColor::PAPER)
            .unwrap_err();
        assert!(matches!(err, RenderError::OutOfBounds { .. }));
        assert_eq!(canvas.draw_call_count(), 0);
    }

    #[test]
    fn test_bleed_band_is_drawable() {
        let mut canvas = counter();
        canvas
            .rect(ZoneRect::from_corners(-5.0, -5.0, 305.0, 805.0), CmykColor::PAPER)
            .unwrap();
        assert_eq!(canvas.draw_call_count(), 1);
    }

    #[test]
    fn test_image_color_space_must_match() {
        let mut canvas = counter();
        let raster = Arc::new(RasterImage::new(1, 1, PixelSpace::Rgb, vec![0, 0, 0]).unwrap());
        let err = canvas
            .image(
                raster,
                ZoneRect::from_corners(0.0, 0.0, 10.0, 10.0),
                ImageColorSpace::DeviceCmyk,
                ImageRole::Content,
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::ColorSpaceMismatch { .. }));
    }

    #[test]
    fn test_effective_dpi_uses_lower_axis() {
        let mut canvas = counter();
        let raster = Arc::new(RasterImage::new(300, 150, PixelSpace::Gray, vec![0; 300 * 150]).unwrap());
        canvas
            .image(
                raster,
                ZoneRect::from_corners(0.0, 0.0, 25.4, 25.4),
                ImageColorSpace::DeviceGray,
                ImageRole::Content,
            )
            .unwrap();
        assert_eq!(canvas.commands()[0].effective_dpi(), Some(150.0));
    }

    #[test]
    fn test_crop_marks_stay_in_document() {
        let mut canvas = counter();
        let (doc, trim) = (canvas.document_rect(), canvas.trim_rect());
        canvas.crop_marks(doc, trim).unwrap();
        let (w, h) = canvas.page_size_pt();
        match &canvas.commands()[0] {
            DrawCommand::CropMarks { lines } => {
                assert_eq!(lines.len(), 8);
                for [x0, y0, x1, y1] in lines {
                    for (x, y) in [(x0, y0), (x1, y1)] {
                        assert!(*x >= 0.0 && *x <= w + 1e-9);
                        assert!(*y >= 0.0 && *y <= h + 1e-9);
                    }
                }
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_fit_font_size_steps_down() {
        let lines = ["AI ROLEPLAY", "FOR SALES TEAMS"];
        let size = fit_font_size(&lines, 1000.0, 300.0, 80.0);
        assert!(15.0 * AVERAGE_ADVANCE_EM * size <= 1000.0);
        assert!(15.0 * AVERAGE_ADVANCE_EM * (size + 1.0) > 1000.0);
        assert_eq!(fit_font_size(&lines, 10.0, 300.0, 80.0), 80.0);
    }
}
