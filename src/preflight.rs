//! Preflight - Print Readiness Report
//!
//! Runs on a rendered canvas. Findings are reported, never corrected.

use serde::Serialize;

use crate::canvas::{CanvasAdapter, DrawCommand, ImageColorSpace, ImageRole};
use crate::geometry::mm_to_pt;
use crate::print::{ColorMode, FinalizationMode, PrintSpec};
use crate::spec::DeliverableSpec;
use crate::validation::{ValidationViolation, ViolationSeverity};

/// Page-size tolerance in points.
const PAGE_TOLERANCE_PT: f64 = 1e-6;

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub deliverable: String,
    pub page_size_pt: (f64, f64),
    pub images: usize,
    pub lowest_effective_dpi: Option<f64>,
    pub findings: Vec<ValidationViolation>,
}

impl PreflightReport {
    /// No error-severity findings.
    pub fn print_ready(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == ViolationSeverity::Error)
    }

    pub fn count(&self, severity: ViolationSeverity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

pub fn check(
    deliverable: &str,
    canvas: &CanvasAdapter,
    spec: &DeliverableSpec,
    print: &PrintSpec,
    finalization: FinalizationMode,
) -> PreflightReport {
    let mut findings = vec![];
    let commands = canvas.commands();

    let page = canvas.page_size_pt();
    let doc = spec.document_size();
    let expected = (mm_to_pt(doc.width), mm_to_pt(doc.height));
    if (page.0 - expected.0).abs() > PAGE_TOLERANCE_PT || (page.1 - expected.1).abs() > PAGE_TOLERANCE_PT {
        findings.push(
            ValidationViolation::error("page_size", "page size differs from trim plus bleed")
                .expected(format!("{:.3}x{:.3} pt", expected.0, expected.1), format!("{:.3}x{:.3} pt", page.0, page.1)),
        );
    }

    if print.color_mode == ColorMode::Cmyk && finalization == FinalizationMode::RgbForPrinterConversion {
        findings.push(
            ValidationViolation::error("color_mode", "RGB export for a CMYK job")
                .with_severity(ViolationSeverity::Warning)
                .remedy("The printer converts to CMYK; expect color shifts in saturated cyans"),
        );
    }

    let expected_space = match print.color_mode {
        ColorMode::Cmyk => ImageColorSpace::DeviceCmyk,
        ColorMode::Rgb => ImageColorSpace::DeviceRgb,
    };

    let mut images = 0;
    let mut lowest: Option<f64> = None;
    for command in commands {
        let DrawCommand::Image { color_space, role, target, .. } = command else {
            continue;
        };
        images += 1;

        if *color_space != expected_space && *color_space != ImageColorSpace::DeviceGray {
            findings.push(
                ValidationViolation::error("image_color_space", format!("image at {target} is {color_space:?}"))
                    .expected(format!("{expected_space:?}"), format!("{color_space:?}")),
            );
        }

        if *role == ImageRole::Background {
            continue;
        }
        let Some(dpi) = command.effective_dpi() else {
            continue;
        };
        lowest = Some(lowest.map_or(dpi, |l: f64| l.min(dpi)));

        let actual = format!("{dpi:.0} dpi");
        if dpi < f64::from(print.min_effective_dpi) {
            findings.push(
                ValidationViolation::error("effective_dpi", format!("image at {target} below minimum resolution"))
                    .expected(format!(">= {} dpi", print.min_effective_dpi), actual)
                    .remedy("Supply a higher-resolution source or shrink the placement"),
            );
        } else if dpi < f64::from(print.preferred_effective_dpi) {
            tracing::warn!(deliverable, dpi, "image below preferred resolution");
            findings.push(
                ValidationViolation::error("effective_dpi", format!("image at {target} below preferred resolution"))
                    .with_severity(ViolationSeverity::Warning)
                    .expected(format!(">= {} dpi", print.preferred_effective_dpi), actual),
            );
        }
    }

    let text_blocks = commands.iter().filter(|c| matches!(c, DrawCommand::Text { .. })).count();
    if print.outline_all_text && text_blocks > 0 {
        findings.push(
            ValidationViolation::error(
                "text_outlining",
                format!("{text_blocks} text blocks await outlining"),
            )
            .with_severity(ViolationSeverity::Info)
            .remedy("Run the outlining post-process before sending to print"),
        );
    }

    let has_crop_marks = commands.iter().any(|c| matches!(c, DrawCommand::CropMarks { .. }));
    if print.deliver_as_pdf_with_crop_marks_and_bleed {
        if !has_crop_marks {
            findings.push(ValidationViolation::error("crop_marks", "document has no crop marks"));
        }
        if spec.bleed.all_sides <= 0.0 {
            findings.push(
                ValidationViolation::error("bleed", "delivery requires bleed but none is set")
                    .with_severity(ViolationSeverity::Warning),
            );
        }
    }

    PreflightReport {
        deliverable: deliverable.to_string(),
        page_size_pt: page,
        images,
        lowest_effective_dpi: lowest,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assets::{PixelSpace, RasterImage};
    use crate::geometry::ZoneRect;
    use crate::spec::GraphicsSpec;

    fn counter() -> (DeliverableSpec, CanvasAdapter) {
        let spec = GraphicsSpec::exhibit_default().unwrap().deliverable("counter").unwrap().clone();
        let canvas = CanvasAdapter::new(spec.trim, spec.bleed.all_sides);
        (spec, canvas)
    }

    fn place(canvas: &mut CanvasAdapter, px: u32, role: ImageRole) {
        let raster = Arc::new(RasterImage::new(px, px, PixelSpace::Cmyk, vec![0; (px * px * 4) as usize]).unwrap());
        canvas
            .image(raster, ZoneRect::from_corners(60.0, 60.0, 85.4, 85.4), ImageColorSpace::DeviceCmyk, role)
            .unwrap();
    }

    #[test]
    fn test_low_dpi_is_error_and_mid_dpi_warning() {
        let print = PrintSpec::default();
        let (spec, mut low) = counter();
        place(&mut low, 100, ImageRole::Content);
        low.crop_marks(low.document_rect(), low.trim_rect()).unwrap();
        let report = check("counter", &low, &spec, &print, FinalizationMode::DeviceCmyk);
        assert!(!report.print_ready());
        assert!((report.lowest_effective_dpi.unwrap() - 100.0).abs() < 1e-6);

        let (spec, mut mid) = counter();
        place(&mut mid, 200, ImageRole::Content);
        mid.crop_marks(mid.document_rect(), mid.trim_rect()).unwrap();
        let report = check("counter", &mid, &spec, &print, FinalizationMode::DeviceCmyk);
        assert!(report.print_ready());
        assert_eq!(report.count(ViolationSeverity::Warning), 1);
    }

    #[test]
    fn test_background_exempt_from_dpi() {
        let (spec, mut canvas) = counter();
        place(&mut canvas, 4, ImageRole::Background);
        canvas.crop_marks(canvas.document_rect(), canvas.trim_rect()).unwrap();
        let report = check("counter", &canvas, &spec, &PrintSpec::default(), FinalizationMode::DeviceCmyk);
        assert!(report.print_ready());
        assert_eq!(report.lowest_effective_dpi, None);
    }

    #[test]
    fn test_missing_crop_marks_flagged() {
        let (spec, canvas) = counter();
        let report = check("counter", &canvas, &spec, &PrintSpec::default(), FinalizationMode::DeviceCmyk);
        assert!(report.findings.iter().any(|f| f.rule == "crop_marks"));
    }

    #[test]
    fn test_rgb_export_of_cmyk_job_warns() {
        let (spec, mut canvas) = counter();
        canvas.crop_marks(canvas.document_rect(), canvas.trim_rect()).unwrap();
        let report = check("counter", &canvas, &spec, &PrintSpec::default(), FinalizationMode::RgbForPrinterConversion);
        assert!(report.print_ready());
        assert!(report.findings.iter().any(|f| f.rule == "color_mode"));
    }
}
