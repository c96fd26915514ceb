//! Graphics Pipeline - Single Entry Point
//!
//! CRITICAL: every build validates placements before drawing. No bypass.
//! Deliverables build independently; one failing never stops another.

use std::path::PathBuf;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::assembler::{DocumentAssembler, ExportedArtifacts, DEFAULT_PROOF_DPI};
use crate::assets::SourceLibrary;
use crate::cache::{AssetCache, CacheError, CacheStats};
use crate::color::{ColorConversionError, ColorManager, Palette};
use crate::hashing::compute_manifest_hash;
use crate::layout::{layout_for, AssetContext, DeliverableState, LayoutContent, LayoutError, LayoutOrchestrator};
use crate::preflight::{self, PreflightReport};
use crate::print::FinalizationMode;
use crate::spec::{DeliverableSpec, GraphicsSpec, SpecError};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum GraphicsError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Color(#[from] ColorConversionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Unknown deliverable: {0}")]
    UnknownDeliverable(String),

    #[error("No layout for deliverable: {0}")]
    NoLayout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GraphicsError {
    /// 2 for validation failures, 3 for render or export failures, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            GraphicsError::Spec(SpecError::Invalid(_)) => 2,
            GraphicsError::Layout(LayoutError::Validation(_)) => 2,
            GraphicsError::Layout(LayoutError::Render(_) | LayoutError::Export(_)) => 3,
            _ => 1,
        }
    }
}

/// Per-run settings, built by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOptions {
    pub output_dir: PathBuf,
    /// Raster density for generated assets.
    pub dpi: u32,
    pub proof_dpi: u32,
    pub guides: bool,
    pub finalization: FinalizationMode,
    pub content: LayoutContent,
}

impl BuildOptions {
    pub fn new(output_dir: impl Into<PathBuf>, finalization: FinalizationMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            dpi: 150,
            proof_dpi: DEFAULT_PROOF_DPI,
            guides: false,
            finalization,
            content: LayoutContent::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliverableReport {
    pub deliverable: String,
    pub kind: String,
    pub state: DeliverableState,
    pub draw_calls: usize,
    pub artifacts: ExportedArtifacts,
    pub preflight: PreflightReport,
    pub manifest_hash: String,
}

#[derive(Debug, Serialize)]
pub struct DeliverableOutcome {
    pub deliverable: String,
    pub success: bool,
    pub exit_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DeliverableReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliverableOutcome {
    fn from_result(deliverable: &str, result: Result<DeliverableReport, GraphicsError>) -> Self {
        match result {
            Ok(report) => Self {
                deliverable: deliverable.to_string(),
                success: true,
                exit_code: 0,
                report: Some(report),
                error: None,
            },
            Err(err) => Self {
                deliverable: deliverable.to_string(),
                success: false,
                exit_code: err.exit_code(),
                report: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub engine_version: String,
    pub finalization: FinalizationMode,
    pub deliverables: Vec<DeliverableOutcome>,
    pub cache: CacheStats,
}

impl BuildReport {
    /// Highest exit code among the deliverables, 0 when all succeeded.
    pub fn exit_code(&self) -> u8 {
        self.deliverables.iter().map(|d| d.exit_code).max().unwrap_or(0)
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    engine_version: &'a str,
    deliverable: &'a str,
    spec: &'a DeliverableSpec,
    finalization: FinalizationMode,
    dpi: u32,
    pdf_sha256: &'a str,
    proof_sha256: &'a str,
}

/// The graphics pipeline - single entry point for all builds
pub struct GraphicsPipeline {
    spec: GraphicsSpec,
    colors: ColorManager,
    cache: AssetCache,
    sources: Box<dyn SourceLibrary>,
    options: BuildOptions,
}

impl GraphicsPipeline {
    /// Brand palette, with rich black taken from the print settings.
    pub fn new(
        spec: GraphicsSpec,
        cache: AssetCache,
        sources: impl SourceLibrary + 'static,
        options: BuildOptions,
    ) -> Result<Self, GraphicsError> {
        let colors = ColorManager::new(Palette::brand()).with_rich_black(spec.print().rich_black.to_cmyk()?);
        Ok(Self {
            spec,
            colors,
            cache,
            sources: Box::new(sources),
            options,
        })
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.colors = ColorManager::new(palette).with_rich_black(self.colors.rich_black());
        self
    }

    pub fn spec(&self) -> &GraphicsSpec {
        &self.spec
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Build one deliverable end to end.
    ///
    /// This ALWAYS validates placements before any draw call.
    #[tracing::instrument(skip(self))]
    pub fn build(&self, name: &str) -> Result<DeliverableReport, GraphicsError> {
        let spec = self
            .spec
            .deliverable(name)
            .ok_or_else(|| GraphicsError::UnknownDeliverable(name.to_string()))?;
        let layout = layout_for(name).ok_or_else(|| GraphicsError::NoLayout(name.to_string()))?;

        let mut orchestrator = LayoutOrchestrator::configure(name, spec, layout.as_ref(), &self.options.content);
        let ctx = AssetContext {
            colors: &self.colors,
            cache: &self.cache,
            sources: self.sources.as_ref(),
            dpi: self.options.dpi,
        };
        orchestrator.resolve_assets(&ctx)?;
        orchestrator.render(&self.colors, self.options.guides)?;

        let preflight = match orchestrator.canvas() {
            Some(canvas) => preflight::check(name, canvas, spec, self.spec.print(), self.options.finalization),
            None => {
                return Err(GraphicsError::Layout(LayoutError::InvalidState {
                    deliverable: name.to_string(),
                    action: "preflight",
                    state: orchestrator.state(),
                }))
            }
        };
        if !preflight.print_ready() {
            tracing::warn!(deliverable = name, findings = preflight.findings.len(), "preflight found errors");
        }

        let assembler = DocumentAssembler::new(&self.options.output_dir, self.options.finalization)
            .with_proof_dpi(self.options.proof_dpi);
        let draw_calls = orchestrator.draw_call_count();
        let artifacts = orchestrator.export(&assembler)?;

        let manifest_hash = compute_manifest_hash(&Manifest {
            engine_version: ENGINE_VERSION,
            deliverable: name,
            spec,
            finalization: self.options.finalization,
            dpi: self.options.dpi,
            pdf_sha256: &artifacts.pdf_sha256,
            proof_sha256: &artifacts.proof_sha256,
        })?;

        Ok(DeliverableReport {
            deliverable: name.to_string(),
            kind: layout.kind().to_string(),
            state: orchestrator.state(),
            draw_calls,
            artifacts,
            preflight,
            manifest_hash,
        })
    }

    /// Build every deliverable in parallel. Outcomes keep deliverable-name
    /// order regardless of completion order.
    pub fn build_all(&self) -> BuildReport {
        let names = self.spec.deliverable_names();
        let deliverables = names
            .par_iter()
            .map(|name| DeliverableOutcome::from_result(name, self.build(name)))
            .collect();

        BuildReport {
            engine_version: ENGINE_VERSION.to_string(),
            finalization: self.options.finalization,
            deliverables,
            cache: self.cache.stats(),
        }
    }

    /// Build the named deliverables, or all of them for `"all"`.
    pub fn build_target(&self, target: &str) -> BuildReport {
        if target == "all" {
            return self.build_all();
        }
        BuildReport {
            engine_version: ENGINE_VERSION.to_string(),
            finalization: self.options.finalization,
            deliverables: vec![DeliverableOutcome::from_result(target, self.build(target))],
            cache: self.cache.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemorySources;
    use crate::validation::ValidationError;
    use tempfile::tempdir;

    fn pipeline(dir: &std::path::Path) -> GraphicsPipeline {
        let mut options = BuildOptions::new(dir, FinalizationMode::DeviceCmyk);
        options.dpi = 20;
        GraphicsPipeline::new(
            GraphicsSpec::exhibit_default().unwrap(),
            AssetCache::in_memory(),
            MemorySources::new(),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_exit_codes() {
        let validation = GraphicsError::Layout(LayoutError::Validation(ValidationError {
            subject: "backwall".into(),
            violations: vec![],
        }));
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(GraphicsError::UnknownDeliverable("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_unknown_deliverable() {
        let dir = tempdir().unwrap();
        let err = pipeline(dir.path()).build("banner").unwrap_err();
        assert!(matches!(err, GraphicsError::UnknownDeliverable(_)));
    }

    #[test]
    fn test_build_all_reports_every_deliverable() {
        let dir = tempdir().unwrap();
        let report = pipeline(dir.path()).build_all();
        let names: Vec<_> = report.deliverables.iter().map(|d| d.deliverable.as_str()).collect();
        assert_eq!(names, vec!["backwall", "counter"]);
        assert_eq!(report.exit_code(), 0, "{:?}", report.deliverables);
        assert!(dir.path().join("Counter_30x80cm_bleed5mm_CMYK.pdf").exists());
        assert!(dir.path().join("Backwall_100x217cm_proof.png").exists());
    }

    fn logo_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(1300, 600, image::Rgba([20, 90, 160, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_default_density_build_is_print_ready() {
        let dir = tempdir().unwrap();
        let options = BuildOptions::new(dir.path(), FinalizationMode::DeviceCmyk);
        assert_eq!(options.dpi, 150);
        let pipeline = GraphicsPipeline::new(
            GraphicsSpec::exhibit_default().unwrap(),
            AssetCache::in_memory(),
            MemorySources::new().with("logo.png", logo_png()),
            options,
        )
        .unwrap();

        for name in ["backwall", "counter"] {
            let report = pipeline.build(name).unwrap();
            let preflight = &report.preflight;
            assert!(preflight.print_ready(), "{name}: {:?}", preflight.findings);
            let lowest = preflight.lowest_effective_dpi.unwrap();
            assert!(lowest >= 150.0, "{name}: {lowest}");
        }
    }

    #[test]
    fn test_palette_override_keeps_print_rich_black() {
        let dir = tempdir().unwrap();
        let palette = Palette::from_json(r#"{"rich_black": {"cmyk": [0, 0, 0, 100]}}"#).unwrap();
        let pipeline = pipeline(dir.path()).with_palette(palette);
        let print = pipeline.spec().print().rich_black.to_cmyk().unwrap();
        assert_eq!(pipeline.colors.rich_black(), print);
        assert_eq!(pipeline.colors.resolve("rich_black").unwrap(), print);
    }
}
