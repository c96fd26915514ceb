//! ExhibitPrint Core - Print-Ready Exhibit Graphics Compiler
//!
//! # The Rules (Non-Negotiable)
//! 1. Millimeters Are Truth, measured from the trim corner
//! 2. Placements Are Validated Before Any Draw Call
//! 3. Print Color Is CMYK Unless Finalization Says Otherwise
//! 4. Identical Inputs Produce Identical Artifacts
//! 5. Generated Assets Are Cached Under Content Keys

pub mod geometry;
pub mod color;
pub mod print;
pub mod validation;
pub mod spec;
pub mod hashing;
pub mod cache;
pub mod assets;
pub mod canvas;
pub mod layout;
pub mod pdf;
pub mod assembler;
pub mod preflight;
pub mod pipeline;

pub use geometry::{mm_to_pt, pt_to_mm, Size, ZoneRect};
pub use color::{CmykColor, ColorConversionError, ColorManager, Palette};
pub use print::{ColorMode, FinalizationMode, PrintSpec};
pub use validation::{ValidationError, ValidationResult, ValidationViolation, Validator, ViolationSeverity};
pub use spec::{DeliverableSpec, GraphicsSpec, SpecError};
pub use hashing::{canonical_json, compute_manifest_hash, sha256_hex};
pub use cache::{AssetCache, CacheError, CacheStats};
pub use assets::{DirectorySources, MemorySources, RasterImage, SourceLibrary};
pub use canvas::{CanvasAdapter, DrawCommand, RenderError};
pub use layout::{DeliverableState, LayoutContent, LayoutError, LayoutOrchestrator, Placement, Zones};
pub use assembler::{DocumentAssembler, ExportError, ExportedArtifacts};
pub use preflight::PreflightReport;
pub use pipeline::{BuildOptions, BuildReport, DeliverableReport, GraphicsError, GraphicsPipeline};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
