//! Spec System - The Shared Physical Layout Contract
//!
//! One JSON file, consumed here and by the preview renderer. Units are fixed to
//! millimeters. A spec is validated in full on load and is immutable afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{self, Corner, Size, ZoneRect};
use crate::print::PrintSpec;
use crate::validation::{check_print, ValidationError, ValidationResult, ValidationViolation, Validator};

pub const SPEC_UNITS: &str = "mm";

/// Backwall and counter as delivered to the print vendor.
pub const EXHIBIT_DEFAULT_SPEC: &str = r#"{
  "units": "mm",
  "backwall": {
    "trim": {"width": 1000, "height": 2170},
    "bleed": {"all_sides": 5},
    "safe_inset": 50,
    "no_text_zone": {"x": 0, "y": 0, "width": 300, "height": 800}
  },
  "counter": {
    "trim": {"width": 300, "height": 800},
    "bleed": {"all_sides": 5},
    "safe_inset": 50
  },
  "print": {
    "color_mode": "CMYK",
    "min_effective_dpi": 150,
    "preferred_effective_dpi": 300,
    "rich_black": {"C": 60, "M": 40, "Y": 40, "K": 100},
    "outline_all_text": true,
    "embed_images": true,
    "deliver_as_pdf_with_crop_marks_and_bleed": true
  }
}"#;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Failed to read spec {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Spec parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BleedSpec {
    pub all_sides: f64,
}

/// A no-content rectangle, either offset from the trim origin or flush to a corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ZoneSpec {
    Anchored { corner: Corner, width: f64, height: f64 },
    Offset { x: f64, y: f64, width: f64, height: f64 },
}

impl ZoneSpec {
    pub fn to_rect(&self, trim: Size) -> ZoneRect {
        match *self {
            ZoneSpec::Anchored { corner, width, height } => {
                geometry::excluded_rect(trim, corner, width, height)
            }
            ZoneSpec::Offset { x, y, width, height } => ZoneRect::from_origin_size(x, y, width, height),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverableSpec {
    pub trim: Size,
    pub bleed: BleedSpec,
    pub safe_inset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_text_zone: Option<ZoneSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_content_zones: Vec<ZoneSpec>,
}

impl DeliverableSpec {
    pub fn document_size(&self) -> Size {
        geometry::document_size(self.trim, self.bleed.all_sides)
    }

    pub fn trim_rect(&self) -> ZoneRect {
        geometry::trim_rect(self.trim)
    }

    pub fn document_rect(&self) -> ZoneRect {
        geometry::document_rect(self.trim, self.bleed.all_sides)
    }

    pub fn safe_rect(&self) -> ZoneRect {
        geometry::safe_rect(self.trim, self.safe_inset)
    }

    /// Every no-content rectangle, the legacy `no_text_zone` first.
    pub fn excluded_rects(&self) -> Vec<ZoneRect> {
        self.no_text_zone
            .iter()
            .chain(self.no_content_zones.iter())
            .map(|zone| zone.to_rect(self.trim))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawGraphicsSpec {
    #[serde(default = "default_units")]
    units: String,
    #[serde(default)]
    print: PrintSpec,
    #[serde(flatten)]
    deliverables: BTreeMap<String, DeliverableSpec>,
}

fn default_units() -> String { SPEC_UNITS.to_string() }

/// Validated deliverable set plus print settings.
#[derive(Debug, Clone, Serialize)]
pub struct GraphicsSpec {
    units: String,
    #[serde(flatten)]
    deliverables: BTreeMap<String, DeliverableSpec>,
    print: PrintSpec,
}

impl GraphicsSpec {
    /// Build and validate. Any violated invariant rejects the whole spec.
    pub fn new(deliverables: BTreeMap<String, DeliverableSpec>, print: PrintSpec) -> Result<Self, SpecError> {
        let spec = Self {
            units: SPEC_UNITS.to_string(),
            deliverables,
            print,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SpecError> {
        let raw: RawGraphicsSpec = serde_json::from_str(json)?;
        let spec = Self {
            units: raw.units,
            deliverables: raw.deliverables,
            print: raw.print,
        };
        spec.validate()?;
        tracing::debug!(deliverables = spec.deliverables.len(), "spec loaded");
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let content = fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// The exhibit's built-in backwall and counter.
    pub fn exhibit_default() -> Result<Self, SpecError> {
        Self::from_json_str(EXHIBIT_DEFAULT_SPEC)
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn print(&self) -> &PrintSpec {
        &self.print
    }

    pub fn deliverable(&self, name: &str) -> Option<&DeliverableSpec> {
        self.deliverables.get(name)
    }

    pub fn deliverable_names(&self) -> Vec<&str> {
        self.deliverables.keys().map(String::as_str).collect()
    }

    pub fn deliverables(&self) -> impl Iterator<Item = (&str, &DeliverableSpec)> {
        self.deliverables.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = vec![];

        if self.units != SPEC_UNITS {
            violations.push(
                ValidationViolation::error("units", "spec units must be millimeters")
                    .expected(SPEC_UNITS, self.units.clone()),
            );
        }
        if self.deliverables.is_empty() {
            violations.push(ValidationViolation::error("deliverables", "spec names no deliverables"));
        }

        let validator = Validator::new();
        for (name, deliverable) in &self.deliverables {
            violations.extend(validator.validate_deliverable(name, deliverable));
        }
        violations.extend(check_print(&self.print));

        ValidationResult::from_violations("spec", violations)
            .into_result()
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_loads() {
        let spec = GraphicsSpec::exhibit_default().unwrap();
        assert_eq!(spec.deliverable_names(), vec!["backwall", "counter"]);
        let backwall = spec.deliverable("backwall").unwrap();
        assert_eq!(backwall.document_size(), Size::new(1010.0, 2180.0));
        assert_eq!(
            backwall.excluded_rects(),
            vec![ZoneRect::from_corners(0.0, 0.0, 300.0, 800.0)]
        );
    }

    #[test]
    fn test_anchored_zone_parses() {
        let json = r#"{
            "wall": {"trim": {"width": 1000, "height": 2000}, "bleed": {"all_sides": 3},
                     "safe_inset": 40,
                     "no_content_zones": [{"corner": "bottom_right", "width": 300, "height": 800}]}
        }"#;
        let spec = GraphicsSpec::from_json_str(json).unwrap();
        assert_eq!(
            spec.deliverable("wall").unwrap().excluded_rects(),
            vec![ZoneRect::from_corners(700.0, 0.0, 1000.0, 800.0)]
        );
    }

    #[test]
    fn test_inches_rejected() {
        let json = EXHIBIT_DEFAULT_SPEC.replace(r#""units": "mm""#, r#""units": "in""#);
        let err = GraphicsSpec::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("units"));
    }

    #[test]
    fn test_all_violations_reported_together() {
        let json = r#"{
            "a": {"trim": {"width": 100, "height": 100}, "bleed": {"all_sides": -2}, "safe_inset": 60},
            "b": {"trim": {"width": 100, "height": 100}, "bleed": {"all_sides": 2}, "safe_inset": 10,
                  "no_text_zone": {"x": 50, "y": 50, "width": 80, "height": 10}}
        }"#;
        match GraphicsSpec::from_json_str(json) {
            Err(SpecError::Invalid(err)) => {
                let rules: Vec<_> = err.violations.iter().map(|v| v.rule.as_str()).collect();
                assert_eq!(rules, vec!["bleed", "safe_inset", "no_content_zone"]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = GraphicsSpec::load(Path::new("/nonexistent/spec.json")).unwrap_err();
        assert!(matches!(err, SpecError::Io { .. }));
    }
}
