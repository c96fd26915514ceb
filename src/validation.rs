//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! Any error-severity violation rejects the subject. Nothing is auto-corrected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::trim_rect;
use crate::layout::{Placement, Zones};
use crate::print::PrintSpec;
use crate::spec::DeliverableSpec;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    pub(crate) fn error(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: ViolationSeverity::Error,
            message: message.into(),
            expected: None,
            actual: None,
            remediation: vec![],
        }
    }

    pub(crate) fn with_severity(mut self, severity: ViolationSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub(crate) fn expected(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    pub(crate) fn remedy(mut self, remediation: &str) -> Self {
        self.remediation.push(remediation.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub subject: String,
}

impl ValidationResult {
    pub fn success(subject: &str) -> Self {
        Self {
            valid: true,
            violations: vec![],
            subject: subject.to_string(),
        }
    }

    /// Valid unless at least one violation is an error.
    pub fn from_violations(subject: &str, violations: Vec<ValidationViolation>) -> Self {
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        Self {
            valid,
            violations,
            subject: subject.to_string(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    /// Turn a failed result into a [`ValidationError`] carrying only the errors.
    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.valid {
            return Ok(self);
        }
        let violations = self
            .violations
            .into_iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .collect();
        Err(ValidationError {
            subject: self.subject,
            violations,
        })
    }
}

/// A spec or placement broke a geometric invariant.
#[derive(Debug, Clone, Error)]
#[error("Validation failed for {subject}: {}", summarize(.violations))]
pub struct ValidationError {
    pub subject: String,
    pub violations: Vec<ValidationViolation>,
}

fn summarize(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.rule, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validation rule trait - produces violations for one deliverable
pub trait SpecRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, deliverable: &str, spec: &DeliverableSpec) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct TrimRule;

impl SpecRule for TrimRule {
    fn name(&self) -> &'static str { "trim" }

    fn validate(&self, deliverable: &str, spec: &DeliverableSpec) -> Vec<ValidationViolation> {
        let (w, h) = (spec.trim.width, spec.trim.height);
        if w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0 {
            return vec![];
        }
        vec![ValidationViolation::error(
            self.name(),
            format!("{deliverable}: trim must have positive finite dimensions"),
        )
        .expected("width > 0, height > 0", format!("{w}x{h}"))]
    }
}

pub struct BleedRule;

impl SpecRule for BleedRule {
    fn name(&self) -> &'static str { "bleed" }

    fn validate(&self, deliverable: &str, spec: &DeliverableSpec) -> Vec<ValidationViolation> {
        let bleed = spec.bleed.all_sides;
        if bleed.is_finite() && bleed >= 0.0 {
            return vec![];
        }
        vec![ValidationViolation::error(self.name(), format!("{deliverable}: bleed must be >= 0"))
            .expected(">= 0 mm", format!("{bleed} mm"))
            .remedy("Use a non-negative bleed, typically 3-5 mm")]
    }
}

pub struct SafeInsetRule;

impl SpecRule for SafeInsetRule {
    fn name(&self) -> &'static str { "safe_inset" }

    fn validate(&self, deliverable: &str, spec: &DeliverableSpec) -> Vec<ValidationViolation> {
        let inset = spec.safe_inset;
        let limit = spec.trim.width.min(spec.trim.height);
        if !(inset.is_finite() && inset >= 0.0) {
            return vec![ValidationViolation::error(
                self.name(),
                format!("{deliverable}: safe inset must be >= 0"),
            )
            .expected(">= 0 mm", format!("{inset} mm"))];
        }
        if 2.0 * inset >= limit {
            return vec![ValidationViolation::error(
                self.name(),
                format!("{deliverable}: safe inset leaves no safe area"),
            )
            .expected(format!("2 x inset < {limit} mm"), format!("2 x {inset} mm"))
            .remedy("Reduce the safe inset or enlarge the trim")];
        }
        vec![]
    }
}

pub struct ExclusionZoneRule;

impl SpecRule for ExclusionZoneRule {
    fn name(&self) -> &'static str { "no_content_zone" }

    fn validate(&self, deliverable: &str, spec: &DeliverableSpec) -> Vec<ValidationViolation> {
        let trim = trim_rect(spec.trim);
        spec.excluded_rects()
            .into_iter()
            .filter(|zone| {
                !(zone.is_finite() && zone.width() > 0.0 && zone.height() > 0.0 && trim.contains(zone))
            })
            .map(|zone| {
                ValidationViolation::error(
                    self.name(),
                    format!("{deliverable}: no-content zone must lie within the trim"),
                )
                .expected(format!("inside {trim}"), zone.to_string())
            })
            .collect()
    }
}

/// Checks on the `print` block.
pub fn check_print(print: &PrintSpec) -> Vec<ValidationViolation> {
    let mut violations = vec![];
    if print.min_effective_dpi == 0 {
        violations.push(ValidationViolation::error("print_dpi", "min_effective_dpi must be > 0"));
    }
    if print.preferred_effective_dpi < print.min_effective_dpi {
        violations.push(
            ValidationViolation::error("print_dpi", "preferred DPI below minimum DPI").expected(
                format!(">= {}", print.min_effective_dpi),
                print.preferred_effective_dpi.to_string(),
            ),
        );
    }
    if let Err(e) = print.rich_black.to_cmyk() {
        violations.push(ValidationViolation::error("rich_black", e.to_string()));
    }
    violations
}

/// Validator runs every rule and collects all violations before deciding.
pub struct Validator {
    rules: Vec<Box<dyn SpecRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(TrimRule),
                Box::new(BleedRule),
                Box::new(SafeInsetRule),
                Box::new(ExclusionZoneRule),
            ],
        }
    }

    pub fn validate_deliverable(&self, name: &str, spec: &DeliverableSpec) -> Vec<ValidationViolation> {
        self.rules
            .iter()
            .flat_map(|rule| rule.validate(name, spec))
            .collect()
    }

    /// Every safe-area placement must sit inside the safe rect and clear of
    /// every no-content zone.
    pub fn validate_placements(&self, zones: &Zones, placements: &[Placement]) -> ValidationResult {
        let mut violations = vec![];

        for placement in placements.iter().filter(|p| p.requires_safe_area) {
            let label = placement.element.label();
            if !zones.safe.contains(&placement.rect) {
                violations.push(
                    ValidationViolation::error("safe_area", format!("{label} leaves the safe area"))
                        .expected(format!("inside {}", zones.safe), placement.rect.to_string())
                        .remedy("Move the element inward"),
                );
            }
            for zone in zones.excluded.iter().filter(|z| z.overlaps(&placement.rect)) {
                violations.push(
                    ValidationViolation::error(
                        "no_content_zone",
                        format!("{label} overlaps a no-content zone"),
                    )
                    .expected(format!("outside {zone}"), placement.rect.to_string())
                    .remedy("Move the element out of the no-content zone"),
                );
            }
        }

        ValidationResult::from_violations(&zones.name, violations)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
