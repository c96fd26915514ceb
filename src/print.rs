//! Print Production Settings
//!
//! The `print` block of the shared spec, plus the finalization policy the
//! export step must be given explicitly.

use serde::{Deserialize, Serialize};

use crate::color::{CmykColor, ColorConversionError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorMode {
    Cmyk,
    Rgb,
}

impl ColorMode {
    pub fn label(&self) -> &'static str {
        match self {
            ColorMode::Cmyk => "CMYK",
            ColorMode::Rgb => "RGB",
        }
    }
}

/// Rich black recipe on the 0-100 scale used by print vendors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RichBlackSpec {
    #[serde(rename = "C")]
    pub c: f64,
    #[serde(rename = "M")]
    pub m: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "K")]
    pub k: f64,
}

impl RichBlackSpec {
    pub fn to_cmyk(&self) -> Result<CmykColor, ColorConversionError> {
        CmykColor::from_percent(self.c, self.m, self.y, self.k)
    }
}

impl Default for RichBlackSpec {
    fn default() -> Self {
        Self { c: 60.0, m: 40.0, y: 40.0, k: 100.0 }
    }
}

/// Print specifications for physical output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintSpec {
    pub color_mode: ColorMode,
    pub min_effective_dpi: u32,
    pub preferred_effective_dpi: u32,
    #[serde(default)]
    pub rich_black: RichBlackSpec,
    #[serde(default = "default_true")]
    pub outline_all_text: bool,
    #[serde(default = "default_true")]
    pub embed_images: bool,
    #[serde(default = "default_true")]
    pub deliver_as_pdf_with_crop_marks_and_bleed: bool,
}

fn default_true() -> bool { true }

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            color_mode: ColorMode::Cmyk,
            min_effective_dpi: 150,
            preferred_effective_dpi: 300,
            rich_black: RichBlackSpec::default(),
            outline_all_text: true,
            embed_images: true,
            deliver_as_pdf_with_crop_marks_and_bleed: true,
        }
    }
}

/// How the exported document encodes color.
///
/// No `Default`: every export names its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FinalizationMode {
    /// Fills and rasters written as DeviceCMYK.
    DeviceCmyk,
    /// Everything converted to DeviceRGB; the printer converts.
    RgbForPrinterConversion,
}

impl FinalizationMode {
    /// Color label used in artifact names.
    pub fn color_mode(&self) -> ColorMode {
        match self {
            FinalizationMode::DeviceCmyk => ColorMode::Cmyk,
            FinalizationMode::RgbForPrinterConversion => ColorMode::Rgb,
        }
    }
}
