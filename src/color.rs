//! Color System - CMYK Palette and Conversions
//!
//! CMYK values here come from the naive RGB -> CMYK formula, not from an ICC
//! profile. They are deterministic approximations, not colorimetric truth.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColorConversionError {
    #[error("{channel} channel out of range [0, 1]: {value}")]
    ChannelOutOfRange { channel: &'static str, value: f64 },

    #[error("Malformed hex color: {0}")]
    MalformedHex(String),

    #[error("Malformed palette token: {0:?}")]
    MalformedToken(String),

    #[error("Unknown palette token: {0}")]
    UnknownToken(String),

    #[error("Gradient needs at least 2 steps, got {0}")]
    InvalidSteps(usize),

    #[error("Palette parse error: {0}")]
    Palette(#[from] serde_json::Error),
}

/// Four-channel print color, each channel in [0, 1].
///
/// Fields are private so a value can only exist once its channels were checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CmykColor {
    c: f64,
    m: f64,
    y: f64,
    k: f64,
}

impl CmykColor {
    /// Unprinted paper.
    pub const PAPER: CmykColor = CmykColor { c: 0.0, m: 0.0, y: 0.0, k: 0.0 };
    /// Key-only black.
    pub const KEY_BLACK: CmykColor = CmykColor { c: 0.0, m: 0.0, y: 0.0, k: 1.0 };
    pub const CYAN: CmykColor = CmykColor { c: 1.0, m: 0.0, y: 0.0, k: 0.0 };
    pub const MAGENTA: CmykColor = CmykColor { c: 0.0, m: 1.0, y: 0.0, k: 0.0 };

    pub fn new(c: f64, m: f64, y: f64, k: f64) -> Result<Self, ColorConversionError> {
        Ok(Self {
            c: check_channel("cyan", c)?,
            m: check_channel("magenta", m)?,
            y: check_channel("yellow", y)?,
            k: check_channel("key", k)?,
        })
    }

    /// Build from percentages (0-100), the scale used in print specs.
    pub fn from_percent(c: f64, m: f64, y: f64, k: f64) -> Result<Self, ColorConversionError> {
        Self::new(c / 100.0, m / 100.0, y / 100.0, k / 100.0)
    }

    /// Parse `#RRGGBB` (leading `#` optional) through the naive conversion.
    pub fn from_hex(hex: &str) -> Result<Self, ColorConversionError> {
        let [r, g, b] = parse_hex(hex)?;
        Ok(rgb8_to_cmyk(r, g, b))
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn m(&self) -> f64 {
        self.m
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn channels(&self) -> [f64; 4] {
        [self.c, self.m, self.y, self.k]
    }

    /// 8-bit channel values as stored in DeviceCMYK rasters.
    pub fn to_cmyk8(&self) -> [u8; 4] {
        self.channels().map(unit_to_u8)
    }

    /// Naive inverse used for on-screen proofs: `r = (1 - c)(1 - k)`.
    pub fn to_rgb(&self) -> [f64; 3] {
        [
            (1.0 - self.c) * (1.0 - self.k),
            (1.0 - self.m) * (1.0 - self.k),
            (1.0 - self.y) * (1.0 - self.k),
        ]
    }

    pub fn to_rgb8(&self) -> [u8; 3] {
        self.to_rgb().map(unit_to_u8)
    }

    /// Channel-wise blend, `t = 0` is `self` and `t = 1` is `other`.
    pub fn mix(&self, other: &CmykColor, t: f64) -> CmykColor {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let lerp = |from: f64, to: f64| (from + (to - from) * t).clamp(from.min(to), from.max(to));
        CmykColor {
            c: lerp(self.c, other.c),
            m: lerp(self.m, other.m),
            y: lerp(self.y, other.y),
            k: lerp(self.k, other.k),
        }
    }
}

fn check_channel(channel: &'static str, value: f64) -> Result<f64, ColorConversionError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ColorConversionError::ChannelOutOfRange { channel, value })
    }
}

fn unit_to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn parse_hex(hex: &str) -> Result<[u8; 3], ColorConversionError> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ColorConversionError::MalformedHex(hex.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|_| ColorConversionError::MalformedHex(hex.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Naive RGB -> CMYK with channels in [0, 1].
///
/// `k = 1 - max(r, g, b)`, `c = (1 - r - k) / (1 - k)` (same for m, y), and
/// `c = m = y = 0` for pure black.
pub fn rgb_to_cmyk(r: f64, g: f64, b: f64) -> Result<CmykColor, ColorConversionError> {
    let r = check_channel("red", r)?;
    let g = check_channel("green", g)?;
    let b = check_channel("blue", b)?;
    Ok(naive_cmyk(r, g, b))
}

/// Same conversion for 8-bit pixels; infallible since every byte is in range.
pub fn rgb8_to_cmyk(r: u8, g: u8, b: u8) -> CmykColor {
    naive_cmyk(f64::from(r) / 255.0, f64::from(g) / 255.0, f64::from(b) / 255.0)
}

fn naive_cmyk(r: f64, g: f64, b: f64) -> CmykColor {
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 {
        return CmykColor::KEY_BLACK;
    }
    let ink = |v: f64| ((1.0 - v - k) / (1.0 - k)).clamp(0.0, 1.0);
    CmykColor {
        c: ink(r),
        m: ink(g),
        y: ink(b),
        k: k.clamp(0.0, 1.0),
    }
}

/// Linear interpolation between two colors, channel by channel.
///
/// `steps >= 2`; the first element is `a` and the last is `b`, exactly.
/// Intermediate values are clamped between the endpoints, which keeps each
/// channel monotonic.
pub fn gradient(a: CmykColor, b: CmykColor, steps: usize) -> Result<Vec<CmykColor>, ColorConversionError> {
    if steps < 2 {
        return Err(ColorConversionError::InvalidSteps(steps));
    }
    let last = steps - 1;
    let lerp = |from: f64, to: f64, t: f64| (from + (to - from) * t).clamp(from.min(to), from.max(to));

    Ok((0..steps)
        .map(|i| {
            if i == 0 {
                a
            } else if i == last {
                b
            } else {
                let t = i as f64 / last as f64;
                CmykColor {
                    c: lerp(a.c, b.c, t),
                    m: lerp(a.m, b.m, t),
                    y: lerp(a.y, b.y, t),
                    k: lerp(a.k, b.k, t),
                }
            }
        })
        .collect())
}

/// A brand color: print value plus the screen hex it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrandColor {
    pub cmyk: CmykColor,
    pub rgb_hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaletteEntry {
    /// Percentages, 0-100.
    #[serde(default)]
    cmyk: Option<[f64; 4]>,
    #[serde(default)]
    hex: Option<String>,
}

/// Immutable table of brand tokens. Built once and handed to [`ColorManager`].
#[derive(Debug, Clone, Default)]
pub struct Palette {
    entries: BTreeMap<String, BrandColor>,
}

impl Palette {
    /// Exhibit brand palette. CMYK values are print-tuned, not derived.
    pub fn brand() -> Self {
        let table: [(&str, [f64; 4], Option<&str>); 8] = [
            ("background", [3.0, 1.0, 0.0, 2.0], Some("#F8FAFC")),
            ("headline_text", [85.0, 60.0, 40.0, 60.0], Some("#0E2E3E")),
            ("accent_primary", [70.0, 0.0, 10.0, 0.0], Some("#37BCD9")),
            ("accent_light", [40.0, 0.0, 0.0, 0.0], Some("#8EE6F7")),
            ("accent_muted", [15.0, 0.0, 0.0, 0.0], Some("#DDF2F8")),
            ("accent_dark", [85.0, 25.0, 20.0, 5.0], Some("#197FA1")),
            ("rich_black", [60.0, 40.0, 40.0, 100.0], None),
            ("pure_white", [0.0, 0.0, 0.0, 0.0], None),
        ];

        let entries = table
            .into_iter()
            .map(|(token, [c, m, y, k], hex)| {
                let cmyk = CmykColor {
                    c: c / 100.0,
                    m: m / 100.0,
                    y: y / 100.0,
                    k: k / 100.0,
                };
                (token.to_string(), BrandColor { cmyk, rgb_hex: hex.map(str::to_string) })
            })
            .collect();
        Self { entries }
    }

    /// Load a palette from JSON: `{"token": {"cmyk": [c, m, y, k], "hex": "#RRGGBB"}}`.
    /// When `cmyk` is absent the value is derived from `hex`.
    pub fn from_json(json: &str) -> Result<Self, ColorConversionError> {
        let raw: BTreeMap<String, PaletteEntry> = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();
        for (token, entry) in raw {
            check_token(&token)?;
            let cmyk = match (entry.cmyk, entry.hex.as_deref()) {
                (Some([c, m, y, k]), _) => CmykColor::from_percent(c, m, y, k)?,
                (None, Some(hex)) => CmykColor::from_hex(hex)?,
                (None, None) => return Err(ColorConversionError::MalformedToken(token)),
            };
            if let Some(hex) = entry.hex.as_deref() {
                parse_hex(hex)?;
            }
            entries.insert(token, BrandColor { cmyk, rgb_hex: entry.hex });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, token: &str) -> Option<&BrandColor> {
        self.entries.get(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Replace the print value of `token`, keeping its screen hex.
    fn set_cmyk(&mut self, token: &str, cmyk: CmykColor) {
        self.entries
            .entry(token.to_string())
            .and_modify(|brand| brand.cmyk = cmyk)
            .or_insert(BrandColor { cmyk, rgb_hex: None });
    }
}

fn check_token(token: &str) -> Result<(), ColorConversionError> {
    let well_formed = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(ColorConversionError::MalformedToken(token.to_string()))
    }
}

/// Palette token that always resolves to the active rich-black recipe.
pub const RICH_BLACK_TOKEN: &str = "rich_black";

/// Resolves brand tokens and produces print colors.
#[derive(Debug, Clone)]
pub struct ColorManager {
    palette: Palette,
    rich_black: CmykColor,
}

impl ColorManager {
    /// Rich-black recipe: C60 M40 Y40 K100.
    pub const DEFAULT_RICH_BLACK: CmykColor = CmykColor { c: 0.60, m: 0.40, y: 0.40, k: 1.00 };

    /// The palette's `rich_black` token, when present, is the recipe.
    pub fn new(palette: Palette) -> Self {
        let rich_black = palette
            .get(RICH_BLACK_TOKEN)
            .map_or(Self::DEFAULT_RICH_BLACK, |brand| brand.cmyk);
        Self { palette, rich_black }
    }

    /// Override the rich-black recipe (taken from the print spec). The
    /// `rich_black` token follows the override.
    pub fn with_rich_black(mut self, rich_black: CmykColor) -> Self {
        self.rich_black = rich_black;
        self.palette.set_cmyk(RICH_BLACK_TOKEN, rich_black);
        self
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn resolve(&self, token: &str) -> Result<CmykColor, ColorConversionError> {
        check_token(token)?;
        self.palette
            .get(token)
            .map(|brand| brand.cmyk)
            .ok_or_else(|| ColorConversionError::UnknownToken(token.to_string()))
    }

    /// Neutral dark fill used instead of key-only black.
    pub fn rich_black(&self) -> CmykColor {
        self.rich_black
    }

    pub fn rgb_to_cmyk(&self, r: f64, g: f64, b: f64) -> Result<CmykColor, ColorConversionError> {
        rgb_to_cmyk(r, g, b)
    }

    pub fn gradient(
        &self,
        a: CmykColor,
        b: CmykColor,
        steps: usize,
    ) -> Result<Vec<CmykColor>, ColorConversionError> {
        gradient(a, b, steps)
    }
}
