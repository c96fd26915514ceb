//! Asset Generators - Gradients, Vignettes, Scan Codes, Source Imagery
//!
//! Every generator is a pure function of its recipe, so a recipe's canonical
//! JSON is a sound cache key. Rasters come out at the requested pixel size or
//! smaller. Source images are never upscaled.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use qrcode::{Color as ModuleColor, EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{AssetCache, CacheError};
use crate::color::{gradient, rgb8_to_cmyk, CmykColor, ColorConversionError};
use crate::hashing::{asset_key, sha256_hex};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Scan code encoding failed: {0}")]
    ScanCode(String),

    #[error("Raster would be empty: {width}x{height} px")]
    EmptyRaster { width: u32, height: u32 },

    #[error("Malformed raster payload: {0}")]
    BadRaster(String),

    #[error(transparent)]
    Color(#[from] ColorConversionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelSpace {
    Cmyk,
    Rgb,
    Gray,
}

impl PixelSpace {
    pub fn channels(&self) -> usize {
        match self {
            PixelSpace::Cmyk => 4,
            PixelSpace::Rgb => 3,
            PixelSpace::Gray => 1,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            PixelSpace::Cmyk => 0,
            PixelSpace::Rgb => 1,
            PixelSpace::Gray => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PixelSpace::Cmyk),
            1 => Some(PixelSpace::Rgb),
            2 => Some(PixelSpace::Gray),
            _ => None,
        }
    }
}

const RASTER_MAGIC: &[u8; 4] = b"RAST";
const RASTER_VERSION: u8 = 1;
const RASTER_HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4;

/// Uncompressed raster, rows top to bottom, channels interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    space: PixelSpace,
    data: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, space: PixelSpace, data: Vec<u8>) -> Result<Self, AssetError> {
        if width == 0 || height == 0 {
            return Err(AssetError::EmptyRaster { width, height });
        }
        let expected = width as usize * height as usize * space.channels();
        if data.len() != expected {
            return Err(AssetError::BadRaster(format!(
                "expected {expected} bytes for {width}x{height}, got {}",
                data.len()
            )));
        }
        Ok(Self { width, height, space, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn space(&self) -> PixelSpace {
        self.space
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn aspect(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Digest of the encoded raster, used to deduplicate embedded images.
    pub fn checksum(&self) -> String {
        sha256_hex(&self.encode())
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let n = self.space.channels();
        let start = (y as usize * self.width as usize + x as usize) * n;
        &self.data[start..start + n]
    }

    /// `RAST`, version, space tag, width and height as little-endian u32, data.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RASTER_HEADER_LEN + self.data.len());
        out.extend_from_slice(RASTER_MAGIC);
        out.push(RASTER_VERSION);
        out.push(self.space.tag());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        if bytes.len() < RASTER_HEADER_LEN || &bytes[..4] != RASTER_MAGIC {
            return Err(AssetError::BadRaster("missing header".into()));
        }
        if bytes[4] != RASTER_VERSION {
            return Err(AssetError::BadRaster(format!("unsupported version {}", bytes[4])));
        }
        let space = PixelSpace::from_tag(bytes[5])
            .ok_or_else(|| AssetError::BadRaster(format!("unknown pixel space {}", bytes[5])))?;
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Self::new(word(6), word(10), space, bytes[RASTER_HEADER_LEN..].to_vec())
    }

    /// Interleaved 8-bit RGB via the naive inverse conversion.
    pub fn to_rgb8(&self) -> Vec<u8> {
        match self.space {
            PixelSpace::Rgb => self.data.clone(),
            PixelSpace::Gray => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
            PixelSpace::Cmyk => self
                .data
                .chunks_exact(4)
                .flat_map(|px| {
                    let remaining = |ink: u8| 1.0 - f64::from(ink) / 255.0;
                    let white = remaining(px[3]);
                    [px[0], px[1], px[2]].map(|ink| (remaining(ink) * white * 255.0).round() as u8)
                })
                .collect(),
        }
    }
}

/// Deterministic description of one generated asset.
pub trait AssetRecipe: Serialize {
    fn kind(&self) -> &'static str;

    fn generate(&self) -> Result<RasterImage, AssetError>;

    fn cache_key(&self) -> Result<String, CacheError> {
        Ok(asset_key(self.kind(), self)?)
    }
}

/// Fetch through the cache, generating on a miss.
pub fn fetch<R: AssetRecipe>(cache: &AssetCache, recipe: &R) -> Result<RasterImage, CacheError> {
    let key = recipe.cache_key()?;
    let payload = cache.get_or_create(&key, || recipe.generate().map(|raster| raster.encode()))?;
    RasterImage::decode(&payload).map_err(|e| CacheError::Corrupt {
        key,
        reason: e.to_string(),
    })
}

/// Vertical CMYK gradient, `top` on the first row and `bottom` on the last.
#[derive(Debug, Clone, Serialize)]
pub struct GradientRecipe {
    pub width_px: u32,
    pub height_px: u32,
    pub top: CmykColor,
    pub bottom: CmykColor,
}

impl AssetRecipe for GradientRecipe {
    fn kind(&self) -> &'static str {
        "gradient"
    }

    fn generate(&self) -> Result<RasterImage, AssetError> {
        let rows = if self.height_px >= 2 {
            gradient(self.top, self.bottom, self.height_px as usize)?
        } else {
            vec![self.top; self.height_px as usize]
        };
        let width = self.width_px as usize;
        let mut data = Vec::with_capacity(rows.len() * width * 4);
        for color in rows {
            let px = color.to_cmyk8();
            for _ in 0..width {
                data.extend_from_slice(&px);
            }
        }
        RasterImage::new(self.width_px, self.height_px, PixelSpace::Cmyk, data)
    }
}

/// Source image bytes identified by content digest.
#[derive(Debug, Clone, Serialize)]
pub struct SourceImage {
    #[serde(skip)]
    pub name: String,
    pub digest: String,
    #[serde(skip)]
    bytes: Arc<Vec<u8>>,
}

impl SourceImage {
    pub fn new(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            digest: sha256_hex(&bytes),
            bytes: Arc::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Source image converted to CMYK and fitted inside a pixel box.
#[derive(Debug, Clone, Serialize)]
pub struct SourceImageRecipe {
    pub source: SourceImage,
    pub max_width_px: u32,
    pub max_height_px: u32,
}

impl AssetRecipe for SourceImageRecipe {
    fn kind(&self) -> &'static str {
        "source_image"
    }

    fn generate(&self) -> Result<RasterImage, AssetError> {
        let rgb = decode_fitted(self.source.bytes(), self.max_width_px, self.max_height_px)?;
        cmyk_from_rgb(&rgb)
    }
}

/// Fractions of width (sides) or height (top, bottom) that fade to paper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vignette {
    pub edge_fade: f64,
    pub bottom_fade: f64,
    pub top_fade: f64,
}

impl Vignette {
    /// Portrait imagery above the headline panel.
    pub const FACE: Vignette = Vignette { edge_fade: 0.25, bottom_fade: 0.45, top_fade: 0.10 };
    /// Full-width strip tucked under the bottom of the headline panel.
    pub const EYES: Vignette = Vignette { edge_fade: 0.25, bottom_fade: 0.35, top_fade: 0.40 };
}

/// Source image with a soft fade toward paper white at its edges.
#[derive(Debug, Clone, Serialize)]
pub struct VignetteRecipe {
    pub source: SourceImage,
    pub max_width_px: u32,
    pub max_height_px: u32,
    pub fade: Vignette,
}

impl VignetteRecipe {
    pub fn new(source: SourceImage, max_width_px: u32, max_height_px: u32, fade: Vignette) -> Self {
        Self { source, max_width_px, max_height_px, fade }
    }

    /// Opacity at a pixel: smoothstep on sides and top, cubic at the bottom.
    fn opacity(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        let side = (f64::from(width) * self.fade.edge_fade).floor();
        let top = (f64::from(height) * self.fade.top_fade).floor();
        let bottom = (f64::from(height) * self.fade.bottom_fade).floor();

        let smoothstep = |t: f64| t * t * (3.0 - 2.0 * t);
        let ramp = |dist: u32, span: f64| (span > 0.0 && f64::from(dist) < span).then(|| f64::from(dist) / span);

        let mut alpha = 1.0;
        for dist in [x, width - x - 1] {
            if let Some(t) = ramp(dist, side) {
                alpha *= smoothstep(t);
            }
        }
        if let Some(t) = ramp(y, top) {
            alpha *= smoothstep(t);
        }
        if let Some(t) = ramp(height - y - 1, bottom) {
            alpha *= t * t * t;
        }
        alpha
    }
}

impl AssetRecipe for VignetteRecipe {
    fn kind(&self) -> &'static str {
        "vignette"
    }

    fn generate(&self) -> Result<RasterImage, AssetError> {
        let rgb = decode_fitted(self.source.bytes(), self.max_width_px, self.max_height_px)?;
        let (width, height) = rgb.dimensions();
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for (x, y, px) in rgb.enumerate_pixels() {
            let alpha = self.opacity(x, y, width, height);
            let ink = rgb8_to_cmyk(px[0], px[1], px[2]).channels();
            data.extend(ink.map(|v| (v * alpha * 255.0).round() as u8));
        }
        RasterImage::new(width, height, PixelSpace::Cmyk, data)
    }
}

/// QR scan code with high error correction, dark modules in `ink`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanCodeRecipe {
    pub data: String,
    pub target_px: u32,
    pub border_modules: u32,
    pub ink: CmykColor,
}

impl AssetRecipe for ScanCodeRecipe {
    fn kind(&self) -> &'static str {
        "scan_code"
    }

    fn generate(&self) -> Result<RasterImage, AssetError> {
        let code = QrCode::with_error_correction_level(self.data.as_bytes(), EcLevel::H)
            .map_err(|e| AssetError::ScanCode(e.to_string()))?;
        let modules = code.width();
        let colors = code.to_colors();
        let border = self.border_modules as usize;
        let total = modules + 2 * border;
        // Round the module size up so the code never lands below the target.
        let module_px = (self.target_px as usize).div_ceil(total).max(1);
        let side = total * module_px;

        let paper = CmykColor::PAPER.to_cmyk8();
        let ink = self.ink.to_cmyk8();
        let mut data = Vec::with_capacity(side * side * 4);
        for py in 0..side {
            let my = py / module_px;
            for px in 0..side {
                let mx = px / module_px;
                let dark = (border..border + modules).contains(&mx)
                    && (border..border + modules).contains(&my)
                    && colors[(my - border) * modules + (mx - border)] == ModuleColor::Dark;
                data.extend_from_slice(if dark { &ink } else { &paper });
            }
        }
        let side = side as u32;
        RasterImage::new(side, side, PixelSpace::Cmyk, data)
    }
}

/// Rounded panel of `fill` laid over a vertical backdrop. Opacity runs from
/// `alpha_top` on the first row to `alpha_bottom` on the last. Pixels outside
/// the rounded corners keep the backdrop, so the raster can sit opaque on a
/// page whose background matches `backdrop_top..backdrop_bottom`.
#[derive(Debug, Clone, Serialize)]
pub struct PanelRecipe {
    pub width_px: u32,
    pub height_px: u32,
    pub radius_px: u32,
    pub fill: CmykColor,
    pub alpha_top: f64,
    pub alpha_bottom: f64,
    pub backdrop_top: CmykColor,
    pub backdrop_bottom: CmykColor,
}

impl PanelRecipe {
    /// Antialiased coverage of the rounded rectangle at a pixel center.
    fn coverage(&self, x: u32, y: u32) -> f64 {
        let (w, h) = (f64::from(self.width_px), f64::from(self.height_px));
        let r = f64::from(self.radius_px).min(w / 2.0).min(h / 2.0);
        if r <= 0.0 {
            return 1.0;
        }
        let (px, py) = (f64::from(x) + 0.5, f64::from(y) + 0.5);
        let dx = (r - px).max(px - (w - r)).max(0.0);
        let dy = (r - py).max(py - (h - r)).max(0.0);
        if dx == 0.0 || dy == 0.0 {
            return 1.0;
        }
        (r - dx.hypot(dy) + 0.5).clamp(0.0, 1.0)
    }
}

impl AssetRecipe for PanelRecipe {
    fn kind(&self) -> &'static str {
        "panel"
    }

    fn generate(&self) -> Result<RasterImage, AssetError> {
        if self.width_px == 0 || self.height_px == 0 {
            return Err(AssetError::EmptyRaster { width: self.width_px, height: self.height_px });
        }
        let last_row = f64::from(self.height_px.saturating_sub(1).max(1));
        let mut data = Vec::with_capacity(self.width_px as usize * self.height_px as usize * 4);
        for y in 0..self.height_px {
            let t = f64::from(y) / last_row;
            let backdrop = self.backdrop_top.mix(&self.backdrop_bottom, t);
            let alpha = self.alpha_top + (self.alpha_bottom - self.alpha_top) * t;
            for x in 0..self.width_px {
                let color = backdrop.mix(&self.fill, alpha * self.coverage(x, y));
                data.extend_from_slice(&color.to_cmyk8());
            }
        }
        RasterImage::new(self.width_px, self.height_px, PixelSpace::Cmyk, data)
    }
}

/// Decode, flatten alpha onto white, and downscale to fit the box.
fn decode_fitted(bytes: &[u8], max_width: u32, max_height: u32) -> Result<image::RgbImage, AssetError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let (fit_w, fit_h) = fit_within(width, height, max_width, max_height)
        .ok_or(AssetError::EmptyRaster { width: max_width, height: max_height })?;

    let rgba = if (fit_w, fit_h) == (width, height) {
        rgba
    } else {
        imageops::resize(&rgba, fit_w, fit_h, FilterType::Lanczos3)
    };

    let mut rgb = image::RgbImage::new(fit_w, fit_h);
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let a = u16::from(src[3]);
        let over_white = |v: u8| ((u16::from(v) * a + 255 * (255 - a) + 127) / 255) as u8;
        *dst = image::Rgb([over_white(src[0]), over_white(src[1]), over_white(src[2])]);
    }
    Ok(rgb)
}

/// Largest size with the source aspect that fits the box, never above native.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || max_width == 0 || max_height == 0 {
        return None;
    }
    let scale = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height))
        .min(1.0);
    if scale >= 1.0 {
        return Some((width, height));
    }
    let w = ((f64::from(width) * scale).round() as u32).clamp(1, max_width);
    let h = ((f64::from(height) * scale).round() as u32).clamp(1, max_height);
    Some((w, h))
}

fn cmyk_from_rgb(rgb: &image::RgbImage) -> Result<RasterImage, AssetError> {
    let (width, height) = rgb.dimensions();
    let data = rgb
        .pixels()
        .flat_map(|px| rgb8_to_cmyk(px[0], px[1], px[2]).to_cmyk8())
        .collect();
    RasterImage::new(width, height, PixelSpace::Cmyk, data)
}

/// Where source imagery comes from.
pub trait SourceLibrary: Send + Sync {
    /// `Ok(None)` when no source by that name exists.
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Sources read from a directory. Names must be plain relative paths.
#[derive(Debug, Clone)]
pub struct DirectorySources {
    root: PathBuf,
}

impl DirectorySources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceLibrary for DirectorySources {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let relative = Path::new(name);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("source name must be a relative path: {name}"),
            ));
        }
        match fs::read(self.root.join(relative)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySources {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), bytes);
        self
    }
}

impl SourceLibrary for MemorySources {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files.get(name).cloned())
    }
}
