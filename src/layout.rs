//! Layout Orchestrator - Per-Deliverable State Machine
//!
//! `Configured -> AssetsResolved -> Rendered -> Exported`, with `Failed`
//! reachable from every non-terminal state. Placements are validated before
//! the first draw call; a rejected layout never reaches the canvas.
//!
//! Each deliverable owns its orchestrator. The asset cache is the only thing
//! shared between deliverables.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::{DocumentAssembler, ExportError, ExportedArtifacts};
use crate::assets::{
    fetch, AssetRecipe, GradientRecipe, PanelRecipe, RasterImage, ScanCodeRecipe, SourceImage, SourceImageRecipe,
    SourceLibrary, Vignette, VignetteRecipe,
};
use crate::cache::AssetCache;
use crate::canvas::{
    fit_font_size, CanvasAdapter, GuideKind, ImageColorSpace, ImageRole, RenderError, TextStyle, ASCENT_EM,
    AVERAGE_ADVANCE_EM, DESCENT_EM,
};
use crate::color::{CmykColor, ColorManager};
use crate::geometry::{mm_to_pt, pixels_at_least, pt_to_mm, Size, ZoneRect};
use crate::spec::DeliverableSpec;
use crate::validation::{ValidationError, Validator};

/// Width of the background gradient raster. The gradient is vertical, so the
/// strip is stretched across the page.
const BACKGROUND_STRIP_PX: u32 = 8;

/// Quiet zone around scan codes, in modules.
const SCAN_CODE_BORDER_MODULES: u32 = 2;

/// Panels are smooth fills, so they are rasterized no finer than this.
const PANEL_MAX_DPI: u32 = 50;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("{deliverable}: cannot {action} while {state:?}")]
    InvalidState {
        deliverable: String,
        action: &'static str,
        state: DeliverableState,
    },
}

/// Derived zones for one deliverable, trim-relative millimeters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zones {
    pub name: String,
    pub trim_size: Size,
    pub bleed: f64,
    pub trim: ZoneRect,
    pub document: ZoneRect,
    pub safe: ZoneRect,
    pub excluded: Vec<ZoneRect>,
}

impl Zones {
    pub fn from_spec(name: &str, spec: &DeliverableSpec) -> Self {
        Self {
            name: name.to_string(),
            trim_size: spec.trim,
            bleed: spec.bleed.all_sides,
            trim: spec.trim_rect(),
            document: spec.document_rect(),
            safe: spec.safe_rect(),
            excluded: spec.excluded_rects(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fill", rename_all = "snake_case")]
pub enum BackgroundFill {
    /// Vertical gradient between two palette tokens, `top` at the top edge.
    Gradient { top: String, bottom: String },
    Solid { token: String },
    RichBlack,
}

/// Where an image sits inside its placement once its aspect is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageAnchor {
    #[default]
    Center,
    Top,
}

impl ImageAnchor {
    /// Largest rect of `aspect` inside `rect`, aligned by the anchor.
    pub fn place(&self, rect: ZoneRect, aspect: f64) -> ZoneRect {
        let fitted = rect.fit_aspect(aspect);
        match self {
            ImageAnchor::Center => fitted,
            ImageAnchor::Top => {
                let lift = rect.y1 - fitted.y1;
                ZoneRect::from_corners(fitted.x0, fitted.y0 + lift, fitted.x1, fitted.y1 + lift)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Background(BackgroundFill),
    Image {
        source: String,
        #[serde(default)]
        vignette: Option<Vignette>,
        required: bool,
        #[serde(default)]
        anchor: ImageAnchor,
    },
    /// Rounded translucent fill over the background.
    Panel {
        color_token: String,
        alpha_top: f64,
        alpha_bottom: f64,
        radius_mm: f64,
    },
    ScanCode {
        data: String,
    },
    Headline {
        lines: Vec<String>,
        color_token: String,
        size_pt: f64,
    },
    Text {
        lines: Vec<String>,
        color_token: String,
        size_pt: f64,
    },
    Logo {
        source: String,
        required: bool,
    },
}

/// Stacking layer. Draw order follows this ordering, then placement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Background,
    Imagery,
    Text,
    Logo,
}

impl Element {
    pub fn label(&self) -> String {
        match self {
            Element::Background(_) => "background".to_string(),
            Element::Image { source, .. } => format!("image {source}"),
            Element::Panel { .. } => "panel".to_string(),
            Element::ScanCode { .. } => "scan code".to_string(),
            Element::Headline { .. } => "headline".to_string(),
            Element::Text { .. } => "text".to_string(),
            Element::Logo { source, .. } => format!("logo {source}"),
        }
    }

    pub fn layer(&self) -> Layer {
        match self {
            Element::Background(_) => Layer::Background,
            Element::Image { .. } | Element::Panel { .. } | Element::ScanCode { .. } => Layer::Imagery,
            Element::Headline { .. } | Element::Text { .. } => Layer::Text,
            Element::Logo { .. } => Layer::Logo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub element: Element,
    pub rect: ZoneRect,
    pub requires_safe_area: bool,
}

impl Placement {
    pub fn new(element: Element, rect: ZoneRect, requires_safe_area: bool) -> Self {
        Self { element, rect, requires_safe_area }
    }
}

/// Copy and asset names placed by the built-in layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutContent {
    pub headline: Vec<String>,
    pub scan_code_url: String,
    pub website: String,
    pub face_image: String,
    pub eyes_image: String,
    pub logo_image: String,
    pub font: String,
}

impl Default for LayoutContent {
    fn default() -> Self {
        Self {
            headline: vec!["AI ROLEPLAY".to_string(), "FOR SALES TEAMS".to_string()],
            scan_code_url: "https://www.getskylar.com/conference".to_string(),
            website: "CallSkylar.com".to_string(),
            face_image: "face.png".to_string(),
            eyes_image: "eyes.png".to_string(),
            logo_image: "logo.png".to_string(),
            font: "Helvetica-Bold".to_string(),
        }
    }
}

/// Per-kind layout policy.
pub trait DeliverableLayout: Send + Sync {
    fn kind(&self) -> &'static str;

    fn zone_layout(&self, name: &str, spec: &DeliverableSpec) -> Zones {
        Zones::from_spec(name, spec)
    }

    fn default_placements(&self, zones: &Zones, content: &LayoutContent) -> Vec<Placement>;
}

/// Layout policy for a deliverable kind, if one exists.
pub fn layout_for(kind: &str) -> Option<Box<dyn DeliverableLayout>> {
    match kind {
        "backwall" => Some(Box::new(BackwallLayout)),
        "counter" => Some(Box::new(CounterLayout)),
        _ => None,
    }
}

/// Height in millimeters of one text line at `size_pt`.
fn line_height_mm(size_pt: f64) -> f64 {
    pt_to_mm((ASCENT_EM + DESCENT_EM) * size_pt)
}

/// Width in millimeters of the widest line at `size_pt`.
fn text_width_mm(lines: &[String], size_pt: f64) -> f64 {
    lines
        .iter()
        .map(|line| pt_to_mm(line.chars().count() as f64 * AVERAGE_ADVANCE_EM * size_pt))
        .fold(0.0, f64::max)
}

fn centered(center_x: f64, y0: f64, width: f64, height: f64) -> ZoneRect {
    ZoneRect::from_origin_size(center_x - width / 2.0, y0, width, height)
}

/// Tall wall: face imagery up top, headline panel mid-height with the eyes
/// strip tucked under it, logo under the headline, nothing in the no-content
/// zones.
pub struct BackwallLayout;

impl BackwallLayout {
    const HEADLINE_MIN_Y_FRACTION: f64 = 0.58;
    const CLEARANCE_ABOVE_ZONE_MM: f64 = 150.0;
    const BASELINE_GAP: f64 = 1.6;
    const LOGO_WIDTH_FRACTION: f64 = 0.20;
    const LOGO_BOX_HEIGHT_MM: f64 = 90.0;
    const LOGO_GAP_MM: f64 = 60.0;
    const PANEL_PAD_SIDE_MM: f64 = 30.0;
    const PANEL_PAD_TOP_MM: f64 = 35.0;
    const PANEL_PAD_BOTTOM_MM: f64 = 60.0;
    const PANEL_ALPHA_TOP: f64 = 0.50;
    const PANEL_ALPHA_BOTTOM: f64 = 0.30;
    const PANEL_RADIUS_MM: f64 = 40.0;
    /// How far the eyes strip reaches up under the panel.
    const EYES_OVERLAP_MM: f64 = 120.0;
}

impl DeliverableLayout for BackwallLayout {
    fn kind(&self) -> &'static str {
        "backwall"
    }

    fn default_placements(&self, zones: &Zones, content: &LayoutContent) -> Vec<Placement> {
        let safe = zones.safe;
        let center_x = zones.trim.center_x();
        let lines: Vec<&str> = content.headline.iter().map(String::as_str).collect();
        let size_pt = fit_font_size(&lines, mm_to_pt(safe.width() * 0.92), 300.0, 80.0);

        let line_h = line_height_mm(size_pt);
        let rows = content.headline.len().max(1) as f64;
        let headline_h = line_h * (1.0 + Self::BASELINE_GAP * (rows - 1.0));
        let headline_w = text_width_mm(&content.headline, size_pt);

        let above_zones = zones
            .excluded
            .iter()
            .map(|z| z.y1 + Self::CLEARANCE_ABOVE_ZONE_MM)
            .fold(safe.y0, f64::max);
        let headline_y0 = above_zones.max(zones.trim_size.height * Self::HEADLINE_MIN_Y_FRACTION);
        let headline = centered(center_x, headline_y0, headline_w, headline_h);

        let logo_w = safe.width() * Self::LOGO_WIDTH_FRACTION;
        let logo_y1 = headline.y0 - Self::LOGO_GAP_MM;
        let logo = centered(center_x, logo_y1 - Self::LOGO_BOX_HEIGHT_MM, logo_w, Self::LOGO_BOX_HEIGHT_MM);

        let panel = ZoneRect::from_corners(
            headline.x0 - Self::PANEL_PAD_SIDE_MM,
            logo.y0 - Self::PANEL_PAD_BOTTOM_MM,
            headline.x1 + Self::PANEL_PAD_SIDE_MM,
            headline.y1 + Self::PANEL_PAD_TOP_MM,
        );
        let face = ZoneRect::from_corners(zones.document.x0, panel.y1, zones.document.x1, zones.document.y1);
        let eyes_y1 = panel.y0 + Self::EYES_OVERLAP_MM;
        let eyes = ZoneRect::from_corners(
            zones.trim.x0,
            (eyes_y1 - zones.trim.width()).max(zones.trim.y0),
            zones.trim.x1,
            eyes_y1,
        );

        vec![
            Placement::new(
                Element::Background(BackgroundFill::Gradient {
                    top: "background".to_string(),
                    bottom: "accent_muted".to_string(),
                }),
                zones.document,
                false,
            ),
            Placement::new(
                Element::Image {
                    source: content.face_image.clone(),
                    vignette: Some(Vignette::FACE),
                    required: false,
                    anchor: ImageAnchor::Center,
                },
                face,
                false,
            ),
            Placement::new(
                Element::Image {
                    source: content.eyes_image.clone(),
                    vignette: Some(Vignette::EYES),
                    required: false,
                    anchor: ImageAnchor::Top,
                },
                eyes,
                false,
            ),
            Placement::new(
                Element::Panel {
                    color_token: "pure_white".to_string(),
                    alpha_top: Self::PANEL_ALPHA_TOP,
                    alpha_bottom: Self::PANEL_ALPHA_BOTTOM,
                    radius_mm: Self::PANEL_RADIUS_MM,
                },
                panel,
                true,
            ),
            Placement::new(
                Element::Headline {
                    lines: content.headline.clone(),
                    color_token: "headline_text".to_string(),
                    size_pt,
                },
                headline,
                true,
            ),
            Placement::new(
                Element::Logo {
                    source: content.logo_image.clone(),
                    required: false,
                },
                logo,
                true,
            ),
        ]
    }
}

/// Narrow counter front: scan code on a near-opaque white panel, website below
/// it, logo near the bottom of the safe area.
pub struct CounterLayout;

impl CounterLayout {
    const SCAN_CODE_WIDTH_FRACTION: f64 = 0.65;
    const SCAN_CODE_Y_MM: f64 = 480.0;
    const PANEL_PAD_MM: f64 = 25.0;
    const PANEL_ALPHA: f64 = 0.92;
    const PANEL_RADIUS_MM: f64 = 35.0;
    const WEBSITE_SIZE_PT: f64 = 42.0;
    const WEBSITE_DROP_MM: f64 = 55.0;
    const LOGO_WIDTH_FRACTION: f64 = 0.55;
    const LOGO_BOX_HEIGHT_MM: f64 = 50.0;
    const LOGO_LIFT_MM: f64 = 40.0;
}

impl DeliverableLayout for CounterLayout {
    fn kind(&self) -> &'static str {
        "counter"
    }

    fn default_placements(&self, zones: &Zones, content: &LayoutContent) -> Vec<Placement> {
        let safe = zones.safe;
        let center_x = zones.trim.center_x();

        let code_size = safe.width() * Self::SCAN_CODE_WIDTH_FRACTION;
        let code = centered(center_x, Self::SCAN_CODE_Y_MM, code_size, code_size);
        let panel = code.expand(Self::PANEL_PAD_MM);

        let website_lines = vec![content.website.clone()];
        let website = centered(
            center_x,
            code.y0 - Self::WEBSITE_DROP_MM,
            text_width_mm(&website_lines, Self::WEBSITE_SIZE_PT),
            line_height_mm(Self::WEBSITE_SIZE_PT),
        );

        let logo = centered(
            center_x,
            safe.y0 + Self::LOGO_LIFT_MM,
            safe.width() * Self::LOGO_WIDTH_FRACTION,
            Self::LOGO_BOX_HEIGHT_MM,
        );

        vec![
            Placement::new(
                Element::Background(BackgroundFill::Gradient {
                    top: "background".to_string(),
                    bottom: "accent_light".to_string(),
                }),
                zones.document,
                false,
            ),
            Placement::new(
                Element::Panel {
                    color_token: "pure_white".to_string(),
                    alpha_top: Self::PANEL_ALPHA,
                    alpha_bottom: Self::PANEL_ALPHA,
                    radius_mm: Self::PANEL_RADIUS_MM,
                },
                panel,
                true,
            ),
            Placement::new(Element::ScanCode { data: content.scan_code_url.clone() }, code, true),
            Placement::new(
                Element::Text {
                    lines: website_lines,
                    color_token: "headline_text".to_string(),
                    size_pt: Self::WEBSITE_SIZE_PT,
                },
                website,
                true,
            ),
            Placement::new(
                Element::Logo {
                    source: content.logo_image.clone(),
                    required: false,
                },
                logo,
                true,
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableState {
    Configured,
    AssetsResolved,
    Rendered,
    Exported,
    Failed,
}

/// What asset resolution needs from the outside.
pub struct AssetContext<'a> {
    pub colors: &'a ColorManager,
    pub cache: &'a AssetCache,
    pub sources: &'a dyn SourceLibrary,
    pub dpi: u32,
}

/// Drives one deliverable from configuration to export.
pub struct LayoutOrchestrator {
    name: String,
    kind: &'static str,
    spec: DeliverableSpec,
    zones: Zones,
    font: String,
    placements: Vec<Placement>,
    assets: Vec<Option<Arc<RasterImage>>>,
    canvas: Option<CanvasAdapter>,
    state: DeliverableState,
}

impl LayoutOrchestrator {
    /// Compute zones and default placements. Placements are not validated yet.
    pub fn configure(
        name: &str,
        spec: &DeliverableSpec,
        layout: &dyn DeliverableLayout,
        content: &LayoutContent,
    ) -> Self {
        let zones = layout.zone_layout(name, spec);
        let placements = layout.default_placements(&zones, content);
        tracing::info!(deliverable = name, kind = layout.kind(), placements = placements.len(), "configured");
        Self::build(name, layout.kind(), spec, zones, placements, &content.font)
    }

    /// Configure with caller-supplied placements instead of a layout's defaults.
    pub fn with_placements(name: &str, spec: &DeliverableSpec, placements: Vec<Placement>) -> Self {
        let zones = Zones::from_spec(name, spec);
        let font = LayoutContent::default().font;
        Self::build(name, "custom", spec, zones, placements, &font)
    }

    fn build(
        name: &str,
        kind: &'static str,
        spec: &DeliverableSpec,
        zones: Zones,
        placements: Vec<Placement>,
        font: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            spec: spec.clone(),
            zones,
            font: font.to_string(),
            assets: vec![None; placements.len()],
            placements,
            canvas: None,
            state: DeliverableState::Configured,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn state(&self) -> DeliverableState {
        self.state
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn canvas(&self) -> Option<&CanvasAdapter> {
        self.canvas.as_ref()
    }

    pub fn draw_call_count(&self) -> usize {
        self.canvas.as_ref().map_or(0, CanvasAdapter::draw_call_count)
    }

    pub fn image_draw_count(&self) -> usize {
        self.canvas.as_ref().map_or(0, CanvasAdapter::image_draw_count)
    }

    fn require(&self, expected: DeliverableState, action: &'static str) -> Result<(), LayoutError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LayoutError::InvalidState {
                deliverable: self.name.clone(),
                action,
                state: self.state,
            })
        }
    }

    fn fail(&mut self, err: impl Into<LayoutError>) -> LayoutError {
        let err = err.into();
        self.state = DeliverableState::Failed;
        tracing::error!(deliverable = %self.name, error = %err, "deliverable failed");
        err
    }

    /// Fetch every raster the placements need. A missing required source fails
    /// the deliverable. A missing optional one drops its placement.
    #[tracing::instrument(skip_all, fields(deliverable = %self.name))]
    pub fn resolve_assets(&mut self, ctx: &AssetContext<'_>) -> Result<(), LayoutError> {
        self.require(DeliverableState::Configured, "resolve assets")?;

        for index in 0..self.placements.len() {
            match self.resolve_one(index, ctx) {
                Ok(asset) => self.assets[index] = asset,
                Err(err) => return Err(self.fail(err)),
            }
        }

        self.state = DeliverableState::AssetsResolved;
        tracing::info!(
            resolved = self.assets.iter().filter(|a| a.is_some()).count(),
            "assets resolved"
        );
        Ok(())
    }

    fn resolve_one(&self, index: usize, ctx: &AssetContext<'_>) -> Result<Option<Arc<RasterImage>>, RenderError> {
        let placement = &self.placements[index];
        let rect = placement.rect;
        let (max_w, max_h) = (pixels_at_least(rect.width(), ctx.dpi), pixels_at_least(rect.height(), ctx.dpi));

        let raster = match &placement.element {
            Element::Background(BackgroundFill::Gradient { top, bottom }) => {
                let recipe = GradientRecipe {
                    width_px: BACKGROUND_STRIP_PX,
                    height_px: max_h.max(2),
                    top: ctx.colors.resolve(top)?,
                    bottom: ctx.colors.resolve(bottom)?,
                };
                fetch_labeled(ctx.cache, &recipe, placement)?
            }
            Element::Image { source, vignette, required, .. } => {
                let Some(source) = load_source(ctx.sources, source, *required)? else {
                    return Ok(None);
                };
                match vignette {
                    Some(fade) => fetch_labeled(ctx.cache, &VignetteRecipe::new(source, max_w, max_h, *fade), placement)?,
                    None => {
                        let recipe = SourceImageRecipe { source, max_width_px: max_w, max_height_px: max_h };
                        fetch_labeled(ctx.cache, &recipe, placement)?
                    }
                }
            }
            Element::Panel { color_token, alpha_top, alpha_bottom, radius_mm } => {
                let dpi = ctx.dpi.min(PANEL_MAX_DPI);
                let recipe = PanelRecipe {
                    width_px: pixels_at_least(rect.width(), dpi).max(1),
                    height_px: pixels_at_least(rect.height(), dpi).max(1),
                    radius_px: pixels_at_least(*radius_mm, dpi),
                    fill: ctx.colors.resolve(color_token)?,
                    alpha_top: *alpha_top,
                    alpha_bottom: *alpha_bottom,
                    backdrop_top: self.backdrop_at(ctx.colors, rect.y1)?,
                    backdrop_bottom: self.backdrop_at(ctx.colors, rect.y0)?,
                };
                fetch_labeled(ctx.cache, &recipe, placement)?
            }
            Element::Logo { source, required } => {
                let Some(source) = load_source(ctx.sources, source, *required)? else {
                    return Ok(None);
                };
                let recipe = SourceImageRecipe { source, max_width_px: max_w, max_height_px: max_h };
                fetch_labeled(ctx.cache, &recipe, placement)?
            }
            Element::ScanCode { data } => {
                let recipe = ScanCodeRecipe {
                    data: data.clone(),
                    target_px: max_w.min(max_h),
                    border_modules: SCAN_CODE_BORDER_MODULES,
                    ink: CmykColor::KEY_BLACK,
                };
                fetch_labeled(ctx.cache, &recipe, placement)?
            }
            Element::Background(_) | Element::Headline { .. } | Element::Text { .. } => return Ok(None),
        };
        Ok(Some(Arc::new(raster)))
    }

    /// Background color at height `y`, ignoring anything drawn over it.
    fn backdrop_at(&self, colors: &ColorManager, y: f64) -> Result<CmykColor, RenderError> {
        let background = self.placements.iter().find_map(|p| match &p.element {
            Element::Background(fill) => Some((fill, p.rect)),
            _ => None,
        });
        Ok(match background {
            Some((BackgroundFill::Gradient { top, bottom }, rect)) => {
                let t = if rect.height() > 0.0 { ((rect.y1 - y) / rect.height()).clamp(0.0, 1.0) } else { 0.0 };
                colors.resolve(top)?.mix(&colors.resolve(bottom)?, t)
            }
            Some((BackgroundFill::Solid { token }, _)) => colors.resolve(token)?,
            Some((BackgroundFill::RichBlack, _)) => colors.rich_black(),
            None => CmykColor::PAPER,
        })
    }

    /// Validate, then draw in layer order. Guides are for review only.
    #[tracing::instrument(skip_all, fields(deliverable = %self.name))]
    pub fn render(&mut self, colors: &ColorManager, guides: bool) -> Result<(), LayoutError> {
        self.require(DeliverableState::AssetsResolved, "render")?;

        let validation = Validator::new().validate_placements(&self.zones, &self.placements);
        if let Err(err) = validation.into_result() {
            return Err(self.fail(err));
        }

        match self.draw(colors, guides) {
            Ok(canvas) => {
                tracing::info!(draw_calls = canvas.draw_call_count(), "rendered");
                self.canvas = Some(canvas);
                self.state = DeliverableState::Rendered;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn draw(&self, colors: &ColorManager, guides: bool) -> Result<CanvasAdapter, RenderError> {
        let mut canvas = CanvasAdapter::new(self.spec.trim, self.spec.bleed.all_sides);

        let mut order: Vec<usize> = (0..self.placements.len()).collect();
        order.sort_by_key(|&i| self.placements[i].element.layer());

        for index in order {
            let placement = &self.placements[index];
            let rect = placement.rect;
            match &placement.element {
                Element::Background(BackgroundFill::Solid { token }) => canvas.rect(rect, colors.resolve(token)?)?,
                Element::Background(BackgroundFill::RichBlack) => canvas.rect(rect, colors.rich_black())?,
                Element::Headline { lines, color_token, size_pt } | Element::Text { lines, color_token, size_pt } => {
                    let style = TextStyle {
                        font: self.font.clone(),
                        size_pt: *size_pt,
                        color: colors.resolve(color_token)?,
                    };
                    canvas.text_block(lines, rect, style)?;
                }
                Element::Background(BackgroundFill::Gradient { .. }) | Element::Panel { .. } => {
                    if let Some(raster) = &self.assets[index] {
                        canvas.image(raster.clone(), rect, ImageColorSpace::DeviceCmyk, ImageRole::Background)?;
                    }
                }
                Element::Image { anchor, .. } => {
                    if let Some(raster) = &self.assets[index] {
                        let target = anchor.place(rect, raster.aspect());
                        canvas.image(raster.clone(), target, ImageColorSpace::DeviceCmyk, ImageRole::Content)?;
                    }
                }
                Element::Logo { .. } | Element::ScanCode { .. } => {
                    if let Some(raster) = &self.assets[index] {
                        let target = rect.fit_aspect(raster.aspect());
                        canvas.image(raster.clone(), target, ImageColorSpace::DeviceCmyk, ImageRole::Content)?;
                    }
                }
            }
        }

        if guides {
            canvas.guide(self.zones.trim, GuideKind::Trim)?;
            canvas.guide(self.zones.safe, GuideKind::SafeArea)?;
            for zone in &self.zones.excluded {
                canvas.guide(*zone, GuideKind::NoContent)?;
            }
        }

        canvas.crop_marks(self.zones.document, self.zones.trim)?;
        Ok(canvas)
    }

    /// Persist the rendered document.
    #[tracing::instrument(skip_all, fields(deliverable = %self.name))]
    pub fn export(&mut self, assembler: &DocumentAssembler) -> Result<ExportedArtifacts, LayoutError> {
        self.require(DeliverableState::Rendered, "export")?;
        let Some(canvas) = self.canvas.as_ref() else {
            return Err(self.fail(LayoutError::InvalidState {
                deliverable: self.name.clone(),
                action: "export",
                state: self.state,
            }));
        };

        match assembler.export(&self.name, &self.spec, canvas) {
            Ok(artifacts) => {
                self.state = DeliverableState::Exported;
                tracing::info!(pdf = %artifacts.pdf.display(), "exported");
                Ok(artifacts)
            }
            Err(err) => Err(self.fail(err)),
        }
    }
}

fn load_source(sources: &dyn SourceLibrary, name: &str, required: bool) -> Result<Option<SourceImage>, RenderError> {
    match sources.load(name) {
        Ok(Some(bytes)) => Ok(Some(SourceImage::new(name, bytes))),
        Ok(None) if required => Err(RenderError::MissingSource(name.to_string())),
        Ok(None) => {
            tracing::warn!(source = name, "optional source image missing, skipping");
            Ok(None)
        }
        Err(source) => Err(RenderError::SourceIo {
            name: name.to_string(),
            source,
        }),
    }
}

fn fetch_labeled<R: AssetRecipe>(cache: &AssetCache, recipe: &R, placement: &Placement) -> Result<RasterImage, RenderError> {
    fetch(cache, recipe).map_err(|source| RenderError::AssetUnavailable {
        asset: placement.element.label(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemorySources;
    use crate::color::Palette;
    use crate::spec::GraphicsSpec;

    fn exhibit() -> GraphicsSpec {
        GraphicsSpec::exhibit_default().unwrap()
    }

    fn placements_for(name: &str) -> (Zones, Vec<Placement>) {
        let spec = exhibit();
        let layout = layout_for(name).unwrap();
        let zones = layout.zone_layout(name, spec.deliverable(name).unwrap());
        let placements = layout.default_placements(&zones, &LayoutContent::default());
        (zones, placements)
    }

    #[test]
    fn test_default_layouts_validate() {
        for name in ["backwall", "counter"] {
            let (zones, placements) = placements_for(name);
            let result = Validator::new().validate_placements(&zones, &placements);
            assert!(result.valid, "{name}: {:?}", result.violations);
        }
    }

    #[test]
    fn test_backwall_headline_clears_no_text_zone() {
        let (zones, placements) = placements_for("backwall");
        let headline = placements
            .iter()
            .find(|p| matches!(p.element, Element::Headline { .. }))
            .unwrap();
        assert!(headline.rect.y0 >= zones.excluded[0].y1 + 150.0);
    }

    #[test]
    fn test_unknown_kind_has_no_layout() {
        assert!(layout_for("banner").is_none());
    }

    #[test]
    fn test_layers_draw_background_first_logo_last() {
        assert!(Layer::Background < Layer::Imagery);
        assert!(Layer::Text < Layer::Logo);
    }

    #[test]
    fn test_out_of_order_transition_rejected() {
        let spec = exhibit();
        let mut orchestrator = LayoutOrchestrator::with_placements("counter", spec.deliverable("counter").unwrap(), vec![]);
        let err = orchestrator.render(&ColorManager::new(Palette::brand()), false).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidState { .. }));
        assert_eq!(orchestrator.state(), DeliverableState::Configured);
    }

    #[test]
    fn test_missing_required_source_fails() {
        let spec = exhibit();
        let placement = Placement::new(
            Element::Logo { source: "logo.png".into(), required: true },
            ZoneRect::from_corners(60.0, 60.0, 240.0, 120.0),
            true,
        );
        let mut orchestrator =
            LayoutOrchestrator::with_placements("counter", spec.deliverable("counter").unwrap(), vec![placement]);
        let colors = ColorManager::new(Palette::brand());
        let cache = AssetCache::in_memory();
        let sources = MemorySources::new();
        let ctx = AssetContext { colors: &colors, cache: &cache, sources: &sources, dpi: 150 };

        let err = orchestrator.resolve_assets(&ctx).unwrap_err();
        assert!(matches!(err, LayoutError::Render(RenderError::MissingSource(_))));
        assert_eq!(orchestrator.state(), DeliverableState::Failed);
    }

    #[test]
    fn test_optional_imagery_skipped_and_order_fixed() {
        let spec = exhibit();
        let mut orchestrator = LayoutOrchestrator::configure(
            "counter",
            spec.deliverable("counter").unwrap(),
            &CounterLayout,
            &LayoutContent::default(),
        );
        let colors = ColorManager::new(Palette::brand());
        let cache = AssetCache::in_memory();
        let sources = MemorySources::new();
        let ctx = AssetContext { colors: &colors, cache: &cache, sources: &sources, dpi: 20 };

        orchestrator.resolve_assets(&ctx).unwrap();
        orchestrator.render(&colors, true).unwrap();

        let commands = orchestrator.canvas().unwrap().commands();
        assert!(matches!(commands[0], crate::canvas::DrawCommand::Image { role: ImageRole::Background, .. }));
        assert!(matches!(commands.last(), Some(crate::canvas::DrawCommand::CropMarks { .. })));
        // gradient + panel + scan code; the logo source is absent
        assert_eq!(orchestrator.image_draw_count(), 3);
    }

    fn rendered(name: &str, sources: MemorySources, dpi: u32) -> LayoutOrchestrator {
        let spec = exhibit();
        let layout = layout_for(name).unwrap();
        let mut orchestrator =
            LayoutOrchestrator::configure(name, spec.deliverable(name).unwrap(), layout.as_ref(), &LayoutContent::default());
        let colors = ColorManager::new(Palette::brand());
        let cache = AssetCache::in_memory();
        let ctx = AssetContext { colors: &colors, cache: &cache, sources: &sources, dpi };
        orchestrator.resolve_assets(&ctx).unwrap();
        orchestrator.render(&colors, false).unwrap();
        orchestrator
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 60, 90, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_panels_are_translucent_and_rounded() {
        let (_, backwall) = placements_for("backwall");
        let (_, counter) = placements_for("counter");
        let panel = |placements: &[Placement]| {
            placements
                .iter()
                .find_map(|p| match &p.element {
                    Element::Panel { alpha_top, alpha_bottom, radius_mm, .. } => {
                        Some((*alpha_top, *alpha_bottom, *radius_mm))
                    }
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(panel(&backwall), (0.50, 0.30, 40.0));
        assert_eq!(panel(&counter), (0.92, 0.92, 35.0));
    }

    #[test]
    fn test_panel_raster_shows_background_through() {
        let orchestrator = rendered("counter", MemorySources::new(), 20);
        let zones = orchestrator.zones().clone();
        let commands = orchestrator.canvas().unwrap().commands();
        let panel = orchestrator
            .placements()
            .iter()
            .find(|p| matches!(p.element, Element::Panel { .. }))
            .unwrap()
            .rect;
        let raster = commands
            .iter()
            .find_map(|c| match c {
                crate::canvas::DrawCommand::Image { target, raster, role: ImageRole::Background, .. }
                    if *target == panel =>
                {
                    Some(raster.clone())
                }
                _ => None,
            })
            .unwrap();

        let colors = ColorManager::new(Palette::brand());
        let top = colors.resolve("background").unwrap();
        let bottom = colors.resolve("accent_light").unwrap();
        let t = (zones.document.y1 - panel.y1) / zones.document.height();
        let backdrop = top.mix(&bottom, t);
        let center = raster.pixel(raster.width() / 2, 0);
        // 92% paper over the gradient; the corner keeps the gradient
        assert_eq!(center, backdrop.mix(&CmykColor::PAPER, 0.92).to_cmyk8());
        assert_eq!(raster.pixel(0, 0), backdrop.to_cmyk8());
    }

    #[test]
    fn test_eyes_strip_sits_under_panel_anchored_top() {
        let (zones, placements) = placements_for("backwall");
        let panel_index = placements.iter().position(|p| matches!(p.element, Element::Panel { .. })).unwrap();
        let eyes_index = placements
            .iter()
            .position(|p| matches!(&p.element, Element::Image { source, .. } if source == "eyes.png"))
            .unwrap();
        assert!(eyes_index < panel_index);

        let panel = placements[panel_index].rect;
        let eyes = &placements[eyes_index];
        assert!((eyes.rect.y1 - (panel.y0 + 120.0)).abs() < 1e-9);
        assert_eq!((eyes.rect.x0, eyes.rect.x1), (zones.trim.x0, zones.trim.x1));
        assert!(matches!(
            eyes.element,
            Element::Image { vignette: Some(fade), anchor: ImageAnchor::Top, required: false, .. } if fade == Vignette::EYES
        ));

        // a wide strip keeps its top edge pinned under the panel
        let orchestrator = rendered("backwall", MemorySources::new().with("eyes.png", png(200, 50)), 10);
        let drawn = orchestrator
            .canvas()
            .unwrap()
            .commands()
            .iter()
            .find_map(|c| match c {
                crate::canvas::DrawCommand::Image { target, role: ImageRole::Content, .. } => Some(*target),
                _ => None,
            })
            .unwrap();
        assert!((drawn.y1 - eyes.rect.y1).abs() < 1e-9);
        assert!((drawn.width() - zones.trim.width()).abs() < 1e-9);
    }

    #[test]
    fn test_anchor_top_keeps_top_edge() {
        let rect = ZoneRect::from_corners(0.0, 0.0, 100.0, 100.0);
        let top = ImageAnchor::Top.place(rect, 4.0);
        assert_eq!((top.y0, top.y1), (75.0, 100.0));
        let center = ImageAnchor::Center.place(rect, 4.0);
        assert_eq!((center.y0, center.y1), (37.5, 62.5));
    }
}
