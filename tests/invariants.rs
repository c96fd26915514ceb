//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use exhibitprint_core::{
    assembler::DocumentAssembler,
    assets::MemorySources,
    cache::AssetCache,
    color::{gradient, rgb8_to_cmyk, CmykColor, ColorManager, Palette},
    geometry::ZoneRect,
    hashing::sha256_hex,
    layout::{AssetContext, DeliverableState, Element, LayoutError, LayoutOrchestrator, Placement},
    BuildOptions, FinalizationMode, GraphicsPipeline, GraphicsSpec, SpecError,
};
use tempfile::tempdir;

fn exhibit() -> GraphicsSpec {
    GraphicsSpec::exhibit_default().unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| image::Rgba([(x * 7) as u8, (y * 5) as u8, 200, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn invariant_document_is_trim_plus_bleed_on_every_side() {
    let spec = exhibit();
    for (name, deliverable) in spec.deliverables() {
        let doc = deliverable.document_size();
        let bleed = deliverable.bleed.all_sides;
        assert!(close(doc.width, deliverable.trim.width + 2.0 * bleed), "{name}");
        assert!(close(doc.height, deliverable.trim.height + 2.0 * bleed), "{name}");
    }

    let backwall = spec.deliverable("backwall").unwrap().document_size();
    assert!(close(backwall.width, 1010.0) && close(backwall.height, 2180.0));
    let counter = spec.deliverable("counter").unwrap().document_size();
    assert!(close(counter.width, 310.0) && close(counter.height, 810.0));
}

#[test]
fn invariant_safe_and_excluded_zones_lie_inside_trim() {
    for (name, deliverable) in exhibit().deliverables() {
        let trim = deliverable.trim_rect();
        assert!(trim.strictly_contains(&deliverable.safe_rect()), "{name}");
        for zone in deliverable.excluded_rects() {
            assert!(trim.contains(&zone), "{name}: {zone}");
        }
    }

    let safe = exhibit().deliverable("backwall").unwrap().safe_rect();
    assert_eq!(safe, ZoneRect::from_corners(50.0, 50.0, 950.0, 2120.0));
}

#[test]
fn invariant_spec_with_safe_area_outside_trim_is_rejected() {
    let json = r#"{
      "counter": {"trim": {"width": 300, "height": 800}, "bleed": {"all_sides": 5}, "safe_inset": 200}
    }"#;
    assert!(matches!(GraphicsSpec::from_json_str(json), Err(SpecError::Invalid(_))));
}

#[test]
fn invariant_concurrent_get_or_create_generates_once() {
    let dir = tempdir().unwrap();
    let cache = AssetCache::open(dir.path()).unwrap();
    let key = sha256_hex(b"invariant scan code");
    let calls = AtomicUsize::new(0);

    let results: Vec<Vec<u8>> = thread::scope(|s| {
        let handles: Vec<_> = (0..12)
            .map(|_| {
                s.spawn(|| {
                    cache
                        .get_or_create(&key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, std::io::Error>(b"payload".to_vec())
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r == b"payload"));
}

#[test]
fn invariant_gradient_endpoints_exact_and_monotonic() {
    let palette = Palette::brand();
    let colors = ColorManager::new(palette);
    let a = colors.resolve("background").unwrap();
    let b = colors.resolve("accent_muted").unwrap();
    let steps = gradient(a, b, 17).unwrap();

    assert_eq!(steps.len(), 17);
    assert_eq!(steps[0], a);
    assert_eq!(steps[16], b);
    for channel in 0..4 {
        let values: Vec<f64> = steps.iter().map(|c| c.channels()[channel]).collect();
        let rising = values.windows(2).all(|w| w[0] <= w[1]);
        let falling = values.windows(2).all(|w| w[0] >= w[1]);
        assert!(rising || falling, "channel {channel} not monotonic: {values:?}");
    }
}

#[test]
fn invariant_rgb_to_cmyk_reference_value() {
    let cmyk = rgb8_to_cmyk(55, 188, 217);
    let [c, m, y, k] = cmyk.channels();
    assert!((c - 0.746).abs() < 1e-3, "c = {c}");
    assert!((m - 0.134).abs() < 1e-3, "m = {m}");
    assert!(y.abs() < 1e-3, "y = {y}");
    assert!((k - 0.149).abs() < 1e-3, "k = {k}");
    assert_eq!(rgb8_to_cmyk(0, 0, 0), CmykColor::KEY_BLACK);
}

#[test]
fn invariant_headline_in_no_text_zone_rejected_before_drawing() {
    let spec = exhibit();
    let headline = Placement::new(
        Element::Headline {
            lines: vec!["AI ROLEPLAY".to_string()],
            color_token: "headline_text".to_string(),
            size_pt: 120.0,
        },
        ZoneRect::from_corners(100.0, 100.0, 200.0, 150.0),
        true,
    );
    let mut orchestrator =
        LayoutOrchestrator::with_placements("backwall", spec.deliverable("backwall").unwrap(), vec![headline]);

    let colors = ColorManager::new(Palette::brand());
    let cache = AssetCache::in_memory();
    let sources = MemorySources::new();
    orchestrator
        .resolve_assets(&AssetContext { colors: &colors, cache: &cache, sources: &sources, dpi: 150 })
        .unwrap();

    let err = orchestrator.render(&colors, false).unwrap_err();
    assert!(matches!(err, LayoutError::Validation(_)));
    assert_eq!(orchestrator.draw_call_count(), 0);
    assert!(orchestrator.canvas().is_none());
    assert_eq!(orchestrator.state(), DeliverableState::Failed);

    let out = tempdir().unwrap();
    let export = orchestrator.export(&DocumentAssembler::new(out.path(), FinalizationMode::DeviceCmyk));
    assert!(matches!(export, Err(LayoutError::InvalidState { .. })));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn invariant_counter_logo_inside_safe_area_draws_one_image() {
    let spec = exhibit();
    let logo = Placement::new(
        Element::Logo { source: "logo.png".to_string(), required: true },
        ZoneRect::from_corners(60.0, 60.0, 240.0, 120.0),
        true,
    );
    let mut orchestrator =
        LayoutOrchestrator::with_placements("counter", spec.deliverable("counter").unwrap(), vec![logo]);

    let colors = ColorManager::new(Palette::brand());
    let cache = AssetCache::in_memory();
    let sources = MemorySources::new().with("logo.png", png(90, 30));
    orchestrator
        .resolve_assets(&AssetContext { colors: &colors, cache: &cache, sources: &sources, dpi: 150 })
        .unwrap();
    orchestrator.render(&colors, false).unwrap();

    assert_eq!(orchestrator.state(), DeliverableState::Rendered);
    assert_eq!(orchestrator.image_draw_count(), 1);
}

#[test]
fn invariant_missing_required_source_fails_deliverable() {
    let spec = exhibit();
    let logo = Placement::new(
        Element::Logo { source: "logo.png".to_string(), required: true },
        ZoneRect::from_corners(60.0, 60.0, 240.0, 120.0),
        true,
    );
    let mut orchestrator =
        LayoutOrchestrator::with_placements("counter", spec.deliverable("counter").unwrap(), vec![logo]);

    let colors = ColorManager::new(Palette::brand());
    let cache = AssetCache::in_memory();
    let sources = MemorySources::new();
    let err = orchestrator
        .resolve_assets(&AssetContext { colors: &colors, cache: &cache, sources: &sources, dpi: 150 })
        .unwrap_err();
    assert!(matches!(err, LayoutError::Render(_)));
    assert_eq!(orchestrator.state(), DeliverableState::Failed);
}

#[test]
fn invariant_rerun_hits_cache_and_produces_byte_identical_artifacts() {
    let cache_dir = tempdir().unwrap();
    let run = || {
        let out = tempdir().unwrap();
        let mut options = BuildOptions::new(out.path(), FinalizationMode::DeviceCmyk);
        options.dpi = 24;
        let sources = MemorySources::new()
            .with("face.png", png(64, 80))
            .with("eyes.png", png(120, 40))
            .with("logo.png", png(90, 30));
        let cache = AssetCache::open(cache_dir.path()).unwrap();
        let pipeline = GraphicsPipeline::new(exhibit(), cache, sources, options).unwrap();

        let report = pipeline.build_all();
        assert_eq!(report.exit_code(), 0, "{:?}", report.deliverables);

        let mut artifacts = vec![];
        for outcome in &report.deliverables {
            let built = outcome.report.as_ref().unwrap();
            artifacts.push((
                built.manifest_hash.clone(),
                std::fs::read(&built.artifacts.pdf).unwrap(),
                std::fs::read(&built.artifacts.proof).unwrap(),
            ));
        }
        (report.cache, artifacts)
    };

    let (cold, first) = run();
    assert!(cold.generations > 0);

    let (warm, second) = run();
    assert_eq!(warm.generations, 0, "{warm:?}");
    assert!(warm.hits > 0);
    assert_eq!(warm.corruptions, 0);

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}
