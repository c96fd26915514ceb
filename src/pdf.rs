//! Deterministic single-page PDF 1.4 output on top of `lopdf`.
//!
//! Raw image XObjects are deduplicated by raster digest, computed once per
//! shared raster. No dates appear, and the document ID is derived from the
//! page content, so identical input yields identical bytes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use sha2::{Digest, Sha256};

use crate::assets::{PixelSpace, RasterImage};
use crate::canvas::{CanvasAdapter, DrawCommand, GuideKind, PtRect};
use crate::color::CmykColor;
use crate::print::FinalizationMode;

const PRODUCER: &str = concat!("exhibitprint-core ", env!("CARGO_PKG_VERSION"));

/// Page coordinate rounded to a thousandth of a point.
fn real(v: f64) -> Object {
    let rounded = (v * 1000.0).round() / 1000.0;
    Object::Real(if rounded == 0.0 { 0.0 } else { rounded as _ })
}

fn op(operator: &str, operands: Vec<Object>) -> Operation {
    Operation::new(operator, operands)
}

fn rect_op(page: &PtRect) -> Operation {
    op("re", vec![real(page.x), real(page.y), real(page.width), real(page.height)])
}

fn pt_box(x0: f64, y0: f64, x1: f64, y1: f64) -> Object {
    Object::Array(vec![real(x0), real(y0), real(x1), real(y1)])
}

/// Distinct rasters of a canvas in first-use order.
#[derive(Debug, Default)]
struct ImageTable {
    unique: Vec<Arc<RasterImage>>,
    by_raster: HashMap<*const RasterImage, usize>,
    digests: Vec<String>,
}

impl ImageTable {
    /// Rasters sharing an allocation are hashed once. Distinct allocations
    /// with equal pixels share one XObject.
    fn collect(commands: &[DrawCommand]) -> Self {
        let mut table = ImageTable::default();
        let mut by_digest: BTreeMap<String, usize> = BTreeMap::new();
        for command in commands {
            let DrawCommand::Image { raster, .. } = command else {
                continue;
            };
            let ptr = Arc::as_ptr(raster);
            if table.by_raster.contains_key(&ptr) {
                continue;
            }
            let digest = raster.checksum();
            let index = match by_digest.get(&digest) {
                Some(&index) => index,
                None => {
                    table.unique.push(raster.clone());
                    table.digests.push(digest.clone());
                    by_digest.insert(digest, table.unique.len() - 1);
                    table.unique.len() - 1
                }
            };
            table.by_raster.insert(ptr, index);
        }
        table
    }

    fn name(&self, raster: &Arc<RasterImage>) -> Option<String> {
        self.by_raster.get(&Arc::as_ptr(raster)).map(|i| format!("Im{i}"))
    }

    /// Number of digests computed while collecting.
    fn hashed(&self) -> usize {
        self.by_raster.len()
    }
}

/// Serializes a rendered canvas.
pub struct PdfWriter<'a> {
    canvas: &'a CanvasAdapter,
    mode: FinalizationMode,
}

impl<'a> PdfWriter<'a> {
    pub fn new(canvas: &'a CanvasAdapter, mode: FinalizationMode) -> Self {
        Self { canvas, mode }
    }

    fn color_op(&self, color: &CmykColor, stroke: bool) -> Operation {
        match self.mode {
            FinalizationMode::DeviceCmyk => {
                let operands = color.channels().iter().map(|&v| real(v)).collect();
                op(if stroke { "K" } else { "k" }, operands)
            }
            FinalizationMode::RgbForPrinterConversion => {
                let operands = color.to_rgb().iter().map(|&v| real(v)).collect();
                op(if stroke { "RG" } else { "rg" }, operands)
            }
        }
    }

    fn content(&self, images: &ImageTable) -> Vec<Operation> {
        let mut ops = vec![];
        for command in self.canvas.commands() {
            match command {
                DrawCommand::Rect { page, fill, .. } => {
                    ops.push(self.color_op(fill, false));
                    ops.push(rect_op(page));
                    ops.push(op("f", vec![]));
                }
                DrawCommand::Image { page, raster, .. } => {
                    let Some(name) = images.name(raster) else {
                        continue;
                    };
                    ops.push(op("q", vec![]));
                    ops.push(op(
                        "cm",
                        vec![real(page.width), real(0.0), real(0.0), real(page.height), real(page.x), real(page.y)],
                    ));
                    ops.push(op("Do", vec![Object::Name(name.into_bytes())]));
                    ops.push(op("Q", vec![]));
                }
                DrawCommand::Text { page, lines, style, metrics, .. } => {
                    let properties = dictionary! {
                        "Font" => Object::Name(style.font.as_bytes().to_vec()),
                        "Size" => real(style.size_pt),
                        "Text" => Object::string_literal(lines.join(" / ")),
                    };
                    ops.push(op("BDC", vec![Object::Name(b"Placeholder".to_vec()), Object::Dictionary(properties)]));
                    ops.push(op("q", vec![]));
                    ops.push(op("w", vec![real(0.5)]));
                    ops.push(self.color_op(&style.color, true));
                    ops.push(rect_op(page));
                    ops.push(op("S", vec![]));
                    for i in 0..lines.len() {
                        let y = metrics.first_baseline_pt - i as f64 * metrics.line_height_pt * 1.6;
                        ops.push(op("m", vec![real(page.x), real(y)]));
                        ops.push(op("l", vec![real(page.x + page.width), real(y)]));
                        ops.push(op("S", vec![]));
                    }
                    ops.push(op("Q", vec![]));
                    ops.push(op("EMC", vec![]));
                }
                DrawCommand::Guide { page, kind, .. } => {
                    let color = match kind {
                        GuideKind::Trim => CmykColor::KEY_BLACK,
                        GuideKind::SafeArea => CmykColor::CYAN,
                        GuideKind::NoContent => CmykColor::MAGENTA,
                    };
                    ops.push(op("q", vec![]));
                    ops.push(op("w", vec![real(1.0)]));
                    ops.push(op("d", vec![Object::Array(vec![real(6.0), real(4.0)]), real(0.0)]));
                    ops.push(self.color_op(&color, true));
                    ops.push(rect_op(page));
                    ops.push(op("S", vec![]));
                    ops.push(op("Q", vec![]));
                }
                DrawCommand::CropMarks { lines } => {
                    ops.push(op("q", vec![]));
                    ops.push(op("w", vec![real(0.25)]));
                    ops.push(self.color_op(&CmykColor::KEY_BLACK, true));
                    for [x0, y0, x1, y1] in lines {
                        ops.push(op("m", vec![real(*x0), real(*y0)]));
                        ops.push(op("l", vec![real(*x1), real(*y1)]));
                        ops.push(op("S", vec![]));
                    }
                    ops.push(op("Q", vec![]));
                }
            }
        }
        ops
    }

    fn image_stream(&self, raster: &RasterImage) -> Stream {
        let (space, data) = match (self.mode, raster.space()) {
            (_, PixelSpace::Gray) => ("DeviceGray", raster.data().to_vec()),
            (FinalizationMode::DeviceCmyk, PixelSpace::Cmyk) => ("DeviceCMYK", raster.data().to_vec()),
            (FinalizationMode::DeviceCmyk, PixelSpace::Rgb) => ("DeviceRGB", raster.data().to_vec()),
            (FinalizationMode::RgbForPrinterConversion, _) => ("DeviceRGB", raster.to_rgb8()),
        };
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(raster.width()),
            "Height" => i64::from(raster.height()),
            "ColorSpace" => space,
            "BitsPerComponent" => 8,
        };
        Stream::new(dict, data)
    }

    pub fn write(&self) -> Result<Vec<u8>, lopdf::Error> {
        let images = ImageTable::collect(self.canvas.commands());
        let content = Content { operations: self.content(&images) }.encode()?;
        tracing::debug!(images = images.unique.len(), hashed = images.hashed(), "pdf images collected");

        let mut id = Sha256::new();
        id.update(&content);
        for digest in &images.digests {
            id.update(digest.as_bytes());
        }
        let id = id.finalize()[..16].to_vec();

        let mut doc = Document::with_version("1.4");
        let pages_id: ObjectId = doc.new_object_id();

        let mut xobjects = Dictionary::new();
        for (i, raster) in images.unique.iter().enumerate() {
            let image_id = doc.add_object(self.image_stream(raster));
            xobjects.set(format!("Im{i}"), image_id);
        }
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let (page_w, page_h) = self.canvas.page_size_pt();
        let trim = self.canvas.to_page(&self.canvas.trim_rect());
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => pt_box(0.0, 0.0, page_w, page_h),
            "BleedBox" => pt_box(0.0, 0.0, page_w, page_h),
            "TrimBox" => pt_box(trim.x, trim.y, trim.x + trim.width, trim.y + trim.height),
            "Resources" => dictionary! { "XObject" => xobjects },
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Producer" => Object::string_literal(PRODUCER),
        });

        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.trailer.set(
            "ID",
            Object::Array(vec![
                Object::String(id.clone(), StringFormat::Hexadecimal),
                Object::String(id, StringFormat::Hexadecimal),
            ]),
        );

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }
}
