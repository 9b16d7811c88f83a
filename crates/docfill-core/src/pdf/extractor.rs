//! PDF text and page-image extraction using lopdf and pdf-extract.
//!
//! Pages are rasterized through pdfium when the `pdfium` feature is on and
//! the library can be bound. Otherwise the page is rebuilt from its
//! embedded images, placed where the content stream draws them.

use std::collections::HashMap;
#[cfg(feature = "pdfium")]
use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::{PdfProcessor, Result};
use crate::error::PdfError;
use crate::models::config::PdfConfig;

/// US Letter, the page size PDF readers assume without a MediaBox.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Largest side of a composed page raster.
const MAX_CANVAS: f64 = 10_000.0;

/// Largest embedded image we are willing to decode.
const MAX_IMAGE_PIXELS: u64 = 1 << 28;

/// PDF content extractor using lopdf.
pub struct PdfExtractor {
    document: Option<Document>,
    raw_data: Vec<u8>,
    #[cfg(feature = "pdfium")]
    render_dpi: u32,
    #[cfg(feature = "pdfium")]
    pdfium_library: Option<PathBuf>,
}

impl PdfExtractor {
    /// Create a new PDF extractor.
    pub fn new() -> Self {
        Self::from_config(&PdfConfig::default())
    }

    /// Extractor rendering pages the way `config` asks.
    pub fn from_config(config: &PdfConfig) -> Self {
        #[cfg(not(feature = "pdfium"))]
        if let Some(dir) = &config.pdfium_library {
            warn!(
                "Built without pdfium support, ignoring library at {}",
                dir.display()
            );
        }

        Self {
            document: None,
            raw_data: Vec::new(),
            #[cfg(feature = "pdfium")]
            render_dpi: config.render_dpi.max(1),
            #[cfg(feature = "pdfium")]
            pdfium_library: config.pdfium_library.clone(),
        }
    }

    fn document(&self) -> Result<&Document> {
        self.document
            .as_ref()
            .ok_or(PdfError::Parse("No document loaded".to_string()))
    }

    fn page_id(&self, page: u32) -> Result<ObjectId> {
        self.document()?
            .get_pages()
            .get(&page)
            .copied()
            .ok_or(PdfError::InvalidPage(page))
    }

    #[cfg(feature = "pdfium")]
    fn render_with_pdfium(&self, page: u32) -> Result<DynamicImage> {
        use pdfium_render::prelude::*;

        let render_err = |e: PdfiumError| PdfError::Render(e.to_string());
        let bindings = match &self.pdfium_library {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
                .or_else(|_| Pdfium::bind_to_system_library()),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(render_err)?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium
            .load_pdf_from_byte_slice(&self.raw_data, None)
            .map_err(render_err)?;
        let index = page
            .checked_sub(1)
            .and_then(|i| PdfPageIndex::try_from(i).ok())
            .ok_or(PdfError::InvalidPage(page))?;
        let pdf_page = document.pages().get(index).map_err(render_err)?;

        let points = f64::from(pdf_page.width().value);
        let target_width = (points / 72.0 * f64::from(self.render_dpi))
            .round()
            .clamp(1.0, MAX_CANVAS) as i32;
        let bitmap = pdf_page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(target_width)
                    .set_maximum_height(MAX_CANVAS as i32),
            )
            .map_err(render_err)?;

        let width = u32::try_from(bitmap.width()).unwrap_or(0);
        let height = u32::try_from(bitmap.height()).unwrap_or(0);
        let raster = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes().to_vec())
            .ok_or_else(|| PdfError::Render("bitmap size does not match its data".to_string()))?;

        debug!("pdfium rendered page {} at {}x{}", page, width, height);
        Ok(DynamicImage::ImageRgba8(raster))
    }

    /// Page raster rebuilt from the images its content stream draws.
    fn composite_page(&self, page: u32) -> Result<DynamicImage> {
        let doc = self.document()?;
        let page_id = self.page_id(page)?;

        let images = self.page_images(doc, page_id);
        if images.is_empty() {
            return Err(PdfError::NoPageImage(page));
        }

        let placed = image_placements(doc, page_id, &images);
        if placed.is_empty() {
            debug!("Page {} draws no images directly, using the largest one", page);
            return images
                .into_values()
                .max_by_key(|img| u64::from(img.width()) * u64::from(img.height()))
                .ok_or(PdfError::NoPageImage(page));
        }

        debug!("Composing page {} from {} images", page, placed.len());
        compose(media_box(doc, page_id), &placed).ok_or(PdfError::NoPageImage(page))
    }

    /// Decodable images in a page's XObject resources, by resource name.
    fn page_images(&self, doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, DynamicImage> {
        let mut images = HashMap::new();
        if let Some(resources) = self.get_page_resources(doc, page_id) {
            if let Ok(xobjects) = resources.get(b"XObject") {
                if let Ok((_, Object::Dictionary(xobj_dict))) = doc.dereference(xobjects) {
                    for (name, obj_ref) in xobj_dict.iter() {
                        if let Ok((_, obj)) = doc.dereference(obj_ref) {
                            if let Some(img) = self.try_extract_image_from_object(doc, obj) {
                                images.insert(name.clone(), img);
                            }
                        }
                    }
                }
            }
        }

        debug!("Extracted {} images from page object {:?}", images.len(), page_id);
        images
    }

    fn try_extract_image_from_object(&self, doc: &Document, obj: &Object) -> Option<DynamicImage> {
        let Object::Stream(stream) = obj else {
            return None;
        };
        let dict = &stream.dict;

        let subtype = dict.get(b"Subtype").ok()?;
        if subtype.as_name().ok()? != b"Image" {
            return None;
        }

        let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
        let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;

        trace!("Found image object: {}x{}", width, height);

        if let Ok(filter) = dict.get(b"Filter") {
            let filter_name = match filter {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) if !arr.is_empty() => arr.first().and_then(|o| o.as_name().ok()),
                _ => None,
            };

            match filter_name {
                Some(b"DCTDecode") => {
                    // Scanners almost always embed JPEG; the raw stream is the file
                    return image::load_from_memory_with_format(
                        &stream.content,
                        image::ImageFormat::Jpeg,
                    )
                    .ok();
                }
                Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                    trace!("Unsupported image filter {:?}", filter_name.map(String::from_utf8_lossy));
                    return None;
                }
                _ => {}
            }
        }

        let data = match stream.decompressed_content() {
            Ok(d) => d,
            Err(_) => stream.content.clone(),
        };

        let mask = dict
            .get(b"ImageMask")
            .ok()
            .and_then(|o| o.as_bool().ok())
            .unwrap_or(false);
        let (color_space, bits) = if mask {
            (ColorSpace::Gray, 1)
        } else {
            let color_space = match dict.get(b"ColorSpace") {
                Ok(obj) => ColorSpace::resolve(doc, obj)?,
                Err(_) => ColorSpace::Rgb,
            };
            let bits = dict
                .get(b"BitsPerComponent")
                .ok()
                .and_then(|o| o.as_i64().ok())
                .and_then(|b| u8::try_from(b).ok())
                .unwrap_or(8);
            (color_space, bits)
        };

        // A reversed Decode array such as [1 0] swaps dark and light
        let inverted = match dict.get(b"Decode") {
            Ok(Object::Array(range)) => match (range.first(), range.get(1)) {
                (Some(lo), Some(hi)) => number(lo).zip(number(hi)).is_some_and(|(lo, hi)| lo > hi),
                _ => false,
            },
            _ => false,
        };

        create_image_from_raw(&data, width, height, &color_space, bits, inverted)
    }

    /// Get resources dictionary for a page, handling inheritance
    fn get_page_resources(&self, doc: &Document, node_id: ObjectId) -> Option<Dictionary> {
        let node = doc.get_object(node_id).ok()?;
        let Object::Dictionary(dict) = node else {
            return None;
        };

        if let Ok(resources) = dict.get(b"Resources") {
            if let Ok((_, Object::Dictionary(res_dict))) = doc.dereference(resources) {
                return Some(res_dict.clone());
            }
        }

        match dict.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => self.get_page_resources(doc, *parent_id),
            _ => None,
        }
    }
}

/// Colour model of raw image samples.
#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorSpace>, palette: Vec<u8> },
}

impl ColorSpace {
    fn resolve(doc: &Document, obj: &Object) -> Option<Self> {
        match obj {
            Object::Name(name) => Self::from_name(name),
            Object::Reference(id) => Self::resolve(doc, doc.get_object(*id).ok()?),
            Object::Array(parts) => {
                let family = parts.first()?.as_name().ok()?;
                match family {
                    b"ICCBased" => {
                        let (_, profile) = doc.dereference(parts.get(1)?).ok()?;
                        let Object::Stream(profile) = profile else {
                            return None;
                        };
                        match profile.dict.get(b"N").ok()?.as_i64().ok()? {
                            1 => Some(Self::Gray),
                            3 => Some(Self::Rgb),
                            4 => Some(Self::Cmyk),
                            _ => None,
                        }
                    }
                    b"Indexed" | b"I" => {
                        let base = Self::resolve(doc, parts.get(1)?)?;
                        let palette = match doc.dereference(parts.get(3)?).ok()?.1 {
                            Object::String(bytes, _) => bytes.clone(),
                            Object::Stream(stream) => stream
                                .decompressed_content()
                                .unwrap_or_else(|_| stream.content.clone()),
                            _ => return None,
                        };
                        Some(Self::Indexed {
                            base: Box::new(base),
                            palette,
                        })
                    }
                    other => Self::from_name(other),
                }
            }
            _ => None,
        }
    }

    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"DeviceGray" | b"CalGray" | b"G" => Some(Self::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(Self::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(Self::Cmyk),
            _ => {
                trace!("Unsupported colour space {:?}", String::from_utf8_lossy(name));
                None
            }
        }
    }

    fn components(&self) -> usize {
        match self {
            Self::Gray | Self::Indexed { .. } => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    /// RGBA of one pixel from components already scaled to 0..=255.
    fn to_rgba(&self, c: &[u8]) -> [u8; 4] {
        match self {
            Self::Gray => [c[0], c[0], c[0], 255],
            Self::Rgb => [c[0], c[1], c[2], 255],
            Self::Cmyk => {
                let ink = |v: u8| ((255 - u16::from(v)) * (255 - u16::from(c[3])) / 255) as u8;
                [ink(c[0]), ink(c[1]), ink(c[2]), 255]
            }
            Self::Indexed { base, palette } => {
                let n = base.components();
                let at = usize::from(c[0]) * n;
                match palette.get(at..at + n) {
                    Some(entry) => base.to_rgba(entry),
                    None => [0, 0, 0, 255],
                }
            }
        }
    }
}

fn create_image_from_raw(
    data: &[u8],
    width: u32,
    height: u32,
    color_space: &ColorSpace,
    bits_per_component: u8,
    inverted: bool,
) -> Option<DynamicImage> {
    if !matches!(bits_per_component, 1 | 2 | 4 | 8 | 16) {
        trace!("Unsupported bits per component: {}", bits_per_component);
        return None;
    }

    let pixels = u64::from(width).checked_mul(u64::from(height))?;
    if pixels == 0 || pixels > MAX_IMAGE_PIXELS {
        trace!("Refusing image of {}x{}", width, height);
        return None;
    }

    let components = color_space.components();
    let bits = usize::from(bits_per_component);
    let row_samples = usize::try_from(width).ok()?.checked_mul(components)?;
    let row_bytes = row_samples.checked_mul(bits)?.div_ceil(8);
    let needed = row_bytes.checked_mul(usize::try_from(height).ok()?)?;
    if data.len() < needed {
        trace!(
            "Image data too short: {} bytes for {}x{}, need {}",
            data.len(),
            width,
            height,
            needed
        );
        return None;
    }

    let indexed = matches!(color_space, ColorSpace::Indexed { .. });
    let max = (1u32 << bits_per_component.min(8)) - 1;
    let mut rgba = Vec::with_capacity(usize::try_from(pixels.checked_mul(4)?).ok()?);
    let mut pixel = [0u8; 4];
    for row in data[..needed].chunks_exact(row_bytes) {
        for x in 0..row_samples / components {
            for (i, slot) in pixel.iter_mut().take(components).enumerate() {
                let raw = sample(row, x * components + i, bits_per_component);
                let mut value = if indexed {
                    raw
                } else {
                    (u32::from(raw) * 255 / max) as u8
                };
                if inverted && !indexed {
                    value = 255 - value;
                }
                *slot = value;
            }
            rgba.extend_from_slice(&color_space.to_rgba(&pixel[..components]));
        }
    }

    ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba).map(DynamicImage::ImageRgba8)
}

/// Sample `index` of a packed row; 16-bit samples keep their high byte.
fn sample(row: &[u8], index: usize, bits: u8) -> u8 {
    match bits {
        8 => row[index],
        16 => row[index * 2],
        _ => {
            let bits = usize::from(bits);
            let offset = index * bits;
            let shift = 8 - bits - offset % 8;
            (row[offset / 8] >> shift) & ((1u8 << bits) - 1)
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Affine transform `[a b c d e f]` as PDF writes it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Self = Self([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() != 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, operand) in m.iter_mut().zip(operands) {
            *slot = number(operand)?;
        }
        Some(Self(m))
    }

    /// `self` applied first, then `outer`.
    fn then(&self, outer: &Self) -> Self {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = outer.0;
        Self([
            a * oa + b * oc,
            a * ob + b * od,
            c * oa + d * oc,
            c * ob + d * od,
            e * oa + f * oc + oe,
            e * ob + f * od + of,
        ])
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    /// Bounds `[x0 y0 x1 y1]` of the unit square an image is drawn into.
    fn image_bounds(&self) -> [f64; 4] {
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].map(|(x, y)| self.apply(x, y));
        let mut bounds = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
        for (x, y) in corners {
            bounds[0] = bounds[0].min(x);
            bounds[1] = bounds[1].min(y);
            bounds[2] = bounds[2].max(x);
            bounds[3] = bounds[3].max(y);
        }
        bounds
    }
}

/// An image as drawn on the page: mirrored as the transform asks and
/// placed at `bounds` in page space.
struct Placement<'a> {
    image: &'a DynamicImage,
    bounds: [f64; 4],
    flip_x: bool,
    flip_y: bool,
}

/// Walk the page content stream tracking the transform, recording every
/// `Do` of a known image.
fn image_placements<'a>(
    doc: &Document,
    page_id: ObjectId,
    images: &'a HashMap<Vec<u8>, DynamicImage>,
) -> Vec<Placement<'a>> {
    let content = match doc.get_and_decode_page_content(page_id) {
        Ok(content) => content,
        Err(e) => {
            debug!("Could not decode page content: {}", e);
            return Vec::new();
        }
    };

    let mut ctm = Matrix::IDENTITY;
    let mut saved = Vec::new();
    let mut placed = Vec::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "q" => saved.push(ctm),
            "Q" => ctm = saved.pop().unwrap_or(ctm),
            "cm" => match Matrix::from_operands(&op.operands) {
                Some(m) => ctm = m.then(&ctm),
                None => trace!("Ignoring malformed cm operands"),
            },
            "Do" => {
                let image = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .and_then(|name| images.get(name));
                if let Some(image) = image {
                    let [a, _, _, d, _, _] = ctm.0;
                    placed.push(Placement {
                        image,
                        bounds: ctm.image_bounds(),
                        flip_x: a < 0.0,
                        flip_y: d < 0.0,
                    });
                }
            }
            _ => {}
        }
    }
    placed
}

/// Page box `[x0 y0 x1 y1]`, inherited from the page tree when the page
/// has none.
fn media_box(doc: &Document, node_id: ObjectId) -> [f64; 4] {
    let Ok(Object::Dictionary(dict)) = doc.get_object(node_id) else {
        return DEFAULT_MEDIA_BOX;
    };

    if let Ok((_, Object::Array(values))) = dict.get(b"MediaBox").and_then(|o| doc.dereference(o)) {
        let values: Vec<f64> = values.iter().filter_map(number).collect();
        if let [x0, y0, x1, y1] = values[..] {
            return [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
        }
    }

    match dict.get(b"Parent") {
        Ok(Object::Reference(parent_id)) => media_box(doc, *parent_id),
        _ => DEFAULT_MEDIA_BOX,
    }
}

/// Draw placements on a white page at the resolution of the sharpest
/// image.
fn compose(page_box: [f64; 4], placed: &[Placement<'_>]) -> Option<DynamicImage> {
    let [px0, py0, px1, py1] = page_box;
    let (page_w, page_h) = (px1 - px0, py1 - py0);
    if page_w <= 0.0 || page_h <= 0.0 {
        return None;
    }

    let scale = placed
        .iter()
        .filter_map(|p| {
            let w = p.bounds[2] - p.bounds[0];
            let h = p.bounds[3] - p.bounds[1];
            (w > 0.0 && h > 0.0).then(|| {
                (f64::from(p.image.width()) / w).max(f64::from(p.image.height()) / h)
            })
        })
        .fold(0.0f64, f64::max)
        .min(MAX_CANVAS / page_w.max(page_h));
    if scale <= 0.0 {
        return None;
    }

    let width = (page_w * scale).round().max(1.0) as u32;
    let height = (page_h * scale).round().max(1.0) as u32;
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    for p in placed {
        let [x0, y0, x1, y1] = p.bounds;
        let w = ((x1 - x0) * scale).round().max(1.0) as u32;
        let h = ((y1 - y0) * scale).round().max(1.0) as u32;

        let mut tile = p.image.to_rgba8();
        if (tile.width(), tile.height()) != (w, h) {
            tile = imageops::resize(&tile, w, h, FilterType::Triangle);
        }
        if p.flip_x {
            imageops::flip_horizontal_in_place(&mut tile);
        }
        if p.flip_y {
            imageops::flip_vertical_in_place(&mut tile);
        }

        // Page space grows upwards, rasters grow downwards
        let left = ((x0 - px0) * scale).round() as i64;
        let top = ((py1 - y1) * scale).round() as i64;
        imageops::overlay(&mut canvas, &tile, left, top);
    }

    Some(DynamicImage::ImageRgba8(canvas))
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfProcessor for PdfExtractor {
    fn load(&mut self, data: &[u8]) -> Result<()> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        // Handle PDFs with empty password encryption
        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            // pdf-extract needs the decrypted bytes
            let mut decrypted_data = Vec::new();
            doc.save_to(&mut decrypted_data)
                .map_err(|e| PdfError::Parse(format!("Failed to save decrypted PDF: {}", e)))?;
            self.raw_data = decrypted_data;
        } else {
            self.raw_data = data.to_vec();
        }

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages", page_count);
        self.document = Some(doc);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.document
            .as_ref()
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    fn extract_page_texts(&self) -> Result<Vec<String>> {
        self.document()?;
        let pages = pdf_extract::extract_text_from_mem_by_pages(&self.raw_data)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))?;
        debug!("Extracted text layer from {} pages", pages.len());
        Ok(pages)
    }

    fn render_page(&self, page: u32) -> Result<DynamicImage> {
        self.page_id(page)?;

        #[cfg(feature = "pdfium")]
        match self.render_with_pdfium(page) {
            Ok(image) => return Ok(image),
            Err(e) => warn!("pdfium could not render page {}, composing embedded images: {}", page, e),
        }

        self.composite_page(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    fn gray_strip(value: u8) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![value; 8],
        )
    }

    fn place(name: &str, matrix: [i64; 6]) -> Vec<Operation> {
        vec![
            Operation::new("q", vec![]),
            Operation::new("cm", matrix.iter().map(|&v| Object::Integer(v)).collect()),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]
    }

    /// One 4x4 pt page showing the strips `Im1` (gray 10) and `Im2`
    /// (gray 200) through `operations`.
    fn two_strip_pdf(operations: Vec<Operation>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let top = doc.add_object(gray_strip(10));
        let bottom = doc.add_object(gray_strip(200));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 4.into(), 4.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => top, "Im2" => bottom },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_pdf_extractor_new() {
        let extractor = PdfExtractor::new();
        assert!(extractor.document.is_none());
        assert_eq!(extractor.page_count(), 0);
        assert!(extractor.extract_page_texts().is_err());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut extractor = PdfExtractor::new();
        let err = extractor.load(b"not a pdf").unwrap_err();
        assert!(matches!(err, PdfError::Parse(_)));
    }

    #[test]
    fn test_page_from_two_strips() {
        let mut operations = place("Im1", [4, 0, 0, 2, 0, 2]);
        operations.extend(place("Im2", [4, 0, 0, 2, 0, 0]));

        let mut extractor = PdfExtractor::new();
        extractor.load(&two_strip_pdf(operations)).unwrap();
        let page = extractor.composite_page(1).unwrap().to_luma8();

        assert_eq!(page.dimensions(), (4, 4));
        for x in 0..4 {
            assert_eq!(page.get_pixel(x, 0)[0], 10);
            assert_eq!(page.get_pixel(x, 1)[0], 10);
            assert_eq!(page.get_pixel(x, 2)[0], 200);
            assert_eq!(page.get_pixel(x, 3)[0], 200);
        }
    }

    #[test]
    fn test_undrawn_images_fall_back_to_largest() {
        let mut extractor = PdfExtractor::new();
        extractor.load(&two_strip_pdf(Vec::new())).unwrap();
        let page = extractor.composite_page(1).unwrap();
        assert_eq!((page.width(), page.height()), (4, 2));
        assert!(matches!(
            extractor.render_page(2).unwrap_err(),
            PdfError::InvalidPage(2)
        ));
    }

    #[test]
    fn test_matrix_concatenation() {
        let scale = Matrix([2.0, 0.0, 0.0, 3.0, 0.0, 0.0]);
        let shift = Matrix([1.0, 0.0, 0.0, 1.0, 10.0, 20.0]);
        // cm scale inside a shifted state
        assert_eq!(scale.then(&shift).image_bounds(), [10.0, 20.0, 12.0, 23.0]);
        let flipped = Matrix([1.0, 0.0, 0.0, -1.0, 0.0, 5.0]);
        assert_eq!(flipped.image_bounds(), [0.0, 4.0, 1.0, 5.0]);
    }

    #[test]
    fn test_raw_gray_image() {
        let img = create_image_from_raw(&[0, 128, 255, 64], 2, 2, &ColorSpace::Gray, 8, false)
            .unwrap();
        assert_eq!((img.width(), img.height()), (2, 2));
        assert!(create_image_from_raw(&[0; 3], 2, 2, &ColorSpace::Gray, 8, false).is_none());
        assert!(create_image_from_raw(&[0; 4], 2, 2, &ColorSpace::Gray, 3, false).is_none());
    }

    #[test]
    fn test_bilevel_rows_are_byte_aligned() {
        // 3 pixels per row: 101 then 010, each row padded to a byte
        let data = [0b1010_0000, 0b0100_0000];
        let img = create_image_from_raw(&data, 3, 2, &ColorSpace::Gray, 1, false)
            .unwrap()
            .to_luma8();
        assert_eq!(img.get_pixel(0, 0)[0], 255);
        assert_eq!(img.get_pixel(1, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 1)[0], 255);

        let inverted = create_image_from_raw(&data, 3, 2, &ColorSpace::Gray, 1, true)
            .unwrap()
            .to_luma8();
        assert_eq!(inverted.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_cmyk_and_indexed_samples() {
        let img = create_image_from_raw(&[0, 0, 0, 0, 0, 255, 255, 0], 2, 1, &ColorSpace::Cmyk, 8, false)
            .unwrap()
            .to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0, 255]);

        let palette = ColorSpace::Indexed {
            base: Box::new(ColorSpace::Rgb),
            palette: vec![0, 0, 255, 0, 128, 0],
        };
        let img = create_image_from_raw(&[1, 0, 7], 3, 1, &palette, 8, false)
            .unwrap()
            .to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 128, 0, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(2, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_huge_dimensions_are_refused() {
        assert!(create_image_from_raw(&[0; 16], u32::MAX, u32::MAX, &ColorSpace::Rgb, 8, false).is_none());
        assert!(create_image_from_raw(&[0; 16], 70_000, 70_000, &ColorSpace::Gray, 8, false).is_none());
        assert!(create_image_from_raw(&[], 0, 5, &ColorSpace::Gray, 8, false).is_none());
    }
}
