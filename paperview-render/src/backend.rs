use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use paperview_core::{
    DocumentEngine, EngineProvider, LinkAction, LoadError, Location, Matrix, OpenError,
    PageContent, PageData, PageLink, Rect, Rotation, Surface,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use crate::{decompose_draw_matrix, link_rect_to_page, quantize_scale, rotate_rgba};

pub struct PdfiumEngineFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngineFactory {
    pub fn new() -> Result<Self> {
        let pdfium = bind_pdfium_default()?;
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl EngineProvider for PdfiumEngineFactory {
    async fn open(
        &self,
        path: &Path,
        accel: Option<&Path>,
    ) -> Result<Arc<dyn DocumentEngine>, OpenError> {
        let open_error = |reason: String| OpenError::Engine {
            path: path.display().to_string(),
            reason,
        };
        let absolute = path
            .canonicalize()
            .map_err(|err| open_error(err.to_string()))?;
        if let Some(accel) = accel {
            // pdfium keeps no acceleration cache; accepted and ignored
            debug!(accel = %accel.display(), "acceleration path has no effect with pdfium");
        }
        let shared = Arc::new(SharedDoc {
            document: Mutex::new(None),
            path: absolute,
            pdfium: Arc::clone(&self.pdfium),
        });
        let page_count = shared
            .with_document(|document| Ok(document.pages().len() as usize))
            .map_err(|err| open_error(err.message().to_owned()))?;
        Ok(Arc::new(PdfiumEngine { shared, page_count }))
    }
}

/// One open PDF, shared between the engine and every page's recorded
/// content. Lazily loaded on first use and kept for the document's lifetime.
struct SharedDoc {
    // declared before `pdfium` so the transmuted document drops first
    document: Mutex<Option<PdfDocument<'static>>>,
    path: PathBuf,
    pdfium: Arc<Pdfium>,
}

impl SharedDoc {
    fn with_document<R, F>(&self, f: F) -> Result<R, LoadError>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R, LoadError>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            let document = self
                .pdfium
                .load_pdf_from_file(&self.path, None)
                .map_err(|err| {
                    LoadError::new(format!("cannot open {}: {err}", self.path.display()))
                })?;
            // SAFETY: the PdfDocument borrows the Pdfium bindings behind
            // self.pdfium. It is stored in self.document, which is declared
            // before self.pdfium and therefore dropped first, so the borrow
            // never outlives the bindings.
            let document =
                unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
            *guard = Some(document);
        }
        let document = guard.as_ref().expect("document must be loaded");
        f(document)
    }
}

/// A PDF exposed as a single-chapter document: pdfium has a flat page list,
/// so chapter 0 holds every page.
struct PdfiumEngine {
    shared: Arc<SharedDoc>,
    page_count: usize,
}

impl DocumentEngine for PdfiumEngine {
    fn chapter_count(&self) -> usize {
        1
    }

    fn chapter_page_count(&self, chapter: usize) -> Result<usize, LoadError> {
        if chapter == 0 {
            Ok(self.page_count)
        } else {
            Err(LoadError::new(format!(
                "chapter {chapter} out of range for a flat document"
            )))
        }
    }

    #[instrument(skip(self))]
    fn load_page(&self, location: Location) -> Result<PageData, LoadError> {
        let index = page_index(location)?;
        self.shared.with_document(|document| {
            let page = document.pages().get(index).map_err(|err| {
                LoadError::new(format!("page {location} unavailable: {err}"))
            })?;
            let width = page.width().value;
            let height = page.height().value;
            if width <= 0.0 || height <= 0.0 {
                return Err(LoadError::new(format!(
                    "page {location} has degenerate bounds {width}x{height}"
                )));
            }
            let text = match page.text() {
                Ok(text) => text.all(),
                Err(err) => {
                    warn!(%location, error = %err, "text extraction failed");
                    String::new()
                }
            };
            let links = extract_links(&page, height, location);
            Ok(PageData {
                bounds: Rect::new(0.0, 0.0, width, height),
                content: Box::new(PdfiumPageContent {
                    shared: Arc::clone(&self.shared),
                    page: location.page,
                    location,
                    raster: Mutex::new(None),
                }),
                text,
                links,
            })
        })
    }
}

fn page_index(location: Location) -> Result<PdfPageIndex, LoadError> {
    PdfPageIndex::try_from(location.page)
        .map_err(|_| LoadError::new(format!("page {location} exceeds the supported range")))
}

fn extract_links(page: &PdfPage<'_>, page_height: f32, location: Location) -> Vec<PageLink> {
    let mut out = Vec::new();
    for link in page.links().iter() {
        let rect = match link.rect() {
            Ok(rect) => rect,
            Err(err) => {
                warn!(%location, error = %err, "failed to resolve link rectangle");
                continue;
            }
        };
        let Some(action) = link_action(&link) else {
            continue;
        };
        let bounds = link_rect_to_page(
            page_height,
            rect.left().value,
            rect.top().value,
            rect.right().value,
            rect.bottom().value,
        );
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            continue;
        }
        out.push(PageLink { bounds, action });
    }
    out
}

fn link_action(link: &PdfLink<'_>) -> Option<LinkAction> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                if let Some(local) = action.as_local_destination_action() {
                    if let Ok(destination) = local.destination() {
                        if let Ok(page) = destination.page_index() {
                            return Some(LinkAction::GoTo {
                                location: Location::new(0, page as usize),
                            });
                        }
                    }
                }
            }
            PdfActionType::Uri => {
                if let Some(uri_action) = action.as_uri_action() {
                    if let Ok(uri) = uri_action.uri() {
                        if !uri.is_empty() {
                            return Some(LinkAction::Uri { uri });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(destination) = link.destination() {
        if let Ok(page) = destination.page_index() {
            return Some(LinkAction::GoTo {
                location: Location::new(0, page as usize),
            });
        }
    }

    None
}

/// Recorded content for one page: a handle back into the shared document
/// plus a one-entry raster cache keyed by quantized scale and rotation.
struct PdfiumPageContent {
    shared: Arc<SharedDoc>,
    page: usize,
    location: Location,
    raster: Mutex<Option<RasterEntry>>,
}

struct RasterEntry {
    scale_key: u32,
    rotation: Rotation,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PdfiumPageContent {
    fn rasterize(&self, scale: f32, rotation: Rotation) -> Result<RasterEntry, LoadError> {
        let index = page_index(self.location)?;
        self.shared.with_document(|document| {
            let page = document.pages().get(index).map_err(|err| {
                LoadError::new(format!("page {} unavailable: {err}", self.location))
            })?;
            let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.1));
            let bitmap = page.render_with_config(&config).map_err(|err| {
                LoadError::new(format!("failed to rasterize page {}: {err}", self.location))
            })?;
            let image = bitmap.as_image().to_rgba8();
            let (native_w, native_h) = (image.width(), image.height());
            let (width, height, pixels) =
                rotate_rgba(native_w, native_h, &image.into_raw(), rotation);
            debug!(page = self.page, scale, ?rotation, width, height, "page rasterized");
            Ok(RasterEntry {
                scale_key: quantize_scale(scale),
                rotation,
                width,
                height,
                pixels,
            })
        })
    }
}

impl PageContent for PdfiumPageContent {
    fn replay(&self, ctm: Matrix, surface: &mut Surface) -> Result<(), LoadError> {
        let (rotation, scale) = decompose_draw_matrix(ctm);
        let scale_key = quantize_scale(scale);
        let mut raster = self.raster.lock();
        let hit = matches!(
            raster.as_ref(),
            Some(entry) if entry.scale_key == scale_key && entry.rotation == rotation
        );
        if !hit {
            *raster = Some(self.rasterize(scale_key as f32 / 1000.0, rotation)?);
        }
        if let Some(entry) = raster.as_ref() {
            let (origin_x, origin_y) = blit_origin(rotation, entry.width, entry.height, ctm);
            blit(surface, entry, origin_x, origin_y);
        }
        Ok(())
    }
}

/// Top-left corner of the placed page rectangle in surface coordinates.
/// The matrix translation is the image of page-native (0,0), which under a
/// quarter turn is a different corner of the placed rectangle, so the
/// rotated raster extent is subtracted accordingly.
fn blit_origin(rotation: Rotation, width: u32, height: u32, ctm: Matrix) -> (i32, i32) {
    let (x, y) = match rotation {
        Rotation::Deg0 => (ctm.e, ctm.f),
        Rotation::Deg90 => (ctm.e - width as f32, ctm.f),
        Rotation::Deg180 => (ctm.e - width as f32, ctm.f - height as f32),
        Rotation::Deg270 => (ctm.e, ctm.f - height as f32),
    };
    (x.round() as i32, y.round() as i32)
}

/// Copy a raster onto the surface at an integer origin, clipped on all four
/// sides. Pages are opaque so rows are copied wholesale.
fn blit(surface: &mut Surface, entry: &RasterEntry, origin_x: i32, origin_y: i32) {
    let surface_w = surface.width as i32;
    let surface_h = surface.height as i32;
    for row in 0..entry.height as i32 {
        let dst_y = origin_y + row;
        if dst_y < 0 || dst_y >= surface_h {
            continue;
        }
        let src_x0 = (-origin_x).clamp(0, entry.width as i32);
        let src_x1 = (surface_w - origin_x).clamp(0, entry.width as i32);
        if src_x0 >= src_x1 {
            continue;
        }
        let span = (src_x1 - src_x0) as usize * 4;
        let src = (row as usize * entry.width as usize + src_x0 as usize) * 4;
        let dst = (dst_y as usize * surface.width as usize + (origin_x + src_x0) as usize) * 4;
        surface.pixels[dst..dst + span].copy_from_slice(&entry.pixels[src..src + span]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperview_core::scale_matrix;

    const PAGE_BOUNDS: Rect = Rect {
        x0: 0.0,
        y0: 0.0,
        x1: 600.0,
        y1: 800.0,
    };
    const INK: u8 = 7;

    const ALL_ROTATIONS: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    fn draw_matrix(rotation: Rotation, zoom: f32) -> Matrix {
        Matrix::translation(20.0, 10.0).concat(scale_matrix(zoom, rotation, PAGE_BOUNDS))
    }

    fn solid_raster(frame: Rect, rotation: Rotation) -> RasterEntry {
        let width = frame.width().round() as u32;
        let height = frame.height().round() as u32;
        RasterEntry {
            scale_key: quantize_scale(1.0),
            rotation,
            width,
            height,
            pixels: vec![INK; width as usize * height as usize * 4],
        }
    }

    fn painted_bbox(surface: &Surface) -> Option<(u32, u32, u32, u32)> {
        let mut bbox: Option<(u32, u32, u32, u32)> = None;
        for y in 0..surface.height {
            for x in 0..surface.width {
                let idx = (y as usize * surface.width as usize + x as usize) * 4;
                if surface.pixels[idx] != INK {
                    continue;
                }
                bbox = Some(match bbox {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        bbox
    }

    #[test]
    fn blit_origin_matches_the_placed_frame_corner() {
        for rotation in ALL_ROTATIONS {
            let ctm = draw_matrix(rotation, 1.5);
            let frame = PAGE_BOUNDS.transform(ctm);
            let (origin_x, origin_y) = blit_origin(
                rotation,
                frame.width().round() as u32,
                frame.height().round() as u32,
                ctm,
            );
            assert!(
                (origin_x as f32 - frame.x0).abs() <= 1.0
                    && (origin_y as f32 - frame.y0).abs() <= 1.0,
                "{rotation:?}: origin ({origin_x}, {origin_y}) vs frame {frame:?}"
            );
        }
    }

    #[test]
    fn rotated_raster_lands_inside_the_placed_frame() {
        for rotation in ALL_ROTATIONS {
            let ctm = draw_matrix(rotation, 1.0);
            let frame = PAGE_BOUNDS.transform(ctm);
            let entry = solid_raster(frame, rotation);
            let mut surface = Surface::new(1200, 1200);
            surface.fill(0x00);

            let (origin_x, origin_y) = blit_origin(rotation, entry.width, entry.height, ctm);
            blit(&mut surface, &entry, origin_x, origin_y);

            let center_x = ((frame.x0 + frame.x1) / 2.0) as usize;
            let center_y = ((frame.y0 + frame.y1) / 2.0) as usize;
            let center = (center_y * surface.width as usize + center_x) * 4;
            assert_eq!(
                surface.pixels[center], INK,
                "{rotation:?}: no content at the frame center"
            );

            let (x0, y0, x1, y1) =
                painted_bbox(&surface).unwrap_or_else(|| panic!("{rotation:?}: nothing painted"));
            assert!(
                x0 as f32 >= frame.x0.max(0.0) - 1.0
                    && y0 as f32 >= frame.y0.max(0.0) - 1.0
                    && (x1 as f32) < frame.x1 + 1.0
                    && (y1 as f32) < frame.y1 + 1.0,
                "{rotation:?}: painted ({x0},{y0})..({x1},{y1}) spills out of frame {frame:?}"
            );
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
