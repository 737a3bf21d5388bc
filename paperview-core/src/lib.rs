//! Engine-agnostic viewport core: lazy page cache, coordinate transforms,
//! scroll normalization, anchored zoom, and the continuous render traversal.
//!
//! The document-parsing engine and the recorded page content are trait
//! objects injected at construction; nothing in this crate touches a
//! concrete file format or a drawing toolkit.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod geometry;
pub mod viewport;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Page, PageCache, PageSlot};
pub use geometry::{scale_matrix, Matrix, Point, Rect, Rotation, Vec2};
pub use viewport::{DrawCommand, PointerButton, Viewer, MAX_ZOOM, MIN_ZOOM};

/// Ordered (chapter, page) address identifying one page within the document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Location {
    pub chapter: usize,
    pub page: usize,
}

impl Location {
    pub fn new(chapter: usize, page: usize) -> Self {
        Self { chapter, page }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.page)
    }
}

/// The document could not be opened at all. Fatal at startup.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("cannot open document {path}: {reason}")]
    Engine { path: String, reason: String },
    #[error("document has no chapters")]
    EmptyDocument,
}

/// A chapter or page failed to parse during lazy load.
///
/// Page-level failures are recoverable: the cache records them per slot and
/// the traversal paints a placeholder instead of aborting.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Target action of a link annotation on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    GoTo { location: Location },
    Uri { uri: String },
}

/// Link geometry in page-native coordinates, exposed for hit-testing only;
/// interaction semantics belong to the host.
#[derive(Debug, Clone)]
pub struct PageLink {
    pub bounds: Rect,
    pub action: LinkAction,
}

/// Everything the engine produces for one page on first load.
pub struct PageData {
    pub bounds: Rect,
    pub content: Box<dyn PageContent>,
    pub text: String,
    pub links: Vec<PageLink>,
}

/// A recorded, replayable sequence of drawing operations for one page.
/// Recording happens once at load; every redraw replays the recording
/// through a fresh transform instead of re-walking the source document.
pub trait PageContent: Send + Sync {
    fn replay(&self, ctm: Matrix, surface: &mut Surface) -> Result<(), LoadError>;
}

/// The external rendering/parsing engine, reduced to the operations the
/// viewport core consumes. One instance per open document.
pub trait DocumentEngine: Send + Sync {
    /// Fixed after open.
    fn chapter_count(&self) -> usize;

    /// Number of pages in one chapter. Invoked lazily, the first time any
    /// page of the chapter is requested.
    fn chapter_page_count(&self, chapter: usize) -> Result<usize, LoadError>;

    /// Parse one page and record its content. The cache guarantees this runs
    /// at most once per distinct location for the life of the document.
    fn load_page(&self, location: Location) -> Result<PageData, LoadError>;
}

/// Opens documents by path, optionally with an acceleration-cache path that
/// is passed through to the engine untouched.
#[async_trait::async_trait]
pub trait EngineProvider: Send + Sync {
    async fn open(
        &self,
        path: &Path,
        accel: Option<&Path>,
    ) -> Result<Arc<dyn DocumentEngine>, OpenError>;
}

/// Viewport size in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// RGBA8 pixel buffer the traversal paints into. Owned by the caller; the
/// host toolkit presents it.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// Flood the whole buffer with an opaque gray shade.
    pub fn fill(&mut self, shade: u8) {
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk[0] = shade;
            chunk[1] = shade;
            chunk[2] = shade;
            chunk[3] = 0xFF;
        }
    }

    /// Fill `rect` (surface coordinates) with an opaque gray shade, clipped
    /// to the buffer.
    pub fn fill_rect(&mut self, rect: Rect, shade: u8) {
        let x0 = rect.x0.max(0.0) as u32;
        let y0 = rect.y0.max(0.0) as u32;
        let x1 = (rect.x1.max(0.0) as u32).min(self.width);
        let y1 = (rect.y1.max(0.0) as u32).min(self.height);
        for y in y0..y1 {
            let row = y as usize * self.width as usize * 4;
            for x in x0..x1 {
                let idx = row + x as usize * 4;
                self.pixels[idx] = shade;
                self.pixels[idx + 1] = shade;
                self.pixels[idx + 2] = shade;
                self.pixels[idx + 3] = 0xFF;
            }
        }
    }
}

/// Serializable snapshot of the view. Storage is the host's concern; this is
/// the whole persistence surface the core exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewState {
    pub location: Location,
    pub zoom: f32,
    pub rotation: Rotation,
    pub scroll: Vec2,
}
