//! The viewport state machine: scroll normalization, anchored zoom,
//! centering, and the continuous multi-page render traversal.
//!
//! All mutation of `scroll` and `location` funnels through this type, and
//! every entry point re-establishes the normalization invariant before
//! returning: in the interior of the document `0 <= scroll.y < page height`,
//! with soft boundaries at the first and last page.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::cache::{PageCache, PageSlot};
use crate::geometry::{scale_matrix, Matrix, Point, Rect, Rotation, Vec2};
use crate::{
    DocumentEngine, EngineProvider, Extent, LinkAction, LoadError, Location, OpenError, Surface,
    ViewState,
};

pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 4.0;

/// Vertical gap between consecutive pages, in unscaled page units.
const PAGE_MARGIN: f32 = 20.0;

/// Stand-in bounds for a page that failed to load, so the traversal can keep
/// accumulating height past it. US Letter at 72 dpi.
const FALLBACK_BOUNDS: Rect = Rect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

const BACKGROUND_SHADE: u8 = 0xF0;
const PAGE_SHADE: u8 = 0xFF;
const PLACEHOLDER_SHADE: u8 = 0xC8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
}

/// One page's worth of painting work for the current frame: replay `bounds`
/// through `matrix` onto the surface. Commands are emitted top to bottom.
#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub location: Location,
    pub matrix: Matrix,
    pub bounds: Rect,
    /// The slot is `Failed`; paint a placeholder instead of content.
    pub failed: bool,
}

pub struct Viewer {
    cache: PageCache,
    zoom: f32,
    rotation: Rotation,
    location: Location,
    scroll: Vec2,
    viewport: Extent,
}

impl Viewer {
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Result<Self, OpenError> {
        if engine.chapter_count() == 0 {
            return Err(OpenError::EmptyDocument);
        }
        Ok(Self {
            cache: PageCache::new(engine),
            zoom: 1.0,
            rotation: Rotation::Deg0,
            location: Location::default(),
            scroll: Vec2::default(),
            viewport: Extent::default(),
        })
    }

    /// Open a document through an injected provider.
    #[instrument(skip(provider))]
    pub async fn open<P: EngineProvider>(
        provider: &P,
        path: &Path,
        accel: Option<&Path>,
    ) -> Result<Self, OpenError> {
        let engine = provider.open(path, accel).await?;
        Self::new(engine)
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn scroll(&self) -> Vec2 {
        self.scroll
    }

    pub fn viewport(&self) -> Extent {
        self.viewport
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// New surface size. Horizontal position is re-derived because the
    /// centering pin depends on the viewport width.
    pub fn handle_resize(&mut self, width: u32, height: u32) -> Result<(), LoadError> {
        self.viewport = Extent::new(width, height);
        self.clamp_scroll_x()
    }

    /// Route a scroll gesture: with the zoom modifier held, the vertical
    /// delta becomes a zoom step anchored at the pointer; otherwise both
    /// axes pan the document.
    pub fn handle_scroll(
        &mut self,
        delta_x: f32,
        delta_y: f32,
        zoom_modifier: bool,
        anchor: Option<Point>,
    ) -> Result<(), LoadError> {
        if zoom_modifier {
            let anchor = anchor.unwrap_or_else(|| {
                Point::new(
                    self.viewport.width as f32 / 2.0,
                    self.viewport.height as f32 / 2.0,
                )
            });
            self.zoom_around(delta_y, anchor)
        } else {
            self.scroll_by(delta_x, delta_y)
        }
    }

    /// A middle click re-centers the current page; a left click resolves
    /// link geometry under the pointer, follows in-document targets, and
    /// reports the action so the host can handle external ones.
    pub fn handle_click(
        &mut self,
        point: Point,
        button: PointerButton,
    ) -> Result<Option<LinkAction>, LoadError> {
        match button {
            PointerButton::Middle => {
                self.center_current_page()?;
                Ok(None)
            }
            PointerButton::Left => {
                let action = self.link_at(point)?;
                if let Some(LinkAction::GoTo { location }) = &action {
                    self.goto(*location)?;
                }
                Ok(action)
            }
            PointerButton::Right => Ok(None),
        }
    }

    /// Apply a scroll delta in unscaled page units, then normalize.
    pub fn scroll_by(&mut self, delta_x: f32, delta_y: f32) -> Result<(), LoadError> {
        self.scroll.x += delta_x;
        self.scroll.y += delta_y;
        self.normalize_scroll()?;
        self.clamp_scroll_x()
    }

    /// Adjust zoom by `delta` while keeping the document point under
    /// `anchor` fixed on the surface.
    ///
    /// The old scroll is absorbed into the anchor computation, so the new
    /// scroll replaces it outright: it is the screen-space drift of the
    /// anchor mapped back into page units through the new inverse transform.
    #[instrument(skip(self))]
    pub fn zoom_around(&mut self, delta: f32, anchor: Point) -> Result<(), LoadError> {
        let new_zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
        if (new_zoom - self.zoom).abs() <= f32::EPSILON {
            return Ok(());
        }
        let (bounds, _) = self.bounds_for(self.location)?;
        let ctm = scale_matrix(self.zoom, self.rotation, bounds);
        let draw = Matrix::translation(-self.scroll.x, -self.scroll.y).concat(ctm);
        let anchor_in_page = draw.invert().transform_point(anchor);

        self.zoom = new_zoom;
        let new_ctm = scale_matrix(self.zoom, self.rotation, bounds);
        let new_screen = new_ctm.transform_point(anchor_in_page);
        let drift = Point::new(new_screen.x - anchor.x, new_screen.y - anchor.y);
        let unscaled = new_ctm.invert().transform_point(drift);
        self.scroll = Vec2::new(unscaled.x, unscaled.y);
        debug!(zoom = self.zoom, "zoom adjusted");

        self.normalize_scroll()?;
        self.clamp_scroll_x()
    }

    /// Quarter-turn the whole document clockwise.
    pub fn rotate_clockwise(&mut self) -> Result<(), LoadError> {
        self.rotation = self.rotation.rotated_clockwise();
        self.clamp_scroll_x()
    }

    /// Set scroll.x so the current page is horizontally centered. The
    /// desired screen position is mapped back through the inverse scale
    /// matrix, keeping the stored offset in native page units at any zoom.
    pub fn center_current_page(&mut self) -> Result<(), LoadError> {
        let (bounds, _) = self.bounds_for(self.location)?;
        let ctm = scale_matrix(self.zoom, self.rotation, bounds);
        let scaled = bounds.transform(ctm);
        let centered = ctm.invert().transform_point(Point::new(
            (scaled.x1 - self.viewport.width as f32) / 2.0,
            0.0,
        ));
        self.scroll.x = centered.x;
        Ok(())
    }

    /// Jump to a page. Used by link targets and the host's goto commands.
    pub fn goto(&mut self, location: Location) -> Result<(), LoadError> {
        if !self.cache.is_valid(location)? {
            return Err(LoadError::new(format!("no such page {location}")));
        }
        self.location = location;
        self.scroll = Vec2::default();
        self.clamp_scroll_x()
    }

    /// Jump to the last page of the last chapter.
    pub fn goto_last_page(&mut self) -> Result<(), LoadError> {
        let chapter = self.cache.chapter_count().saturating_sub(1);
        let page = self.cache.page_count(chapter)?.saturating_sub(1);
        self.goto(Location::new(chapter, page))
    }

    /// Snapshot for external persistence.
    pub fn view_state(&self) -> ViewState {
        ViewState {
            location: self.location,
            zoom: self.zoom,
            rotation: self.rotation,
            scroll: self.scroll,
        }
    }

    /// Restore a snapshot, clamping zoom and re-normalizing so every
    /// invariant holds afterwards even for a stale snapshot.
    pub fn restore_view_state(&mut self, state: ViewState) -> Result<(), LoadError> {
        if !self.cache.is_valid(state.location)? {
            return Err(LoadError::new(format!(
                "snapshot points at missing page {}",
                state.location
            )));
        }
        self.location = state.location;
        self.zoom = state.zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.rotation = state.rotation;
        self.scroll = state.scroll;
        self.normalize_scroll()?;
        self.clamp_scroll_x()
    }

    /// Walk forward from the current location, accumulating vertical offset,
    /// until the viewport is covered or the document ends. Produces at most
    /// one page beyond those needed to cover the viewport, and never fetches
    /// past the end-of-document sentinel.
    pub fn render_plan(&mut self) -> Result<Vec<DrawCommand>, LoadError> {
        let viewport_height = self.viewport.height as f32;
        let mut commands = Vec::new();
        let mut cursor = Point::new(-self.scroll.x, -self.scroll.y);
        let mut location = self.location;
        loop {
            let (bounds, failed) = self.bounds_for(location)?;
            let ctm = scale_matrix(self.zoom, self.rotation, bounds);
            commands.push(DrawCommand {
                location,
                matrix: Matrix::translation(cursor.x, cursor.y).concat(ctm),
                bounds,
                failed,
            });
            cursor.y += bounds.height() + PAGE_MARGIN;
            if ctm.transform_point(cursor).y >= viewport_height {
                break;
            }
            let next = self.cache.next(location)?;
            if next == location {
                break;
            }
            location = next;
        }
        Ok(commands)
    }

    /// Execute the current render plan into `surface`: background, then per
    /// page a paper-white rectangle and the recorded content replayed
    /// through the page's draw matrix. Failed pages paint a flat
    /// placeholder; a replay error degrades the same way instead of
    /// aborting the frame.
    pub fn paint(&mut self, surface: &mut Surface) -> Result<(), LoadError> {
        surface.fill(BACKGROUND_SHADE);
        for command in self.render_plan()? {
            let frame = command.bounds.transform(command.matrix);
            if command.failed {
                surface.fill_rect(frame, PLACEHOLDER_SHADE);
                continue;
            }
            surface.fill_rect(frame, PAGE_SHADE);
            if let PageSlot::Loaded(page) = self.cache.slot(command.location)? {
                if let Err(err) = page.content.replay(command.matrix, surface) {
                    warn!(location = %command.location, error = %err, "content replay failed");
                    surface.fill_rect(frame, PLACEHOLDER_SHADE);
                }
            }
        }
        Ok(())
    }

    /// Resolve the link under a surface point, if any, by inverting each
    /// visible page's draw matrix.
    pub fn link_at(&mut self, point: Point) -> Result<Option<LinkAction>, LoadError> {
        for command in self.render_plan()? {
            let in_page = command.matrix.invert().transform_point(point);
            if !command.bounds.contains(in_page) {
                continue;
            }
            if let PageSlot::Loaded(page) = self.cache.slot(command.location)? {
                for link in &page.links {
                    if link.bounds.contains(in_page) {
                        return Ok(Some(link.action.clone()));
                    }
                }
            }
            break;
        }
        Ok(None)
    }

    fn bounds_for(&mut self, location: Location) -> Result<(Rect, bool), LoadError> {
        match self.cache.slot(location)? {
            PageSlot::Loaded(page) => Ok((page.bounds, false)),
            PageSlot::Failed(_) => Ok((FALLBACK_BOUNDS, true)),
        }
    }

    /// Roll `location` forward/backward until scroll.y lies within the
    /// current page again. A loop, not a single step: one large delta may
    /// cross several page boundaries. At the first and last page the
    /// sentinel stops the loop and scroll.y is deliberately left out of
    /// range (soft boundary).
    fn normalize_scroll(&mut self) -> Result<(), LoadError> {
        loop {
            let (bounds, _) = self.bounds_for(self.location)?;
            if self.scroll.y < bounds.height() {
                break;
            }
            let next = self.cache.next(self.location)?;
            if next == self.location {
                break;
            }
            self.scroll.y -= bounds.height();
            self.location = next;
        }
        while self.scroll.y < 0.0 {
            let previous = self.cache.previous(self.location)?;
            if previous == self.location {
                break;
            }
            self.location = previous;
            let (bounds, _) = self.bounds_for(self.location)?;
            self.scroll.y += bounds.height();
        }
        Ok(())
    }

    /// Horizontal policy: a page narrower than the viewport is pinned to
    /// the centered position; a wider one may pan freely between its left
    /// and right edges. Skipped until the first resize reports a real
    /// viewport.
    fn clamp_scroll_x(&mut self) -> Result<(), LoadError> {
        if self.viewport.width == 0 {
            return Ok(());
        }
        let (bounds, _) = self.bounds_for(self.location)?;
        let ctm = scale_matrix(self.zoom, self.rotation, bounds);
        let scaled = bounds.transform(ctm);
        let viewport_width = self.viewport.width as f32;
        let inverse = ctm.invert();
        if scaled.width() <= viewport_width {
            self.scroll.x = inverse
                .transform_point(Point::new((scaled.x1 - viewport_width) / 2.0, 0.0))
                .x;
        } else {
            let min = inverse.transform_point(Point::new(scaled.x0, 0.0)).x;
            let max = inverse
                .transform_point(Point::new(scaled.x1 - viewport_width, 0.0))
                .x;
            self.scroll.x = self.scroll.x.clamp(min, max);
        }
        Ok(())
    }
}
