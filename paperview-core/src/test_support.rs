//! In-memory engine fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::geometry::{Matrix, Rect};
use crate::{
    DocumentEngine, EngineProvider, LoadError, Location, OpenError, PageContent, PageData,
    PageLink, Surface,
};

pub const FAKE_PAGE_WIDTH: f32 = 600.0;

/// Shade painted by fake page content so tests can assert replay happened.
pub const FAKE_CONTENT_SHADE: u8 = 0x42;

pub struct FakeContent {
    bounds: Rect,
}

impl PageContent for FakeContent {
    fn replay(&self, ctm: Matrix, surface: &mut Surface) -> Result<(), LoadError> {
        surface.fill_rect(self.bounds.transform(ctm), FAKE_CONTENT_SHADE);
        Ok(())
    }
}

/// Chapters of pages with configurable heights; optional per-location load
/// failures and link annotations.
pub struct FakeEngine {
    chapters: Vec<Vec<f32>>,
    failing: HashSet<Location>,
    links: HashMap<Location, Vec<PageLink>>,
}

impl FakeEngine {
    pub fn new(chapters: Vec<Vec<f32>>) -> Self {
        Self {
            chapters,
            failing: HashSet::new(),
            links: HashMap::new(),
        }
    }

    pub fn failing_at(mut self, location: Location) -> Self {
        self.failing.insert(location);
        self
    }

    pub fn with_link(mut self, location: Location, link: PageLink) -> Self {
        self.links.entry(location).or_default().push(link);
        self
    }
}

impl DocumentEngine for FakeEngine {
    fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    fn chapter_page_count(&self, chapter: usize) -> Result<usize, LoadError> {
        self.chapters
            .get(chapter)
            .map(Vec::len)
            .ok_or_else(|| LoadError::new(format!("no chapter {chapter}")))
    }

    fn load_page(&self, location: Location) -> Result<PageData, LoadError> {
        if self.failing.contains(&location) {
            return Err(LoadError::new(format!("synthetic failure at {location}")));
        }
        let height = *self
            .chapters
            .get(location.chapter)
            .and_then(|pages| pages.get(location.page))
            .ok_or_else(|| LoadError::new(format!("no page {location}")))?;
        let bounds = Rect::new(0.0, 0.0, FAKE_PAGE_WIDTH, height);
        Ok(PageData {
            bounds,
            content: Box::new(FakeContent { bounds }),
            text: format!("page {location}"),
            links: self.links.get(&location).cloned().unwrap_or_default(),
        })
    }
}

/// Wraps an engine and counts how often the expensive entry points run.
pub struct CountingEngine {
    inner: FakeEngine,
    count_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl CountingEngine {
    pub fn new(inner: FakeEngine) -> Self {
        Self {
            inner,
            count_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

impl DocumentEngine for CountingEngine {
    fn chapter_count(&self) -> usize {
        self.inner.chapter_count()
    }

    fn chapter_page_count(&self, chapter: usize) -> Result<usize, LoadError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.chapter_page_count(chapter)
    }

    fn load_page(&self, location: Location) -> Result<PageData, LoadError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load_page(location)
    }
}

/// Provider that hands out a fixed fake document regardless of path.
pub struct FakeProvider {
    pub chapters: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl EngineProvider for FakeProvider {
    async fn open(
        &self,
        _path: &Path,
        _accel: Option<&Path>,
    ) -> Result<Arc<dyn DocumentEngine>, OpenError> {
        if self.chapters.is_empty() {
            return Err(OpenError::EmptyDocument);
        }
        Ok(Arc::new(FakeEngine::new(self.chapters.clone())))
    }
}
