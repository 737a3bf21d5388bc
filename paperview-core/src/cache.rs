//! Lazily populated cache of parsed pages.
//!
//! Chapters are sized on first touch, pages are loaded on first access, and
//! nothing is ever evicted: memory grows with the set of distinct pages
//! visited, and a given location hits the engine at most once for the life
//! of the document. The keyed map (rather than a preallocated arena) keeps
//! the door open for a bounded policy later without changing callers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::geometry::Rect;
use crate::{DocumentEngine, LoadError, Location, PageContent, PageData, PageLink};

/// A loaded page and the artifacts that share its lifetime.
pub struct Page {
    pub bounds: Rect,
    pub content: Box<dyn PageContent>,
    pub text: String,
    pub links: Vec<PageLink>,
}

impl From<PageData> for Page {
    fn from(data: PageData) -> Self {
        Self {
            bounds: data.bounds,
            content: data.content,
            text: data.text,
            links: data.links,
        }
    }
}

/// Cache slot state. A failed load is recorded permanently so the page
/// degrades to a placeholder instead of being retried on every frame.
pub enum PageSlot {
    Loaded(Page),
    Failed(LoadError),
}

impl PageSlot {
    pub fn page(&self) -> Option<&Page> {
        match self {
            PageSlot::Loaded(page) => Some(page),
            PageSlot::Failed(_) => None,
        }
    }
}

pub struct PageCache {
    engine: Arc<dyn DocumentEngine>,
    chapter_count: usize,
    page_counts: Vec<Option<usize>>,
    slots: HashMap<Location, PageSlot>,
}

impl PageCache {
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        let chapter_count = engine.chapter_count();
        Self {
            engine,
            chapter_count,
            page_counts: vec![None; chapter_count],
            slots: HashMap::new(),
        }
    }

    pub fn chapter_count(&self) -> usize {
        self.chapter_count
    }

    /// Page count for one chapter, queried from the engine exactly once.
    pub fn page_count(&mut self, chapter: usize) -> Result<usize, LoadError> {
        if chapter >= self.chapter_count {
            return Err(LoadError::new(format!(
                "chapter {chapter} out of range ({} chapters)",
                self.chapter_count
            )));
        }
        if let Some(count) = self.page_counts[chapter] {
            return Ok(count);
        }
        let count = self.engine.chapter_page_count(chapter)?;
        debug!(chapter, pages = count, "chapter sized");
        self.page_counts[chapter] = Some(count);
        Ok(count)
    }

    /// Whether `location` addresses an existing page of the document. Sizes
    /// the chapter as a side effect.
    pub fn is_valid(&mut self, location: Location) -> Result<bool, LoadError> {
        if location.chapter >= self.chapter_count {
            return Ok(false);
        }
        Ok(location.page < self.page_count(location.chapter)?)
    }

    /// The cached slot for `location`, loading it through the engine on the
    /// first access. Cache hits are O(1) and touch no engine I/O. A chapter
    /// that cannot even be sized is a hard error; a page that fails to parse
    /// comes back as a `Failed` slot.
    pub fn slot(&mut self, location: Location) -> Result<&PageSlot, LoadError> {
        let count = self.page_count(location.chapter)?;
        if location.page >= count {
            return Err(LoadError::new(format!(
                "page {location} out of range ({count} pages in chapter)"
            )));
        }
        let engine = &self.engine;
        Ok(self.slots.entry(location).or_insert_with(|| {
            debug!(%location, "loading page");
            match engine.load_page(location) {
                Ok(data) => PageSlot::Loaded(Page::from(data)),
                Err(err) => {
                    warn!(%location, error = %err, "page failed to load");
                    PageSlot::Failed(err)
                }
            }
        }))
    }

    /// Successor of `location` in reading order. Returns the input unchanged
    /// at the end of the document (the no-further-page sentinel).
    pub fn next(&mut self, location: Location) -> Result<Location, LoadError> {
        let pages = self.page_count(location.chapter)?;
        if location.page + 1 < pages {
            Ok(Location::new(location.chapter, location.page + 1))
        } else if location.chapter + 1 < self.chapter_count {
            Ok(Location::new(location.chapter + 1, 0))
        } else {
            Ok(location)
        }
    }

    /// Predecessor of `location`, with the same sentinel convention at the
    /// start of the document.
    pub fn previous(&mut self, location: Location) -> Result<Location, LoadError> {
        if location.page > 0 {
            Ok(Location::new(location.chapter, location.page - 1))
        } else if location.chapter > 0 {
            let chapter = location.chapter - 1;
            let pages = self.page_count(chapter)?;
            Ok(Location::new(chapter, pages.saturating_sub(1)))
        } else {
            Ok(location)
        }
    }

    /// Number of populated slots, loaded and failed alike.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingEngine, FakeEngine};

    #[test]
    fn chapter_is_sized_once_and_lazily() {
        let engine = Arc::new(CountingEngine::new(FakeEngine::new(vec![
            vec![800.0, 800.0],
            vec![600.0],
        ])));
        let mut cache = PageCache::new(Arc::clone(&engine) as Arc<dyn DocumentEngine>);
        assert_eq!(engine.count_calls(), 0);

        assert_eq!(cache.page_count(0).unwrap(), 2);
        assert_eq!(cache.page_count(0).unwrap(), 2);
        assert_eq!(engine.count_calls(), 1);
        // chapter 1 still untouched
        assert_eq!(cache.page_count(1).unwrap(), 1);
        assert_eq!(engine.count_calls(), 2);
    }

    #[test]
    fn page_load_is_invoked_exactly_once_per_location() {
        let engine = Arc::new(CountingEngine::new(FakeEngine::new(vec![vec![
            800.0, 800.0,
        ]])));
        let mut cache = PageCache::new(Arc::clone(&engine) as Arc<dyn DocumentEngine>);
        let loc = Location::new(0, 1);

        let first = cache.slot(loc).unwrap().page().unwrap().bounds;
        let second = cache.slot(loc).unwrap().page().unwrap().bounds;
        assert_eq!(first, second);
        assert_eq!(engine.load_calls(), 1);
    }

    #[test]
    fn failed_page_is_recorded_and_not_retried() {
        let engine = Arc::new(CountingEngine::new(
            FakeEngine::new(vec![vec![800.0, 800.0]]).failing_at(Location::new(0, 0)),
        ));
        let mut cache = PageCache::new(Arc::clone(&engine) as Arc<dyn DocumentEngine>);

        assert!(matches!(
            cache.slot(Location::new(0, 0)).unwrap(),
            PageSlot::Failed(_)
        ));
        assert!(matches!(
            cache.slot(Location::new(0, 0)).unwrap(),
            PageSlot::Failed(_)
        ));
        assert_eq!(engine.load_calls(), 1);
    }

    #[test]
    fn out_of_range_page_is_an_error_not_a_slot() {
        let engine = Arc::new(FakeEngine::new(vec![vec![800.0]]));
        let mut cache = PageCache::new(engine);
        assert!(cache.slot(Location::new(0, 1)).is_err());
        assert!(cache.slot(Location::new(3, 0)).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn next_and_previous_cross_chapter_boundaries() {
        let engine = Arc::new(FakeEngine::new(vec![vec![800.0, 800.0], vec![600.0]]));
        let mut cache = PageCache::new(engine);

        assert_eq!(
            cache.next(Location::new(0, 0)).unwrap(),
            Location::new(0, 1)
        );
        assert_eq!(
            cache.next(Location::new(0, 1)).unwrap(),
            Location::new(1, 0)
        );
        // end-of-document sentinel
        assert_eq!(
            cache.next(Location::new(1, 0)).unwrap(),
            Location::new(1, 0)
        );

        assert_eq!(
            cache.previous(Location::new(1, 0)).unwrap(),
            Location::new(0, 1)
        );
        // start-of-document sentinel
        assert_eq!(
            cache.previous(Location::new(0, 0)).unwrap(),
            Location::new(0, 0)
        );
    }
}
