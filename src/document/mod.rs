//! A minimal owning document around a [`Tracker`].
//!
//! The document owns the singletons a copy must never duplicate: the catalog, the page tree
//! and the pages themselves. It also answers the copy engine's retarget requests for them
//! through [`PageMap`], which is what makes page import work:
//!
//! 1. a fresh local page is created for every foreign page and registered in the map
//! 2. the foreign page's entries are copied into it, `/Parent` excluded
//! 3. whenever the copy reaches a foreign singleton (the catalog, the page tree, or one of the
//!    imported pages through an annotation link) the map hands back the local equivalent
//!
//! A link to a page that is not part of the import cannot be mapped and aborts it.
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::{codec::CodecSet, index::SaveOptions, Document, Value};
//!
//! let mut source = Document::new()?;
//! let page = source.add_page()?;
//! let node = source.page_node(page)?;
//! source.tracker_mut().set(node, "Rotate", Value::Integer(90))?;
//!
//! let mut dest = Document::new()?;
//! let imported = dest.import_page(&source, page)?;
//! let imported_node = dest.page_node(imported)?;
//! assert_eq!(dest.tracker().get(imported_node, "Rotate")?, Some(&Value::Integer(90)));
//!
//! let bytes = dest.save(&SaveOptions::default(), &CodecSet::default())?;
//! let reloaded = Document::load(&bytes, &CodecSet::default())?;
//! assert_eq!(reloaded.page_count()?, 1);
//! # Ok::<(), pdfgraph::Error>(())
//! ```

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use log::debug;

use crate::{
    codec::CodecSet,
    file::File,
    index::{IndexLayout, PdfVersion, SaveOptions},
    object::{NodeId, ObjectRef, PinnedKind, Value},
    reader,
    tracker::{Retarget, RetargetRequest, SaveListener, Tracker},
    Error::{RetargetFailed, TypeMismatch},
    Result,
};

/// Page entries that describe the page's place in its own document
const PAGE_SKIP_KEYS: &[&str] = &["Parent", "Type"];

/// Maps the singletons of a foreign document onto a local one.
#[derive(Debug, Clone)]
pub struct PageMap {
    catalog: ObjectRef,
    page_tree: ObjectRef,
    pages: HashMap<NodeId, ObjectRef>,
}

impl PageMap {
    /// Creates a map that sends any catalog and page tree to the given local ones
    #[must_use]
    pub fn new(catalog: ObjectRef, page_tree: ObjectRef) -> Self {
        PageMap {
            catalog,
            page_tree,
            pages: HashMap::new(),
        }
    }

    /// Sends the foreign page node `foreign` to the local page `local`
    pub fn map_page(&mut self, foreign: NodeId, local: ObjectRef) {
        self.pages.insert(foreign, local);
    }

    /// Number of mapped pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if no page is mapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl Retarget for PageMap {
    fn retarget(
        &mut self,
        _dest: &mut Tracker,
        _source: &Tracker,
        request: RetargetRequest,
    ) -> Result<Value> {
        match request.kind {
            PinnedKind::Catalog => Ok(Value::Reference(self.catalog)),
            PinnedKind::PageTree => Ok(Value::Reference(self.page_tree)),
            PinnedKind::Page => self
                .pages
                .get(&request.node)
                .map(|local| Value::Reference(*local))
                .ok_or_else(|| {
                    RetargetFailed(format!("page {} is not part of the import", request.node))
                }),
            // No slot can hold a trailer, so a copy never reaches one
            PinnedKind::Trailer => Err(RetargetFailed("the trailer has no equivalent".into())),
        }
    }
}

/// Writes `/Producer` into the information dictionary before every save.
///
/// The dictionary is created in the trailer if the document has none.
#[derive(Debug, Clone)]
pub struct ProducerStamp {
    producer: String,
    saves: usize,
}

impl ProducerStamp {
    /// Creates a stamp writing `producer`
    pub fn new(producer: impl Into<String>) -> Self {
        ProducerStamp {
            producer: producer.into(),
            saves: 0,
        }
    }

    /// Number of completed saves this stamp took part in
    #[must_use]
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl SaveListener for ProducerStamp {
    fn before_save(&mut self, tracker: &mut Tracker) -> Result<()> {
        let trailer = tracker.trailer();
        let info = match tracker.get(trailer, "Info")?.cloned() {
            Some(Value::Reference(reference)) => reference_node(tracker, reference)?,
            Some(Value::Node(node)) => node,
            _ => {
                let info = tracker.new_dictionary();
                tracker.set(trailer, "Info", Value::Node(info))?;
                info
            }
        };
        let producer = Value::string(self.producer.as_bytes().to_vec());
        if let Some(previous) = tracker.set(info, "Producer", producer)? {
            tracker.discard(previous)?;
        }
        Ok(())
    }

    fn after_save(&mut self, _tracker: &Tracker, layout: &IndexLayout) -> Result<()> {
        self.saves += 1;
        debug!("stamped save {} ({} objects)", self.saves, layout.size());
        Ok(())
    }
}

/// A document: a tracker plus its catalog and page tree.
pub struct Document {
    tracker: Tracker,
    catalog: ObjectRef,
    page_tree: ObjectRef,
    version: PdfVersion,
}

impl Document {
    /// Creates a document with an empty page tree.
    ///
    /// # Errors
    /// Only fails if the fresh tracker rejects its own setup, which indicates a bug.
    pub fn new() -> Result<Self> {
        let mut tracker = Tracker::new();

        let page_tree = tracker.new_pinned(PinnedKind::PageTree);
        let kids = tracker.new_array();
        tracker.set(page_tree, "Type", Value::name("Pages"))?;
        tracker.set(page_tree, "Kids", Value::Node(kids))?;
        tracker.set(page_tree, "Count", Value::Integer(0))?;
        let page_tree = tracker.create_reference(Value::Node(page_tree))?;

        let catalog = tracker.new_pinned(PinnedKind::Catalog);
        tracker.set(catalog, "Type", Value::name("Catalog"))?;
        tracker.set(catalog, "Pages", Value::Reference(page_tree))?;
        let catalog = tracker.create_reference(Value::Node(catalog))?;

        let trailer = tracker.trailer();
        tracker.set(trailer, "Root", Value::Reference(catalog))?;

        Ok(Document {
            tracker,
            catalog,
            page_tree,
            version: PdfVersion::default(),
        })
    }

    /// Wraps a loaded tracker, pinning its page tree nodes and pages.
    ///
    /// # Errors
    /// [`crate::Error::Malformed`] if the trailer has no catalog or the catalog no page tree.
    pub fn from_tracker(mut tracker: Tracker, version: PdfVersion) -> Result<Self> {
        let trailer = tracker.trailer();
        let catalog = tracker
            .get(trailer, "Root")?
            .and_then(Value::as_reference)
            .ok_or_else(|| malformed_error!("Trailer has no /Root reference"))?;
        let catalog_node = reference_node(&tracker, catalog)?;
        tracker.set_pinned(catalog_node, PinnedKind::Catalog)?;

        let page_tree = tracker
            .get(catalog_node, "Pages")?
            .and_then(Value::as_reference)
            .ok_or_else(|| malformed_error!("Catalog has no /Pages reference"))?;

        let mut pending = vec![page_tree];
        let mut seen = HashSet::new();
        let mut pinned = 0usize;
        while let Some(current) = pending.pop() {
            let Ok(node) = reference_node(&tracker, current) else {
                continue;
            };
            if !seen.insert(node) {
                continue;
            }
            let is_tree = tracker
                .dictionary(node)?
                .type_name()
                .is_some_and(|name| name.as_str() == "Pages");
            if is_tree {
                tracker.set_pinned(node, PinnedKind::PageTree)?;
                pending.extend(kids_of(&tracker, node)?.into_iter().rev());
            } else {
                tracker.set_pinned(node, PinnedKind::Page)?;
                pinned += 1;
            }
        }
        debug!("document with {} pages, version {}", pinned, version);

        Ok(Document {
            tracker,
            catalog,
            page_tree,
            version,
        })
    }

    /// Parses `data` into a document.
    ///
    /// # Errors
    /// Anything [`crate::reader::load`] or [`Document::from_tracker`] reports.
    pub fn load(data: &[u8], codecs: &CodecSet) -> Result<Self> {
        let (tracker, version) = reader::load(data, codecs)?;
        Self::from_tracker(tracker, version)
    }

    /// Memory-maps and parses the file at `path`.
    ///
    /// # Errors
    /// [`crate::Error::FileError`] if the file cannot be read, otherwise as [`Document::load`].
    pub fn load_file(path: impl AsRef<Path>, codecs: &CodecSet) -> Result<Self> {
        let file = File::from_file(path.as_ref())?;
        Self::load(file.data(), codecs)
    }

    /// The object table
    #[must_use]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// The object table, for edits
    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// The catalog reference
    #[must_use]
    pub fn catalog(&self) -> ObjectRef {
        self.catalog
    }

    /// The root of the page tree
    #[must_use]
    pub fn page_tree(&self) -> ObjectRef {
        self.page_tree
    }

    /// Header version of the loaded file, or the default for new documents
    #[must_use]
    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// The dictionary node behind a page reference
    ///
    /// # Errors
    /// [`crate::Error::TypeMismatch`] if `page` does not hold a pinned page.
    pub fn page_node(&self, page: ObjectRef) -> Result<NodeId> {
        let node = reference_node(&self.tracker, page)?;
        if self.tracker.node(node)?.pinned() == Some(PinnedKind::Page) {
            Ok(node)
        } else {
            Err(TypeMismatch {
                node,
                expected: "a page",
            })
        }
    }

    /// Page references in document order, nested page trees flattened
    pub fn pages(&self) -> Result<Vec<ObjectRef>> {
        let mut pages = Vec::new();
        let mut pending = vec![self.page_tree];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            let Ok(node) = reference_node(&self.tracker, current) else {
                continue;
            };
            if !seen.insert(node) {
                continue;
            }
            match self.tracker.node(node)?.pinned() {
                Some(PinnedKind::PageTree) => {
                    pending.extend(kids_of(&self.tracker, node)?.into_iter().rev());
                }
                Some(PinnedKind::Page) => pages.push(current),
                _ => {}
            }
        }
        Ok(pages)
    }

    /// Number of pages
    pub fn page_count(&self) -> Result<usize> {
        Ok(self.pages()?.len())
    }

    /// Appends an empty page to the root of the page tree
    pub fn add_page(&mut self) -> Result<ObjectRef> {
        let page = self.tracker.new_pinned(PinnedKind::Page);
        self.tracker.set(page, "Type", Value::name("Page"))?;
        self.tracker
            .set(page, "Parent", Value::Reference(self.page_tree))?;
        let page = self.tracker.create_reference(Value::Node(page))?;

        let root = reference_node(&self.tracker, self.page_tree)?;
        let kids = self.kids_array(root)?;
        self.tracker.push(kids, Value::Reference(page))?;
        self.adjust_count(root, 1)?;
        Ok(page)
    }

    /// Removes a page that sits directly under the root of the page tree
    ///
    /// # Errors
    /// [`crate::Error::ReferenceNotFound`] if `page` is not a kid of the root.
    pub fn remove_page(&mut self, page: ObjectRef) -> Result<()> {
        let root = reference_node(&self.tracker, self.page_tree)?;
        let kids = self.kids_array(root)?;
        let position = self
            .tracker
            .array(kids)?
            .iter()
            .position(|kid| kid.as_reference() == Some(page))
            .ok_or(crate::Error::ReferenceNotFound(page.id()))?;
        self.tracker.remove_at(kids, position)?;
        self.adjust_count(root, -1)
    }

    /// Copies one page of `source` to the end of this document
    pub fn import_page(&mut self, source: &Document, page: ObjectRef) -> Result<ObjectRef> {
        let mut imported = self.import_pages(source, &[page])?;
        imported.pop().ok_or(crate::Error::Empty)
    }

    /// Copies pages of `source` to the end of this document.
    ///
    /// Links between the imported pages, such as annotation targets, point at the new local
    /// pages. Resources shared by several imported pages are copied once.
    ///
    /// # Errors
    /// [`crate::Error::RetargetFailed`] if the pages link to a page outside `pages`; the
    /// document is left as it was.
    pub fn import_pages(&mut self, source: &Document, pages: &[ObjectRef]) -> Result<Vec<ObjectRef>> {
        let mut map = PageMap::new(self.catalog, self.page_tree);
        let mut created = Vec::with_capacity(pages.len());
        for page in pages {
            let foreign = source.page_node(*page)?;
            let local = self.add_page()?;
            map.map_page(foreign, local);
            created.push((foreign, local));
        }

        // One shared cache keeps resources used by several pages single
        let had_cache = self.tracker.cache().is_some();
        if !had_cache {
            self.tracker.enable_cache();
        }
        let mut outcome = Ok(());
        for (foreign, local) in &created {
            let copied = self.page_node(*local).and_then(|into| {
                self.tracker.copy_contents(
                    &source.tracker,
                    *foreign,
                    into,
                    PAGE_SKIP_KEYS,
                    &mut map,
                )
            });
            if let Err(error) = copied {
                outcome = Err(error);
                break;
            }
        }
        if !had_cache {
            self.tracker.disable_cache();
        }

        if let Err(error) = outcome {
            for (_, local) in created.iter().rev() {
                self.remove_page(*local)?;
            }
            return Err(error);
        }
        debug!("imported {} pages", created.len());
        Ok(created.into_iter().map(|(_, local)| local).collect())
    }

    /// Records `producer` in the information dictionary on every later save
    pub fn stamp_producer(&mut self, producer: impl Into<String>) {
        self.tracker
            .add_save_listener(Box::new(ProducerStamp::new(producer)));
    }

    /// Serializes the document
    pub fn save(&mut self, options: &SaveOptions, codecs: &CodecSet) -> Result<Vec<u8>> {
        self.tracker.save(options, codecs)
    }

    /// Serializes the document into the file at `path`
    pub fn save_to_file(
        &mut self,
        path: impl AsRef<Path>,
        options: &SaveOptions,
        codecs: &CodecSet,
    ) -> Result<()> {
        let bytes = self.save(options, codecs)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn kids_array(&self, tree: NodeId) -> Result<NodeId> {
        let kids = self
            .tracker
            .get(tree, "Kids")?
            .ok_or_else(|| malformed_error!("Page tree {} has no /Kids", tree))?;
        self.tracker
            .resolve(kids)?
            .as_node()
            .ok_or_else(|| malformed_error!("Page tree {} has a non-array /Kids", tree))
    }

    fn adjust_count(&mut self, tree: NodeId, delta: i64) -> Result<()> {
        let count = self
            .tracker
            .get(tree, "Count")?
            .and_then(Value::as_integer)
            .unwrap_or(0);
        self.tracker
            .set(tree, "Count", Value::Integer((count + delta).max(0)))?;
        Ok(())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("catalog", &self.catalog)
            .field("page_tree", &self.page_tree)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn reference_node(tracker: &Tracker, reference: ObjectRef) -> Result<NodeId> {
    tracker
        .deref(reference)?
        .as_node()
        .ok_or_else(|| malformed_error!("{} does not hold a dictionary", reference))
}

fn kids_of(tracker: &Tracker, tree: NodeId) -> Result<Vec<ObjectRef>> {
    let Some(kids) = tracker.get(tree, "Kids")? else {
        return Ok(Vec::new());
    };
    let Some(kids) = tracker.resolve(kids)?.as_node() else {
        return Ok(Vec::new());
    };
    Ok(tracker
        .array(kids)?
        .iter()
        .filter_map(Value::as_reference)
        .collect())
}
