//! Loading documents from bytes.
//!
//! The reader is the inverse of [`crate::writer`] for the subset of the file format this
//! crate needs: it locates the last cross-reference section through `startxref`, follows
//! `/Prev` and `/XRefStm` to older sections, then materializes every in-use object into a
//! fresh [`Tracker`].
//!
//! - Objects stored at a byte offset are loaded with [`SaveMode::Indirect`]
//! - Members of object streams are loaded with [`SaveMode::Compressed`]
//! - Object and cross-reference streams themselves are consumed and never enter the table
//!
//! Damaged objects are skipped with a warning; references to them become dangling and are
//! written as `null` on the next save. The trailer entries move into the tracker's own
//! trailer, the catalog is pinned and reference counts are rebuilt with
//! [`Tracker::fix_res_table`] before the tracker is handed out.
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::{codec::CodecSet, index::SaveOptions, reader, Tracker, Value};
//!
//! let mut tracker = Tracker::new();
//! let catalog = tracker.new_dictionary();
//! tracker.set(catalog, "Type", Value::name("Catalog"))?;
//! let root = tracker.create_reference(catalog.into())?;
//! tracker.set(tracker.trailer(), "Root", root.into())?;
//!
//! let codecs = CodecSet::default();
//! let bytes = tracker.save(&SaveOptions::default(), &codecs)?;
//! let (loaded, _version) = reader::load(&bytes, &codecs)?;
//! assert_eq!(loaded.reference_count(), 1);
//! # Ok::<(), pdfgraph::Error>(())
//! ```

mod lexer;

pub(crate) use lexer::{parse_indirect, parse_value};

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::{
    codec::{CodecSet, DecodeParams},
    file::{find, rfind, Parser},
    index::{parse_stream_rows, PdfVersion},
    object::{Name, NodeId, ObjectId, PinnedKind, SaveMode, Value},
    tracker::Tracker,
    writer::GENERATED_TRAILER_KEYS,
    Error::{Empty, NotSupported},
    Result,
};

/// How far into the data the `%PDF-` marker is searched for
const HEADER_SEARCH_LIMIT: usize = 1024;

/// Location of an in-use object as recorded by a cross-reference section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XrefEntry {
    Offset { offset: u64, generation: u16 },
    InStream { container: u32, index: u64 },
}

/// One cross-reference section; `None` marks a free object number
struct Section {
    trailer: NodeId,
    entries: Vec<(u32, Option<XrefEntry>)>,
}

/// Loads `data` into a new tracker.
///
/// # Errors
/// [`crate::Error::Empty`] for empty input, [`crate::Error::Malformed`] when the header or
/// the cross-reference data cannot be read, [`crate::Error::NotSupported`] for encrypted files.
pub fn load(data: &[u8], codecs: &CodecSet) -> Result<(Tracker, PdfVersion)> {
    Reader::new(data, codecs).read()
}

/// Single-use loader state.
pub struct Reader<'a> {
    data: &'a [u8],
    codecs: &'a CodecSet,
    tracker: Tracker,
    entries: BTreeMap<u32, Option<XrefEntry>>,
    containers: BTreeMap<u32, NodeId>,
}

impl<'a> Reader<'a> {
    /// Prepares to read `data`, decoding streams with `codecs`
    #[must_use]
    pub fn new(data: &'a [u8], codecs: &'a CodecSet) -> Self {
        Reader {
            data,
            codecs,
            tracker: Tracker::new(),
            entries: BTreeMap::new(),
            containers: BTreeMap::new(),
        }
    }

    /// Runs the load and returns the populated tracker with the header version
    ///
    /// # Errors
    /// See [`load`].
    pub fn read(mut self) -> Result<(Tracker, PdfVersion)> {
        if self.data.is_empty() {
            return Err(Empty);
        }
        let version = read_header(self.data)?;
        let start = find_startxref(self.data)?;
        let trailer = self.read_sections(start)?;

        if self.tracker.dictionary(trailer)?.contains_key("Encrypt") {
            return Err(NotSupported);
        }

        self.load_indirect()?;
        self.load_compressed()?;
        self.adopt_trailer(trailer)?;
        self.pin_catalog()?;

        let report = self.tracker.fix_res_table(&[]);
        debug!(
            "loaded PDF {}: {} objects live, {} pruned, {} dangling",
            version, report.live, report.pruned, report.dangling
        );
        Ok((self.tracker, version))
    }

    /// Reads the newest section at `start` and every older one it chains to.
    ///
    /// Returns the newest trailer dictionary; older trailers are freed.
    fn read_sections(&mut self, start: usize) -> Result<NodeId> {
        let mut pending = vec![start];
        let mut visited = BTreeSet::new();
        let mut hybrids = BTreeSet::new();
        let mut newest = None;

        while let Some(offset) = pending.pop() {
            if !visited.insert(offset) {
                continue;
            }
            let section = match self.read_section(offset) {
                Ok(section) => section,
                Err(error) if newest.is_some() => {
                    warn!("ignoring cross-reference section at {}: {}", offset, error);
                    continue;
                }
                Err(error) => return Err(error),
            };

            // Newer sections shadow older ones, except that a hybrid file's stream section
            // fills in the numbers its table marks free
            let is_hybrid = hybrids.contains(&offset);
            for (number, entry) in section.entries {
                let slot = self.entries.entry(number).or_insert(entry);
                if is_hybrid && slot.is_none() {
                    *slot = entry;
                }
            }

            let dict = self.tracker.dictionary(section.trailer)?;
            let chained = |key: &str| {
                dict.get(key)
                    .and_then(Value::as_integer)
                    .and_then(|offset| usize::try_from(offset).ok())
            };
            // XRefStm belongs to the same revision, so it is read before Prev
            if let Some(previous) = chained("Prev") {
                pending.push(previous);
            }
            if let Some(hybrid) = chained("XRefStm") {
                hybrids.insert(hybrid);
                pending.push(hybrid);
            }

            if newest.is_none() {
                newest = Some(section.trailer);
            } else {
                self.tracker.free_subtree(section.trailer);
            }
        }

        newest.ok_or_else(|| malformed_error!("No cross-reference section found"))
    }

    fn read_section(&mut self, offset: usize) -> Result<Section> {
        let mut parser = Parser::new(self.data);
        parser.seek(offset)?;
        if parser.expect_keyword(b"xref").is_ok() {
            self.read_table(&mut parser)
        } else {
            self.read_xref_stream(&mut parser)
        }
    }

    fn read_table(&mut self, parser: &mut Parser) -> Result<Section> {
        let mut entries = Vec::new();
        loop {
            parser.skip_whitespace();
            if parser.starts_with(b"trailer") {
                break;
            }
            let first = parser.read_unsigned()?;
            let count = parser.read_unsigned()?;
            for position in 0..count {
                let offset = parser.read_unsigned()?;
                let generation = parser.read_unsigned()?;
                parser.skip_whitespace();
                let number = u32::try_from(first + position)
                    .map_err(|_| malformed_error!("Object number {} out of range", first + position))?;
                let entry = match parser.read_regular() {
                    b"n" => Some(XrefEntry::Offset {
                        offset,
                        generation: u16::try_from(generation).unwrap_or(u16::MAX),
                    }),
                    b"f" => None,
                    other => {
                        return Err(malformed_error!(
                            "Invalid xref entry type '{}' for object {}",
                            String::from_utf8_lossy(other),
                            number
                        ))
                    }
                };
                entries.push((number, entry));
            }
        }
        parser.expect_keyword(b"trailer")?;

        let trailer = parse_value(parser, &mut self.tracker)?;
        let trailer = trailer
            .as_node()
            .filter(|node| self.tracker.dictionary(*node).is_ok())
            .ok_or_else(|| malformed_error!("Trailer is not a dictionary"))?;
        Ok(Section { trailer, entries })
    }

    fn read_xref_stream(&mut self, parser: &mut Parser) -> Result<Section> {
        let (id, value) = parse_indirect(parser, &mut self.tracker)?;
        let stream = value
            .as_node()
            .filter(|node| self.tracker.stream(*node).is_ok())
            .ok_or_else(|| malformed_error!("Object {} is not a cross-reference stream", id))?;

        let size = self.integer(stream, "Size").unwrap_or(0);
        let widths = self
            .integers(stream, "W")
            .ok_or_else(|| malformed_error!("Cross-reference stream {} has no /W", id))?;
        let widths: [usize; 3] = widths
            .iter()
            .map(|width| usize::try_from(*width).unwrap_or(usize::MAX))
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| malformed_error!("Cross-reference stream {} needs three widths", id))?;
        let ranges = self.integers(stream, "Index").unwrap_or_else(|| vec![0, size]);

        let rows = parse_stream_rows(&self.decode_stream(stream)?, widths)?;
        let mut rows = rows.into_iter();
        let mut entries = Vec::new();
        for range in ranges.chunks(2) {
            let [first, count] = range else {
                return Err(malformed_error!("Odd /Index in cross-reference stream {}", id));
            };
            for number in *first..first.saturating_add(*count) {
                let Some((kind, second, third)) = rows.next() else {
                    return Err(malformed_error!("Cross-reference stream {} is truncated", id));
                };
                let number = u32::try_from(number)
                    .map_err(|_| malformed_error!("Object number {} out of range", number))?;
                let entry = match kind {
                    1 => Some(XrefEntry::Offset {
                        offset: second,
                        generation: u16::try_from(third).unwrap_or(u16::MAX),
                    }),
                    2 => Some(XrefEntry::InStream {
                        container: u32::try_from(second).unwrap_or(u32::MAX),
                        index: third,
                    }),
                    // Type 0 and unknown types both mean the number is unused
                    _ => None,
                };
                entries.push((number, entry));
            }
        }
        Ok(Section {
            trailer: stream,
            entries,
        })
    }

    fn load_indirect(&mut self) -> Result<()> {
        let located: Vec<(u32, u64, u16)> = self
            .entries
            .iter()
            .filter_map(|(number, entry)| match entry {
                Some(XrefEntry::Offset { offset, generation }) => {
                    Some((*number, *offset, *generation))
                }
                _ => None,
            })
            .collect();

        for (number, offset, generation) in located {
            if number == 0 {
                continue;
            }
            let mut parser = Parser::new(self.data);
            let parsed = usize::try_from(offset)
                .map_err(|_| out_of_bounds_error!())
                .and_then(|offset| parser.seek(offset))
                .and_then(|()| parse_indirect(&mut parser, &mut self.tracker));
            let (found, value) = match parsed {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!("skipping object {} at offset {}: {}", number, offset, error);
                    continue;
                }
            };
            if found.number() != number {
                warn!("xref entry {} points at object {}", number, found);
            }

            if let Some(node) = value.as_node() {
                match self.stream_type(node).as_deref() {
                    Some("ObjStm") => {
                        self.containers.insert(number, node);
                        continue;
                    }
                    Some("XRef") => {
                        self.tracker.free_subtree(node);
                        continue;
                    }
                    _ => {}
                }
            }
            self.tracker
                .insert_loaded(ObjectId::new(number, generation), value, SaveMode::Indirect)?;
        }
        Ok(())
    }

    fn load_compressed(&mut self) -> Result<()> {
        let mut wanted: BTreeMap<u32, Vec<(u64, u32)>> = BTreeMap::new();
        for (number, entry) in &self.entries {
            if let Some(XrefEntry::InStream { container, index }) = entry {
                wanted.entry(*container).or_default().push((*index, *number));
            }
        }

        for (container, members) in wanted {
            let Some(stream) = self.containers.get(&container).copied() else {
                warn!("object stream {} is missing, {} objects lost", container, members.len());
                continue;
            };
            if let Err(error) = self.load_container(stream, &members) {
                warn!("object stream {} is damaged: {}", container, error);
            }
        }

        for (_, stream) in std::mem::take(&mut self.containers) {
            self.tracker.free_subtree(stream);
        }
        Ok(())
    }

    fn load_container(&mut self, stream: NodeId, members: &[(u64, u32)]) -> Result<()> {
        let decoded = self.decode_stream(stream)?;
        let count = self.integer(stream, "N").unwrap_or(0);
        let first = self
            .integer(stream, "First")
            .and_then(|first| usize::try_from(first).ok())
            .ok_or_else(|| malformed_error!("Object stream has no /First"))?;

        let mut parser = Parser::new(&decoded);
        let mut pairs = Vec::new();
        for _ in 0..count {
            pairs.push((parser.read_unsigned()?, parser.read_unsigned()?));
        }

        for (index, number) in members {
            let pair = usize::try_from(*index).ok().and_then(|index| pairs.get(index));
            let Some((stored, offset)) = pair.copied() else {
                warn!("object {} has no slot in its object stream", number);
                continue;
            };
            if stored != u64::from(*number) {
                warn!("object stream slot {} holds {} instead of {}", index, stored, number);
                continue;
            }
            let at = usize::try_from(offset)
                .ok()
                .and_then(|offset| first.checked_add(offset))
                .ok_or_else(|| out_of_bounds_error!())?;
            parser.seek(at)?;
            let value = parse_value(&mut parser, &mut self.tracker)?;
            self.tracker
                .insert_loaded(ObjectId::new(*number, 0), value, SaveMode::Compressed)?;
        }
        Ok(())
    }

    /// Moves the user entries of the file trailer into the tracker's trailer
    fn adopt_trailer(&mut self, source: NodeId) -> Result<()> {
        let keys: Vec<Name> = self
            .tracker
            .dictionary(source)?
            .keys()
            .filter(|key| !GENERATED_TRAILER_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();

        let trailer = self.tracker.trailer();
        for key in keys {
            if let Some(value) = self.tracker.remove(source, key.as_str())? {
                self.tracker.set(trailer, key, value)?;
            }
        }
        self.tracker.free_subtree(source);
        Ok(())
    }

    fn pin_catalog(&mut self) -> Result<()> {
        let trailer = self.tracker.trailer();
        let root = self
            .tracker
            .get(trailer, "Root")?
            .and_then(Value::as_reference)
            .ok_or_else(|| malformed_error!("Trailer has no /Root reference"))?;
        let catalog = self
            .tracker
            .deref(root)?
            .as_node()
            .ok_or_else(|| malformed_error!("Catalog {} is not a dictionary", root))?;
        self.tracker.set_pinned(catalog, PinnedKind::Catalog)
    }

    fn decode_stream(&self, stream: NodeId) -> Result<Vec<u8>> {
        let filters = self.tracker.stream_filters(stream)?;
        let params = match self.tracker.get(stream, "DecodeParms")? {
            Some(value) => match self.tracker.resolve(value).ok().and_then(Value::as_node) {
                Some(node) => match self.tracker.array(node) {
                    Ok(array) => array.iter().map(|param| self.decode_params(param)).collect(),
                    Err(_) => vec![self.decode_params(value)],
                },
                None => Vec::new(),
            },
            None => Vec::new(),
        };
        self.codecs
            .decode_chain(&filters, &params, self.tracker.stream(stream)?.data())
    }

    fn decode_params(&self, value: &Value) -> Option<DecodeParams> {
        let node = self.tracker.resolve(value).ok()?.as_node()?;
        let dict = self.tracker.dictionary(node).ok()?;
        Some(DecodeParams::from_dictionary(dict))
    }

    fn stream_type(&self, node: NodeId) -> Option<String> {
        let stream = self.tracker.stream(node).ok()?;
        stream.dict().type_name().map(|name| name.as_str().to_string())
    }

    fn integer(&self, node: NodeId, key: &str) -> Option<i64> {
        let value = self.tracker.get(node, key).ok()??;
        self.tracker.resolve(value).ok()?.as_integer()
    }

    fn integers(&self, node: NodeId, key: &str) -> Option<Vec<i64>> {
        let value = self.tracker.get(node, key).ok()??;
        let array = self.tracker.array(self.tracker.resolve(value).ok()?.as_node()?).ok()?;
        array.iter().map(Value::as_integer).collect()
    }
}

fn read_header(data: &[u8]) -> Result<PdfVersion> {
    let limit = data.len().min(HEADER_SEARCH_LIMIT);
    let start = find(&data[..limit], b"%PDF-", 0)
        .ok_or_else(|| malformed_error!("Missing %PDF- header"))?;
    let mut parser = Parser::new(data);
    parser.seek(start + 5)?;
    let text = String::from_utf8_lossy(parser.read_regular()).into_owned();
    Ok(PdfVersion::parse(&text).unwrap_or_else(|| {
        warn!("unknown PDF version '{}', assuming {}", text, PdfVersion::default());
        PdfVersion::default()
    }))
}

fn find_startxref(data: &[u8]) -> Result<usize> {
    let marker = rfind(data, b"startxref").ok_or_else(|| malformed_error!("Missing startxref"))?;
    let mut parser = Parser::new(data);
    parser.seek(marker + b"startxref".len())?;
    let offset = parser.read_unsigned()?;
    usize::try_from(offset)
        .ok()
        .filter(|offset| *offset < data.len())
        .ok_or_else(|| malformed_error!("startxref {} lies outside the file", offset))
}
