//! Byte serialization of a saved document.
//!
//! [`ObjectWriter`] is the token-level seam: values, references and stream bodies.
//! [`SyntaxWriter`] implements it with compact PDF syntax, resolving every reference through
//! the [`IndexLayout`]: indexed objects become `n 0 R`, `Direct` ones are inlined and ignored
//! or dangling ones are written as `null`.
//!
//! [`write_document`] assembles a complete file from a tracker and its layout:
//!
//! ```text
//! %PDF-1.7
//! %âãÏÓ
//! 1 0 obj ... endobj          <- indirect objects in layout order
//! 7 0 obj <</Type /ObjStm>>   <- object streams
//! 2 0 obj <</Type /Catalog>>  <- the catalog, last
//! xref / trailer              <- or a cross-reference stream
//! startxref
//! 1234
//! %%EOF
//! ```

use md5::{Digest, Md5};

use crate::{
    codec::{Codec, FlateCodec},
    index::{stream_rows, write_table, IndexLayout, SaveFlags, SaveOptions, SlotLocation},
    object::{Dictionary, ObjectId, ObjectRef, SaveMode, Stream, Value, MAX_NESTING_DEPTH},
    tracker::Tracker,
    Error::ForeignValue,
    Result,
};

/// Trailer keys the writer always produces itself
pub(crate) const GENERATED_TRAILER_KEYS: &[&str] = &[
    "Size", "Prev", "XRefStm", "ID", "Type", "W", "Index", "Length", "Filter", "DecodeParms",
];

const STREAM_KEYS: &[&str] = &["Length"];
const ENCODED_STREAM_KEYS: &[&str] = &["Length", "Filter", "DecodeParms"];

/// Token-level output of objects.
pub trait ObjectWriter {
    /// Writes a value, inlining direct containers
    ///
    /// # Errors
    /// Fails for handles of other trackers, nodes that no longer exist, or nesting deeper
    /// than [`MAX_NESTING_DEPTH`].
    fn write_value(&mut self, value: &Value) -> Result<()>;

    /// Writes a reference according to its effective save mode
    ///
    /// # Errors
    /// Fails for references of other trackers.
    fn write_reference(&mut self, reference: ObjectRef) -> Result<()>;

    /// Writes `<<dict>> stream ... endstream` for the stream of object `id`
    ///
    /// # Errors
    /// Fails if a dictionary value cannot be written.
    fn write_stream_body(&mut self, id: ObjectId, stream: &Stream) -> Result<()>;
}

/// Compact PDF syntax writer.
pub struct SyntaxWriter<'a> {
    tracker: &'a Tracker,
    layout: &'a IndexLayout,
    out: Vec<u8>,
    depth: usize,
}

impl<'a> SyntaxWriter<'a> {
    /// Creates a writer with an empty buffer
    #[must_use]
    pub fn new(tracker: &'a Tracker, layout: &'a IndexLayout) -> Self {
        SyntaxWriter {
            tracker,
            layout,
            out: Vec::new(),
            depth: 0,
        }
    }

    /// Serializes a single value, as stored inside object streams
    ///
    /// # Errors
    /// See [`ObjectWriter::write_value`].
    pub fn serialize(tracker: &'a Tracker, layout: &'a IndexLayout, value: &Value) -> Result<Vec<u8>> {
        let mut writer = SyntaxWriter::new(tracker, layout);
        writer.write_value(value)?;
        Ok(writer.out)
    }

    /// Number of bytes written so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.out.len() as u64
    }

    /// Bytes written so far
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    /// Consumes the writer, returning the buffer
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Appends raw bytes
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Enters a container or an inlined reference
    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(malformed_error!(
                "Object nested deeper than {} levels",
                MAX_NESTING_DEPTH
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn write_name(&mut self, name: &str) {
        self.out.push(b'/');
        for byte in name.bytes() {
            if (0x21..=0x7e).contains(&byte) && !b"()<>[]{}/%#".contains(&byte) {
                self.out.push(byte);
            } else {
                self.out.extend_from_slice(format!("#{byte:02X}").as_bytes());
            }
        }
    }

    fn write_string(&mut self, bytes: &[u8]) {
        self.out.push(b'(');
        for byte in bytes {
            match byte {
                b'(' | b')' | b'\\' => {
                    self.out.push(b'\\');
                    self.out.push(*byte);
                }
                b'\r' => self.out.extend_from_slice(b"\\r"),
                b'\n' => self.out.extend_from_slice(b"\\n"),
                _ => self.out.push(*byte),
            }
        }
        self.out.push(b')');
    }

    fn write_real(&mut self, real: f64) {
        if !real.is_finite() {
            self.out.push(b'0');
            return;
        }
        let mut text = real.to_string();
        if !text.contains('.') {
            text.push_str(".0");
        }
        self.out.extend_from_slice(text.as_bytes());
    }

    /// Writes `<<...>>`, leaving out `skip` and appending `extra` raw entries
    fn write_dictionary(&mut self, dict: &Dictionary, skip: &[&str], extra: &[u8]) -> Result<()> {
        self.descend()?;
        self.out.extend_from_slice(b"<<");
        let mut first = true;
        for (key, value) in dict.iter() {
            if skip.contains(&key.as_str()) {
                continue;
            }
            if !first {
                self.out.push(b' ');
            }
            first = false;
            self.write_name(key.as_str());
            self.out.push(b' ');
            self.write_value(value)?;
        }
        if !extra.is_empty() {
            if !first {
                self.out.push(b' ');
            }
            self.out.extend_from_slice(extra);
        }
        self.out.extend_from_slice(b">>");
        self.depth -= 1;
        Ok(())
    }

    /// Writes `n 0 obj` for a top-level object and its body
    fn write_indirect(&mut self, number: u32, id: ObjectId) -> Result<()> {
        self.out.extend_from_slice(format!("{number} 0 obj\n").as_bytes());
        let tracker = self.tracker;
        let value = tracker.deref(tracker.handle(id))?;
        let stream = match value {
            Value::Node(node) => tracker.node(*node)?.as_stream(),
            _ => None,
        };
        match stream {
            Some(stream) => self.write_stream_body(id, stream)?,
            None => self.write_value(value)?,
        }
        self.out.extend_from_slice(b"\nendobj\n");
        Ok(())
    }

    fn write_raw_stream(&mut self, number: u32, dict: &[u8], payload: &[u8]) {
        self.out.extend_from_slice(format!("{number} 0 obj\n<<").as_bytes());
        self.out.extend_from_slice(dict);
        self.out
            .extend_from_slice(format!(" /Length {}>>\nstream\n", payload.len()).as_bytes());
        self.out.extend_from_slice(payload);
        self.out.extend_from_slice(b"\nendstream\nendobj\n");
    }
}

impl ObjectWriter for SyntaxWriter<'_> {
    fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.out.extend_from_slice(b"null"),
            Value::Boolean(true) => self.out.extend_from_slice(b"true"),
            Value::Boolean(false) => self.out.extend_from_slice(b"false"),
            Value::Integer(integer) => self.out.extend_from_slice(integer.to_string().as_bytes()),
            Value::Real(real) => self.write_real(*real),
            Value::Name(name) => self.write_name(name.as_str()),
            Value::String(bytes) => self.write_string(bytes),
            Value::Reference(reference) => self.write_reference(*reference)?,
            Value::Node(node) => {
                let tracker = self.tracker;
                let node = tracker.node(*node)?;
                if let Some(array) = node.as_array() {
                    self.descend()?;
                    self.out.push(b'[');
                    for (position, item) in array.iter().enumerate() {
                        if position > 0 {
                            self.out.push(b' ');
                        }
                        self.write_value(item)?;
                    }
                    self.out.push(b']');
                    self.depth -= 1;
                } else if node.is_stream() {
                    return Err(malformed_error!("Stream held directly inside another object"));
                } else if let Some(dict) = node.as_dictionary() {
                    self.write_dictionary(dict, &[], &[])?;
                }
            }
        }
        Ok(())
    }

    fn write_reference(&mut self, reference: ObjectRef) -> Result<()> {
        if reference.tracker() != self.tracker.id() {
            return Err(ForeignValue);
        }
        match self.layout.mode(reference.id()) {
            Some(SaveMode::Direct) => {
                let tracker = self.tracker;
                self.descend()?;
                self.write_value(tracker.deref(reference)?)?;
                self.depth -= 1;
                Ok(())
            }
            Some(SaveMode::Indirect | SaveMode::Compressed) => {
                let number = self.layout.number(reference.id()).ok_or_else(|| {
                    malformed_error!("Indexed object {} has no number", reference.id())
                })?;
                self.out.extend_from_slice(format!("{number} 0 R").as_bytes());
                Ok(())
            }
            _ => {
                self.out.extend_from_slice(b"null");
                Ok(())
            }
        }
    }

    fn write_stream_body(&mut self, id: ObjectId, stream: &Stream) -> Result<()> {
        let layout = self.layout;
        let (data, skip, extra) = match layout.encoded_stream(id) {
            Some(encoded) => (
                encoded,
                ENCODED_STREAM_KEYS,
                format!("/Filter /FlateDecode /Length {}", encoded.len()),
            ),
            None => (
                stream.data(),
                STREAM_KEYS,
                format!("/Length {}", stream.data().len()),
            ),
        };
        self.write_dictionary(stream.dict(), skip, extra.as_bytes())?;
        self.out.extend_from_slice(b"\nstream\n");
        self.out.extend_from_slice(data);
        self.out.extend_from_slice(b"\nendstream");
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

fn place(slots: &mut [SlotLocation], number: u32, offset: u64) -> Result<()> {
    let slot = slots
        .get_mut(number as usize)
        .ok_or_else(|| malformed_error!("Object number {} outside the index", number))?;
    *slot = SlotLocation::Offset(offset);
    Ok(())
}

/// Serializes the whole document.
///
/// # Errors
/// Fails if the layout does not match the tracker, which only happens when the tracker was
/// mutated after the layout was built.
pub fn write_document(tracker: &Tracker, layout: &IndexLayout, options: &SaveOptions) -> Result<Vec<u8>> {
    let mut writer = SyntaxWriter::new(tracker, layout);
    let mut slots = layout.slots().to_vec();

    writer.write_raw(format!("%PDF-{}\n%", layout.version()).as_bytes());
    writer.write_raw(&[0xE2, 0xE3, 0xCF, 0xD3, b'\n']);

    for id in layout.write_order() {
        let number = layout
            .number(*id)
            .ok_or_else(|| malformed_error!("Object {} has no number", id))?;
        place(&mut slots, number, writer.position())?;
        writer.write_indirect(number, *id)?;
    }

    for batch in layout.object_streams() {
        place(&mut slots, batch.number(), writer.position())?;
        let mut dict = format!("/Type /ObjStm /N {} /First {}", batch.len(), batch.first());
        if let Some(filter) = batch.filter() {
            dict.push_str(&format!(" /Filter /{filter}"));
        }
        writer.write_raw_stream(batch.number(), dict.as_bytes(), batch.payload());
    }

    if let Some(catalog) = layout.catalog() {
        let number = layout
            .number(catalog)
            .ok_or_else(|| malformed_error!("Catalog {} has no number", catalog))?;
        place(&mut slots, number, writer.position())?;
        writer.write_indirect(number, catalog)?;
    }

    let id_entry = if options.flags().contains(SaveFlags::DOCUMENT_ID) {
        let digest = hex(&Md5::digest(writer.bytes()));
        format!("/ID [<{digest}> <{digest}>]")
    } else {
        String::new()
    };

    let trailer = tracker.dictionary(tracker.trailer())?;
    let startxref = writer.position();
    match layout.xref_number() {
        Some(number) => {
            place(&mut slots, number, writer.position())?;
            let mut rows = stream_rows(&slots)?;
            let mut filter = "";
            if options.flags().contains(SaveFlags::COMPRESS_STREAMS) {
                if let Ok(encoded) = FlateCodec::default().encode(&rows) {
                    rows = encoded;
                    filter = " /Filter /FlateDecode";
                }
            }

            let mut entries = SyntaxWriter::new(tracker, layout);
            entries.write_dictionary(trailer, GENERATED_TRAILER_KEYS, id_entry.as_bytes())?;
            let entries = entries.into_bytes();
            let inner = &entries[2..entries.len() - 2];

            let mut dict = format!("/Type /XRef /Size {} /W [1 4 2]", slots.len()).into_bytes();
            if !inner.is_empty() {
                dict.push(b' ');
                dict.extend_from_slice(inner);
            }
            dict.extend_from_slice(filter.as_bytes());
            writer.write_raw_stream(number, &dict, &rows);
        }
        None => {
            let mut table = Vec::new();
            write_table(&mut table, &slots)?;
            writer.write_raw(&table);
            writer.write_raw(b"trailer\n");
            let mut extra = format!("/Size {}", slots.len());
            if !id_entry.is_empty() {
                extra.push(' ');
                extra.push_str(&id_entry);
            }
            writer.write_dictionary(trailer, GENERATED_TRAILER_KEYS, extra.as_bytes())?;
            writer.write_raw(b"\n");
        }
    }

    writer.write_raw(format!("startxref\n{startxref}\n%%EOF\n").as_bytes());
    Ok(writer.into_bytes())
}
