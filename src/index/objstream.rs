//! Object stream batches.
//!
//! An object stream packs up to 255 compressed objects into the body of one stream:
//!
//! ```text
//! <</Type /ObjStm /N 3 /First 14 ...>>
//! stream
//! 4 0 5 3 6 11\n       <- N pairs of (object number, offset relative to First)
//! 42\n(two)\n<</A 1>>\n
//! endstream
//! ```

use log::warn;

use crate::codec::CodecSet;

/// Largest number of members the writer puts into one object stream
pub const MAX_OBJECT_STREAM_CAPACITY: usize = 255;

/// One object stream as it will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStreamBatch {
    number: u32,
    members: Vec<u32>,
    first: usize,
    payload: Vec<u8>,
    filter: Option<&'static str>,
}

impl ObjectStreamBatch {
    /// Lays out the pairs index and member bodies.
    ///
    /// `members` are `(object number, serialized body)` in stream order.
    pub(crate) fn assemble(number: u32, members: Vec<(u32, Vec<u8>)>) -> Self {
        let mut header = Vec::new();
        let mut bodies = Vec::new();
        let mut numbers = Vec::with_capacity(members.len());

        for (position, (member, body)) in members.into_iter().enumerate() {
            if position > 0 {
                header.push(b' ');
            }
            header.extend_from_slice(format!("{} {}", member, bodies.len()).as_bytes());
            bodies.extend_from_slice(&body);
            bodies.push(b'\n');
            numbers.push(member);
        }
        header.push(b'\n');

        let first = header.len();
        header.extend_from_slice(&bodies);
        ObjectStreamBatch {
            number,
            members: numbers,
            first,
            payload: header,
            filter: None,
        }
    }

    /// Compresses the payload with `FlateDecode`, keeping it raw when the codec fails or the
    /// result is not smaller
    pub(crate) fn compress(&mut self, codecs: &CodecSet) {
        match codecs.encode("FlateDecode", &self.payload) {
            Ok(encoded) if encoded.len() < self.payload.len() => {
                self.payload = encoded;
                self.filter = Some("FlateDecode");
            }
            Ok(_) => {}
            Err(error) => warn!(
                "object stream {} stored uncompressed: {}",
                self.number, error
            ),
        }
    }

    /// Object number of the stream itself
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Member object numbers in stream order
    #[must_use]
    pub fn members(&self) -> &[u32] {
        &self.members
    }

    /// The `/N` entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true for a batch without members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The `/First` entry: byte length of the pairs index
    #[must_use]
    pub fn first(&self) -> usize {
        self.first
    }

    /// Stream data as written, possibly compressed
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The `/Filter` entry, if the payload was compressed
    #[must_use]
    pub fn filter(&self) -> Option<&'static str> {
        self.filter
    }
}

/// Splits compressed objects into batches of at most `capacity` members
pub(crate) fn plan_batches<T: Clone>(objects: &[T], capacity: usize) -> Vec<Vec<T>> {
    let capacity = capacity.clamp(1, MAX_OBJECT_STREAM_CAPACITY);
    objects.chunks(capacity).map(<[T]>::to_vec).collect()
}
