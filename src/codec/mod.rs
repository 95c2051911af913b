//! Stream filters.
//!
//! The persistence core only needs a small slice of the filter zoo: object streams and
//! cross-reference streams are written with `FlateDecode`, and reading them back requires
//! undoing that filter including the PNG row predictors other producers commonly apply to
//! cross-reference streams.
//!
//! # Key Components
//!
//! - [`Codec`] - One filter, identified by its PDF name
//! - [`CodecSet`] - Registry consulted by the index builder and the reader
//! - [`FlateCodec`] - zlib via `flate2`
//! - [`DecodeParams`] - The `/DecodeParms` subset understood by the predictors
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::codec::CodecSet;
//!
//! let codecs = CodecSet::default();
//! let encoded = codecs.encode("FlateDecode", b"1 0 2 14 3 28")?;
//! let decoded = codecs.decode("FlateDecode", &encoded, None)?;
//! assert_eq!(decoded, b"1 0 2 14 3 28");
//! # Ok::<(), pdfgraph::Error>(())
//! ```

use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::{
    object::{Dictionary, Name, Value},
    Error::{self, NotSupported},
    Result,
};

/// A stream filter.
///
/// Codecs are stateless and shared between threads while object stream payloads are
/// compressed in parallel.
pub trait Codec: Send + Sync {
    /// The filter name as written after `/Filter`
    fn name(&self) -> &'static str;

    /// Encodes `data`
    ///
    /// # Errors
    /// [`crate::Error::Codec`] if the filter cannot encode the input.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decodes `data`, applying `params` where the filter supports them
    ///
    /// # Errors
    /// [`crate::Error::Codec`] for damaged input or unsupported parameters.
    fn decode(&self, data: &[u8], params: Option<&DecodeParams>) -> Result<Vec<u8>>;
}

/// Predictor parameters from a `/DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParams {
    /// `1` for none, `2` for TIFF, `10..=15` for the PNG predictors
    pub predictor: i64,
    /// Samples per pixel
    pub colors: i64,
    /// Bits per sample
    pub bits_per_component: i64,
    /// Samples per row
    pub columns: i64,
}

impl Default for DecodeParams {
    fn default() -> Self {
        DecodeParams {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl DecodeParams {
    /// Reads the predictor entries of a `/DecodeParms` dictionary, defaulting absent ones
    #[must_use]
    pub fn from_dictionary(dict: &Dictionary) -> Self {
        let defaults = DecodeParams::default();
        let read = |key: &str, default: i64| dict.get(key).and_then(Value::as_integer).unwrap_or(default);
        DecodeParams {
            predictor: read("Predictor", defaults.predictor),
            colors: read("Colors", defaults.colors),
            bits_per_component: read("BitsPerComponent", defaults.bits_per_component),
            columns: read("Columns", defaults.columns),
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        let bits = self.colors.max(1) * self.bits_per_component.max(1);
        usize::try_from((bits + 7) / 8).unwrap_or(1)
    }

    fn row_length(&self) -> usize {
        let bits = self.colors.max(1) * self.bits_per_component.max(1) * self.columns.max(1);
        usize::try_from((bits + 7) / 8).unwrap_or(1)
    }
}

/// zlib-wrapped deflate, the `FlateDecode` filter.
#[derive(Debug, Clone, Copy)]
pub struct FlateCodec {
    level: Compression,
}

impl FlateCodec {
    /// Creates a codec compressing at `level` (0-9)
    #[must_use]
    pub fn new(level: u32) -> Self {
        FlateCodec {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for FlateCodec {
    fn default() -> Self {
        FlateCodec {
            level: Compression::default(),
        }
    }
}

fn codec_error(filter: &str, error: impl std::fmt::Display) -> Error {
    Error::Codec {
        filter: filter.to_string(),
        message: error.to_string(),
    }
}

impl Codec for FlateCodec {
    fn name(&self) -> &'static str {
        "FlateDecode"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder
            .write_all(data)
            .map_err(|error| codec_error(self.name(), error))?;
        encoder.finish().map_err(|error| codec_error(self.name(), error))
    }

    fn decode(&self, data: &[u8], params: Option<&DecodeParams>) -> Result<Vec<u8>> {
        let mut decoded = Vec::with_capacity(data.len() * 4);
        ZlibDecoder::new(data)
            .read_to_end(&mut decoded)
            .map_err(|error| codec_error(self.name(), error))?;

        match params {
            Some(params) if params.predictor >= 10 => unpredict_png(&decoded, params),
            Some(params) if params.predictor == 2 => Err(codec_error(
                self.name(),
                "TIFF predictor is not supported",
            )),
            _ => Ok(decoded),
        }
    }
}

/// Reverses the PNG row filters; every row starts with its own filter type byte.
fn unpredict_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_length = params.row_length();
    let bpp = params.bytes_per_pixel();
    let mut output = Vec::with_capacity(data.len());
    let mut previous = vec![0u8; row_length];

    for row in data.chunks(row_length + 1) {
        let (filter, encoded) = row
            .split_first()
            .ok_or_else(|| codec_error("FlateDecode", "empty predictor row"))?;
        let mut current = vec![0u8; row_length];
        for (i, byte) in encoded.iter().enumerate() {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            current[i] = match filter {
                0 => *byte,
                1 => byte.wrapping_add(left),
                2 => byte.wrapping_add(up),
                3 => byte.wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => byte.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(codec_error(
                        "FlateDecode",
                        format!("unknown PNG filter type {other}"),
                    ))
                }
            };
        }
        current.truncate(encoded.len());
        output.extend_from_slice(&current);
        current.resize(row_length, 0);
        previous = current;
    }
    Ok(output)
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let estimate = i16::from(left) + i16::from(up) - i16::from(up_left);
    let distance_left = (estimate - i16::from(left)).abs();
    let distance_up = (estimate - i16::from(up)).abs();
    let distance_up_left = (estimate - i16::from(up_left)).abs();
    if distance_left <= distance_up && distance_left <= distance_up_left {
        left
    } else if distance_up <= distance_up_left {
        up
    } else {
        up_left
    }
}

/// The filters available to one save or load.
pub struct CodecSet {
    codecs: HashMap<&'static str, Box<dyn Codec>>,
}

impl CodecSet {
    /// Creates a set without any codec
    #[must_use]
    pub fn empty() -> Self {
        CodecSet {
            codecs: HashMap::new(),
        }
    }

    /// Adds or replaces a codec under its own name
    pub fn register(&mut self, codec: Box<dyn Codec>) {
        self.codecs.insert(codec.name(), codec);
    }

    /// Returns the codec registered for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Codec> {
        self.codecs.get(name).map(AsRef::as_ref)
    }

    /// Returns true if `name` can be encoded and decoded
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Encodes with the codec registered for `name`
    ///
    /// # Errors
    /// [`crate::Error::NotSupported`] for an unknown filter, or the codec's own error.
    pub fn encode(&self, name: &str, data: &[u8]) -> Result<Vec<u8>> {
        self.get(name).ok_or(NotSupported)?.encode(data)
    }

    /// Decodes with the codec registered for `name`
    ///
    /// # Errors
    /// [`crate::Error::NotSupported`] for an unknown filter, or the codec's own error.
    pub fn decode(&self, name: &str, data: &[u8], params: Option<&DecodeParams>) -> Result<Vec<u8>> {
        self.get(name).ok_or(NotSupported)?.decode(data, params)
    }

    /// Undoes a filter chain as found in a stream dictionary, outermost filter first
    ///
    /// # Errors
    /// [`crate::Error::NotSupported`] if any filter in the chain is unknown.
    pub fn decode_chain(
        &self,
        filters: &[Name],
        params: &[Option<DecodeParams>],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut current = data.to_vec();
        for (position, filter) in filters.iter().enumerate() {
            let param = params.get(position).copied().flatten();
            current = self.decode(filter.as_str(), &current, param.as_ref())?;
        }
        Ok(current)
    }
}

impl Default for CodecSet {
    fn default() -> Self {
        let mut set = CodecSet::empty();
        set.register(Box::new(FlateCodec::default()));
        set
    }
}

impl std::fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.codecs.keys().collect();
        names.sort();
        f.debug_struct("CodecSet").field("codecs", &names).finish()
    }
}
