//! Byte cursor used by the reader.
//!
//! [`Parser`] keeps a position inside a borrowed byte slice and offers bounds-checked
//! movement plus the few byte-class helpers the PDF token syntax needs: whitespace
//! (including `%` comments), delimiters and runs of regular characters. Token and object
//! parsing on top of it lives in [`crate::reader`].
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::file::Parser;
//!
//! let mut parser = Parser::new(b"  % comment\n  12 0 obj");
//! parser.skip_whitespace();
//! assert_eq!(parser.read_regular(), b"12");
//! parser.skip_whitespace();
//! assert!(parser.starts_with(b"0 obj"));
//! # Ok::<(), pdfgraph::Error>(())
//! ```

use crate::Result;

/// Returns true for the six whitespace characters of the file format
#[must_use]
pub fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

/// Returns true for characters that end a token and start another
#[must_use]
pub fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Returns true for characters that can be part of a keyword, number or name
#[must_use]
pub fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

/// Offset of the first occurrence of `pattern` at or after `from`
#[must_use]
pub fn find(data: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if pattern.is_empty() || from >= data.len() {
        return None;
    }
    data[from..]
        .windows(pattern.len())
        .position(|window| window == pattern)
        .map(|position| position + from)
}

/// Offset of the last occurrence of `pattern`
#[must_use]
pub fn rfind(data: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() {
        return None;
    }
    data.windows(pattern.len())
        .rposition(|window| window == pattern)
}

/// A cursor over a byte slice.
pub struct Parser<'a> {
    /// The bytes being parsed
    data: &'a [u8],
    /// Current position within `data`
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a cursor at position 0
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Length of the underlying data
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if there is no data at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the cursor is before the end of the data
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Moves the cursor to `pos`; the end of the data is a valid position
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Moves forward by one byte
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn advance(&mut self) -> Result<()> {
        self.advance_by(1)
    }

    /// Moves forward by `step` bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that would pass the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if self.position + step > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position += step;
        Ok(())
    }

    /// Current position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The whole underlying data
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Data from the cursor to the end
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position.min(self.data.len())..]
    }

    /// Number of bytes left
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Returns the next byte without moving
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(out_of_bounds_error!());
        }
        Ok(self.data[self.position])
    }

    /// Reads one byte
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = self.peek_byte()?;
        self.position += 1;
        Ok(byte)
    }

    /// Reads `length` bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer bytes are left.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or_else(|| out_of_bounds_error!())?;
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Runs `f`, restoring the position if it fails
    ///
    /// # Errors
    /// Returns whatever `f` returns.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved_position;
        }
        result
    }

    /// Returns true if the data at the cursor starts with `pattern`
    #[must_use]
    pub fn starts_with(&self, pattern: &[u8]) -> bool {
        self.rest().starts_with(pattern)
    }

    /// Skips whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(byte) = self.data.get(self.position) {
            if is_whitespace(*byte) {
                self.position += 1;
            } else if *byte == b'%' {
                while let Some(byte) = self.data.get(self.position) {
                    if *byte == b'\r' || *byte == b'\n' {
                        break;
                    }
                    self.position += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Skips a single end-of-line marker (`\r\n`, `\n` or `\r`) if one is at the cursor
    pub fn skip_eol(&mut self) {
        if self.starts_with(b"\r\n") {
            self.position += 2;
        } else if self.starts_with(b"\n") || self.starts_with(b"\r") {
            self.position += 1;
        }
    }

    /// Reads the run of regular characters at the cursor, possibly empty
    pub fn read_regular(&mut self) -> &'a [u8] {
        let start = self.position;
        while self
            .data
            .get(self.position)
            .is_some_and(|byte| is_regular(*byte))
        {
            self.position += 1;
        }
        &self.data[start..self.position]
    }

    /// Skips whitespace and consumes `keyword`, which must end at a token boundary
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the next token is something else; the position
    /// is left unchanged.
    pub fn expect_keyword(&mut self, keyword: &[u8]) -> Result<()> {
        self.transactional(|parser| {
            parser.skip_whitespace();
            let at = parser.pos();
            let token = parser.read_regular();
            if token == keyword {
                Ok(())
            } else {
                Err(malformed_error!(
                    "Expected '{}' at offset {}, found '{}'",
                    String::from_utf8_lossy(keyword),
                    at,
                    String::from_utf8_lossy(token)
                ))
            }
        })
    }

    /// Skips whitespace and reads an unsigned decimal integer
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no integer is at the cursor; the position is
    /// left unchanged.
    pub fn read_unsigned(&mut self) -> Result<u64> {
        self.transactional(|parser| {
            parser.skip_whitespace();
            let at = parser.pos();
            let token = parser.read_regular();
            std::str::from_utf8(token)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
                .ok_or_else(|| malformed_error!("Expected an integer at offset {}", at))
        })
    }
}
