//! Cross-reference encodings.
//!
//! Both encodings map every object number of the file to a [`SlotLocation`]:
//!
//! - the classic table, a run of fixed 20-byte text lines after the `xref` keyword
//! - the cross-reference stream, binary rows of three big-endian fields with widths
//!   `W [1 4 2]`; type 0 is free, type 1 an offset and type 2 a member of an object stream

use crate::Result;

/// Field widths of the rows this crate writes
pub const XREF_STREAM_WIDTHS: [usize; 3] = [1, 4, 2];

/// Where an object number lives in the written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotLocation {
    /// Not in use
    Free,
    /// Byte offset of `n 0 obj`
    Offset(u64),
    /// Member `index` of the object stream numbered `container`
    InStream {
        /// Object number of the object stream
        container: u32,
        /// Position inside the stream's pairs index
        index: u32,
    },
}

/// Appends `xref`, the single subsection header and one line per slot.
///
/// `slots[0]` is ignored; object 0 is always written as the head of the free list.
///
/// # Errors
/// [`crate::Error::Malformed`] if a slot points into an object stream, which the classic
/// table cannot express.
pub fn write_table(out: &mut Vec<u8>, slots: &[SlotLocation]) -> Result<()> {
    out.extend_from_slice(format!("xref\n0 {}\n", slots.len().max(1)).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f\r\n");
    for (number, slot) in slots.iter().enumerate().skip(1) {
        match slot {
            SlotLocation::Free => out.extend_from_slice(b"0000000000 00000 f\r\n"),
            SlotLocation::Offset(offset) => {
                out.extend_from_slice(format!("{:010} 00000 n\r\n", offset).as_bytes());
            }
            SlotLocation::InStream { .. } => {
                return Err(malformed_error!(
                    "Object {} is compressed but the index is a classic table",
                    number
                ))
            }
        }
    }
    Ok(())
}

/// Encodes the rows of a cross-reference stream with [`XREF_STREAM_WIDTHS`]
///
/// # Errors
/// [`crate::Error::Malformed`] if an offset or container number does not fit four bytes, or
/// a member index two.
pub fn stream_rows(slots: &[SlotLocation]) -> Result<Vec<u8>> {
    let mut rows = Vec::with_capacity(slots.len() * 7);
    for (number, slot) in slots.iter().enumerate() {
        let (kind, second, third): (u8, u64, u64) = match slot {
            _ if number == 0 => (0, 0, 65535),
            SlotLocation::Free => (0, 0, 0),
            SlotLocation::Offset(offset) => (1, *offset, 0),
            SlotLocation::InStream { container, index } => {
                (2, u64::from(*container), u64::from(*index))
            }
        };
        let (Ok(second), Ok(third)) = (u32::try_from(second), u16::try_from(third)) else {
            return Err(malformed_error!(
                "Location of object {} does not fit a [1 4 2] xref row",
                number
            ));
        };
        rows.push(kind);
        rows.extend_from_slice(&second.to_be_bytes());
        rows.extend_from_slice(&third.to_be_bytes());
    }
    Ok(rows)
}

/// Decodes cross-reference stream rows with arbitrary field widths.
///
/// A zero-width type field defaults to type 1, as the file format prescribes.
///
/// # Errors
/// [`crate::Error::Malformed`] for widths above eight bytes or a truncated last row.
pub fn parse_stream_rows(data: &[u8], widths: [usize; 3]) -> Result<Vec<(u64, u64, u64)>> {
    if widths.iter().any(|width| *width > 8) {
        return Err(malformed_error!("Unsupported xref field widths {:?}", widths));
    }
    let row_length: usize = widths.iter().sum();
    if row_length == 0 || data.len() % row_length != 0 {
        return Err(malformed_error!(
            "Xref stream of {} bytes does not hold rows of {} bytes",
            data.len(),
            row_length
        ));
    }

    let field = |bytes: &[u8]| bytes.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Ok(data
        .chunks(row_length)
        .map(|row| {
            let (kind, rest) = row.split_at(widths[0]);
            let (second, third) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { field(kind) };
            (kind, field(second), field(third))
        })
        .collect())
}
