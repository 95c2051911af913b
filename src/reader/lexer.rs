//! Object syntax: turns bytes at a [`Parser`] position into values inside a tracker.

use crate::{
    file::{is_regular, is_whitespace, Parser},
    object::{Array, Dictionary, Name, NodeKind, ObjectId, Stream, Value, MAX_NESTING_DEPTH},
    tracker::Tracker,
    Result,
};

/// Parses one value; containers are allocated in `tracker`, detached.
///
/// # Errors
/// [`crate::Error::Malformed`] for anything that is not a value.
pub(crate) fn parse_value(parser: &mut Parser, tracker: &mut Tracker) -> Result<Value> {
    parse_nested(parser, tracker, 0)
}

fn parse_nested(parser: &mut Parser, tracker: &mut Tracker, depth: usize) -> Result<Value> {
    if depth > MAX_NESTING_DEPTH {
        return Err(malformed_error!("Objects nested deeper than {}", MAX_NESTING_DEPTH));
    }
    parser.skip_whitespace();
    let at = parser.pos();
    match parser.peek_byte()? {
        b'/' => {
            parser.advance()?;
            Ok(Value::Name(parse_name(parser.read_regular())))
        }
        b'(' => Ok(Value::String(parse_literal(parser)?)),
        b'<' if parser.starts_with(b"<<") => {
            parser.advance_by(2)?;
            let mut dict = Dictionary::new();
            loop {
                parser.skip_whitespace();
                if parser.starts_with(b">>") {
                    parser.advance_by(2)?;
                    break;
                }
                if parser.read_byte()? != b'/' {
                    return Err(malformed_error!(
                        "Dictionary key expected at offset {}",
                        parser.pos() - 1
                    ));
                }
                let key = parse_name(parser.read_regular());
                let value = parse_nested(parser, tracker, depth + 1)?;
                if let Some(Value::Node(replaced)) = dict.insert(key, value) {
                    tracker.free_subtree(replaced);
                }
            }
            Ok(Value::Node(tracker.alloc_node(NodeKind::Dictionary(dict))))
        }
        b'<' => Ok(Value::String(parse_hex(parser)?)),
        b'[' => {
            parser.advance()?;
            let mut items = Vec::new();
            loop {
                parser.skip_whitespace();
                if parser.peek_byte()? == b']' {
                    parser.advance()?;
                    break;
                }
                items.push(parse_nested(parser, tracker, depth + 1)?);
            }
            Ok(Value::Node(
                tracker.alloc_node(NodeKind::Array(Array::from_values(items))),
            ))
        }
        _ => {
            let token = parser.read_regular();
            match token {
                b"true" => Ok(Value::Boolean(true)),
                b"false" => Ok(Value::Boolean(false)),
                b"null" => Ok(Value::Null),
                _ => parse_number(parser, tracker, token, at),
            }
        }
    }
}

fn parse_number(parser: &mut Parser, tracker: &Tracker, token: &[u8], at: usize) -> Result<Value> {
    let text = std::str::from_utf8(token)
        .map_err(|_| malformed_error!("Unexpected bytes at offset {}", at))?;
    if text.is_empty() {
        return Err(malformed_error!("Unexpected delimiter at offset {}", at));
    }

    if !text.contains('.') {
        if let Ok(integer) = text.parse::<i64>() {
            if let Some(reference) = parse_reference_tail(parser, tracker, integer) {
                return Ok(reference);
            }
            return Ok(Value::Integer(integer));
        }
    }
    text.parse::<f64>()
        .map(Value::Real)
        .map_err(|_| malformed_error!("Unknown token '{}' at offset {}", text, at))
}

/// Completes `n g R` after the first integer has been read
fn parse_reference_tail(parser: &mut Parser, tracker: &Tracker, number: i64) -> Option<Value> {
    let number = u32::try_from(number).ok()?;
    parser
        .transactional(|parser| {
            let generation = parser.read_unsigned()?;
            let generation = u16::try_from(generation)
                .map_err(|_| malformed_error!("Generation {} out of range", generation))?;
            parser.expect_keyword(b"R")?;
            Ok(Value::Reference(
                tracker.handle(ObjectId::new(number, generation)),
            ))
        })
        .ok()
}

fn parse_name(raw: &[u8]) -> Name {
    let mut decoded = Vec::with_capacity(raw.len());
    let mut position = 0;
    while position < raw.len() {
        let byte = raw[position];
        if byte == b'#' {
            let escaped = raw
                .get(position + 1..position + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(escaped) = escaped {
                decoded.push(escaped);
                position += 3;
                continue;
            }
        }
        decoded.push(byte);
        position += 1;
    }
    Name::new(String::from_utf8_lossy(&decoded).into_owned())
}

fn parse_literal(parser: &mut Parser) -> Result<Vec<u8>> {
    let start = parser.pos();
    parser.advance()?;
    let mut bytes = Vec::new();
    let mut depth = 1usize;

    loop {
        let byte = parser
            .read_byte()
            .map_err(|_| malformed_error!("Unterminated string starting at offset {}", start))?;
        match byte {
            b'(' => {
                depth += 1;
                bytes.push(byte);
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(bytes);
                }
                bytes.push(byte);
            }
            b'\\' => {
                let escaped = parser.read_byte()?;
                match escaped {
                    b'n' => bytes.push(b'\n'),
                    b'r' => bytes.push(b'\r'),
                    b't' => bytes.push(b'\t'),
                    b'b' => bytes.push(0x08),
                    b'f' => bytes.push(0x0c),
                    b'\r' | b'\n' => {
                        if escaped == b'\r' && parser.starts_with(b"\n") {
                            parser.advance()?;
                        }
                    }
                    b'0'..=b'7' => {
                        let mut value = u32::from(escaped - b'0');
                        for _ in 0..2 {
                            match parser.peek_byte() {
                                Ok(digit @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(digit - b'0');
                                    parser.advance()?;
                                }
                                _ => break,
                            }
                        }
                        bytes.push((value & 0xff) as u8);
                    }
                    other => bytes.push(other),
                }
            }
            b'\r' => {
                if parser.starts_with(b"\n") {
                    parser.advance()?;
                }
                bytes.push(b'\n');
            }
            _ => bytes.push(byte),
        }
    }
}

fn parse_hex(parser: &mut Parser) -> Result<Vec<u8>> {
    let start = parser.pos();
    parser.advance()?;
    let mut digits = Vec::new();
    loop {
        let byte = parser
            .read_byte()
            .map_err(|_| malformed_error!("Unterminated hex string at offset {}", start))?;
        match byte {
            b'>' => break,
            _ if is_whitespace(byte) => {}
            b'0'..=b'9' => digits.push(byte - b'0'),
            b'a'..=b'f' => digits.push(byte - b'a' + 10),
            b'A'..=b'F' => digits.push(byte - b'A' + 10),
            _ => {
                return Err(malformed_error!(
                    "Invalid hex digit at offset {}",
                    parser.pos() - 1
                ))
            }
        }
    }
    if digits.len() % 2 == 1 {
        digits.push(0);
    }
    Ok(digits.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Parses `n g obj value [stream ... endstream] endobj`
///
/// # Errors
/// [`crate::Error::Malformed`] if the object header or body is damaged.
pub(crate) fn parse_indirect(parser: &mut Parser, tracker: &mut Tracker) -> Result<(ObjectId, Value)> {
    let number = parser.read_unsigned()?;
    let generation = parser.read_unsigned()?;
    parser.expect_keyword(b"obj")?;
    let id = ObjectId::new(
        u32::try_from(number).map_err(|_| malformed_error!("Object number {} out of range", number))?,
        u16::try_from(generation)
            .map_err(|_| malformed_error!("Generation {} out of range", generation))?,
    );

    let value = parse_value(parser, tracker)?;
    parser.skip_whitespace();
    if let Value::Node(node) = value {
        if parser.starts_with(b"stream") && !parser.rest().get(6).copied().is_some_and(is_regular) {
            parser.advance_by(6)?;
            read_stream_data(parser, tracker, node)?;
        }
    }
    if parser.expect_keyword(b"endobj").is_err() {
        log::trace!("object {} is missing endobj", id);
    }
    Ok((id, value))
}

/// Reads stream data and turns the dictionary `node` into a stream
fn read_stream_data(parser: &mut Parser, tracker: &mut Tracker, node: crate::object::NodeId) -> Result<()> {
    parser.skip_eol();
    let start = parser.pos();
    let declared = tracker
        .dictionary(node)?
        .get("Length")
        .and_then(Value::as_integer)
        .and_then(|length| usize::try_from(length).ok());

    let by_length = declared.filter(|length| {
        let mut probe = Parser::new(parser.data());
        probe.seek(start.saturating_add(*length)).is_ok() && probe.expect_keyword(b"endstream").is_ok()
    });

    let end = match by_length {
        Some(length) => start + length,
        None => {
            let marker = crate::file::find(parser.data(), b"endstream", start).ok_or_else(|| {
                malformed_error!("Stream at offset {} has no endstream", start)
            })?;
            let data = parser.data();
            let mut end = marker;
            if end > start && data[end - 1] == b'\n' {
                end -= 1;
            }
            if end > start && data[end - 1] == b'\r' {
                end -= 1;
            }
            end
        }
    };

    let data = parser.data()[start..end].to_vec();
    parser.seek(end)?;
    parser.expect_keyword(b"endstream")?;

    let entry = tracker.arena.get_mut(node)?;
    let NodeKind::Dictionary(dict) = std::mem::replace(&mut entry.kind, NodeKind::Array(Array::new())) else {
        return Err(malformed_error!("Stream keyword after a non-dictionary"));
    };
    entry.kind = NodeKind::Stream(Stream::new(dict, data));
    Ok(())
}
