//! FITS header card parsing, record templates and block serialisation.

use std::str;

use log::trace;

use crate::block::{pad_header, BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
use crate::error::{Error, Result};
use crate::value::{format_value, parse_value, Value};

// ── Types ──

/// A parsed FITS header card (one 80-byte keyword record).
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// The 8-byte keyword name, ASCII, left-justified, space-padded.
    pub keyword: [u8; 8],
    /// The parsed value, if this card has a value indicator (`= ` in bytes 8..10).
    pub value: Option<Value>,
    /// An optional comment string.
    pub comment: Option<String>,
}

impl Card {
    /// Build a value card from a keyword name.
    pub fn new(keyword: &str, value: Value, comment: Option<&str>) -> Self {
        Card {
            keyword: pad_keyword(keyword),
            value: Some(value),
            comment: comment.map(String::from),
        }
    }

    /// Return the keyword as a trimmed UTF-8 string.
    pub fn keyword_str(&self) -> &str {
        trimmed_keyword(&self.keyword)
    }

    /// Returns `true` if this card is the END keyword.
    pub fn is_end(&self) -> bool {
        &self.keyword == b"END     "
    }

    /// Returns `true` if this card carries a commentary keyword
    /// (COMMENT, HISTORY, or blank).
    pub fn is_commentary(&self) -> bool {
        is_commentary_keyword(&self.keyword)
    }
}

/// Left-justify `name` into an 8-byte space-padded keyword field.
///
/// Longer names are truncated.
pub fn pad_keyword(name: &str) -> [u8; 8] {
    let mut kw = [b' '; 8];
    for (dst, src) in kw.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    kw
}

/// The keyword of an 80-byte record with trailing blanks removed.
pub fn trimmed_keyword(card: &[u8]) -> &str {
    let field = &card[..card.len().min(8)];
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    str::from_utf8(&field[..end]).unwrap_or("")
}

// ── Parsing ──

/// Keywords that never carry a value indicator. Their bytes 8..80 are free-form text.
const COMMENTARY_KEYWORDS: [&[u8; 8]; 3] = [b"COMMENT ", b"HISTORY ", b"        "];

fn is_commentary_keyword(keyword: &[u8; 8]) -> bool {
    COMMENTARY_KEYWORDS.contains(&keyword)
}

fn valid_keyword_byte(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_')
}

/// Free text in bytes 8..80, or `None` when blank.
fn text_after_keyword(card_bytes: &[u8; CARD_SIZE]) -> Result<Option<String>> {
    let text = str::from_utf8(&card_bytes[8..])
        .map_err(|_| Error::header("card is not ASCII"))?
        .trim_end();
    Ok((!text.is_empty()).then(|| String::from(text)))
}

/// Parse a single 80-byte FITS header card.
pub fn parse_card(card_bytes: &[u8; CARD_SIZE]) -> Result<Card> {
    let mut keyword = [b' '; 8];
    keyword.copy_from_slice(&card_bytes[..8]);

    if !keyword.iter().all(|&b| valid_keyword_byte(b)) {
        return Err(Error::header(format!(
            "invalid keyword {:?}",
            String::from_utf8_lossy(&keyword)
        )));
    }

    if &keyword == b"END     " {
        return Ok(Card {
            keyword,
            value: None,
            comment: None,
        });
    }

    if is_commentary_keyword(&keyword) || &card_bytes[8..10] != b"= " {
        let comment = text_after_keyword(card_bytes)?;
        return Ok(Card {
            keyword,
            value: None,
            comment,
        });
    }

    let value_field = &card_bytes[10..];
    match parse_value(value_field) {
        Some((val, comment)) => Ok(Card {
            keyword,
            value: Some(val),
            comment: comment.map(String::from),
        }),
        None => {
            // Undefined value, possibly followed by a comment.
            let field = str::from_utf8(value_field)
                .map_err(|_| Error::header("card is not ASCII"))?;
            let comment = field
                .split_once('/')
                .map(|(_, c)| c.trim().to_string())
                .filter(|c| !c.is_empty());
            Ok(Card {
                keyword,
                value: None,
                comment,
            })
        }
    }
}

/// Raw cards of one header, up to but excluding END.
#[derive(Debug, Clone)]
pub struct RawHeader {
    /// Each 80-byte record in file order.
    pub cards: Vec<[u8; CARD_SIZE]>,
    /// Bytes consumed by the header, always a multiple of [`BLOCK_SIZE`].
    pub byte_len: usize,
}

/// Scan 2880-byte header blocks starting at `data[0]` until the END card.
///
/// Fails with a header error when the blocks run out before END.
pub fn scan_header(data: &[u8]) -> Result<RawHeader> {
    if data.len() < BLOCK_SIZE {
        return Err(Error::header("truncated header block"));
    }

    let mut cards = Vec::new();
    let num_blocks = data.len() / BLOCK_SIZE;

    for block_idx in 0..num_blocks {
        let block = &data[block_idx * BLOCK_SIZE..(block_idx + 1) * BLOCK_SIZE];
        for chunk in block.chunks_exact(CARD_SIZE) {
            let mut card = [b' '; CARD_SIZE];
            card.copy_from_slice(chunk);
            if &card[..8] == b"END     " {
                return Ok(RawHeader {
                    cards,
                    byte_len: (block_idx + 1) * BLOCK_SIZE,
                });
            }
            cards.push(card);
        }
    }

    Err(Error::header(format!(
        "no END card in {} header block(s)",
        num_blocks
    )))
}

// ── Record templates ──

/// Normalise a free-form record template into a canonical 80-byte card.
///
/// Accepted forms are `KEY = value / comment`, `KEY value / comment`,
/// `COMMENT text`, `HISTORY text` and a blank line. Keywords are upper-cased.
/// Values may be quoted strings, `T`/`F`, integers, reals, complex pairs, or
/// bare words (stored as strings).
pub fn parse_template(template: &str) -> Result<Card> {
    if !template.is_ascii() {
        return Err(Error::Validation(format!("non-ASCII record: {template:?}")));
    }
    let text = template.trim_end_matches(['\n', '\r']);
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Card {
            keyword: [b' '; 8],
            value: None,
            comment: None,
        });
    }

    let key_end = trimmed
        .find(|c: char| c == ' ' || c == '=' || c == '\t')
        .unwrap_or(trimmed.len());
    let name = trimmed[..key_end].to_ascii_uppercase();
    let rest = &trimmed[key_end..];

    if name.len() > 8 {
        return Err(Error::Validation(format!("keyword {name} longer than 8 characters")));
    }
    if !name.bytes().all(valid_keyword_byte) {
        return Err(Error::Validation(format!("invalid keyword {name:?}")));
    }
    if name == "END" {
        return Err(Error::Validation(String::from("END is not a record")));
    }

    let keyword = pad_keyword(&name);

    if name == "COMMENT" || name == "HISTORY" {
        let body = rest.strip_prefix(' ').unwrap_or(rest).trim_end();
        return Ok(Card {
            keyword,
            value: None,
            comment: (!body.is_empty()).then(|| body.to_string()),
        });
    }

    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();
    if rest.is_empty() {
        return Ok(Card {
            keyword,
            value: None,
            comment: None,
        });
    }
    if let Some(comment) = rest.strip_prefix('/') {
        let comment = comment.trim();
        return Ok(Card {
            keyword,
            value: None,
            comment: (!comment.is_empty()).then(|| comment.to_string()),
        });
    }

    let (value, comment) = template_value(rest)?;
    let card = Card {
        keyword,
        value: Some(value),
        comment,
    };
    trace!("template {template:?} -> {:?}", card.value);
    Ok(card)
}

/// Split a template value region into a typed value and comment.
fn template_value(rest: &str) -> Result<(Value, Option<String>)> {
    let bytes = rest.as_bytes();
    if bytes[0] == b'\'' {
        if !bytes[1..].contains(&b'\'') {
            return Err(Error::Validation(format!("unterminated string in {rest:?}")));
        }
        return match parse_value(bytes) {
            Some((v, c)) => Ok((v, c.map(String::from))),
            None => Err(Error::Validation(format!("cannot parse {rest:?}"))),
        };
    }

    let (val_text, comment) = match rest.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim()).filter(|c| !c.is_empty())),
        None => (rest.trim(), None),
    };
    // Typed parse goes through the card value parser; bare words become strings.
    let value = match parse_value(val_text.as_bytes()) {
        Some((v, _)) => v,
        None if val_text.starts_with('(') => {
            return Err(Error::Validation(format!("malformed complex value {val_text:?}")))
        }
        None => Value::String(val_text.to_string()),
    };
    Ok((value, comment.map(String::from)))
}

/// Normalise a template straight to its canonical card text.
pub fn normalize_record(template: &str) -> Result<[u8; CARD_SIZE]> {
    parse_template(template).map(|card| format_card(&card))
}

// ── Writing ──

/// Serialize a [`Card`] into an 80-byte FITS card image.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..8].copy_from_slice(&card.keyword);

    match (&card.value, &card.comment) {
        (Some(value), comment) => {
            buf[8] = b'=';
            buf[9] = b' ';
            let mut field = format_value(value);
            if let Some(comment) = comment {
                insert_comment(&mut field, comment);
            }
            buf[10..].copy_from_slice(&field);
        }
        (None, Some(comment)) if card.is_commentary() => {
            let bytes = comment.as_bytes();
            let len = bytes.len().min(72);
            buf[8..8 + len].copy_from_slice(&bytes[..len]);
        }
        (None, Some(comment)) => {
            // Keyword with an undefined value.
            buf[8] = b'=';
            buf[9] = b' ';
            let text = format!("{:>20} / {}", "", comment);
            let bytes = text.as_bytes();
            let len = bytes.len().min(70);
            buf[10..10 + len].copy_from_slice(&bytes[..len]);
        }
        (None, None) => {}
    }
    buf
}

/// Insert a ` / comment` string into a 70-byte value field.
fn insert_comment(field: &mut [u8; 70], comment: &str) {
    let content_end = if field[0] == b'\'' {
        let mut i = 1;
        loop {
            if i >= 70 {
                break i;
            }
            if field[i] == b'\'' {
                if i + 1 < 70 && field[i + 1] == b'\'' {
                    i += 2;
                } else {
                    break i + 1;
                }
            } else {
                i += 1;
            }
        }
    } else {
        field.iter().rposition(|&b| b != b' ').map_or(20, |i| (i + 1).max(20))
    };

    let sep_start = content_end + 1;
    if sep_start + 3 >= 70 {
        return;
    }
    field[sep_start] = b'/';
    field[sep_start + 1] = b' ';

    let comment_start = sep_start + 2;
    let bytes = comment.as_bytes();
    let len = bytes.len().min(70 - comment_start);
    field[comment_start..comment_start + len].copy_from_slice(&bytes[..len]);
}

/// Create the standard FITS END card.
pub fn format_end_card() -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..3].copy_from_slice(b"END");
    buf
}

/// Serialize records into complete header blocks.
///
/// Appends the END card and pads the final block with spaces.
pub fn serialize_header(cards: &[[u8; CARD_SIZE]]) -> Vec<u8> {
    let blocks = (cards.len() + 1).div_ceil(CARDS_PER_BLOCK);
    let mut buf = Vec::with_capacity(blocks * BLOCK_SIZE);
    for card in cards {
        buf.extend_from_slice(card);
    }
    buf.extend_from_slice(&format_end_card());
    pad_header(&mut buf);
    buf
}

// ── Tests ──
