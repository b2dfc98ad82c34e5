//! Ordered keyword store for one HDU header.
//!
//! Records keep their 80-character card text verbatim together with a
//! [`KeyClass`] that decides whether the writer re-emits them. Lookups by
//! exact key go through a hash index from upper-cased key to the first
//! matching position; the index is rebuilt after removals.

use std::collections::HashMap;
use std::fmt;

use log::trace;

use crate::block::CARD_SIZE;
use crate::error::{Error, Result};
use crate::header::{
    format_card, normalize_record, parse_card, parse_template, scan_header, trimmed_keyword,
    Card,
};
use crate::value::{parse_value, Value};

/// Taxonomy of header keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// `SIMPLE`, `XTENSION`, `BITPIX`, `NAXIS`, `NAXISn`, `END`.
    Mandatory,
    /// Layout and scaling keys regenerated by the codec.
    Structural,
    /// Tile-compression bookkeeping (`Z*`).
    Compressed,
    /// World coordinate system keys.
    Wcs,
    /// `COMMENT` and blank-keyword records.
    Comment,
    /// `HISTORY` records.
    History,
    /// Everything else.
    User,
}

/// `key` is `prefix` followed by one or more digits.
fn indexed(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// `key` is `prefix` followed by `i_j` (digits on both sides of the underscore).
fn matrix(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.split_once('_'))
        .is_some_and(|(i, j)| {
            !i.is_empty()
                && !j.is_empty()
                && i.bytes().all(|b| b.is_ascii_digit())
                && j.bytes().all(|b| b.is_ascii_digit())
        })
}

/// WCS keys may carry a trailing alternate-description letter.
fn strip_alternate(key: &str) -> &str {
    match key.as_bytes().last() {
        Some(b) if b.is_ascii_uppercase() && key.len() > 1 => &key[..key.len() - 1],
        _ => key,
    }
}

impl KeyClass {
    /// Classify a trimmed, upper-case keyword.
    pub fn of(key: &str) -> Self {
        match key {
            "SIMPLE" | "XTENSION" | "BITPIX" | "NAXIS" | "END" => return KeyClass::Mandatory,
            "COMMENT" | "" => return KeyClass::Comment,
            "HISTORY" => return KeyClass::History,
            "PCOUNT" | "GCOUNT" | "GROUPS" | "EXTEND" | "TFIELDS" | "THEAP" | "BZERO"
            | "BSCALE" | "BLANK" | "CHECKSUM" | "DATASUM" => return KeyClass::Structural,
            "ZIMAGE" | "ZCMPTYPE" | "ZBITPIX" | "ZNAXIS" | "ZSIMPLE" | "ZTENSION" | "ZEXTEND"
            | "ZBLOCKED" | "ZPCOUNT" | "ZGCOUNT" | "ZHECKSUM" | "ZDATASUM" | "ZQUANTIZ"
            | "ZDITHER0" => return KeyClass::Compressed,
            "WCSAXES" | "LONPOLE" | "LATPOLE" | "EQUINOX" | "EPOCH" | "RADESYS" | "RADECSYS" => {
                return KeyClass::Wcs
            }
            _ => {}
        }
        if indexed(key, "NAXIS") {
            return KeyClass::Mandatory;
        }
        const TABLE: [&str; 9] = [
            "TFORM", "TBCOL", "TTYPE", "TUNIT", "TNULL", "TZERO", "TSCAL", "TDIM", "TDISP",
        ];
        if TABLE.iter().any(|p| indexed(key, p)) {
            return KeyClass::Structural;
        }
        if ["ZNAXIS", "ZTILE", "ZNAME", "ZVAL"]
            .iter()
            .any(|p| indexed(key, p))
        {
            return KeyClass::Compressed;
        }
        let base = strip_alternate(key);
        if ["CRPIX", "CRVAL", "CDELT", "CTYPE", "CUNIT", "CROTA"]
            .iter()
            .any(|p| indexed(key, p) || indexed(base, p))
            || ["PC", "CD", "PV", "PS"]
                .iter()
                .any(|p| matrix(key, p) || matrix(base, p))
            || (base != key
                && ["WCSAXES", "LONPOLE", "LATPOLE", "EQUINOX", "RADESYS"].contains(&base))
        {
            return KeyClass::Wcs;
        }
        KeyClass::User
    }

    /// Whether the writer copies records of this class into the output header.
    pub fn is_emitted(self) -> bool {
        matches!(
            self,
            KeyClass::User | KeyClass::Comment | KeyClass::History | KeyClass::Wcs
        )
    }
}

/// One header record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    text: String,
    class: KeyClass,
}

impl Record {
    /// Build a record from an 80-byte card image.
    fn from_card(card: &[u8; CARD_SIZE]) -> Result<Self> {
        let text = std::str::from_utf8(card)
            .map_err(|_| Error::Validation(String::from("record is not ASCII")))?
            .to_string();
        let class = KeyClass::of(trimmed_keyword(card));
        Ok(Record { text, class })
    }

    /// The full 80-character card text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The keyword without trailing blanks.
    pub fn key(&self) -> &str {
        trimmed_keyword(self.text.as_bytes())
    }

    pub fn class(&self) -> KeyClass {
        self.class
    }

    /// The card bytes, as stored.
    pub fn card_bytes(&self) -> [u8; CARD_SIZE] {
        let mut card = [b' '; CARD_SIZE];
        let bytes = self.text.as_bytes();
        let len = bytes.len().min(CARD_SIZE);
        card[..len].copy_from_slice(&bytes[..len]);
        card
    }

    /// Parse the stored text as a card.
    pub fn card(&self) -> Result<Card> {
        parse_card(&self.card_bytes())
    }

    /// Typed value, if the record has a parseable one.
    pub fn value(&self) -> Option<Value> {
        self.card().ok().and_then(|c| c.value)
    }

    /// Value text with string quotes and trailing blanks removed.
    pub fn value_text(&self) -> Option<String> {
        let bytes = self.text.as_bytes();
        if bytes.get(8..10) != Some(&b"= "[..])
            || matches!(self.class, KeyClass::Comment | KeyClass::History)
        {
            return None;
        }
        let field = &bytes[10..];
        match parse_value(field)? {
            (Value::String(s), _) => Some(s),
            _ => {
                let text = std::str::from_utf8(field).ok()?;
                let end = text.find(" /").unwrap_or(text.len());
                Some(text[..end].trim().to_string())
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text.trim_end())
    }
}

/// Ordered list of header records with a key index.
#[derive(Debug, Clone, Default)]
pub struct KeyList {
    records: Vec<Record>,
    index: HashMap<String, usize>,
}

impl KeyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from raw header cards (without END).
    ///
    /// Every card must parse; the first bad one is reported.
    pub fn from_cards(cards: &[[u8; CARD_SIZE]]) -> Result<Self> {
        let mut list = KeyList::new();
        list.records.reserve(cards.len());
        for (i, card) in cards.iter().enumerate() {
            parse_card(card).map_err(|e| match e {
                Error::MalformedHeader { reason, .. } => {
                    Error::header(format!("card {}: {reason}", i + 1))
                }
                other => other,
            })?;
            list.push(Record::from_card(card)?);
        }
        Ok(list)
    }

    /// Build a list from the cards that parse, returning how many were dropped.
    pub(crate) fn from_cards_lossy(cards: &[[u8; CARD_SIZE]]) -> (Self, usize) {
        let mut list = KeyList::new();
        let mut dropped = 0;
        for card in cards {
            match parse_card(card).and_then(|_| Record::from_card(card)) {
                Ok(rec) => {
                    list.push(rec);
                }
                Err(_) => dropped += 1,
            }
        }
        (list, dropped)
    }

    /// Scan and parse one header from `data`, which must start at a block boundary.
    pub fn read(data: &[u8]) -> Result<Self> {
        let raw = scan_header(data)?;
        KeyList::from_cards(&raw.cards)
    }

    fn push(&mut self, record: Record) -> usize {
        let pos = self.records.len();
        self.index
            .entry(record.key().to_ascii_uppercase())
            .or_insert(pos);
        self.records.push(record);
        pos
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, rec) in self.records.iter().enumerate() {
            self.index.entry(rec.key().to_ascii_uppercase()).or_insert(pos);
        }
    }

    /// Append a record.
    ///
    /// With `validate` the text is normalised through the record template
    /// parser first and malformed records are rejected; otherwise the text is
    /// stored as-is, padded or truncated to 80 characters, and only a keyword
    /// outside `A-Z 0-9 - _` is refused.
    pub fn add(&mut self, text: &str, validate: bool) -> Result<&Record> {
        let card = if validate {
            normalize_record(text)?
        } else {
            if !text.is_ascii() {
                return Err(Error::Validation(format!("non-ASCII record: {text:?}")));
            }
            let mut card = [b' '; CARD_SIZE];
            let len = text.len().min(CARD_SIZE);
            card[..len].copy_from_slice(&text.as_bytes()[..len]);
            // The reader refuses anything but the FITS keyword alphabet.
            parse_card(&card).map_err(|e| Error::Validation(format!("{text:?}: {e}")))?;
            card
        };
        let record = Record::from_card(&card)?;
        trace!("add record {:?} ({:?})", record.key(), record.class);
        let pos = self.push(record);
        Ok(&self.records[pos])
    }

    /// Append a card built by the codec.
    pub fn add_card(&mut self, card: &Card) -> Result<&Record> {
        let record = Record::from_card(&format_card(card))?;
        let pos = self.push(record);
        Ok(&self.records[pos])
    }

    /// First record whose key equals `key`, ignoring case.
    pub fn find(&self, key: &str) -> Option<&Record> {
        self.index
            .get(&key.trim().to_ascii_uppercase())
            .map(|&pos| &self.records[pos])
    }

    /// First record whose text starts with `prefix`, ignoring case.
    pub fn find_prefix(&self, prefix: &str) -> Option<&Record> {
        let n = prefix.len();
        self.records.iter().find(|r| {
            r.text
                .get(..n)
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
    }

    /// Value text of the first record with `key`.
    pub fn find_value(&self, key: &str) -> Option<String> {
        self.find(key).and_then(Record::value_text)
    }

    fn typed<T>(&self, key: &str, what: &str, get: impl FnOnce(&Value) -> Option<T>) -> Result<T> {
        let rec = self
            .find(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        rec.value()
            .as_ref()
            .and_then(get)
            .ok_or_else(|| Error::Validation(format!("{} is not {what}", rec.key())))
    }

    pub fn integer(&self, key: &str) -> Result<i64> {
        self.typed(key, "an integer", Value::as_integer)
    }

    pub fn float(&self, key: &str) -> Result<f64> {
        self.typed(key, "a number", Value::as_float)
    }

    pub fn string(&self, key: &str) -> Result<String> {
        self.typed(key, "a string", |v| match v {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn logical(&self, key: &str) -> Result<bool> {
        self.typed(key, "a logical", |v| match v {
            Value::Logical(b) => Some(*b),
            _ => None,
        })
    }

    /// Rewrite the value of the first record with `key` in canonical form.
    ///
    /// The old comment is kept unless `new_value` carries its own `/ comment`.
    pub fn modify(&mut self, key: &str, new_value: &str) -> Result<&Record> {
        let pos = *self
            .index
            .get(&key.trim().to_ascii_uppercase())
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        let old = self.records[pos].card().ok();
        let name = self.records[pos].key().to_string();
        let mut card = parse_template(&format!("{name} = {new_value}"))?;
        if card.comment.is_none() {
            card.comment = old.and_then(|c| c.comment);
        }
        self.records[pos] = Record::from_card(&format_card(&card))?;
        Ok(&self.records[pos])
    }

    /// Remove every record whose key equals `key` (ignoring case).
    ///
    /// Returns the number of records removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let key = key.trim().to_ascii_uppercase();
        self.remove_where(|r| r.key().eq_ignore_ascii_case(&key))
    }

    /// Remove every record whose text contains `needle`.
    pub fn remove_by_substring(&mut self, needle: &str) -> usize {
        self.remove_where(|r| r.text.contains(needle))
    }

    fn remove_where(&mut self, pred: impl Fn(&Record) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !pred(r));
        let removed = before - self.records.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    /// The last record, if any.
    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Class tag of a record.
    pub fn classify(rec: &Record) -> KeyClass {
        rec.class
    }

    /// Records the writer copies into a regenerated header.
    pub fn emitted(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.class.is_emitted())
    }
}

impl<'a> IntoIterator for &'a KeyList {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for KeyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rec in &self.records {
            writeln!(f, "{rec}")?;
        }
        Ok(())
    }
}
