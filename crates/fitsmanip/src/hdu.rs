//! Header-data units: the payload sum type and the block-stream parser.
//!
//! A FITS stream is a primary HDU followed by any number of extensions.
//! Each HDU is a header (a run of 2880-byte blocks ending with `END`)
//! followed by a data section padded to a block boundary. The parser
//! walks the stream once, decoding image and table payloads as it goes.

use std::io::Write;

use log::{debug, warn};

use crate::block::{padded_byte_len, CARD_SIZE};
use crate::error::{Error, Result};
use crate::header::{format_card, scan_header, serialize_header, Card};
use crate::image::{Bitpix, Image, Scaling};
use crate::keylist::KeyList;
use crate::table::{Table, TableKind};
use crate::value::Value;

/// What an HDU carries. The tag always matches the data.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Primary array or `IMAGE` extension.
    Image(Image),
    /// `TABLE` extension.
    AsciiTable(Table),
    /// `BINTABLE` extension.
    BinaryTable(Table),
    /// Anything the reader could not decode. Only the header is kept.
    Unknown,
}

impl Payload {
    /// Short label used in listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Image(_) => "IMAGE",
            Payload::AsciiTable(_) => "TABLE",
            Payload::BinaryTable(_) => "BINTABLE",
            Payload::Unknown => "UNKNOWN",
        }
    }
}

/// One header-data unit: its keyword list and payload.
#[derive(Debug, Clone)]
pub struct Hdu {
    keys: KeyList,
    payload: Payload,
}

impl Hdu {
    pub fn new(keys: KeyList, payload: Payload) -> Self {
        Hdu { keys, payload }
    }

    /// An image HDU with an empty keyword list.
    pub fn from_image(image: Image) -> Self {
        Hdu::new(KeyList::new(), Payload::Image(image))
    }

    pub fn keys(&self) -> &KeyList {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut KeyList {
        &mut self.keys
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn image(&self) -> Option<&Image> {
        match &self.payload {
            Payload::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn image_mut(&mut self) -> Option<&mut Image> {
        match &mut self.payload {
            Payload::Image(img) => Some(img),
            _ => None,
        }
    }

    /// The table of an ASCII or binary table HDU.
    pub fn table(&self) -> Option<&Table> {
        match &self.payload {
            Payload::AsciiTable(t) | Payload::BinaryTable(t) => Some(t),
            _ => None,
        }
    }

    /// `EXTNAME`, when present.
    pub fn extname(&self) -> Option<String> {
        self.keys.find_value("EXTNAME")
    }

    /// Serialize the HDU: a regenerated header and the padded data block.
    ///
    /// Only images can be written; the mandatory keys come from the image
    /// itself and only emitted keyword classes are copied from the list.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W, primary: bool) -> Result<()> {
        let Payload::Image(img) = &self.payload else {
            return Err(Error::Unsupported(format!(
                "writing {} HDUs",
                self.payload.kind()
            )));
        };
        let mut cards = Vec::with_capacity(8 + img.naxis() + self.keys.len());
        if primary {
            cards.push(value_card(
                "SIMPLE",
                Value::Logical(true),
                Some("conforms to FITS standard"),
            ));
        } else {
            cards.push(value_card(
                "XTENSION",
                Value::String(String::from("IMAGE")),
                Some("image extension"),
            ));
        }
        cards.push(value_card("BITPIX", Value::Integer(img.bitpix().code()), None));
        cards.push(value_card("NAXIS", Value::Integer(img.naxis() as i64), None));
        for (i, &n) in img.naxes().iter().enumerate() {
            let key = format!("NAXIS{}", i + 1);
            cards.push(value_card(&key, Value::Integer(n as i64), None));
        }
        if primary {
            cards.push(value_card("EXTEND", Value::Logical(true), None));
        } else {
            cards.push(value_card("PCOUNT", Value::Integer(0), None));
            cards.push(value_card("GCOUNT", Value::Integer(1), None));
        }
        let (scaling, data) = img.encode();
        cards.extend(scaling);
        cards.extend(self.keys.emitted().map(|r| r.card_bytes()));

        out.write_all(&serialize_header(&cards))?;
        out.write_all(&data)?;
        Ok(())
    }
}

fn value_card(key: &str, value: Value, comment: Option<&str>) -> [u8; CARD_SIZE] {
    format_card(&Card::new(key, value, comment))
}

/// Where an HDU sits in the stream and what its header says it holds.
#[derive(Debug)]
enum Extension {
    Primary,
    Image,
    Ascii,
    Binary,
    Other(String),
}

fn axis(keys: &KeyList, key: &str) -> Result<usize> {
    let n = keys.integer(key).map_err(|e| match e {
        Error::KeyNotFound(k) => Error::header(format!("missing {k}")),
        other => other,
    })?;
    usize::try_from(n).map_err(|_| Error::header(format!("{key} = {n} is negative")))
}

fn naxes(keys: &KeyList) -> Result<Vec<usize>> {
    let naxis = axis(keys, "NAXIS")?;
    if naxis > 999 {
        return Err(Error::header(format!("NAXIS = {naxis} exceeds 999")));
    }
    (1..=naxis).map(|i| axis(keys, &format!("NAXIS{i}"))).collect()
}

fn optional_count(keys: &KeyList, key: &str, default: usize) -> Result<usize> {
    match keys.integer(key) {
        Ok(v) => usize::try_from(v).map_err(|_| Error::header(format!("{key} = {v} is negative"))),
        Err(Error::KeyNotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

/// Byte length of the data section, unpadded:
/// `|BITPIX| / 8 * GCOUNT * (PCOUNT + NAXIS1 * ... * NAXISn)`.
///
/// Random groups skip the zero NAXIS1.
fn data_len(keys: &KeyList, ext: &Extension) -> Result<usize> {
    let bitpix = keys.integer("BITPIX").map_err(|_| Error::header("missing BITPIX"))?;
    let width = (bitpix.unsigned_abs() / 8) as usize;
    let axes = naxes(keys)?;
    if axes.is_empty() {
        return Ok(0);
    }
    let groups = matches!(ext, Extension::Primary)
        && axes[0] == 0
        && keys.logical("GROUPS").unwrap_or(false);
    let dims = if groups { &axes[1..] } else { &axes[..] };
    let overflow = || Error::header("data size overflows");
    let product = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(overflow)?;
    if product == 0 && !groups {
        return Ok(0);
    }
    let (pcount, gcount) = match ext {
        Extension::Primary if !groups => (0, 1),
        _ => (
            optional_count(keys, "PCOUNT", 0)?,
            optional_count(keys, "GCOUNT", 1)?.max(1),
        ),
    };
    product
        .checked_add(pcount)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(overflow)
}

fn extension_of(keys: &KeyList, first: bool) -> Result<Extension> {
    if first {
        return match keys.logical("SIMPLE") {
            Ok(_) => Ok(Extension::Primary),
            Err(_) => Err(Error::header("first HDU does not start with SIMPLE")),
        };
    }
    let xt = keys
        .string("XTENSION")
        .map_err(|_| Error::header("extension without XTENSION"))?;
    Ok(match xt.trim_end() {
        "IMAGE" => Extension::Image,
        "TABLE" => Extension::Ascii,
        "BINTABLE" => Extension::Binary,
        other => Extension::Other(other.to_string()),
    })
}

fn decode_payload(keys: &KeyList, ext: &Extension, data: &[u8]) -> Result<Payload> {
    match ext {
        Extension::Primary | Extension::Image => {
            if matches!(ext, Extension::Primary) && keys.logical("GROUPS").unwrap_or(false) {
                return Err(Error::Unsupported(String::from("random groups")));
            }
            let bitpix = Bitpix::from_code(
                keys.integer("BITPIX").map_err(|_| Error::header("missing BITPIX"))?,
            )?;
            let axes = naxes(keys)?;
            let scaling = Scaling::from_keys(keys)?;
            Image::decode(&axes, bitpix, &scaling, data).map(Payload::Image)
        }
        Extension::Ascii => Table::read(keys, TableKind::Ascii, data).map(Payload::AsciiTable),
        Extension::Binary => {
            if keys.logical("ZIMAGE").unwrap_or(false) {
                return Err(Error::Unsupported(String::from("tile-compressed images")));
            }
            Table::read(keys, TableKind::Binary, data).map(Payload::BinaryTable)
        }
        Extension::Other(name) => Err(Error::UnsupportedExtension(name.clone())),
    }
}

/// Parse every HDU of an in-memory FITS stream.
///
/// The first HDU must be readable; its errors are returned. A later HDU
/// whose payload fails to decode is kept as [`Payload::Unknown`], and
/// parsing stops at the first later HDU whose extent cannot be determined.
pub fn parse_hdus(data: &[u8]) -> Result<Vec<Hdu>> {
    let mut hdus: Vec<Hdu> = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let n = hdus.len() + 1;
        let first = hdus.is_empty();
        let remaining = &data[offset..];
        if !first && remaining.iter().all(|&b| b == 0 || b == b' ') {
            break;
        }

        let raw = match scan_header(remaining) {
            Ok(raw) => raw,
            Err(e) if first => return Err(e.at_hdu(n)),
            Err(e) => {
                warn!("stopping before HDU {n}: {}", e.at_hdu(n));
                break;
            }
        };
        let keys = match KeyList::from_cards(&raw.cards) {
            Ok(keys) => keys,
            Err(e) if first => return Err(e.at_hdu(n)),
            Err(e) => {
                let (keys, dropped) = KeyList::from_cards_lossy(&raw.cards);
                warn!("HDU {n}: {} ({dropped} card(s) dropped)", e.at_hdu(n));
                keys
            }
        };

        let extent = extension_of(&keys, first)
            .and_then(|ext| data_len(&keys, &ext).map(|len| (ext, len)));
        let (ext, len) = match extent {
            Ok(v) => v,
            Err(e) if first => return Err(e.at_hdu(n)),
            Err(e) => {
                warn!("HDU {n} has no usable layout, keeping its header only: {}", e.at_hdu(n));
                hdus.push(Hdu::new(keys, Payload::Unknown));
                break;
            }
        };

        let data_start = offset + raw.byte_len;
        let body = &data[data_start.min(data.len())..];
        debug!("HDU {n}: {ext:?}, {} header bytes, {len} data bytes", raw.byte_len);

        let payload = match decode_payload(&keys, &ext, body) {
            Ok(p) => p,
            Err(Error::BufferAllocation { bytes }) => {
                return Err(Error::BufferAllocation { bytes });
            }
            Err(e) if first && !matches!(e, Error::Unsupported(_)) => return Err(e.at_hdu(n)),
            Err(e) => {
                warn!("HDU {n} kept as unknown: {}", e.at_hdu(n));
                Payload::Unknown
            }
        };
        hdus.push(Hdu::new(keys, payload));

        // Trailing padding of the last HDU may be missing.
        if body.len() < len {
            if data_start + len > data.len() {
                warn!("HDU {n}: data section truncated, stopping");
            }
            break;
        }
        offset = data_start + padded_byte_len(len);
    }

    if hdus.is_empty() {
        return Err(Error::header("no HDU found"));
    }
    Ok(hdus)
}
