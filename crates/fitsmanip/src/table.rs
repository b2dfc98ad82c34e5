//! Read-only ASCII (`TABLE`) and binary (`BINTABLE`) table extensions.
//!
//! Columns are loaded whole. Scalar columns keep their cells as a host-order
//! byte buffer of `width * repeat * nrows` bytes, read through the typed
//! [`Column::values`]; character columns keep one string per row.

use core::fmt;

use bytemuck::{pod_collect_to_vec, Pod};
use log::{debug, warn};

use crate::endian::swap_be_in_place;
use crate::error::{Error, Result};
use crate::image::try_alloc;
use crate::keylist::KeyList;

/// Which extension the table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Ascii,
    Binary,
}

/// Element type of a column after the TZERO unsigned conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `X`, bits packed most significant first.
    Bit,
    /// `L`, one byte per value: 1 for true, 0 otherwise.
    Logical,
    /// `B`.
    Byte,
    /// `B` with TZERO = -128.
    SByte,
    /// `I`.
    Short,
    /// `I` with TZERO = 32768.
    UShort,
    /// `J`.
    Int,
    /// `J` with TZERO = 2147483648.
    UInt,
    /// `K`, or an ASCII `Iw` field.
    Long,
    /// `K` with TZERO = 9223372036854775808.
    ULong,
    /// `E`.
    Float,
    /// `D`, or an ASCII `Fw.d`/`Ew.d`/`Dw.d` field.
    Double,
    /// `C`, pairs of f32.
    Complex,
    /// `M`, pairs of f64.
    DblComplex,
    /// `A`.
    String,
    /// `P`, 32-bit (count, heap offset) pairs.
    Descriptor32,
    /// `Q`, 64-bit (count, heap offset) pairs.
    Descriptor64,
}

impl ColumnType {
    /// Bytes per element in memory (`datatype_size`).
    pub fn size(self) -> usize {
        match self {
            ColumnType::Bit
            | ColumnType::Logical
            | ColumnType::Byte
            | ColumnType::SByte
            | ColumnType::String => 1,
            ColumnType::Short | ColumnType::UShort => 2,
            ColumnType::Int | ColumnType::UInt | ColumnType::Float => 4,
            ColumnType::Long
            | ColumnType::ULong
            | ColumnType::Double
            | ColumnType::Complex
            | ColumnType::Descriptor32 => 8,
            ColumnType::DblComplex | ColumnType::Descriptor64 => 16,
        }
    }

    /// Size of the unit that is byte-swapped on disk.
    fn swap_unit(self) -> usize {
        match self {
            ColumnType::Complex | ColumnType::Descriptor32 => 4,
            ColumnType::DblComplex | ColumnType::Descriptor64 => 8,
            other => other.size(),
        }
    }
}

/// Rust types that [`Column::values`] can produce.
pub trait ColumnValue: Pod {
    fn accepts(ty: ColumnType) -> bool;
}

macro_rules! impl_column_value {
    ($t:ty => $($ty:ident),+) => {
        impl ColumnValue for $t {
            fn accepts(ty: ColumnType) -> bool {
                matches!(ty, $(ColumnType::$ty)|+)
            }
        }
    };
}

impl_column_value!(u8 => Bit, Logical, Byte);
impl_column_value!(i8 => SByte);
impl_column_value!(i16 => Short);
impl_column_value!(u16 => UShort);
impl_column_value!(i32 => Int);
impl_column_value!(u32 => UInt);
impl_column_value!(i64 => Long);
impl_column_value!(u64 => ULong);
impl_column_value!(f32 => Float);
impl_column_value!(f64 => Double);
impl_column_value!([f32; 2] => Complex);
impl_column_value!([f64; 2] => DblComplex);
impl_column_value!([i32; 2] => Descriptor32);
impl_column_value!([i64; 2] => Descriptor64);

/// Value stored for null fields of ASCII integer columns.
pub const ASCII_NULL: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq)]
enum Cells {
    Raw(Vec<u8>),
    Strings(Vec<String>),
}

/// One table column and its contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// TTYPEn, empty when absent.
    pub name: String,
    /// TUNITn, empty when absent.
    pub unit: String,
    /// TFORMn as written.
    pub format: String,
    pub typecode: ColumnType,
    /// Bytes per element, [`ColumnType::size`].
    pub width: usize,
    /// Elements per row; characters per row for strings, bits for `X`.
    pub repeat: usize,
    pub nrows: usize,
    /// TNULLn of a binary integer column, or [`ASCII_NULL`] for an ASCII
    /// integer column that declares TNULLn.
    pub null: Option<i64>,
    /// TSCALn/TZEROn when they are not an unsigned convention; not applied.
    pub scaling: Option<(f64, f64)>,
    cells: Cells,
}

impl Column {
    /// Cells as typed values, checked against the column type.
    pub fn values<T: ColumnValue>(&self) -> Result<Vec<T>> {
        match &self.cells {
            Cells::Raw(bytes) if T::accepts(self.typecode) => Ok(pod_collect_to_vec(bytes)),
            _ => Err(Error::DimensionMismatch(format!(
                "column {:?} of type {:?} read as {}",
                self.name,
                self.typecode,
                core::any::type_name::<T>()
            ))),
        }
    }

    /// Raw host-order cell bytes; `None` for character columns.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.cells {
            Cells::Raw(b) => Some(b),
            Cells::Strings(_) => None,
        }
    }

    /// One string per row for character columns.
    pub fn strings(&self) -> Option<&[String]> {
        match &self.cells {
            Cells::Strings(s) => Some(s),
            Cells::Raw(_) => None,
        }
    }

    /// Bytes the column occupies in one on-disk row.
    fn row_bytes(&self) -> usize {
        match self.typecode {
            ColumnType::Bit => self.repeat.div_ceil(8),
            _ => self.width * self.repeat,
        }
    }

    fn cell(&self, row: usize) -> String {
        let per_row = self.row_bytes();
        let bytes = match &self.cells {
            Cells::Strings(s) => return s.get(row).cloned().unwrap_or_default(),
            Cells::Raw(b) => &b[row * per_row..(row + 1) * per_row],
        };
        let join = |items: Vec<String>| items.join(" ");
        macro_rules! show {
            ($t:ty) => {
                join(pod_collect_to_vec::<u8, $t>(bytes).iter().map(|v| v.to_string()).collect())
            };
        }
        match self.typecode {
            ColumnType::Logical => join(
                bytes
                    .iter()
                    .map(|&b| String::from(if b == 0 { "F" } else { "T" }))
                    .collect(),
            ),
            ColumnType::Bit => join(bytes.iter().map(|b| format!("{b:08b}")).collect()),
            ColumnType::Byte => show!(u8),
            ColumnType::SByte => show!(i8),
            ColumnType::Short => show!(i16),
            ColumnType::UShort => show!(u16),
            ColumnType::Int => show!(i32),
            ColumnType::UInt => show!(u32),
            ColumnType::Long => join(
                pod_collect_to_vec::<u8, i64>(bytes)
                    .iter()
                    .map(|&v| match self.null {
                        Some(n) if v == n => String::from("NULL"),
                        _ => v.to_string(),
                    })
                    .collect(),
            ),
            ColumnType::ULong => show!(u64),
            ColumnType::Float => show!(f32),
            ColumnType::Double => show!(f64),
            ColumnType::Complex => join(
                pod_collect_to_vec::<u8, [f32; 2]>(bytes)
                    .iter()
                    .map(|[re, im]| format!("{re}{im:+}i"))
                    .collect(),
            ),
            ColumnType::DblComplex => join(
                pod_collect_to_vec::<u8, [f64; 2]>(bytes)
                    .iter()
                    .map(|[re, im]| format!("{re}{im:+}i"))
                    .collect(),
            ),
            ColumnType::Descriptor32 => join(
                pod_collect_to_vec::<u8, [i32; 2]>(bytes)
                    .iter()
                    .map(|[n, off]| format!("{n}@{off}"))
                    .collect(),
            ),
            ColumnType::Descriptor64 => join(
                pod_collect_to_vec::<u8, [i64; 2]>(bytes)
                    .iter()
                    .map(|[n, off]| format!("{n}@{off}"))
                    .collect(),
            ),
            ColumnType::String => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// A table HDU payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub kind: TableKind,
    /// EXTNAME, empty when absent.
    pub name: String,
    pub nrows: usize,
    pub columns: Vec<Column>,
    /// Variable-length array heap of a binary table.
    pub heap: Vec<u8>,
}

/// Geometry shared by both table kinds.
struct Layout {
    row_len: usize,
    nrows: usize,
    tfields: usize,
    pcount: usize,
}

fn usize_key(keys: &KeyList, key: &str) -> Result<usize> {
    let v = keys.integer(key).map_err(|e| match e {
        Error::KeyNotFound(k) => Error::header(format!("missing {k}")),
        other => other,
    })?;
    usize::try_from(v).map_err(|_| Error::header(format!("negative {key} = {v}")))
}

fn optional_usize(keys: &KeyList, key: &str) -> Result<usize> {
    match keys.integer(key) {
        Ok(v) => usize::try_from(v).map_err(|_| Error::header(format!("negative {key} = {v}"))),
        Err(Error::KeyNotFound(_)) => Ok(0),
        Err(e) => Err(e),
    }
}

fn optional_float(keys: &KeyList, key: &str, default: f64) -> Result<f64> {
    match keys.float(key) {
        Ok(v) => Ok(v),
        Err(Error::KeyNotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

impl Layout {
    fn of(keys: &KeyList) -> Result<Self> {
        if keys.integer("NAXIS")? != 2 {
            return Err(Error::header("table NAXIS must be 2"));
        }
        Ok(Layout {
            row_len: usize_key(keys, "NAXIS1")?,
            nrows: usize_key(keys, "NAXIS2")?,
            tfields: usize_key(keys, "TFIELDS")?,
            pcount: optional_usize(keys, "PCOUNT")?,
        })
    }
}

/// Byte length of a table data section (main table plus heap), unpadded.
pub(crate) fn data_len(keys: &KeyList) -> Result<usize> {
    let l = Layout::of(keys)?;
    l.row_len
        .checked_mul(l.nrows)
        .and_then(|n| n.checked_add(l.pcount))
        .ok_or_else(|| Error::header("table size overflows"))
}

/// Parse a binary TFORM such as `1J`, `20A`, `16X`, `1PE(40)`.
fn parse_tform_binary(tform: &str) -> Result<(usize, char)> {
    let s = tform.trim();
    let s = s.find('(').map_or(s, |p| &s[..p]);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    let repeat = if digits == 0 {
        1
    } else {
        s[..digits]
            .parse::<usize>()
            .map_err(|_| Error::header(format!("bad TFORM {tform:?}")))?
    };
    let mut code = s[digits..].chars();
    match (code.next(), code.next()) {
        (Some(c @ ('P' | 'Q')), Some(t)) if "LXBIJKAEDCM".contains(t) => Ok((repeat, c)),
        (Some(c), _) if "LXBIJKAEDCM".contains(c) => Ok((repeat, c)),
        _ => Err(Error::header(format!("bad TFORM {tform:?}"))),
    }
}

/// Parse an ASCII TFORM (`Aw`, `Iw`, `Fw.d`, `Ew.d`, `Dw.d`) into the code and width.
fn parse_tform_ascii(tform: &str) -> Result<(char, usize)> {
    let s = tform.trim();
    let bad = || Error::header(format!("bad TFORM {tform:?}"));
    let mut chars = s.chars();
    let code = chars.next().ok_or_else(bad)?;
    let rest = chars.as_str();
    let w = rest.split('.').next().unwrap_or_default();
    let width = w.parse::<usize>().map_err(|_| bad())?;
    match code {
        'A' | 'I' | 'F' | 'E' | 'D' if width > 0 => Ok((code, width)),
        _ => Err(bad()),
    }
}

/// Column type after applying the TZERO unsigned convention to `code`.
fn binary_type(code: char, tzero: f64) -> (ColumnType, bool) {
    let (ty, unsigned, offset) = match code {
        'X' => (ColumnType::Bit, ColumnType::Bit, f64::NAN),
        'L' => (ColumnType::Logical, ColumnType::Logical, f64::NAN),
        'B' => (ColumnType::Byte, ColumnType::SByte, -128.0),
        'I' => (ColumnType::Short, ColumnType::UShort, 32768.0),
        'J' => (ColumnType::Int, ColumnType::UInt, 2147483648.0),
        'K' => (ColumnType::Long, ColumnType::ULong, 9223372036854775808.0),
        'E' => (ColumnType::Float, ColumnType::Float, f64::NAN),
        'D' => (ColumnType::Double, ColumnType::Double, f64::NAN),
        'C' => (ColumnType::Complex, ColumnType::Complex, f64::NAN),
        'M' => (ColumnType::DblComplex, ColumnType::DblComplex, f64::NAN),
        'P' => (ColumnType::Descriptor32, ColumnType::Descriptor32, f64::NAN),
        'Q' => (ColumnType::Descriptor64, ColumnType::Descriptor64, f64::NAN),
        _ => (ColumnType::String, ColumnType::String, f64::NAN),
    };
    if tzero == offset {
        (unsigned, true)
    } else {
        (ty, false)
    }
}

/// Flip the sign bit of every `size`-byte host-order element.
fn flip_sign_bits(buf: &mut [u8], size: usize) {
    let top = if cfg!(target_endian = "big") { 0 } else { size - 1 };
    for elem in buf.chunks_exact_mut(size) {
        elem[top] ^= 0x80;
    }
}

fn column_text(keys: &KeyList, key: &str) -> String {
    keys.find_value(key).unwrap_or_default()
}

impl Table {
    /// Build a table from its header and data section (`table_read`).
    ///
    /// `data` must hold at least [`data_len`] bytes.
    pub fn read(keys: &KeyList, kind: TableKind, data: &[u8]) -> Result<Self> {
        let layout = Layout::of(keys)?;
        let needed = data_len(keys)?;
        if data.len() < needed {
            return Err(Error::header(format!(
                "table data truncated: {} of {needed} bytes",
                data.len()
            )));
        }
        let name = keys.find_value("EXTNAME").unwrap_or_default();
        let main = &data[..layout.row_len * layout.nrows];
        let columns = match kind {
            TableKind::Binary => Self::binary_columns(keys, &layout, main)?,
            TableKind::Ascii => Self::ascii_columns(keys, &layout, main)?,
        };
        let heap = match kind {
            TableKind::Binary => {
                let start = keys
                    .integer("THEAP")
                    .ok()
                    .and_then(|v| usize::try_from(v).ok())
                    .unwrap_or(main.len());
                data.get(start..needed).map(<[u8]>::to_vec).unwrap_or_default()
            }
            TableKind::Ascii => Vec::new(),
        };
        debug!(
            "{kind:?} table {name:?}: {} rows, {} columns",
            layout.nrows,
            columns.len()
        );
        Ok(Table {
            kind,
            name,
            nrows: layout.nrows,
            columns,
            heap,
        })
    }

    fn binary_columns(keys: &KeyList, layout: &Layout, main: &[u8]) -> Result<Vec<Column>> {
        let mut columns = Vec::with_capacity(layout.tfields);
        let mut offset = 0usize;
        for n in 1..=layout.tfields {
            let format = keys
                .find_value(&format!("TFORM{n}"))
                .ok_or_else(|| Error::header(format!("missing TFORM{n}")))?;
            let (repeat, code) = parse_tform_binary(&format)?;
            let tzero = optional_float(keys, &format!("TZERO{n}"), 0.0)?;
            let tscal = optional_float(keys, &format!("TSCAL{n}"), 1.0)?;
            let (typecode, unsigned) = binary_type(code, tzero);
            let scaling = (!unsigned && (tzero != 0.0 || tscal != 1.0)).then_some((tscal, tzero));
            let mut col = Column {
                name: column_text(keys, &format!("TTYPE{n}")),
                unit: column_text(keys, &format!("TUNIT{n}")),
                format,
                typecode,
                width: typecode.size(),
                repeat,
                nrows: layout.nrows,
                null: keys.integer(&format!("TNULL{n}")).ok(),
                scaling,
                cells: Cells::Raw(Vec::new()),
            };
            let per_row = col.row_bytes();
            if offset + per_row > layout.row_len {
                return Err(Error::header(format!(
                    "column {n} ends at byte {} of a {}-byte row",
                    offset + per_row,
                    layout.row_len
                )));
            }
            let mut bytes: Vec<u8> = try_alloc(per_row * layout.nrows)?;
            for (dst, row) in bytes
                .chunks_exact_mut(per_row.max(1))
                .zip(main.chunks_exact(layout.row_len.max(1)))
            {
                dst.copy_from_slice(&row[offset..offset + per_row]);
            }
            col.cells = match typecode {
                ColumnType::String => Cells::Strings(
                    (0..layout.nrows)
                        .map(|row| {
                            let cell = &bytes[row * per_row..(row + 1) * per_row];
                            let end = cell.iter().position(|&b| b == 0).unwrap_or(cell.len());
                            String::from_utf8_lossy(&cell[..end]).trim_end().to_string()
                        })
                        .collect(),
                ),
                ColumnType::Logical => {
                    for b in &mut bytes {
                        *b = u8::from(*b == b'T');
                    }
                    Cells::Raw(bytes)
                }
                _ => {
                    swap_be_in_place(&mut bytes, typecode.swap_unit());
                    if unsigned {
                        flip_sign_bits(&mut bytes, typecode.size());
                    }
                    Cells::Raw(bytes)
                }
            };
            offset += per_row;
            columns.push(col);
        }
        Ok(columns)
    }

    fn ascii_columns(keys: &KeyList, layout: &Layout, main: &[u8]) -> Result<Vec<Column>> {
        let mut columns = Vec::with_capacity(layout.tfields);
        for n in 1..=layout.tfields {
            let format = keys
                .find_value(&format!("TFORM{n}"))
                .ok_or_else(|| Error::header(format!("missing TFORM{n}")))?;
            let (code, w) = parse_tform_ascii(&format)?;
            let start = usize_key(keys, &format!("TBCOL{n}"))?
                .checked_sub(1)
                .ok_or_else(|| Error::header(format!("TBCOL{n} must be at least 1")))?;
            if start + w > layout.row_len {
                return Err(Error::header(format!(
                    "column {n} ends at byte {} of a {}-byte row",
                    start + w,
                    layout.row_len
                )));
            }
            let null = keys.find_value(&format!("TNULL{n}"));
            let fields = main
                .chunks_exact(layout.row_len.max(1))
                .take(layout.nrows)
                .map(|row| String::from_utf8_lossy(&row[start..start + w]).into_owned());
            let name = column_text(keys, &format!("TTYPE{n}"));
            let mut null_value = None;
            let (typecode, cells) = match code {
                'A' => (
                    ColumnType::String,
                    Cells::Strings(fields.map(|f| f.trim_end().to_string()).collect()),
                ),
                'I' => {
                    let mut values = Vec::with_capacity(layout.nrows);
                    null_value = null.is_some().then_some(ASCII_NULL);
                    for f in fields {
                        let t = f.trim();
                        let v = if null.as_deref() == Some(t) {
                            ASCII_NULL
                        } else if t.is_empty() {
                            0
                        } else {
                            t.parse::<i64>().map_err(|_| {
                                Error::header(format!("column {n}: bad integer {t:?}"))
                            })?
                        };
                        values.push(v);
                    }
                    (ColumnType::Long, Cells::Raw(bytemuck::cast_slice(&values).to_vec()))
                }
                _ => {
                    let mut values = Vec::with_capacity(layout.nrows);
                    for f in fields {
                        let t = f.trim();
                        let v = if t.is_empty() || null.as_deref() == Some(t) {
                            f64::NAN
                        } else {
                            t.replace(['D', 'd'], "E").parse::<f64>().map_err(|_| {
                                Error::header(format!("column {n}: bad number {t:?}"))
                            })?
                        };
                        values.push(v);
                    }
                    (ColumnType::Double, Cells::Raw(bytemuck::cast_slice(&values).to_vec()))
                }
            };
            if keys.find(&format!("TZERO{n}")).is_some() {
                warn!("ASCII table column {name:?}: TZERO{n} is not applied");
            }
            columns.push(Column {
                name,
                unit: column_text(keys, &format!("TUNIT{n}")),
                format,
                typecode,
                width: if typecode == ColumnType::String { 1 } else { 8 },
                repeat: if typecode == ColumnType::String { w } else { 1 },
                nrows: layout.nrows,
                null: null_value,
                scaling: None,
                cells,
            });
        }
        Ok(columns)
    }

    /// First column named `name`, ignoring case.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }
}

/// Header line of names (and units), then one tab-separated line per row.
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Table name: {}", self.name)?;
        for c in &self.columns {
            if c.unit.is_empty() {
                write!(f, "{}\t", c.name)?;
            } else {
                write!(f, "{} ({})\t", c.name, c.unit)?;
            }
        }
        writeln!(f)?;
        for row in 0..self.nrows {
            for c in &self.columns {
                write!(f, "{}\t", c.cell(row))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(records: &[&str]) -> KeyList {
        let mut list = KeyList::new();
        for r in records {
            list.add(r, true).unwrap();
        }
        list
    }

    fn binary_header(extra: &[&str]) -> KeyList {
        let mut recs = vec!["XTENSION= 'BINTABLE'", "BITPIX  = 8", "NAXIS   = 2"];
        recs.extend_from_slice(extra);
        keys(&recs)
    }

    // ---- TFORM ----

    #[test]
    fn binary_tforms() {
        assert_eq!(parse_tform_binary("1J").unwrap(), (1, 'J'));
        assert_eq!(parse_tform_binary("20A").unwrap(), (20, 'A'));
        assert_eq!(parse_tform_binary("E").unwrap(), (1, 'E'));
        assert_eq!(parse_tform_binary("1PE(40)").unwrap(), (1, 'P'));
        assert!(parse_tform_binary("3Z").is_err());
        assert!(parse_tform_binary("").is_err());
    }

    #[test]
    fn ascii_tforms() {
        assert_eq!(parse_tform_ascii("A10").unwrap(), ('A', 10));
        assert_eq!(parse_tform_ascii("F8.3").unwrap(), ('F', 8));
        assert_eq!(parse_tform_ascii("D25.17").unwrap(), ('D', 25));
        assert!(parse_tform_ascii("Q3").is_err());
        assert!(parse_tform_ascii("I").is_err());
    }

    #[test]
    fn type_sizes() {
        assert_eq!(ColumnType::Short.size(), 2);
        assert_eq!(ColumnType::DblComplex.size(), 16);
        assert_eq!(ColumnType::Logical.size(), 1);
    }

    // ---- binary ----

    #[test]
    fn binary_table_columns() {
        let hdr = binary_header(&[
            "NAXIS1  = 11",
            "NAXIS2  = 2",
            "PCOUNT  = 0",
            "GCOUNT  = 1",
            "TFIELDS = 4",
            "TTYPE1  = 'ID'",
            "TFORM1  = '1J'",
            "TTYPE2  = 'FLUX'",
            "TFORM2  = '1E'",
            "TUNIT2  = 'Jy'",
            "TTYPE3  = 'NAME'",
            "TFORM3  = '2A'",
            "TTYPE4  = 'OK'",
            "TFORM4  = '1L'",
            "EXTNAME = 'CAT'",
        ]);
        let mut data = Vec::new();
        for (id, flux, name, ok) in [(7i32, 1.5f32, b"ab", b'T'), (-3, -2.0, b"c ", b'F')] {
            data.extend_from_slice(&id.to_be_bytes());
            data.extend_from_slice(&flux.to_be_bytes());
            data.extend_from_slice(name);
            data.push(ok);
        }
        assert_eq!(data_len(&hdr).unwrap(), 22);
        let t = Table::read(&hdr, TableKind::Binary, &data).unwrap();
        assert_eq!(t.name, "CAT");
        assert_eq!(t.ncols(), 4);
        assert_eq!(t.column("id").unwrap().values::<i32>().unwrap(), vec![7, -3]);
        let flux = t.column("FLUX").unwrap();
        assert_eq!(flux.unit, "Jy");
        assert_eq!(flux.values::<f32>().unwrap(), vec![1.5, -2.0]);
        assert!(flux.values::<f64>().is_err());
        assert_eq!(
            t.column("NAME").unwrap().strings().unwrap(),
            &["ab".to_string(), "c".to_string()]
        );
        assert_eq!(t.column("OK").unwrap().values::<u8>().unwrap(), vec![1, 0]);

        let text = t.to_string();
        assert!(text.contains("FLUX (Jy)"));
        assert!(text.contains("7\t1.5\tab\tT\t"));
    }

    #[test]
    fn unsigned_tzero_convention() {
        let hdr = binary_header(&[
            "NAXIS1  = 2",
            "NAXIS2  = 2",
            "TFIELDS = 1",
            "TTYPE1  = 'U'",
            "TFORM1  = '1I'",
            "TZERO1  = 32768",
        ]);
        let data = [0x80u8, 0x00, 0x7f, 0xff];
        let t = Table::read(&hdr, TableKind::Binary, &data).unwrap();
        let col = t.column("U").unwrap();
        assert_eq!(col.typecode, ColumnType::UShort);
        assert_eq!(col.values::<u16>().unwrap(), vec![0, 65535]);
        assert_eq!(col.scaling, None);
    }

    #[test]
    fn general_scaling_is_recorded() {
        let hdr = binary_header(&[
            "NAXIS1  = 2",
            "NAXIS2  = 1",
            "TFIELDS = 1",
            "TFORM1  = '1I'",
            "TSCAL1  = 0.5",
            "TZERO1  = 10",
        ]);
        let t = Table::read(&hdr, TableKind::Binary, &[0, 4]).unwrap();
        let col = &t.columns[0];
        assert_eq!(col.typecode, ColumnType::Short);
        assert_eq!(col.values::<i16>().unwrap(), vec![4]);
        assert_eq!(col.scaling, Some((0.5, 10.0)));
    }

    #[test]
    fn complex_and_heap() {
        let hdr = binary_header(&[
            "NAXIS1  = 16",
            "NAXIS2  = 1",
            "PCOUNT  = 3",
            "TFIELDS = 2",
            "TFORM1  = '1C'",
            "TFORM2  = '1PB(3)'",
        ]);
        let mut data = Vec::new();
        data.extend_from_slice(&1.0f32.to_be_bytes());
        data.extend_from_slice(&(-1.0f32).to_be_bytes());
        data.extend_from_slice(&3i32.to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&[9, 8, 7]);
        let t = Table::read(&hdr, TableKind::Binary, &data).unwrap();
        assert_eq!(t.columns[0].values::<[f32; 2]>().unwrap(), vec![[1.0, -1.0]]);
        assert_eq!(t.columns[1].values::<[i32; 2]>().unwrap(), vec![[3, 0]]);
        assert_eq!(t.heap, vec![9, 8, 7]);
    }

    #[test]
    fn column_past_row_end_is_rejected() {
        let hdr = binary_header(&["NAXIS1  = 2", "NAXIS2  = 1", "TFIELDS = 1", "TFORM1  = '1J'"]);
        assert!(matches!(
            Table::read(&hdr, TableKind::Binary, &[0, 0]),
            Err(Error::MalformedHeader { .. })
        ));
    }

    #[test]
    fn truncated_data_is_rejected() {
        let hdr = binary_header(&["NAXIS1  = 4", "NAXIS2  = 2", "TFIELDS = 1", "TFORM1  = '1J'"]);
        assert!(Table::read(&hdr, TableKind::Binary, &[0; 7]).is_err());
    }

    // ---- ASCII ----

    #[test]
    fn ascii_table_columns() {
        let hdr = keys(&[
            "XTENSION= 'TABLE'",
            "BITPIX  = 8",
            "NAXIS   = 2",
            "NAXIS1  = 16",
            "NAXIS2  = 2",
            "TFIELDS = 3",
            "TTYPE1  = 'STAR'",
            "TFORM1  = 'A5'",
            "TBCOL1  = 1",
            "TTYPE2  = 'N'",
            "TFORM2  = 'I3'",
            "TBCOL2  = 6",
            "TTYPE3  = 'MAG'",
            "TFORM3  = 'D8.2'",
            "TBCOL3  = 9",
        ]);
        let data = b"vega   11.03D+00siriu -2   -1.46";
        let t = Table::read(&hdr, TableKind::Ascii, data).unwrap();
        assert_eq!(
            t.column("STAR").unwrap().strings().unwrap(),
            &["vega".to_string(), "siriu".to_string()]
        );
        assert_eq!(t.column("N").unwrap().values::<i64>().unwrap(), vec![1, -2]);
        assert_eq!(t.column("MAG").unwrap().values::<f64>().unwrap(), vec![1.03, -1.46]);
    }

    #[test]
    fn ascii_null_fields() {
        let hdr = keys(&[
            "XTENSION= 'TABLE'",
            "BITPIX  = 8",
            "NAXIS   = 2",
            "NAXIS1  = 4",
            "NAXIS2  = 2",
            "TFIELDS = 1",
            "TFORM1  = 'E4.1'",
            "TBCOL1  = 1",
            "TNULL1  = '*'",
        ]);
        let t = Table::read(&hdr, TableKind::Ascii, b"   *  .5").unwrap();
        let v = t.columns[0].values::<f64>().unwrap();
        assert!(v[0].is_nan());
        assert_eq!(v[1], 0.5);
    }

    #[test]
    fn ascii_integer_nulls_are_marked() {
        let hdr = keys(&[
            "XTENSION= 'TABLE'",
            "BITPIX  = 8",
            "NAXIS   = 2",
            "NAXIS1  = 3",
            "NAXIS2  = 3",
            "TFIELDS = 1",
            "TTYPE1  = 'N'",
            "TFORM1  = 'I3'",
            "TBCOL1  = 1",
            "TNULL1  = '-'",
        ]);
        let t = Table::read(&hdr, TableKind::Ascii, b"  0  -  7").unwrap();
        let col = t.column("N").unwrap();
        assert_eq!(col.null, Some(ASCII_NULL));
        assert_eq!(col.values::<i64>().unwrap(), vec![0, ASCII_NULL, 7]);
        assert!(t.to_string().contains("\nNULL\t\n"));
    }

    #[test]
    fn zero_width_string_column_has_a_cell_per_row() {
        let hdr = binary_header(&[
            "NAXIS1  = 2",
            "NAXIS2  = 3",
            "TFIELDS = 2",
            "TTYPE1  = 'EMPTY'",
            "TFORM1  = '0A'",
            "TTYPE2  = 'V'",
            "TFORM2  = '1I'",
        ]);
        let t = Table::read(&hdr, TableKind::Binary, &[0, 1, 0, 2, 0, 3]).unwrap();
        assert_eq!(t.column("EMPTY").unwrap().strings().unwrap(), &["", "", ""]);
        assert_eq!(t.column("V").unwrap().values::<i16>().unwrap(), vec![1, 2, 3]);
    }
}
