//! N-dimensional image payload and its pixel-block codec.
//!
//! Integer images are held as unsigned element types in logical value space:
//! the reader resolves the BZERO/BSCALE convention while decoding, and the
//! writer re-derives BZERO (and BLANK) from the pixel values when encoding.

use std::fmt;

use bytemuck::cast_slice;
use log::{debug, warn};
use rayon::prelude::*;

use crate::block::{pad_data, CARD_SIZE};
use crate::dblimage::DoubleImage;
use crate::endian::{decode_be, encode_be, BigEndian};
use crate::error::{Error, Result};
use crate::header::{format_card, Card};
use crate::keylist::KeyList;
use crate::runtime::Runtime;
use crate::value::Value;

/// Pixel element type, keyed by the FITS BITPIX code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitpix {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Bitpix {
    /// Map a BITPIX header value to an element type.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            8 => Ok(Bitpix::U8),
            16 => Ok(Bitpix::U16),
            32 => Ok(Bitpix::U32),
            64 => Ok(Bitpix::U64),
            -32 => Ok(Bitpix::F32),
            -64 => Ok(Bitpix::F64),
            other => Err(Error::UnsupportedBitpix(other)),
        }
    }

    /// The BITPIX header value.
    pub fn code(self) -> i64 {
        match self {
            Bitpix::U8 => 8,
            Bitpix::U16 => 16,
            Bitpix::U32 => 32,
            Bitpix::U64 => 64,
            Bitpix::F32 => -32,
            Bitpix::F64 => -64,
        }
    }

    /// Element width in bytes.
    pub fn width(self) -> usize {
        (self.code().unsigned_abs() / 8) as usize
    }

    pub fn is_float(self) -> bool {
        matches!(self, Bitpix::F32 | Bitpix::F64)
    }
}

impl fmt::Display for Bitpix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Owned pixel buffer tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            PixelData::U8($v) => $body,
            PixelData::U16($v) => $body,
            PixelData::U32($v) => $body,
            PixelData::U64($v) => $body,
            PixelData::F32($v) => $body,
            PixelData::F64($v) => $body,
        }
    };
}

impl PixelData {
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bitpix(&self) -> Bitpix {
        match self {
            PixelData::U8(_) => Bitpix::U8,
            PixelData::U16(_) => Bitpix::U16,
            PixelData::U32(_) => Bitpix::U32,
            PixelData::U64(_) => Bitpix::U64,
            PixelData::F32(_) => Bitpix::F32,
            PixelData::F64(_) => Bitpix::F64,
        }
    }

    /// Native-order bytes of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        each_variant!(self, v => cast_slice(v.as_slice()))
    }
}

/// Element types that can back an [`Image`].
pub trait Pixel: BigEndian + Default + PartialEq + Send + Sync + 'static {
    const BITPIX: Bitpix;

    fn view(data: &PixelData) -> Option<&[Self]>;
    fn view_mut(data: &mut PixelData) -> Option<&mut [Self]>;
    fn wrap(values: Vec<Self>) -> PixelData;
    fn to_f64(self) -> f64;
    /// Saturating conversion; NaN becomes zero for integer types.
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_pixel {
    ($t:ty, $variant:ident) => {
        impl Pixel for $t {
            const BITPIX: Bitpix = Bitpix::$variant;

            fn view(data: &PixelData) -> Option<&[Self]> {
                match data {
                    PixelData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut(data: &mut PixelData) -> Option<&mut [Self]> {
                match data {
                    PixelData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn wrap(values: Vec<Self>) -> PixelData {
                PixelData::$variant(values)
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

impl_pixel!(u8, U8);
impl_pixel!(u16, U16);
impl_pixel!(u32, U32);
impl_pixel!(u64, U64);
impl_pixel!(f32, F32);
impl_pixel!(f64, F64);

/// Allocate `n` default pixels, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone + Default>(n: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| Error::BufferAllocation {
        bytes: n.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(n, T::default());
    Ok(v)
}

/// Total pixel count of `naxes`, 0 for no axes.
pub(crate) fn total_pixels(naxes: &[usize]) -> Result<usize> {
    if naxes.is_empty() {
        return Ok(0);
    }
    naxes.iter().try_fold(1usize, |acc, &n| {
        acc.checked_mul(n)
            .ok_or_else(|| Error::DimensionMismatch(format!("pixel count of {naxes:?} overflows")))
    })
}

/// BZERO/BSCALE/BLANK as found in a header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scaling {
    pub bzero: f64,
    pub bscale: f64,
    pub blank: Option<i64>,
}

impl Default for Scaling {
    fn default() -> Self {
        Scaling {
            bzero: 0.0,
            bscale: 1.0,
            blank: None,
        }
    }
}

impl Scaling {
    pub fn from_keys(keys: &KeyList) -> Result<Self> {
        let float_or = |key: &str, default: f64| match keys.float(key) {
            Ok(v) => Ok(v),
            Err(Error::KeyNotFound(_)) => Ok(default),
            Err(e) => Err(e),
        };
        let blank = match keys.integer("BLANK") {
            Ok(b) => Some(b),
            Err(Error::KeyNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(Scaling {
            bzero: float_or("BZERO", 0.0)?,
            bscale: float_or("BSCALE", 1.0)?,
            blank,
        })
    }
}

/// On-disk integer storage type and the unsigned type it decodes to.
trait Stored: BigEndian + Send + Sync {
    type Logical: Pixel + Copy;
    const BITS: u32;
    const SIGNED: bool;

    fn to_i128(self) -> i128;
    /// Reinterpret with the top bit flipped (the 2^(n-1) offset convention).
    fn flip(self) -> Self::Logical;
    fn logical(v: i128) -> Option<Self::Logical>;
    /// Logical value widened to u64, if it fits the logical type.
    fn logical_u64(v: i128) -> Option<u64>;
}

macro_rules! impl_stored {
    ($s:ty, $u:ty, $signed:expr) => {
        impl Stored for $s {
            type Logical = $u;
            const BITS: u32 = <$s>::BITS;
            const SIGNED: bool = $signed;

            #[inline]
            fn to_i128(self) -> i128 {
                self as i128
            }

            #[inline]
            fn flip(self) -> $u {
                (self as $u) ^ (1 << (<$s>::BITS - 1))
            }

            #[inline]
            fn logical(v: i128) -> Option<$u> {
                <$u>::try_from(v).ok()
            }

            #[inline]
            fn logical_u64(v: i128) -> Option<u64> {
                <$u>::try_from(v).ok().map(u64::from)
            }
        }
    };
}

impl_stored!(u8, u8, false);
impl_stored!(i16, u16, true);
impl_stored!(i32, u32, true);
impl_stored!(i64, u64, true);

/// Resolve stored integers into logical pixels.
///
/// Returns the buffer and the BLANK value in logical space.
fn decode_stored<S: Stored>(raw: &[u8], sc: &Scaling) -> (PixelData, Option<u64>) {
    let stored: Vec<S> = decode_be(raw);
    let offset = 2f64.powi(S::BITS as i32 - 1);

    if S::SIGNED && sc.bscale == 1.0 && sc.bzero == offset {
        let pixels: Vec<S::Logical> = stored.par_iter().map(|&v| v.flip()).collect();
        let blank = sc
            .blank
            .and_then(|b| S::logical_u64(b as i128 + offset as i128));
        return (S::Logical::wrap(pixels), blank);
    }

    if sc.bscale == 1.0 && sc.bzero.fract() == 0.0 && sc.bzero.abs() < 9.2e18 {
        let zero = sc.bzero as i128;
        let fitted: Option<Vec<S::Logical>> = stored
            .par_iter()
            .map(|&v| S::logical(v.to_i128() + zero))
            .collect();
        if let Some(pixels) = fitted {
            let blank = sc.blank.and_then(|b| S::logical_u64(b as i128 + zero));
            return (S::Logical::wrap(pixels), blank);
        }
    }

    warn!(
        "BITPIX {} data with BZERO={} BSCALE={} does not fit an unsigned type; promoting to f64",
        S::BITS,
        sc.bzero,
        sc.bscale
    );
    let blank = sc.blank.map(i128::from);
    let pixels: Vec<f64> = stored
        .par_iter()
        .map(|&v| {
            let r = v.to_i128();
            if Some(r) == blank {
                f64::NAN
            } else {
                r as f64 * sc.bscale + sc.bzero
            }
        })
        .collect();
    (PixelData::F64(pixels), None)
}

/// Decode float storage, applying a non-trivial linear scaling in place.
fn decode_float<T: Pixel + Copy>(raw: &[u8], sc: &Scaling) -> PixelData {
    let mut pixels: Vec<T> = decode_be(raw);
    if sc.bscale != 1.0 || sc.bzero != 0.0 {
        debug!("applying BSCALE={} BZERO={} to float data", sc.bscale, sc.bzero);
        pixels
            .par_iter_mut()
            .for_each(|v| *v = T::from_f64(v.to_f64() * sc.bscale + sc.bzero));
    }
    T::wrap(pixels)
}

/// An image payload: axes, element type and an optional pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    naxes: Vec<usize>,
    bitpix: Bitpix,
    data: Option<PixelData>,
    blank: Option<u64>,
}

impl Image {
    /// Allocate a zero-filled image.
    ///
    /// A zero total pixel count gives a header-only image without a buffer.
    pub fn new(naxes: &[usize], bitpix: Bitpix) -> Result<Self> {
        let totpix = total_pixels(naxes)?;
        let data = if totpix == 0 {
            None
        } else {
            Some(match bitpix {
                Bitpix::U8 => PixelData::U8(try_alloc(totpix)?),
                Bitpix::U16 => PixelData::U16(try_alloc(totpix)?),
                Bitpix::U32 => PixelData::U32(try_alloc(totpix)?),
                Bitpix::U64 => PixelData::U64(try_alloc(totpix)?),
                Bitpix::F32 => PixelData::F32(try_alloc(totpix)?),
                Bitpix::F64 => PixelData::F64(try_alloc(totpix)?),
            })
        };
        Ok(Image {
            naxes: naxes.to_vec(),
            bitpix,
            data,
            blank: None,
        })
    }

    /// Wrap an existing pixel vector.
    pub fn from_pixels<T: Pixel>(naxes: &[usize], pixels: Vec<T>) -> Result<Self> {
        Self::from_data(naxes, T::wrap(pixels))
    }

    /// Wrap a tagged buffer whose length must equal the product of `naxes`.
    pub fn from_data(naxes: &[usize], data: PixelData) -> Result<Self> {
        let totpix = total_pixels(naxes)?;
        if data.len() != totpix {
            return Err(Error::DimensionMismatch(format!(
                "{} pixels for axes {:?}",
                data.len(),
                naxes
            )));
        }
        Ok(Image {
            naxes: naxes.to_vec(),
            bitpix: data.bitpix(),
            data: (totpix > 0).then_some(data),
            blank: None,
        })
    }

    /// A zeroed image with the same shape and element type.
    pub fn mksimilar(&self) -> Result<Self> {
        Image::new(&self.naxes, self.bitpix)
    }

    pub fn naxis(&self) -> usize {
        self.naxes.len()
    }

    pub fn naxes(&self) -> &[usize] {
        &self.naxes
    }

    pub fn totpix(&self) -> usize {
        self.data.as_ref().map_or(0, PixelData::len)
    }

    pub fn bitpix(&self) -> Bitpix {
        self.bitpix
    }

    /// `true` when the HDU has no pixels.
    pub fn is_header_only(&self) -> bool {
        self.data.is_none()
    }

    pub fn data(&self) -> Option<&PixelData> {
        self.data.as_ref()
    }

    /// Typed view; fails when `T` does not match the element type.
    pub fn pixels<T: Pixel>(&self) -> Result<&[T]> {
        match &self.data {
            None => Ok(&[]),
            Some(d) => T::view(d).ok_or_else(|| self.type_mismatch(T::BITPIX)),
        }
    }

    /// Mutable typed view.
    pub fn pixels_mut<T: Pixel>(&mut self) -> Result<&mut [T]> {
        let err = self.type_mismatch(T::BITPIX);
        match &mut self.data {
            None => Ok(&mut []),
            Some(d) => T::view_mut(d).ok_or(err),
        }
    }

    fn type_mismatch(&self, wanted: Bitpix) -> Error {
        Error::DimensionMismatch(format!(
            "image holds BITPIX {} pixels, not {}",
            self.bitpix, wanted
        ))
    }

    /// BLANK value in logical space, for integer images.
    pub fn blank(&self) -> Option<u64> {
        self.blank
    }

    pub fn set_blank(&mut self, blank: Option<u64>) {
        self.blank = if self.bitpix.is_float() { None } else { blank };
    }

    /// Number of undefined pixels: BLANK matches or NaN.
    pub fn count_undefined(&self) -> usize {
        let Some(data) = &self.data else { return 0 };
        match (data, self.blank) {
            (PixelData::F32(v), _) => v.par_iter().filter(|x| x.is_nan()).count(),
            (PixelData::F64(v), _) => v.par_iter().filter(|x| x.is_nan()).count(),
            (_, None) => 0,
            (PixelData::U8(v), Some(b)) => v.par_iter().filter(|&&x| x as u64 == b).count(),
            (PixelData::U16(v), Some(b)) => v.par_iter().filter(|&&x| x as u64 == b).count(),
            (PixelData::U32(v), Some(b)) => v.par_iter().filter(|&&x| x as u64 == b).count(),
            (PixelData::U64(v), Some(b)) => v.par_iter().filter(|&&x| x == b).count(),
        }
    }

    /// Decode a pixel block read from disk.
    ///
    /// `raw` must hold at least `totpix * width` bytes.
    pub(crate) fn decode(naxes: &[usize], bitpix: Bitpix, sc: &Scaling, raw: &[u8]) -> Result<Self> {
        let totpix = total_pixels(naxes)?;
        if totpix == 0 {
            return Image::new(naxes, bitpix);
        }
        let nbytes = totpix
            .checked_mul(bitpix.width())
            .ok_or_else(|| Error::DimensionMismatch(format!("data size of {naxes:?} overflows")))?;
        if raw.len() < nbytes {
            return Err(Error::header(format!(
                "data block truncated: {} of {} bytes",
                raw.len(),
                nbytes
            )));
        }
        let raw = &raw[..nbytes];
        let (data, blank) = match bitpix {
            Bitpix::U8 => decode_stored::<u8>(raw, sc),
            Bitpix::U16 => decode_stored::<i16>(raw, sc),
            Bitpix::U32 => decode_stored::<i32>(raw, sc),
            Bitpix::U64 => decode_stored::<i64>(raw, sc),
            Bitpix::F32 => (decode_float::<f32>(raw, sc), None),
            Bitpix::F64 => (decode_float::<f64>(raw, sc), None),
        };
        let mut image = Image::from_data(naxes, data)?;
        image.blank = blank;
        Ok(image)
    }

    /// Encode pixels for writing.
    ///
    /// Returns the BZERO/BLANK cards the data needs and the block-padded
    /// big-endian data segment.
    pub(crate) fn encode(&self) -> (Vec<[u8; CARD_SIZE]>, Vec<u8>) {
        let mut cards = Vec::new();
        let Some(data) = &self.data else {
            return (cards, Vec::new());
        };
        let mut bytes = match data {
            PixelData::U8(v) => {
                if let Some(b) = self.blank.filter(|&b| b <= u8::MAX as u64) {
                    cards.push(format_card(&Card::new("BLANK", Value::Integer(b as i64), None)));
                }
                v.clone()
            }
            PixelData::U16(v) => encode_unsigned(v, self.blank, &mut cards),
            PixelData::U32(v) => encode_unsigned(v, self.blank, &mut cards),
            PixelData::U64(v) => encode_unsigned(v, self.blank, &mut cards),
            PixelData::F32(v) => encode_be(v),
            PixelData::F64(v) => encode_be(v),
        };
        pad_data(&mut bytes);
        (cards, bytes)
    }

    /// Replace the pixels with `dbl` and pick the narrowest faithful BITPIX.
    ///
    /// Non-negative integral data gets the smallest unsigned type holding the
    /// maximum; other data becomes f32 when the smallest step between sorted
    /// values exceeds f32 epsilon and every value fits f32, else f64.
    pub fn rebuild(&mut self, dbl: &DoubleImage, rt: &Runtime) -> Result<()> {
        let values = dbl.data();
        if values.len() != self.totpix() || values.is_empty() {
            return Err(Error::DimensionMismatch(format!(
                "{} working values for an image of {} pixels",
                values.len(),
                self.totpix()
            )));
        }
        rt.check()?;
        let bitpix = rt.install(|| choose_bitpix(values));
        rt.check()?;
        let data = rt.install(|| match bitpix {
            Bitpix::U8 => convert::<u8>(values),
            Bitpix::U16 => convert::<u16>(values),
            Bitpix::U32 => convert::<u32>(values),
            Bitpix::U64 => convert::<u64>(values),
            Bitpix::F32 => convert::<f32>(values),
            Bitpix::F64 => PixelData::F64(values.to_vec()),
        });
        debug!("rebuild: {} pixels as BITPIX {}", values.len(), bitpix);
        self.bitpix = bitpix;
        self.data = Some(data);
        self.blank = None;
        Ok(())
    }
}

/// Unsigned data above the signed range is written with BZERO = 2^(n-1).
fn encode_unsigned<U>(values: &[U], blank: Option<u64>, cards: &mut Vec<[u8; CARD_SIZE]>) -> Vec<u8>
where
    U: Pixel + Copy + Into<u64> + std::ops::BitXor<Output = U> + TryFrom<u64>,
{
    let bits = std::mem::size_of::<U>() as u32 * 8;
    let top: u64 = 1 << (bits - 1);
    let signed_max = top - 1;
    let offset = values
        .par_iter()
        .any(|&v| Into::<u64>::into(v) > signed_max);
    let top_u = U::try_from(top).ok();

    let blank_raw = blank.and_then(|b| {
        let stored = if offset { b ^ top } else { b };
        // Reinterpret the n-bit pattern as signed.
        let signed = if stored >= top {
            stored as i128 - (1i128 << bits)
        } else {
            stored as i128
        };
        i64::try_from(signed).ok()
    });

    if offset {
        let zero = if bits == 64 {
            // 2^63 does not fit an i64 card value.
            let mut card = [b' '; CARD_SIZE];
            let text = format!("BZERO   = {:>20}", "9223372036854775808");
            card[..text.len()].copy_from_slice(text.as_bytes());
            card
        } else {
            format_card(&Card::new("BZERO", Value::Integer(top as i64), None))
        };
        cards.push(zero);
        cards.push(format_card(&Card::new("BSCALE", Value::Integer(1), None)));
    }
    if let Some(b) = blank_raw {
        cards.push(format_card(&Card::new("BLANK", Value::Integer(b), None)));
    }

    match (offset, top_u) {
        (true, Some(t)) => {
            let flipped: Vec<U> = values.par_iter().map(|&v| v ^ t).collect();
            encode_be(&flipped)
        }
        _ => encode_be(values),
    }
}

fn choose_bitpix(values: &[f64]) -> Bitpix {
    let mut sorted: Vec<f64> = values.par_iter().copied().filter(|v| !v.is_nan()).collect();
    let has_nan = sorted.len() != values.len();
    if sorted.is_empty() {
        return Bitpix::F32;
    }
    sorted.par_sort_unstable_by(f64::total_cmp);
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];

    let integral = !has_nan && sorted.par_iter().all(|v| v.is_finite() && v.fract() == 0.0);
    if integral && min >= 0.0 {
        if max <= u8::MAX as f64 {
            return Bitpix::U8;
        } else if max <= u16::MAX as f64 {
            return Bitpix::U16;
        } else if max <= u32::MAX as f64 {
            return Bitpix::U32;
        } else if max < 18_446_744_073_709_551_616.0 {
            return Bitpix::U64;
        }
    }

    let mindiff = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&d| d > f64::EPSILON)
        .fold(f64::INFINITY, f64::min);
    let fits_f32 = min >= -(f32::MAX as f64) && max <= f32::MAX as f64;
    if mindiff > f32::EPSILON as f64 && fits_f32 {
        Bitpix::F32
    } else {
        Bitpix::F64
    }
}

fn convert<T: Pixel>(values: &[f64]) -> PixelData {
    T::wrap(values.par_iter().map(|&v| T::from_f64(v)).collect())
}
