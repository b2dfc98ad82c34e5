//! Colourmaps rendering a normalised buffer to packed RGB bytes.

use core::fmt;
use core::str::FromStr;

use rayon::prelude::*;

use crate::dblimage::DoubleImage;
use crate::error::{Error, Result};
use crate::image::try_alloc;
use crate::runtime::{Runtime, CHUNK};

type Rgb = [u8; 3];

const GRAY: &[Rgb] = &[[0, 0, 0], [255, 255, 255]];
const BR: &[Rgb] = &[
    [0, 0, 255],
    [0, 255, 255],
    [0, 255, 0],
    [255, 255, 0],
    [255, 0, 0],
];
const HOT: &[Rgb] = &[[0, 0, 0], [255, 0, 0], [255, 255, 0], [255, 255, 255]];
const COLD: &[Rgb] = &[[0, 0, 0], [0, 0, 255], [0, 255, 255], [255, 255, 255]];
const JET: &[Rgb] = &[
    [32, 0, 0],
    [128, 0, 0],
    [255, 0, 0],
    [255, 128, 0],
    [255, 255, 0],
    [0, 255, 0],
    [0, 255, 255],
    [0, 0, 255],
    [0, 0, 128],
];

/// Piecewise-linear colourmap over `[0, 1]` with equally spaced anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Palette {
    #[default]
    Gray,
    /// Blue, cyan, green, yellow, red.
    BR,
    /// Black, red, yellow, white.
    Hot,
    /// Black, blue, cyan, white.
    Cold,
    /// Dark brown through red, yellow, green and cyan to dark blue.
    Jet,
}

impl Palette {
    pub const ALL: [Palette; 5] = [
        Palette::Gray,
        Palette::BR,
        Palette::Hot,
        Palette::Cold,
        Palette::Jet,
    ];

    fn anchors(self) -> &'static [Rgb] {
        match self {
            Palette::Gray => GRAY,
            Palette::BR => BR,
            Palette::Hot => HOT,
            Palette::Cold => COLD,
            Palette::Jet => JET,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Palette::Gray => "gray",
            Palette::BR => "br",
            Palette::Hot => "hot",
            Palette::Cold => "cold",
            Palette::Jet => "jet",
        }
    }

    /// Colour of `x`; values outside `[0, 1]` are clamped and NaN maps to 0.
    pub fn rgb(self, x: f64) -> Rgb {
        let anchors = self.anchors();
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        let segments = anchors.len() - 1;
        let pos = x * segments as f64;
        let i = (pos as usize).min(segments - 1);
        let frac = pos - i as f64;
        let (a, b) = (anchors[i], anchors[i + 1]);
        core::array::from_fn(|c| {
            let v = f64::from(a[c]) + frac * (f64::from(b[c]) - f64::from(a[c]));
            libm::floor(v).clamp(0.0, 255.0) as u8
        })
    }
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Case-insensitive prefixes: `b`, `c`, `g`, `ho`, `j` and longer.
impl FromStr for Palette {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let pick = |min: usize, p: Palette| {
            (lower.len() >= min && p.name().starts_with(&lower)).then_some(p)
        };
        pick(1, Palette::BR)
            .or_else(|| pick(1, Palette::Cold))
            .or_else(|| pick(1, Palette::Gray))
            .or_else(|| pick(2, Palette::Hot))
            .or_else(|| pick(1, Palette::Jet))
            .ok_or_else(|| Error::Unsupported(format!("unknown palette {s:?}")))
    }
}

/// Render every pixel through `cmap`, giving `3 * totpix` bytes in R, G, B
/// order.
pub fn convert2palette(img: &DoubleImage, cmap: Palette, rt: &Runtime) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = try_alloc(3 * img.totpix())?;
    rt.install(|| {
        out.par_chunks_mut(3 * CHUNK)
            .zip(img.data().par_chunks(CHUNK))
            .try_for_each(|(dst, src)| -> Result<()> {
                rt.check()?;
                for (px, &x) in dst.chunks_exact_mut(3).zip(src) {
                    px.copy_from_slice(&cmap.rgb(x));
                }
                Ok(())
            })
    })?;
    Ok(out)
}

impl DoubleImage {
    /// [`convert2palette`] on the global runtime.
    pub fn to_rgb(&self, cmap: Palette) -> Result<Vec<u8>> {
        convert2palette(self, cmap, Runtime::global()?)
    }
}
