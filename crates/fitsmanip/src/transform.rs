//! Intensity transforms applied to a working buffer.

use core::fmt;
use core::str::FromStr;

use crate::dblimage::{DoubleImage, ImgStat};
use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// Intensity transform, applied to `x - min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    /// Identity.
    #[default]
    Linear,
    /// `ln(1 + x)`.
    Log,
    /// `e^(x - 1)`.
    Exp,
    /// `x²`.
    Pow,
    /// `√x`.
    Sqrt,
}

impl Transform {
    pub const ALL: [Transform; 5] = [
        Transform::Linear,
        Transform::Log,
        Transform::Exp,
        Transform::Pow,
        Transform::Sqrt,
    ];

    /// Evaluate the transform at `x` (already shifted by the minimum).
    #[inline]
    pub fn eval(self, x: f64) -> f64 {
        match self {
            Transform::Linear => x,
            Transform::Log => libm::log1p(x),
            Transform::Exp => libm::exp(x - 1.0),
            Transform::Pow => x * x,
            Transform::Sqrt => libm::sqrt(x),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Transform::Linear => "linear",
            Transform::Log => "log",
            Transform::Exp => "exp",
            Transform::Pow => "pow",
            Transform::Sqrt => "sqrt",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts any case-insensitive prefix that picks one transform:
/// `e`, `li`, `lo`, `p`, `s` and longer.
impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let pick = |min: usize, t: Transform| {
            (lower.len() >= min && t.name().starts_with(&lower)).then_some(t)
        };
        pick(1, Transform::Exp)
            .or_else(|| pick(2, Transform::Linear))
            .or_else(|| pick(2, Transform::Log))
            .or_else(|| pick(1, Transform::Pow))
            .or_else(|| pick(1, Transform::Sqrt))
            .ok_or_else(|| Error::Unsupported(format!("unknown intensity transform {s:?}")))
    }
}

/// Apply `tr` in place to `x - st.min` for every pixel (`mktransform`).
pub fn mktransform(img: &mut DoubleImage, st: &ImgStat, tr: Transform, rt: &Runtime) -> Result<()> {
    st.checked_range()?;
    let min = st.min;
    rt.map_in_place(img.data_mut(), |x| tr.eval(x - min))
}

impl DoubleImage {
    /// [`mktransform`] on the global runtime.
    pub fn transform(&mut self, st: &ImgStat, tr: Transform) -> Result<&mut Self> {
        mktransform(self, st, tr, Runtime::global()?)?;
        Ok(self)
    }
}
