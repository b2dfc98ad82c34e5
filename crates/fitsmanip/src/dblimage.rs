//! Dense `f64` working buffer for the pixel pipeline.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::image::{try_alloc, Image, Pixel, PixelData};
use crate::runtime::{Runtime, CHUNK};

/// Two-dimensional `f64` working buffer, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleImage {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

/// Summary statistics of a [`DoubleImage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImgStat {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl DoubleImage {
    /// Wrap `data` as a `width` x `height` buffer.
    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        if width == 0 || height == 0 || width.checked_mul(height) != Some(data.len()) {
            return Err(Error::DimensionMismatch(format!(
                "{} values for a {width}x{height} buffer",
                data.len()
            )));
        }
        Ok(DoubleImage {
            width,
            height,
            data,
        })
    }

    /// A zero-filled buffer.
    pub fn zeros(width: usize, height: usize) -> Result<Self> {
        let n = width.checked_mul(height).ok_or_else(|| {
            Error::DimensionMismatch(format!("{width}x{height} buffer overflows"))
        })?;
        Self::from_vec(width, height, try_alloc(n)?)
    }

    /// Convert an image to a working buffer (`image2double`).
    ///
    /// Width is the first axis; further axes fold into the height.
    pub fn from_image(img: &Image, rt: &Runtime) -> Result<Self> {
        let data = img.data().ok_or_else(|| {
            Error::DimensionMismatch(String::from("header-only image has no pixels"))
        })?;
        let width = img.naxes()[0];
        let height = data.len() / width;
        let mut out: Vec<f64> = try_alloc(data.len())?;
        match data {
            PixelData::U8(v) => widen(v, &mut out, rt)?,
            PixelData::U16(v) => widen(v, &mut out, rt)?,
            PixelData::U32(v) => widen(v, &mut out, rt)?,
            PixelData::U64(v) => widen(v, &mut out, rt)?,
            PixelData::F32(v) => widen(v, &mut out, rt)?,
            PixelData::F64(v) => out.copy_from_slice(v),
        }
        Self::from_vec(width, height, out)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn totpix(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Pixel at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        (x < self.width && y < self.height).then(|| self.data[y * self.width + x])
    }

    /// Copy into an `ndarray` of shape `(height, width)`.
    #[cfg(feature = "array")]
    pub fn to_array(&self) -> Result<ndarray::Array2<f64>> {
        ndarray::Array2::from_shape_vec((self.height, self.width), self.data.clone())
            .map_err(|e| Error::DimensionMismatch(e.to_string()))
    }

    /// [`ImgStat::of`] on the global runtime.
    pub fn stat(&self) -> Result<ImgStat> {
        ImgStat::of(self, Runtime::global()?)
    }

    /// [`normalize`] on the global runtime.
    pub fn normalize(&mut self, st: &ImgStat) -> Result<&mut Self> {
        normalize(self, st, Runtime::global()?)?;
        Ok(self)
    }
}

fn widen<T: Pixel + Copy>(src: &[T], out: &mut [f64], rt: &Runtime) -> Result<()> {
    rt.install(|| {
        out.par_chunks_mut(CHUNK)
            .zip(src.par_chunks(CHUNK))
            .try_for_each(|(dst, src)| {
                rt.check()?;
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = s.to_f64();
                }
                Ok(())
            })
    })
}

/// Free-function form of [`DoubleImage::from_image`].
pub fn image2double(img: &Image, rt: &Runtime) -> Result<DoubleImage> {
    DoubleImage::from_image(img, rt)
}

#[derive(Clone, Copy)]
struct Acc {
    min: f64,
    max: f64,
    sum: f64,
    sum2: f64,
    count: usize,
}

impl Acc {
    const EMPTY: Acc = Acc {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        sum: 0.0,
        sum2: 0.0,
        count: 0,
    };

    fn merge(self, o: Acc) -> Acc {
        Acc {
            min: self.min.min(o.min),
            max: self.max.max(o.max),
            sum: self.sum + o.sum,
            sum2: self.sum2 + o.sum2,
            count: self.count + o.count,
        }
    }
}

impl ImgStat {
    /// One parallel pass over the buffer. NaN pixels are skipped.
    pub fn of(img: &DoubleImage, rt: &Runtime) -> Result<Self> {
        let acc = rt.install(|| {
            img.data
                .par_chunks(CHUNK)
                .map(|chunk| -> Result<Acc> {
                    rt.check()?;
                    let mut a = Acc::EMPTY;
                    for &x in chunk.iter().filter(|x| !x.is_nan()) {
                        a.min = a.min.min(x);
                        a.max = a.max.max(x);
                        a.sum += x;
                        a.sum2 += x * x;
                        a.count += 1;
                    }
                    Ok(a)
                })
                .try_reduce(|| Acc::EMPTY, |a, b| Ok(a.merge(b)))
        })?;
        if acc.count == 0 {
            return Err(Error::DimensionMismatch(String::from(
                "no defined pixels for statistics",
            )));
        }
        let t = acc.count as f64;
        let mean = acc.sum / t;
        let var = (acc.sum2 / t - mean * mean).max(0.0);
        Ok(ImgStat {
            mean,
            std: var.sqrt(),
            min: acc.min,
            max: acc.max,
        })
    }

    /// Value range `max - min`, refusing ranges below `2ε`.
    pub(crate) fn checked_range(&self) -> Result<f64> {
        let range = self.max - self.min;
        if !(range >= 2.0 * f64::EPSILON) {
            return Err(Error::RangeUnderflow {
                min: self.min,
                max: self.max,
            });
        }
        Ok(range)
    }
}

/// Free-function form of [`ImgStat::of`].
pub fn get_imgstat(img: &DoubleImage, rt: &Runtime) -> Result<ImgStat> {
    ImgStat::of(img, rt)
}

/// Map every pixel to `(x - min) / (max - min)` in place.
pub fn normalize(img: &mut DoubleImage, st: &ImgStat, rt: &Runtime) -> Result<()> {
    let range = st.checked_range()?;
    let min = st.min;
    rt.map_in_place(&mut img.data, |x| (x - min) / range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Bitpix;
    use crate::runtime::RuntimeConfig;

    fn rt() -> Runtime {
        Runtime::new(RuntimeConfig { threads: 2 }).unwrap()
    }

    fn ramp(n: usize) -> DoubleImage {
        DoubleImage::from_vec(n, 1, (0..n).map(|i| i as f64).collect()).unwrap()
    }

    // ---- construction ----

    #[test]
    fn from_vec_checks_shape() {
        assert!(DoubleImage::from_vec(2, 2, vec![0.0; 3]).is_err());
        assert!(DoubleImage::from_vec(0, 2, Vec::new()).is_err());
        let img = DoubleImage::from_vec(2, 3, vec![0.0; 6]).unwrap();
        assert_eq!((img.width(), img.height(), img.totpix()), (2, 3, 6));
    }

    #[test]
    fn from_image_widens_u16() {
        let img = Image::from_pixels(&[4, 3], (0..12u16).collect()).unwrap();
        let dbl = DoubleImage::from_image(&img, &rt()).unwrap();
        assert_eq!(dbl.width(), 4);
        assert_eq!(dbl.height(), 3);
        assert_eq!(dbl.get(1, 2), Some(9.0));
        assert_eq!(dbl.get(4, 0), None);
    }

    #[test]
    fn from_image_folds_extra_axes() {
        let img = Image::new(&[2, 3, 4], Bitpix::F32).unwrap();
        let dbl = DoubleImage::from_image(&img, &rt()).unwrap();
        assert_eq!((dbl.width(), dbl.height()), (2, 12));
    }

    #[test]
    fn from_image_rejects_header_only() {
        let img = Image::new(&[], Bitpix::U8).unwrap();
        assert!(matches!(
            DoubleImage::from_image(&img, &rt()),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn from_image_large_spans_chunks() {
        let n = 3 * CHUNK + 5;
        let img = Image::from_pixels(&[n], (0..n as u32).collect()).unwrap();
        let dbl = DoubleImage::from_image(&img, &rt()).unwrap();
        assert_eq!(dbl.data()[n - 1], (n - 1) as f64);
    }

    // ---- statistics ----

    #[test]
    fn stat_of_ramp() {
        let st = ImgStat::of(&ramp(12), &rt()).unwrap();
        assert_eq!(st.min, 0.0);
        assert_eq!(st.max, 11.0);
        assert!((st.mean - 5.5).abs() < 1e-12);
        assert!((st.std - 3.452052529534663).abs() < 1e-9);
    }

    #[test]
    fn stat_constant_has_zero_std() {
        let img = DoubleImage::from_vec(3, 1, vec![0.1; 3]).unwrap();
        let st = ImgStat::of(&img, &rt()).unwrap();
        assert_eq!(st.std, 0.0);
    }

    #[test]
    fn stat_skips_nan() {
        let img = DoubleImage::from_vec(3, 1, vec![1.0, f64::NAN, 3.0]).unwrap();
        let st = ImgStat::of(&img, &rt()).unwrap();
        assert_eq!(st.mean, 2.0);
    }

    // ---- normalisation ----

    #[test]
    fn normalize_to_unit_range() {
        let mut img = ramp(12);
        let r = rt();
        let st = ImgStat::of(&img, &r).unwrap();
        normalize(&mut img, &st, &r).unwrap();
        for (i, &v) in img.data().iter().enumerate() {
            assert!((v - i as f64 / 11.0).abs() < 1e-12);
        }
    }

    #[test]
    fn normalize_refuses_flat_image() {
        let mut img = DoubleImage::from_vec(2, 1, vec![5.0, 5.0]).unwrap();
        let r = rt();
        let st = ImgStat::of(&img, &r).unwrap();
        assert!(matches!(
            normalize(&mut img, &st, &r),
            Err(Error::RangeUnderflow { .. })
        ));
    }

    #[test]
    fn global_convenience_methods() {
        let mut img = ramp(4);
        let st = img.stat().unwrap();
        img.normalize(&st).unwrap();
        assert_eq!(img.data()[3], 1.0);
    }

    #[cfg(feature = "array")]
    #[test]
    fn array_view_shape() {
        let img = DoubleImage::from_vec(3, 2, (0..6).map(f64::from).collect()).unwrap();
        let arr = img.to_array().unwrap();
        assert_eq!(arr.shape(), &[2, 3]);
        assert_eq!(arr[[1, 0]], 3.0);
    }
}
