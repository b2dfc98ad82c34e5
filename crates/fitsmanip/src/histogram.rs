//! Histograms of normalised working buffers, cut-off and equalisation.

use core::fmt;

use log::debug;
use rayon::prelude::*;

use crate::dblimage::DoubleImage;
use crate::error::{Error, Result};
use crate::runtime::{Runtime, CHUNK};

/// Smallest accepted number of histogram levels.
pub const MIN_LEVELS: usize = 2;
/// Largest accepted number of histogram levels.
pub const MAX_LEVELS: usize = 65535;

/// Uniform histogram of a buffer whose values lie in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    totpix: usize,
    counts: Vec<usize>,
    levels: Vec<f64>,
}

/// Bucket of `x` among `size` levels. Out-of-range values land in the
/// first or last bucket.
#[inline]
fn bucket(x: f64, size: usize) -> usize {
    ((x * size as f64) as usize).min(size - 1)
}

fn check_size(size: usize) -> Result<()> {
    if (MIN_LEVELS..=MAX_LEVELS).contains(&size) {
        Ok(())
    } else {
        Err(Error::HistogramOutOfBounds(size))
    }
}

impl Histogram {
    /// Count the pixels of `img` into `size` equal buckets (`dbl2histogram`).
    pub fn new(img: &DoubleImage, size: usize, rt: &Runtime) -> Result<Self> {
        check_size(size)?;
        let counts = rt.install(|| {
            img.data()
                .par_chunks(CHUNK)
                .try_fold(
                    || vec![0usize; size],
                    |mut acc, chunk| -> Result<Vec<usize>> {
                        rt.check()?;
                        for &x in chunk {
                            acc[bucket(x, size)] += 1;
                        }
                        Ok(acc)
                    },
                )
                .try_reduce(
                    || vec![0usize; size],
                    |mut a, b| -> Result<Vec<usize>> {
                        for (x, y) in a.iter_mut().zip(b) {
                            *x += y;
                        }
                        Ok(a)
                    },
                )
        })?;
        let levels = (0..=size).map(|i| i as f64 / size as f64).collect();
        Ok(Histogram {
            totpix: img.totpix(),
            counts,
            levels,
        })
    }

    /// Number of buckets.
    pub fn size(&self) -> usize {
        self.counts.len()
    }

    pub fn totpix(&self) -> usize {
        self.totpix
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Bucket edges, `size + 1` values from 0 to 1.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Running totals of [`counts`](Self::counts).
    pub fn cumulative(&self) -> Vec<usize> {
        self.counts
            .iter()
            .scan(0usize, |acc, &c| {
                *acc += c;
                Some(*acc)
            })
            .collect()
    }
}

/// Non-empty buckets, one per line.
impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &c) in self.counts.iter().enumerate().filter(|(_, &c)| c > 0) {
            writeln!(
                f,
                "{i:5} [{:3}%]: {c} ({}..{})",
                100 * c / self.totpix.max(1),
                self.levels[i],
                self.levels[i + 1]
            )?;
        }
        Ok(())
    }
}

/// Clip the darkest `bottom` and brightest `top` fractions of the pixels
/// and stretch what remains to `[0, 1]` (`dbl_histcutoff`).
///
/// The buffer must already be normalised.
pub fn histcutoff(
    img: &mut DoubleImage,
    size: usize,
    bottom: f64,
    top: f64,
    rt: &Runtime,
) -> Result<()> {
    let bad = Error::InvalidFraction { bottom, top };
    if !(0.0..=1.0).contains(&bottom) || !(0.0..=1.0).contains(&top) {
        return Err(bad);
    }
    let hist = Histogram::new(img, size, rt)?;
    let total = hist.totpix();
    let nbot = (bottom * total as f64) as usize;
    let ntop = (top * total as f64) as usize;
    if nbot + ntop >= total {
        return Err(bad);
    }
    let ntop = total - ntop;

    let mut lo = None;
    let mut hi = size;
    let mut cumul = 0usize;
    for (i, &c) in hist.counts().iter().enumerate() {
        cumul += c;
        if lo.is_none() {
            if cumul > nbot {
                lo = Some(i);
            }
        } else if cumul > ntop {
            hi = i;
            break;
        }
    }
    let lo = lo.ok_or(bad)?;
    let low = hist.levels()[lo];
    let high = hist.levels()[hi];
    let range = high - low;
    debug!("histogram cut-off: buckets {lo}..{hi}, values {low}..{high}");
    if range < 2.0 * f64::EPSILON {
        return Err(Error::RangeUnderflow {
            min: low,
            max: high,
        });
    }
    rt.map_in_place(img.data_mut(), |x| {
        if x < low {
            0.0
        } else {
            ((x - low) / range).min(1.0)
        }
    })
}

/// Histogram equalisation of a normalised buffer (`dbl_histeq`).
///
/// Each pixel moves to the cumulative fraction of pixels below it,
/// interpolated linearly inside its bucket.
pub fn histeq(img: &mut DoubleImage, size: usize, rt: &Runtime) -> Result<()> {
    let hist = Histogram::new(img, size, rt)?;
    let total = hist.totpix() as f64;
    let mut newlevels = Vec::with_capacity(size + 1);
    newlevels.push(0.0);
    newlevels.extend(hist.cumulative().into_iter().map(|c| c as f64 / total));
    let scale = size as f64;
    rt.map_in_place(img.data_mut(), |x| {
        let dnl = x * scale;
        let b = bucket(x, size);
        let frac = (dnl - b as f64).clamp(0.0, 1.0);
        newlevels[b] + frac * (newlevels[b + 1] - newlevels[b])
    })
}

impl DoubleImage {
    /// [`Histogram::new`] on the global runtime.
    pub fn histogram(&self, size: usize) -> Result<Histogram> {
        Histogram::new(self, size, Runtime::global()?)
    }

    /// [`histcutoff`] on the global runtime.
    pub fn histcutoff(&mut self, size: usize, bottom: f64, top: f64) -> Result<&mut Self> {
        histcutoff(self, size, bottom, top, Runtime::global()?)?;
        Ok(self)
    }

    /// [`histeq`] on the global runtime.
    pub fn histeq(&mut self, size: usize) -> Result<&mut Self> {
        histeq(self, size, Runtime::global()?)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    fn rt() -> Runtime {
        Runtime::new(RuntimeConfig { threads: 2 }).unwrap()
    }

    fn row(values: Vec<f64>) -> DoubleImage {
        DoubleImage::from_vec(values.len(), 1, values).unwrap()
    }

    fn normalised_ramp(n: usize) -> DoubleImage {
        row((0..n).map(|i| i as f64 / (n - 1) as f64).collect())
    }

    // ---- histogram ----

    #[test]
    fn eleven_levels_over_twelve_pixels() {
        let hist = Histogram::new(&normalised_ramp(12), 11, &rt()).unwrap();
        assert_eq!(hist.counts(), &[1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2]);
        assert_eq!(hist.levels().len(), 12);
        assert_eq!(hist.levels()[11], 1.0);
    }

    #[test]
    fn size_bounds() {
        let img = normalised_ramp(4);
        let r = rt();
        assert!(matches!(
            Histogram::new(&img, 1, &r),
            Err(Error::HistogramOutOfBounds(1))
        ));
        assert!(Histogram::new(&img, 65536, &r).is_err());
        assert!(Histogram::new(&img, 65535, &r).is_ok());
    }

    #[test]
    fn counts_cover_every_pixel() {
        let n = 2 * CHUNK + 17;
        let img = normalised_ramp(n);
        let hist = Histogram::new(&img, 1000, &rt()).unwrap();
        assert_eq!(hist.counts().iter().sum::<usize>(), n);
        assert_eq!(*hist.cumulative().last().unwrap(), n);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let img = row(vec![-0.5, 2.0, f64::NAN]);
        let hist = Histogram::new(&img, 4, &rt()).unwrap();
        assert_eq!(hist.counts(), &[2, 0, 0, 1]);
    }

    #[test]
    fn display_skips_empty_buckets() {
        let img = row(vec![0.0, 0.0, 1.0]);
        let hist = Histogram::new(&img, 4, &rt()).unwrap();
        let text = hist.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("    0 [ 66%]: 2 (0..0.25)"));
    }

    // ---- cut-off ----

    #[test]
    fn cutoff_stretches_the_middle() {
        let mut img = normalised_ramp(101);
        histcutoff(&mut img, 100, 0.1, 0.1, &rt()).unwrap();
        let d = img.data();
        assert_eq!(d[0], 0.0);
        assert_eq!(d[10], 0.0);
        assert_eq!(d[100], 1.0);
        assert!(d.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn cutoff_without_fractions_is_identity_on_ramp() {
        let mut img = normalised_ramp(11);
        let before = img.clone();
        histcutoff(&mut img, 10, 0.0, 0.0, &rt()).unwrap();
        for (a, b) in img.data().iter().zip(before.data()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn cutoff_rejects_bad_fractions() {
        let r = rt();
        let mut img = normalised_ramp(10);
        assert!(matches!(
            histcutoff(&mut img, 10, -0.1, 0.0, &r),
            Err(Error::InvalidFraction { .. })
        ));
        assert!(matches!(
            histcutoff(&mut img, 10, 0.6, 0.5, &r),
            Err(Error::InvalidFraction { .. })
        ));
    }

    // ---- equalisation ----

    #[test]
    fn histeq_flattens_skewed_input() {
        let mut img = row(vec![0.0, 0.01, 0.02, 0.03, 1.0]);
        histeq(&mut img, 10, &rt()).unwrap();
        let d = img.data();
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
        assert!(d[3] > 0.03);
        assert_eq!(d[4], 1.0);
    }

    #[test]
    fn histeq_is_idempotent_on_uniform_input() {
        let size = 64;
        let r = rt();
        let uniform = row((0..size).map(|i| (i as f64 + 0.5) / size as f64).collect());
        let mut once = uniform.clone();
        histeq(&mut once, size, &r).unwrap();
        assert_eq!(once, uniform);
        let mut twice = once.clone();
        histeq(&mut twice, size, &r).unwrap();
        for (a, b) in once.data().iter().zip(twice.data()) {
            assert!((a - b).abs() <= 1.0 / size as f64);
        }
    }

    #[test]
    fn convenience_methods_chain() {
        let mut img = normalised_ramp(50);
        img.histeq(16).unwrap().histcutoff(16, 0.0, 0.1).unwrap();
        assert_eq!(img.histogram(16).unwrap().totpix(), 50);
    }
}
