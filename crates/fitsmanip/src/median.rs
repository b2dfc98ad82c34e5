//! Median of small slices and 2-D median filtering of working buffers.
//!
//! Windows of 2..=9, 16 and 25 values use fixed comparator networks
//! (Devillard, Batcher, and Havlicek et al. for even lengths). Square
//! windows of any radius run a dual-heap running median per column;
//! radius 0 selects the 3x3 cross.

use std::time::Instant;

use log::debug;
use rayon::prelude::*;

use crate::dblimage::DoubleImage;
use crate::error::Result;
use crate::runtime::Runtime;

type Network = &'static [(usize, usize)];

const NET3: Network = &[(0, 1), (1, 2), (0, 1)];
const NET4: Network = &[(0, 2), (1, 3), (0, 1), (2, 3)];
const NET5: Network = &[(0, 1), (3, 4), (0, 3), (1, 4), (1, 2), (2, 3), (1, 2)];
const NET6: Network = &[
    (1, 2), (3, 4),
    (0, 1), (2, 3), (4, 5),
    (1, 2), (3, 4),
    (0, 1), (2, 3), (4, 5),
    (1, 2), (3, 4),
];
const NET7: Network = &[
    (0, 5), (0, 3), (1, 6), (2, 4), (0, 1), (3, 5), (2, 6),
    (2, 3), (3, 6), (4, 5), (1, 4), (1, 3), (3, 4),
];
const NET8: Network = &[
    (0, 4), (1, 5), (2, 6), (3, 7), (0, 2), (1, 3), (4, 6), (5, 7),
    (2, 4), (3, 5), (0, 1), (2, 3), (4, 5), (6, 7), (1, 4), (3, 6),
];
const NET9: Network = &[
    (1, 2), (4, 5), (7, 8), (0, 1), (3, 4), (6, 7), (1, 2), (4, 5),
    (7, 8), (0, 3), (5, 8), (4, 7), (3, 6), (1, 4), (2, 5), (4, 7),
    (4, 2), (6, 4), (4, 2),
];
const NET16: Network = &[
    (0, 8), (1, 9), (2, 10), (3, 11), (4, 12), (5, 13), (6, 14), (7, 15),
    (0, 4), (1, 5), (2, 6), (3, 7), (8, 12), (9, 13), (10, 14), (11, 15),
    (4, 8), (5, 9), (6, 10), (7, 11), (0, 2), (1, 3), (4, 6), (5, 7),
    (8, 10), (9, 11), (12, 14), (13, 15), (2, 8), (3, 9), (6, 12), (7, 13),
    (2, 4), (3, 5), (6, 8), (7, 9), (10, 12), (11, 13), (0, 1), (2, 3),
    (4, 5), (6, 7), (8, 9), (10, 11), (12, 13), (14, 15), (1, 8), (3, 10),
    (5, 12), (7, 14), (5, 8), (7, 10),
];
const NET25: Network = &[
    (0, 1), (3, 4), (2, 4), (2, 3), (6, 7), (5, 7), (5, 6), (9, 10),
    (8, 10), (8, 9), (12, 13), (11, 13), (11, 12), (15, 16), (14, 16), (14, 15),
    (18, 19), (17, 19), (17, 18), (21, 22), (20, 22), (20, 21), (23, 24), (2, 5),
    (3, 6), (0, 6), (0, 3), (4, 7), (1, 7), (1, 4), (11, 14), (8, 14),
    (8, 11), (12, 15), (9, 15), (9, 12), (13, 16), (10, 16), (10, 13), (20, 23),
    (17, 23), (17, 20), (21, 24), (18, 24), (18, 21), (19, 22), (8, 17), (9, 18),
    (0, 18), (0, 9), (10, 19), (1, 19), (1, 10), (11, 20), (2, 20), (2, 11),
    (12, 21), (3, 21), (3, 12), (13, 22), (4, 22), (4, 13), (14, 23), (5, 23),
    (5, 14), (15, 24), (6, 24), (6, 15), (7, 16), (7, 19), (13, 21), (15, 23),
    (7, 13), (7, 15), (1, 9), (3, 11), (5, 17), (11, 17), (9, 17), (4, 10),
    (6, 12), (7, 14), (4, 6), (4, 7), (12, 14), (10, 14), (6, 7), (10, 12),
    (6, 10), (6, 17), (12, 17), (7, 17), (7, 10), (12, 18), (7, 12), (10, 18),
    (12, 20), (10, 20), (10, 12),
];

fn run(p: &mut [f64], net: Network) {
    for &(a, b) in net {
        if p[a] > p[b] {
            p.swap(a, b);
        }
    }
}

/// Median of `p` when a network exists for its length; `p` is permuted.
fn network_median(p: &mut [f64]) -> Option<f64> {
    let mid = |p: &[f64], a: usize, b: usize| (p[a] + p[b]) / 2.0;
    Some(match p.len() {
        1 => p[0],
        2 => mid(p, 0, 1),
        3 => {
            run(p, NET3);
            p[1]
        }
        4 => {
            run(p, NET4);
            mid(p, 1, 2)
        }
        5 => median5(p),
        6 => {
            run(p, NET6);
            mid(p, 2, 3)
        }
        7 => {
            run(p, NET7);
            p[3]
        }
        8 => {
            run(p, NET8);
            mid(p, 3, 4)
        }
        9 => {
            run(p, NET9);
            p[4]
        }
        16 => {
            run(p, NET16);
            mid(p, 7, 8)
        }
        25 => {
            run(p, NET25);
            p[12]
        }
        _ => return None,
    })
}

#[inline]
fn median5(p: &mut [f64]) -> f64 {
    run(p, NET5);
    p[2]
}

/// Median of `values`, or `None` for an empty slice.
///
/// Lengths without a network use selection and give the lower median for
/// even lengths. The input is left untouched.
pub fn calc_median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut buf = values.to_vec();
    network_median(&mut buf).or_else(|| {
        let k = (buf.len() - 1) / 2;
        let (_, m, _) = buf.select_nth_unstable_by(k, f64::total_cmp);
        Some(*m)
    })
}

/// Running median over the last `n` inserted values.
///
/// Values live in a circular buffer; `heap` holds their indices as a
/// max-heap at negative positions, the median at 0 and a min-heap at
/// positive positions. `pos` maps a buffer slot back to its heap position.
struct Mediator {
    data: Vec<f64>,
    pos: Vec<isize>,
    heap: Vec<usize>,
    offset: isize,
    n: isize,
    idx: usize,
    ct: isize,
}

impl Mediator {
    fn new(n: usize) -> Self {
        let offset = (n / 2) as isize;
        let mut m = Mediator {
            data: vec![0.0; n],
            pos: vec![0; n],
            heap: vec![0; n],
            offset,
            n: n as isize,
            idx: 0,
            ct: 0,
        };
        // Fill pattern: median, max, min, max, ...
        for k in (0..n).rev() {
            let half = ((k + 1) / 2) as isize;
            let p = if k & 1 == 1 { -half } else { half };
            m.pos[k] = p;
            m.heap[(p + offset) as usize] = k;
        }
        m
    }

    #[inline]
    fn slot(&self, i: isize) -> usize {
        self.heap[(i + self.offset) as usize]
    }

    #[inline]
    fn value(&self, i: isize) -> f64 {
        self.data[self.slot(i)]
    }

    fn min_ct(&self) -> isize {
        (self.ct - 1) / 2
    }

    fn max_ct(&self) -> isize {
        self.ct / 2
    }

    #[inline]
    fn less(&self, i: isize, j: isize) -> bool {
        self.value(i) < self.value(j)
    }

    fn exchange(&mut self, i: isize, j: isize) {
        let (a, b) = ((i + self.offset) as usize, (j + self.offset) as usize);
        self.heap.swap(a, b);
        self.pos[self.heap[a]] = i;
        self.pos[self.heap[b]] = j;
    }

    /// Swap `i` and `j` if `heap[i] < heap[j]`.
    fn cmp_exch(&mut self, i: isize, j: isize) -> bool {
        if self.less(i, j) {
            self.exchange(i, j);
            true
        } else {
            false
        }
    }

    fn min_sort_down(&mut self, mut i: isize) {
        while i <= self.min_ct() {
            if i > 1 && i < self.min_ct() && self.less(i + 1, i) {
                i += 1;
            }
            if !self.cmp_exch(i, i / 2) {
                break;
            }
            i *= 2;
        }
    }

    fn max_sort_down(&mut self, mut i: isize) {
        while i >= -self.max_ct() {
            if i < -1 && i > -self.max_ct() && self.less(i, i - 1) {
                i -= 1;
            }
            if !self.cmp_exch(i / 2, i) {
                break;
            }
            i *= 2;
        }
    }

    /// Returns true when the median changed.
    fn min_sort_up(&mut self, mut i: isize) -> bool {
        while i > 0 && self.cmp_exch(i, i / 2) {
            i /= 2;
        }
        i == 0
    }

    /// Returns true when the median changed.
    fn max_sort_up(&mut self, mut i: isize) -> bool {
        while i < 0 && self.cmp_exch(i / 2, i) {
            i /= 2;
        }
        i == 0
    }

    fn insert(&mut self, v: f64) {
        let is_new = self.ct < self.n;
        let p = self.pos[self.idx];
        let old = self.data[self.idx];
        self.data[self.idx] = v;
        self.idx = (self.idx + 1) % self.data.len();
        if is_new {
            self.ct += 1;
        }
        if p > 0 {
            if !is_new && old < v {
                self.min_sort_down(p * 2);
            } else if self.min_sort_up(p) {
                self.max_sort_down(-1);
            }
        } else if p < 0 {
            if !is_new && v < old {
                self.max_sort_down(p * 2);
            } else if self.max_sort_up(p) {
                self.min_sort_down(1);
            }
        } else {
            if self.max_ct() > 0 {
                self.max_sort_down(-1);
            }
            if self.min_ct() > 0 {
                self.min_sort_down(1);
            }
        }
    }

    fn median(&self) -> f64 {
        let v = self.value(0);
        if self.ct & 1 == 0 {
            (v + self.value(-1)) / 2.0
        } else {
            v
        }
    }
}

/// Median of the 3x3 cross around `(x, y)`.
///
/// Edge pixels use {c, c, both edge neighbours, inward neighbour} and
/// corners {c, c, horizontal, vertical, diagonal}.
///
/// A single row or column has no cross; its pixels take the median of
/// themselves and their neighbours along the line, ends doubling `c`.
fn cross_at(src: &[f64], w: usize, h: usize, x: usize, y: usize) -> f64 {
    let at = |x: usize, y: usize| src[y * w + x];
    let c = at(x, y);
    if w == 1 || h == 1 {
        let (i, n) = if h == 1 { (x, w) } else { (y, h) };
        let line = |k: usize| src[k];
        let prev = if i > 0 { line(i - 1) } else { c };
        let next = if i + 1 < n { line(i + 1) } else { c };
        return median3(prev, c, next);
    }
    let inner_x = x > 0 && x + 1 < w;
    let inner_y = y > 0 && y + 1 < h;
    let ix = if x > 0 { x - 1 } else { x + 1 };
    let iy = if y > 0 { y - 1 } else { y + 1 };
    let mut p = match (inner_x, inner_y) {
        (true, true) => [c, at(x - 1, y), at(x + 1, y), at(x, y - 1), at(x, y + 1)],
        (true, false) => [c, c, at(x - 1, y), at(x + 1, y), at(x, iy)],
        (false, true) => [c, c, at(x, y - 1), at(x, y + 1), at(ix, y)],
        (false, false) => [c, c, at(ix, y), at(x, iy), at(ix, iy)],
    };
    median5(&mut p)
}

#[inline]
fn median3(a: f64, b: f64, c: f64) -> f64 {
    a.min(b).max(a.max(b).min(c))
}

fn median_cross(img: &DoubleImage, out: &mut DoubleImage, rt: &Runtime) -> Result<()> {
    let (w, h) = (img.width(), img.height());
    let src = img.data();
    rt.install(|| {
        out.data_mut()
            .par_chunks_mut(w)
            .enumerate()
            .try_for_each(|(y, row)| -> Result<()> {
                rt.check()?;
                for (x, v) in row.iter_mut().enumerate() {
                    *v = cross_at(src, w, h, x, y);
                }
                Ok(())
            })
    })
}

fn median_square(img: &DoubleImage, out: &mut DoubleImage, radius: usize, rt: &Runtime) -> Result<()> {
    let (w, h) = (img.width(), img.height());
    let src = img.data();
    let side = 2 * radius + 1;
    let columns: Vec<(usize, Vec<f64>)> = rt.install(|| {
        (radius..w - radius)
            .into_par_iter()
            .map(|x| -> Result<(usize, Vec<f64>)> {
                rt.check()?;
                let mut m = Mediator::new(side * side);
                let cols = x - radius..=x + radius;
                for yy in 0..side - 1 {
                    for xx in cols.clone() {
                        m.insert(src[yy * w + xx]);
                    }
                }
                let mut meds = Vec::with_capacity(h - 2 * radius);
                for y in radius..h - radius {
                    let bottom = (y + radius) * w;
                    for xx in cols.clone() {
                        m.insert(src[bottom + xx]);
                    }
                    meds.push(m.median());
                }
                Ok((x, meds))
            })
            .collect::<Result<_>>()
    })?;
    let dst = out.data_mut();
    for (x, meds) in columns {
        for (k, v) in meds.into_iter().enumerate() {
            dst[(k + radius) * w + x] = v;
        }
    }
    Ok(())
}

/// Median-filter `img` with a `(2r+1)²` window, or the 3x3 cross for
/// `radius == 0` (`get_median`).
///
/// Square windows filter the region at least `radius` pixels from every
/// edge and copy the frame through; images smaller than the window are
/// returned unchanged. The cross filters every pixel of any image, a
/// single row or column with a 3-point median along it.
pub fn get_median(img: &DoubleImage, radius: usize, rt: &Runtime) -> Result<DoubleImage> {
    let (w, h) = (img.width(), img.height());
    let mut out = img.clone();
    let side = 2 * radius + 1;
    if radius > 0 && (w < side || h < side) {
        debug!("median: {w}x{h} image smaller than the window, copied through");
        return Ok(out);
    }
    let t0 = Instant::now();
    if radius == 0 {
        median_cross(img, &mut out, rt)?;
        debug!(
            "median filtering by cross 3x3 of image {w}x{h}: {:.3}s",
            t0.elapsed().as_secs_f64()
        );
    } else {
        median_square(img, &mut out, radius, rt)?;
        debug!(
            "median filtering {side}x{side} of image {w}x{h}: {:.3}s",
            t0.elapsed().as_secs_f64()
        );
    }
    Ok(out)
}

impl DoubleImage {
    /// [`get_median`] on the global runtime.
    pub fn median(&self, radius: usize) -> Result<DoubleImage> {
        get_median(self, radius, Runtime::global()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    fn rt() -> Runtime {
        Runtime::new(RuntimeConfig { threads: 2 }).unwrap()
    }

    /// xorshift64, enough for shuffled inputs.
    fn noise(seed: u64, n: usize) -> Vec<f64> {
        let mut s = seed.max(1);
        (0..n)
            .map(|_| {
                s ^= s << 13;
                s ^= s >> 7;
                s ^= s << 17;
                (s % 1000) as f64
            })
            .collect()
    }

    fn reference(values: &[f64]) -> f64 {
        let mut v = values.to_vec();
        v.sort_by(f64::total_cmp);
        let n = v.len();
        if n % 2 == 1 {
            v[n / 2]
        } else {
            (v[n / 2 - 1] + v[n / 2]) / 2.0
        }
    }

    // ---- networks ----

    #[test]
    fn networks_agree_with_sorting() {
        for n in [2usize, 3, 4, 5, 6, 7, 8, 9, 16, 25] {
            for seed in 1..50u64 {
                let v = noise(seed * 7919 + n as u64, n);
                assert_eq!(calc_median(&v), Some(reference(&v)), "n={n} {v:?}");
            }
        }
    }

    #[test]
    fn selection_for_other_lengths() {
        assert_eq!(calc_median(&[]), None);
        assert_eq!(calc_median(&[4.0]), Some(4.0));
        let v = noise(3, 11);
        assert_eq!(calc_median(&v), Some(reference(&v)));
        // Lower median for even lengths without a network.
        let v: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(calc_median(&v), Some(4.0));
    }

    #[test]
    fn input_is_untouched() {
        let v = vec![3.0, 1.0, 2.0];
        calc_median(&v);
        assert_eq!(v, vec![3.0, 1.0, 2.0]);
    }

    // ---- running median ----

    #[test]
    fn mediator_tracks_window() {
        for n in [9usize, 25, 49, 4] {
            let input = noise(n as u64, 300);
            let mut m = Mediator::new(n);
            for (i, &v) in input.iter().enumerate() {
                m.insert(v);
                let start = (i + 1).saturating_sub(n);
                assert_eq!(m.median(), reference(&input[start..=i]), "n={n} i={i}");
            }
        }
    }

    // ---- filters ----

    #[test]
    fn constant_image_is_fixed() {
        let r = rt();
        let img = DoubleImage::from_vec(9, 7, vec![2.5; 63]).unwrap();
        for radius in 0..4 {
            assert_eq!(get_median(&img, radius, &r).unwrap(), img, "radius {radius}");
        }
    }

    #[test]
    fn monotone_ramp_is_fixed() {
        let (w, h) = (8, 9);
        let img = DoubleImage::from_vec(w, h, (0..w * h).map(|i| i as f64).collect()).unwrap();
        let r = rt();
        for radius in 1..4 {
            assert_eq!(get_median(&img, radius, &r).unwrap(), img, "radius {radius}");
        }
    }

    #[test]
    fn monotone_column_keeps_interior() {
        let img = DoubleImage::from_vec(1, 12, (0..12).map(f64::from).collect()).unwrap();
        let out = get_median(&img, 2, &rt()).unwrap();
        assert_eq!(out.data()[2..10], img.data()[2..10]);
    }

    #[test]
    fn cross_removes_impulse() {
        let mut data = vec![0.0; 15];
        data[5 + 1] = 9.0;
        let img = DoubleImage::from_vec(5, 3, data).unwrap();
        let out = get_median(&img, 0, &rt()).unwrap();
        assert!(out.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn cross_filters_single_row() {
        let img = DoubleImage::from_vec(5, 1, vec![0.0, 9.0, 0.0, 0.0, 0.0]).unwrap();
        let out = get_median(&img, 0, &rt()).unwrap();
        assert_eq!(out.data(), &[0.0; 5]);
    }

    #[test]
    fn cross_filters_single_column() {
        let img = DoubleImage::from_vec(1, 6, vec![5.0, 1.0, 2.0, 8.0, 3.0, 3.0]).unwrap();
        let out = get_median(&img, 0, &rt()).unwrap();
        assert_eq!(out.data(), &[5.0, 2.0, 2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn square_window_copies_small_image() {
        let img = DoubleImage::from_vec(5, 2, vec![0.0, 9.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        assert_eq!(get_median(&img, 1, &rt()).unwrap(), img);
    }

    #[test]
    fn cross_clamps_corners() {
        // Corner tuple {9, 9, 1, 1, 1}.
        let img = DoubleImage::from_vec(3, 3, vec![9.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0])
            .unwrap();
        let out = get_median(&img, 0, &rt()).unwrap();
        assert_eq!(out.data()[0], 1.0);
        assert!(out.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn square_window_keeps_frame() {
        let (w, h) = (6, 6);
        let mut data = noise(11, w * h);
        data[2 * w + 2] = 1e6;
        let img = DoubleImage::from_vec(w, h, data).unwrap();
        let out = get_median(&img, 1, &rt()).unwrap();
        for y in 0..h {
            for x in 0..w {
                let v = out.get(x, y).unwrap();
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    assert_eq!(Some(v), img.get(x, y));
                } else {
                    let window: Vec<f64> = (y - 1..=y + 1)
                        .flat_map(|yy| (x - 1..=x + 1).map(move |xx| (xx, yy)))
                        .map(|(xx, yy)| img.get(xx, yy).unwrap())
                        .collect();
                    assert_eq!(v, reference(&window));
                }
            }
        }
    }

    #[test]
    fn global_convenience() {
        let img = DoubleImage::from_vec(3, 3, vec![1.0; 9]).unwrap();
        assert_eq!(img.median(1).unwrap(), img);
    }
}
