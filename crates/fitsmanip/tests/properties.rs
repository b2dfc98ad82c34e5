//! Properties of the working-buffer pipeline over pseudo-random inputs.

use fitsmanip::{
    convert2palette, get_imgstat, get_median, histcutoff, histeq, mktransform, normalize,
    DoubleImage, Histogram, Palette, Runtime, RuntimeConfig, Transform,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rt() -> Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new(RuntimeConfig { threads: 4 }).unwrap()
}

/// xorshift64*, so every run sees the same inputs.
struct Rng(u64);

impl Rng {
    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn random_image(seed: u64, w: usize, h: usize, lo: f64, hi: f64) -> DoubleImage {
    let mut rng = Rng(seed);
    let data = (0..w * h).map(|_| lo + rng.unit() * (hi - lo)).collect();
    DoubleImage::from_vec(w, h, data).unwrap()
}

fn normalised(seed: u64, w: usize, h: usize) -> DoubleImage {
    let rt = rt();
    let mut img = random_image(seed, w, h, -1e3, 5e4);
    let st = get_imgstat(&img, &rt).unwrap();
    normalize(&mut img, &st, &rt).unwrap();
    img
}

/// Pixel indices sorted by value; ties keep index order.
fn order(img: &DoubleImage) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..img.totpix()).collect();
    idx.sort_by(|&a, &b| img.data()[a].total_cmp(&img.data()[b]));
    idx
}

/// `after` never reverses the order of any pair of pixels in `before`.
fn assert_monotone(before: &DoubleImage, after: &DoubleImage) {
    let idx = order(before);
    for w in idx.windows(2) {
        let (a, b) = (w[0], w[1]);
        assert!(
            after.data()[a] <= after.data()[b],
            "pixels {a} and {b} swapped: {} -> {}, {} -> {}",
            before.data()[a],
            after.data()[a],
            before.data()[b],
            after.data()[b]
        );
    }
}

// ---------------------------------------------------------------------------
// Normalisation range
// ---------------------------------------------------------------------------

#[test]
fn normalised_buffer_spans_unit_interval() {
    let rt = rt();
    for seed in 1..=8 {
        let img = normalised(seed, 37, 23);
        let st = get_imgstat(&img, &rt).unwrap();
        assert_eq!(st.min, 0.0, "seed {seed}");
        assert!((st.max - 1.0).abs() < 1e-12, "seed {seed}");
        assert!(img.data().iter().all(|&x| (0.0..=1.0 + 1e-12).contains(&x)));
    }
}

// ---------------------------------------------------------------------------
// Histogram coverage
// ---------------------------------------------------------------------------

#[test]
fn histogram_counts_every_pixel() {
    let rt = rt();
    let img = normalised(42, 101, 67);
    for size in [2, 3, 10, 100, 255, 4096, 65535] {
        let hist = Histogram::new(&img, size, &rt).unwrap();
        assert_eq!(hist.size(), size);
        assert_eq!(hist.counts().iter().sum::<usize>(), img.totpix(), "size {size}");
        assert_eq!(hist.levels().len(), size + 1);
        assert_eq!(hist.levels()[0], 0.0);
        assert_eq!(hist.levels()[size], 1.0);
        // The maximum pixel lands in the last bucket, not past it.
        assert!(hist.counts()[size - 1] >= 1);
    }
}

#[test]
fn histogram_size_bounds() {
    let rt = rt();
    let img = normalised(1, 4, 4);
    assert!(Histogram::new(&img, 1, &rt).is_err());
    assert!(Histogram::new(&img, 65536, &rt).is_err());
}

// ---------------------------------------------------------------------------
// Equalisation
// ---------------------------------------------------------------------------

#[test]
fn equalising_uniform_data_is_identity() {
    let rt = rt();
    for size in [4, 10, 50] {
        let per_bucket = 7;
        let n = size * per_bucket;
        let data: Vec<f64> = (0..n).map(|i| (i as f64 + 0.5) / n as f64).collect();
        let mut img = DoubleImage::from_vec(n, 1, data.clone()).unwrap();
        histeq(&mut img, size, &rt).unwrap();
        for (got, want) in img.data().iter().zip(&data) {
            assert!((got - want).abs() < 1e-12, "size {size}: {got} vs {want}");
        }
        let once = img.clone();
        histeq(&mut img, size, &rt).unwrap();
        for (a, b) in img.data().iter().zip(once.data()) {
            assert!((a - b).abs() <= 1.0 / size as f64);
        }
    }
}

#[test]
fn equalised_values_stay_in_unit_interval() {
    let rt = rt();
    let mut img = normalised(9, 64, 64);
    histeq(&mut img, 100, &rt).unwrap();
    assert!(img.data().iter().all(|&x| (0.0..=1.0).contains(&x)));
}

// ---------------------------------------------------------------------------
// Monotonicity
// ---------------------------------------------------------------------------

#[test]
fn pipeline_steps_preserve_order() {
    let rt = rt();
    let base = normalised(7, 50, 40);

    let mut eq = base.clone();
    histeq(&mut eq, 100, &rt).unwrap();
    assert_monotone(&base, &eq);

    let mut cut = base.clone();
    histcutoff(&mut cut, 100, 0.05, 0.1, &rt).unwrap();
    assert_monotone(&base, &cut);
    assert!(cut.data().iter().all(|&x| (0.0..=1.0).contains(&x)));

    for tr in Transform::ALL {
        let mut t = base.clone();
        let st = get_imgstat(&t, &rt).unwrap();
        mktransform(&mut t, &st, tr, &rt).unwrap();
        assert_monotone(&base, &t);
    }
}

#[test]
fn gray_palette_preserves_order() {
    let rt = rt();
    let img = normalised(11, 30, 30);
    let rgb = convert2palette(&img, Palette::Gray, &rt).unwrap();
    let idx = order(&img);
    for w in idx.windows(2) {
        assert!(rgb[3 * w[0]] <= rgb[3 * w[1]]);
    }
}

// ---------------------------------------------------------------------------
// Palettes
// ---------------------------------------------------------------------------

#[test]
fn every_palette_covers_every_pixel() {
    let rt = rt();
    let mut img = normalised(5, 17, 13);
    // Out-of-range and undefined pixels still get a colour.
    img.data_mut()[0] = -0.5;
    img.data_mut()[1] = 1.5;
    img.data_mut()[2] = f64::NAN;
    for cmap in Palette::ALL {
        let rgb = convert2palette(&img, cmap, &rt).unwrap();
        assert_eq!(rgb.len(), 3 * img.totpix(), "{cmap}");
        assert_eq!(&rgb[0..3], &cmap.rgb(0.0), "{cmap}");
        assert_eq!(&rgb[3..6], &cmap.rgb(1.0), "{cmap}");
        assert_eq!(&rgb[6..9], &cmap.rgb(0.0), "{cmap}");
    }
}

#[test]
fn palette_breakpoints() {
    assert_eq!(Palette::Gray.rgb(0.0), [0, 0, 0]);
    assert_eq!(Palette::Gray.rgb(1.0), [255, 255, 255]);
    assert_eq!(Palette::BR.rgb(0.0), [0, 0, 255]);
    assert_eq!(Palette::BR.rgb(0.5), [0, 255, 0]);
    assert_eq!(Palette::BR.rgb(1.0), [255, 0, 0]);
    assert_eq!(Palette::Hot.rgb(0.0), [0, 0, 0]);
    assert_eq!(Palette::Hot.rgb(1.0), [255, 255, 255]);
    assert_eq!(Palette::Cold.rgb(1.0), [255, 255, 255]);
    assert_eq!(Palette::Jet.rgb(0.5), [255, 255, 0]);
}

// ---------------------------------------------------------------------------
// Median filter
// ---------------------------------------------------------------------------

#[test]
fn median_of_constant_image_is_constant() {
    let rt = rt();
    let img = DoubleImage::from_vec(9, 9, vec![7.25; 81]).unwrap();
    for radius in 0..=3 {
        let out = get_median(&img, radius, &rt).unwrap();
        assert_eq!(out, img, "radius {radius}");
    }
}

#[test]
fn median_keeps_monotone_columns() {
    let rt = rt();
    let (w, h) = (1, 40);
    let column: Vec<f64> = (0..h).map(|y| (y * y) as f64).collect();
    let img = DoubleImage::from_vec(w, h, column.clone()).unwrap();
    for radius in 0..=2 {
        assert_eq!(get_median(&img, radius, &rt).unwrap().data(), &column[..]);
    }

    // The same column repeated across a wider image.
    let w = 9;
    let data: Vec<f64> = (0..h).flat_map(|y| std::iter::repeat((y * y) as f64).take(w)).collect();
    let img = DoubleImage::from_vec(w, h, data).unwrap();
    for radius in 0..=3 {
        let out = get_median(&img, radius, &rt).unwrap();
        assert_eq!(out, img, "radius {radius}");
    }
}

#[test]
fn median_is_independent_of_thread_count() {
    let img = random_image(3, 45, 38, 0.0, 1.0);
    let one = Runtime::new(RuntimeConfig { threads: 1 }).unwrap();
    let many = rt();
    for radius in [0, 2] {
        assert_eq!(
            get_median(&img, radius, &one).unwrap(),
            get_median(&img, radius, &many).unwrap()
        );
    }
}
