use fitsmanip::histogram::Histogram;
use fitsmanip::{
    file_absent, make_filename, replace_file, DoubleImage, Fits, ImgStat, Palette, Runtime,
    RuntimeConfig, Transform,
};
use log::{debug, info};
use std::path::PathBuf;
use std::process;

const USAGE: &str = "Usage: fitsrender [options] <in.fits>

Render a 2-D image HDU through a colourmap into a binary PPM file.
  -n N  HDU number (default 1)
  -p P  palette: br, cold, gray, hot, jet (default gray)
  -T T  intensity transform: exp, linear, log, pow, sqrt (default linear)
  -l N  histogram levels (default 100)
  -L f  histogram cut-off fraction at the low end
  -H f  histogram cut-off fraction at the high end
  -E    histogram equalisation
  -o f  output file (default: first free image_NNNN.ppm)
  -r    allow replacing an existing output file
  -j N  worker threads (0 = one per CPU)";

#[derive(Debug)]
struct Options {
    hdu: usize,
    palette: Palette,
    transform: Transform,
    levels: usize,
    cut_low: f64,
    cut_high: f64,
    histeq: bool,
    output: Option<String>,
    rewrite: bool,
    threads: Option<usize>,
    input: String,
}

fn value<'a>(it: &mut impl Iterator<Item = &'a String>, opt: &str) -> Result<&'a String, String> {
    it.next().ok_or_else(|| format!("{opt} needs a value"))
}

fn number<T: std::str::FromStr>(text: &str, opt: &str) -> Result<T, String> {
    text.parse().map_err(|_| format!("Bad value for {opt}: {text}"))
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        hdu: 1,
        palette: Palette::default(),
        transform: Transform::default(),
        levels: 100,
        cut_low: 0.0,
        cut_high: 0.0,
        histeq: false,
        output: None,
        rewrite: false,
        threads: None,
        input: String::new(),
    };
    let mut input = None;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let opt = arg.as_str();
        match opt {
            "-n" => opts.hdu = number(value(&mut it, opt)?, opt)?,
            "-p" => {
                opts.palette = value(&mut it, opt)?
                    .parse()
                    .map_err(|e: fitsmanip::Error| format!("Wrong colormap: {e}"))?;
            }
            "-T" => {
                opts.transform = value(&mut it, opt)?
                    .parse()
                    .map_err(|e: fitsmanip::Error| format!("Wrong transform: {e}"))?;
            }
            "-l" => opts.levels = number(value(&mut it, opt)?, opt)?,
            "-L" => opts.cut_low = number(value(&mut it, opt)?, opt)?,
            "-H" => opts.cut_high = number(value(&mut it, opt)?, opt)?,
            "-E" => opts.histeq = true,
            "-o" => opts.output = Some(value(&mut it, opt)?.clone()),
            "-r" => opts.rewrite = true,
            "-j" => opts.threads = Some(number(value(&mut it, opt)?, opt)?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            a if a.starts_with('-') => return Err(format!("Unknown option: {a}")),
            _ => {
                if input.is_some() {
                    return Err("Too many arguments".to_string());
                }
                input = Some(arg.clone());
            }
        }
    }
    opts.input = input.ok_or_else(|| USAGE.to_string())?;
    Ok(opts)
}

/// The rendering chain: normalise, equalise, cut off, transform, colour.
fn render(dbl: &mut DoubleImage, opts: &Options, rt: &Runtime) -> fitsmanip::Result<Vec<u8>> {
    let st = ImgStat::of(dbl, rt)?;
    debug!(
        "image statistics: MIN={}, MAX={}, AVR={}, STD={}",
        st.min, st.max, st.mean, st.std
    );
    fitsmanip::normalize(dbl, &st, rt)?;
    debug!(
        "histogram before transformations:\n{}",
        Histogram::new(dbl, opts.levels, rt)?
    );
    if opts.histeq {
        fitsmanip::histeq(dbl, opts.levels, rt)?;
    }
    if opts.cut_low > f64::EPSILON || opts.cut_high > f64::EPSILON {
        fitsmanip::histcutoff(dbl, opts.levels, opts.cut_low, opts.cut_high, rt)?;
    }
    let st = ImgStat::of(dbl, rt)?;
    fitsmanip::mktransform(dbl, &st, opts.transform, rt)?;
    // Transforms other than linear leave [0, 1].
    let st = ImgStat::of(dbl, rt)?;
    fitsmanip::normalize(dbl, &st, rt)?;
    debug!(
        "histogram after transformations:\n{}",
        Histogram::new(dbl, opts.levels, rt)?
    );
    fitsmanip::convert2palette(dbl, opts.palette, rt)
}

/// Binary PPM with the first image row at the bottom.
fn ppm(width: usize, height: usize, rgb: &[u8]) -> Vec<u8> {
    let mut out = format!("P6\n{width} {height}\n255\n").into_bytes();
    out.reserve(rgb.len());
    for row in rgb.chunks_exact(3 * width).rev() {
        out.extend_from_slice(row);
    }
    out
}

fn run(args: &[String]) -> Result<String, String> {
    let opts = parse_args(args)?;
    let config = opts
        .threads
        .map_or_else(RuntimeConfig::from_env, |threads| RuntimeConfig { threads });
    let rt = Runtime::init_global(config).map_err(|e| e.to_string())?;

    let output: PathBuf = match &opts.output {
        Some(o) => PathBuf::from(o),
        None => make_filename("image", "ppm").ok_or("No free output file name")?,
    };
    let replacing = !file_absent(&output);
    if replacing && !opts.rewrite {
        return Err(format!("File {} exists", output.display()));
    }

    let fits =
        Fits::read(&opts.input).map_err(|e| format!("Failed to open {}: {e}", opts.input))?;
    info!(
        "got file {}, HDUs: {}, working HDU #{}",
        opts.input,
        fits.len(),
        opts.hdu
    );
    let hdu = fits.nth(opts.hdu).map_err(|e| e.to_string())?;
    let img = hdu
        .image()
        .ok_or_else(|| format!("HDU {} is not image!", opts.hdu))?;
    if img.naxis() != 2 {
        return Err("Support only 2-dimensional images".to_string());
    }
    let mut dbl = fitsmanip::image2double(img, rt).map_err(|e| e.to_string())?;
    let rgb = render(&mut dbl, &opts, rt).map_err(|e| e.to_string())?;
    let bytes = ppm(dbl.width(), dbl.height(), &rgb);

    let written = if replacing {
        replace_file(&output, |out| Ok(out.write_all(&bytes)?))
    } else {
        std::fs::write(&output, &bytes).map_err(fitsmanip::Error::from)
    };
    written.map_err(|e| format!("Can't save {}: {e}", output.display()))?;
    Ok(format!("File {} saved\n", output.display()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(output) => print!("{output}"),
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(1);
        }
    }
}
