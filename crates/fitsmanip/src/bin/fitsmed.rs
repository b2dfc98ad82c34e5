use fitsmanip::{file_absent, Fits, Runtime, RuntimeConfig};
use log::info;
use std::process;

const USAGE: &str = "Usage: fitsmed [-R radius] [-o out.fits] [-r] [-j N] <in.fits>

Median-filter the first image HDU with pixels.
  -R r  window radius; 0 selects the 3x3 cross (default 1)
  -o f  output file (default: rewrite the input)
  -r    allow replacing an existing output file
  -j N  worker threads (0 = one per CPU)";

#[derive(Debug)]
struct Options {
    radius: usize,
    output: Option<String>,
    rewrite: bool,
    threads: Option<usize>,
    input: String,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut radius = 1;
    let mut output = None;
    let mut rewrite = false;
    let mut threads = None;
    let mut input = None;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-R" | "--radius" => {
                let r = it.next().ok_or("-R needs a radius")?;
                radius = r
                    .parse()
                    .map_err(|_| format!("Median radius should be >= 0, got {r}"))?;
            }
            "-o" | "--output" => output = Some(it.next().ok_or("-o needs a file name")?.clone()),
            "-r" | "--rewrite" => rewrite = true,
            "-j" | "--threads" => {
                let n = it.next().ok_or("-j needs a thread count")?;
                threads = Some(n.parse().map_err(|_| format!("Bad thread count: {n}"))?);
            }
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
    Ok(Options {
        radius,
        output,
        rewrite,
        threads,
        input: input.ok_or_else(|| USAGE.to_string())?,
    })
}

/// Replace the first image of `fits` with its median-filtered version.
fn filter(fits: &mut Fits, radius: usize, rt: &Runtime) -> Result<usize, String> {
    let n = fits
        .first_image()
        .ok_or_else(|| format!("No image HDUs in {}", fits.path().display()))?;
    let img = fits
        .nth_mut(n)
        .ok()
        .and_then(|h| h.image_mut())
        .ok_or("No image")?;
    if img.naxis() != 2 {
        return Err(format!(
            "Only 2-dimensional images are supported, HDU {n} has {} axes",
            img.naxis()
        ));
    }
    let dbl = fitsmanip::image2double(img, rt).map_err(|e| e.to_string())?;
    let filtered = fitsmanip::get_median(&dbl, radius, rt).map_err(|e| e.to_string())?;
    img.rebuild(&filtered, rt).map_err(|e| e.to_string())?;
    fits.set_cursor(n).map_err(|e| e.to_string())?;
    Ok(n)
}

fn run(args: &[String]) -> Result<String, String> {
    let opts = parse_args(args)?;
    let config = opts
        .threads
        .map_or_else(RuntimeConfig::from_env, |threads| RuntimeConfig { threads });
    let rt = Runtime::init_global(config).map_err(|e| e.to_string())?;

    let output = opts.output.clone().unwrap_or_else(|| opts.input.clone());
    let replacing = !file_absent(&output);
    if replacing && !opts.rewrite {
        return Err(format!("File {output} exists, use -r to replace it"));
    }

    let mut fits =
        Fits::read(&opts.input).map_err(|e| format!("Failed to open {}: {e}", opts.input))?;
    let n = filter(&mut fits, opts.radius, rt)?;
    info!("filtered HDU {n} with radius {}", opts.radius);

    fits.set_path(&output);
    let written = if replacing {
        fits.rewrite()
    } else {
        fits.write(&output)
    };
    written.map_err(|e| format!("Can't write {output}: {e}"))?;
    Ok(format!("HDU {n} filtered into {output}\n"))
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
