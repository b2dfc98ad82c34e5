use fitsmanip::{Fits, Hdu, ImgStat, Payload, Runtime, RuntimeConfig};
use std::process;

const USAGE: &str = "Usage: fitsinfo [-l] [-t] [-s] [-j N] <file.fits>...

Print an HDU summary for each FITS file.
  -l    list header records
  -t    print table contents
  -s    print statistics of the first image with pixels
  -j N  worker threads (0 = one per CPU)";

#[derive(Debug, Default)]
struct Options {
    list_keys: bool,
    tables: bool,
    stats: bool,
    threads: Option<usize>,
    files: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-l" | "--list" => opts.list_keys = true,
            "-t" | "--tables" => opts.tables = true,
            "-s" | "--stat" => opts.stats = true,
            "-j" | "--threads" => {
                let n = it.next().ok_or("-j needs a thread count")?;
                opts.threads = Some(n.parse().map_err(|_| format!("Bad thread count: {n}"))?);
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            a if a.starts_with('-') => return Err(format!("Unknown option: {a}")),
            _ => opts.files.push(arg.clone()),
        }
    }
    if opts.files.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(opts)
}

fn format_hdu(n: usize, hdu: &Hdu) -> String {
    let mut out = String::new();
    let label = match hdu.extname() {
        Some(name) => format!(" (EXTNAME: {name})"),
        None => String::new(),
    };
    let kind = if n == 1 && hdu.image().is_some() {
        "Primary"
    } else {
        hdu.payload().kind()
    };
    out.push_str(&format!("HDU {n}: {kind}{label}\n"));
    match hdu.payload() {
        Payload::Image(img) => {
            out.push_str(&format!("  BITPIX: {}\n", img.bitpix()));
            out.push_str(&format!("  NAXIS: {}\n", img.naxis()));
            if img.naxis() > 0 {
                out.push_str(&format!("  Dimensions: {:?}\n", img.naxes()));
            }
            let undefined = img.count_undefined();
            if undefined > 0 {
                out.push_str(&format!("  Undefined pixels: {undefined}\n"));
            }
        }
        Payload::AsciiTable(t) | Payload::BinaryTable(t) => {
            out.push_str(&format!("  Columns: {}\n", t.ncols()));
            out.push_str(&format!("  Rows: {}\n", t.nrows));
            if !t.heap.is_empty() {
                out.push_str(&format!("  Heap size: {} bytes\n", t.heap.len()));
            }
        }
        Payload::Unknown => {}
    }
    out.push_str(&format!("  Records: {}\n", hdu.keys().len()));
    out
}

fn format_stat(n: usize, st: &ImgStat) -> String {
    format!(
        "Statistics of HDU {n}:\n  MEAN={}\n  STD={}\n  MIN={}\n  MAX={}\n",
        st.mean, st.std, st.min, st.max
    )
}

fn format_fits(fits: &Fits, opts: &Options, rt: &Runtime) -> Result<String, String> {
    let mut out = String::new();
    for (n, hdu) in fits.iter() {
        if n > 1 {
            out.push('\n');
        }
        out.push_str(&format_hdu(n, hdu));
        if opts.list_keys {
            out.push_str(&hdu.keys().to_string());
        }
        if opts.tables {
            if let Some(t) = hdu.table() {
                out.push_str(&t.to_string());
            }
        }
    }
    if opts.stats {
        let n = fits
            .first_image()
            .ok_or_else(|| format!("No image HDU in {}", fits.path().display()))?;
        let img = fits.nth(n).ok().and_then(Hdu::image).ok_or("No image")?;
        let st = fitsmanip::image2double(img, rt)
            .and_then(|d| ImgStat::of(&d, rt))
            .map_err(|e| format!("Statistics of HDU {n}: {e}"))?;
        out.push('\n');
        out.push_str(&format_stat(n, &st));
    }
    Ok(out)
}

fn run(args: &[String]) -> Result<String, String> {
    let opts = parse_args(args)?;
    let config = opts.threads.map_or_else(RuntimeConfig::from_env, |threads| {
        RuntimeConfig { threads }
    });
    let rt = Runtime::init_global(config).map_err(|e| e.to_string())?;

    let mut out = String::new();
    for (i, path) in opts.files.iter().enumerate() {
        let fits = Fits::read(path).map_err(|e| format!("Error reading '{path}': {e}"))?;
        if i > 0 {
            out.push('\n');
        }
        if opts.files.len() > 1 {
            out.push_str(&format!("File {path}\n"));
        }
        out.push_str(&format_fits(&fits, &opts, rt)?);
    }
    Ok(out)
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

#[cfg(test)]
mod tests {
    use super::*;
    use fitsmanip::{Image, KeyList};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Fits {
        let mut fits = Fits::new("sample.fits");
        fits.append_hdu(Hdu::from_image(Image::from_pixels::<u8>(&[], Vec::new()).unwrap()));
        let img = Image::from_pixels(&[4, 3], (0..12u16).collect()).unwrap();
        let mut keys = KeyList::new();
        keys.add("EXTNAME = 'SCI'", true).unwrap();
        fits.append_hdu(Hdu::new(keys, Payload::Image(img)));
        fits
    }

    fn rt() -> Runtime {
        Runtime::new(RuntimeConfig { threads: 1 }).unwrap()
    }

    #[test]
    fn summary_lists_every_hdu() {
        let out = format_fits(&sample(), &Options::default(), &rt()).unwrap();
        assert!(out.contains("HDU 1: Primary"));
        assert!(out.contains("NAXIS: 0"));
        assert!(out.contains("HDU 2: IMAGE (EXTNAME: SCI)"));
        assert!(out.contains("Dimensions: [4, 3]"));
    }

    #[test]
    fn statistics_of_first_image() {
        let opts = Options {
            stats: true,
            ..Options::default()
        };
        let out = format_fits(&sample(), &opts, &rt()).unwrap();
        assert!(out.contains("Statistics of HDU 2:"));
        assert!(out.contains("MEAN=5.5"));
        assert!(out.contains("MAX=11"));
    }

    #[test]
    fn keyword_listing() {
        let opts = Options {
            list_keys: true,
            ..Options::default()
        };
        let out = format_fits(&sample(), &opts, &rt()).unwrap();
        let line = out.lines().find(|l| l.starts_with("EXTNAME")).unwrap();
        assert!(line.contains("'SCI"));
    }

    #[test]
    fn parse_flags() {
        let opts = parse_args(&args(&["-l", "-s", "-j", "3", "a.fits"])).unwrap();
        assert!(opts.list_keys && opts.stats && !opts.tables);
        assert_eq!(opts.threads, Some(3));
        assert_eq!(opts.files, vec!["a.fits"]);
    }

    #[test]
    fn run_no_args() {
        assert!(run(&[]).unwrap_err().starts_with("Usage"));
    }

    #[test]
    fn run_unknown_option() {
        assert!(run(&args(&["-x", "a.fits"])).unwrap_err().contains("Unknown option"));
    }

    #[test]
    fn run_missing_file() {
        let err = run(&args(&["nonexistent.fits"])).unwrap_err();
        assert!(err.contains("Error reading"));
    }
}
