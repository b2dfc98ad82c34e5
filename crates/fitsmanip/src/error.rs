/// All errors produced by the FITS codec, the keyword store and the pixel pipeline.
#[derive(Debug)]
pub enum Error {
    /// An I/O error from the standard library.
    Io(std::io::Error),
    /// Card syntax violation, truncated block or inconsistent NAXIS.
    ///
    /// `hdu` is the 1-based HDU number, or 0 when parsing outside a file.
    MalformedHeader { hdu: usize, reason: String },
    /// BITPIX outside {8, 16, 32, 64, -32, -64}.
    UnsupportedBitpix(i64),
    /// XTENSION value that is neither IMAGE, TABLE nor BINTABLE.
    UnsupportedExtension(String),
    /// A pixel or column buffer could not be allocated.
    BufferAllocation { bytes: usize },
    /// Buffer length or axis sizes disagree.
    DimensionMismatch(String),
    /// Data range too small for normalisation or an intensity transform.
    RangeUnderflow { min: f64, max: f64 },
    /// Histogram size outside 2..=65535.
    HistogramOutOfBounds(usize),
    /// Cut-off fractions outside [0, 1) or leaving no pixels.
    InvalidFraction { bottom: f64, top: f64 },
    /// No record with the requested key.
    KeyNotFound(String),
    /// A record failed template validation.
    Validation(String),
    /// The requested operation is not implemented for this input.
    Unsupported(String),
    /// HDU number outside 1..=N.
    NoSuchHdu(usize),
    /// A parallel kernel observed the runtime cancel flag.
    Cancelled,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Build a header error that is not yet tied to an HDU.
    pub(crate) fn header(reason: impl Into<String>) -> Self {
        Error::MalformedHeader {
            hdu: 0,
            reason: reason.into(),
        }
    }

    /// Attach a 1-based HDU number to a header error.
    ///
    /// Other variants are returned unchanged.
    pub fn at_hdu(self, n: usize) -> Self {
        match self {
            Error::MalformedHeader { reason, .. } => Error::MalformedHeader { hdu: n, reason },
            other => other,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::MalformedHeader { hdu: 0, reason } => write!(f, "malformed header: {reason}"),
            Error::MalformedHeader { hdu, reason } => {
                write!(f, "malformed header in HDU {hdu}: {reason}")
            }
            Error::UnsupportedBitpix(v) => write!(f, "unsupported BITPIX value: {v}"),
            Error::UnsupportedExtension(x) => write!(f, "unsupported XTENSION type: {x}"),
            Error::BufferAllocation { bytes } => {
                write!(f, "cannot allocate a buffer of {bytes} bytes")
            }
            Error::DimensionMismatch(msg) => write!(f, "dimension mismatch: {msg}"),
            Error::RangeUnderflow { min, max } => {
                write!(f, "data range too small: min={min}, max={max}")
            }
            Error::HistogramOutOfBounds(n) => {
                write!(f, "histogram size {n} outside 2..=65535")
            }
            Error::InvalidFraction { bottom, top } => {
                write!(f, "invalid cut-off fractions: bottom={bottom}, top={top}")
            }
            Error::KeyNotFound(key) => write!(f, "keyword not found: {key}"),
            Error::Validation(msg) => write!(f, "invalid record: {msg}"),
            Error::Unsupported(what) => write!(f, "unsupported: {what}"),
            Error::NoSuchHdu(n) => write!(f, "no HDU number {n}"),
            Error::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
