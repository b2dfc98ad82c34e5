//! Reading, editing and writing FITS images, plus a floating-point
//! pipeline for rendering them: statistics, normalisation, histogram
//! cut-off and equalisation, intensity transforms, colourmaps and median
//! filtering.
//!
//! Pixel kernels run on a [`Runtime`] worker pool. Every kernel has a free
//! function taking an explicit runtime and a [`DoubleImage`] method that
//! uses [`Runtime::global`].

pub mod block;
pub mod dblimage;
pub mod endian;
pub mod error;
pub mod fileops;
pub mod fits;
pub mod hdu;
pub mod header;
pub mod histogram;
pub mod image;
pub mod keylist;
pub mod median;
pub mod palette;
pub mod rewrite;
pub mod runtime;
pub mod table;
pub mod transform;
pub mod value;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use dblimage::{get_imgstat, image2double, normalize, DoubleImage, ImgStat};
pub use error::{Error, Result};
pub use fileops::{file_absent, make_filename};
pub use fits::Fits;
pub use hdu::{Hdu, Payload};
pub use histogram::{histcutoff, histeq, Histogram};
pub use image::{Bitpix, Image, Pixel, PixelData};
pub use keylist::{KeyClass, KeyList, Record};
pub use median::{calc_median, get_median};
pub use palette::{convert2palette, Palette};
pub use rewrite::{replace_file, SignalGuard};
pub use runtime::{Runtime, RuntimeConfig};
pub use table::{Column, ColumnType, ColumnValue, Table, TableKind, ASCII_NULL};
pub use transform::{mktransform, Transform};
pub use value::Value;
