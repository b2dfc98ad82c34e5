//! The FITS file handle: an ordered list of HDUs with a cursor.
//!
//! HDU numbers are 1-based everywhere in this module.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::hdu::{parse_hdus, Hdu};
use crate::rewrite::replace_file;

/// A FITS file: its source path, HDUs and the current-HDU cursor.
#[derive(Debug, Clone, Default)]
pub struct Fits {
    path: PathBuf,
    hdus: Vec<Hdu>,
    cursor: Option<usize>,
}

impl Fits {
    /// An empty handle for assembling output at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Fits {
            path: path.into(),
            hdus: Vec::new(),
            cursor: None,
        }
    }

    /// A handle on an existing file, not yet read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::metadata(&path)?;
        Ok(Fits::new(path))
    }

    /// Open and read every HDU of `path`.
    pub fn read(path: impl Into<PathBuf>) -> Result<Self> {
        let mut fits = Fits::open(path)?;
        fits.read_all()?;
        Ok(fits)
    }

    /// Parse an in-memory stream; `path` becomes the handle's path.
    pub fn from_bytes(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self> {
        let hdus = parse_hdus(data)?;
        let cursor = Some(1);
        Ok(Fits {
            path: path.into(),
            hdus,
            cursor,
        })
    }

    /// (Re)load every HDU from the handle's path. The cursor moves to HDU 1.
    pub fn read_all(&mut self) -> Result<&mut Self> {
        let data = fs::read(&self.path)?;
        self.hdus = parse_hdus(&data)?;
        self.cursor = Some(1);
        debug!("{}: {} HDU(s)", self.path.display(), self.hdus.len());
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Number of HDUs.
    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    /// `(number, hdu)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Hdu)> {
        self.hdus.iter().enumerate().map(|(i, h)| (i + 1, h))
    }

    fn index(&self, n: usize) -> Result<usize> {
        if (1..=self.hdus.len()).contains(&n) {
            Ok(n - 1)
        } else {
            Err(Error::NoSuchHdu(n))
        }
    }

    pub fn nth(&self, n: usize) -> Result<&Hdu> {
        let i = self.index(n)?;
        Ok(&self.hdus[i])
    }

    pub fn nth_mut(&mut self, n: usize) -> Result<&mut Hdu> {
        let i = self.index(n)?;
        Ok(&mut self.hdus[i])
    }

    /// Append `hdu` and point the cursor at it.
    pub fn append_hdu(&mut self, hdu: Hdu) -> &mut Hdu {
        self.hdus.push(hdu);
        let n = self.hdus.len();
        self.cursor = Some(n);
        &mut self.hdus[n - 1]
    }

    /// Remove HDU `n`, shifting later HDUs down. Clears the cursor.
    pub fn remove_hdu(&mut self, n: usize) -> Result<Hdu> {
        let i = self.index(n)?;
        self.cursor = None;
        Ok(self.hdus.remove(i))
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn set_cursor(&mut self, n: usize) -> Result<()> {
        self.index(n)?;
        self.cursor = Some(n);
        Ok(())
    }

    /// The HDU under the cursor.
    pub fn current(&self) -> Option<&Hdu> {
        self.cursor.and_then(|n| self.hdus.get(n.wrapping_sub(1)))
    }

    pub fn current_mut(&mut self) -> Option<&mut Hdu> {
        self.cursor.and_then(|n| self.hdus.get_mut(n.wrapping_sub(1)))
    }

    /// Number of the first image HDU that has pixels.
    pub fn first_image(&self) -> Option<usize> {
        self.iter()
            .find(|(_, h)| h.image().is_some_and(|img| !img.is_header_only()))
            .map(|(n, _)| n)
    }

    /// Serialize every HDU to `out`, stopping at the first that fails.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        if self.hdus.is_empty() {
            return Err(Error::Unsupported(String::from("writing a file without HDUs")));
        }
        for (n, hdu) in self.iter() {
            hdu.write_to(out, n == 1).map_err(|e| e.at_hdu(n))?;
        }
        Ok(())
    }

    /// Write to a new file at `path` and fsync it.
    ///
    /// HDUs written before a failure stay in the file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut out = BufWriter::new(&file);
        let written = self.write_to(&mut out);
        out.flush()?;
        drop(out);
        file.sync_all()?;
        written?;
        info!("wrote {}", path.display());
        Ok(())
    }

    /// Replace the file at the handle's own path with the current contents.
    pub fn rewrite(&self) -> Result<()> {
        replace_file(&self.path, |out| self.write_to(out))?;
        info!("rewrote {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdu::Payload;
    use crate::image::Image;
    use crate::keylist::KeyList;

    fn image_hdu(n: usize) -> Hdu {
        Hdu::from_image(Image::from_pixels(&[n], (0..n as u16).collect()).unwrap())
    }

    // ---- container ----

    #[test]
    fn numbering_is_one_based() {
        let mut fits = Fits::new("x.fits");
        assert!(fits.is_empty());
        fits.append_hdu(image_hdu(2));
        fits.append_hdu(image_hdu(3));
        assert_eq!(fits.len(), 2);
        assert_eq!(fits.cursor(), Some(2));
        assert_eq!(fits.nth(1).unwrap().image().unwrap().totpix(), 2);
        assert!(matches!(fits.nth(0), Err(Error::NoSuchHdu(0))));
        assert!(matches!(fits.nth(3), Err(Error::NoSuchHdu(3))));
    }

    #[test]
    fn cursor_follows_edits() {
        let mut fits = Fits::new("x.fits");
        fits.append_hdu(image_hdu(1));
        fits.append_hdu(image_hdu(2));
        fits.set_cursor(1).unwrap();
        assert_eq!(fits.current().unwrap().image().unwrap().totpix(), 1);
        assert!(fits.set_cursor(5).is_err());
        fits.remove_hdu(1).unwrap();
        assert_eq!(fits.cursor(), None);
        assert!(fits.current().is_none());
        assert_eq!(fits.nth(1).unwrap().image().unwrap().totpix(), 2);
    }

    #[test]
    fn first_image_skips_empty_primary() {
        let mut fits = Fits::new("x.fits");
        fits.append_hdu(Hdu::from_image(Image::from_pixels::<u8>(&[], Vec::new()).unwrap()));
        fits.append_hdu(Hdu::new(KeyList::new(), Payload::Unknown));
        fits.append_hdu(image_hdu(4));
        assert_eq!(fits.first_image(), Some(3));
    }

    // ---- writing ----

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.fits");
        let mut fits = Fits::new(&path);
        fits.append_hdu(image_hdu(3));
        fits.append_hdu(image_hdu(5)).keys_mut().add("EXTNAME = 'SECOND'", true).unwrap();
        fits.write(&path).unwrap();

        let back = Fits::read(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.cursor(), Some(1));
        assert_eq!(back.nth(2).unwrap().extname().as_deref(), Some("SECOND"));
        assert_eq!(
            back.nth(2).unwrap().image().unwrap().pixels::<u16>().unwrap(),
            &[0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn write_through_trait_object() {
        let mut fits = Fits::new("x.fits");
        fits.append_hdu(image_hdu(4));
        let mut buf = Vec::new();
        let out: &mut dyn Write = &mut buf;
        fits.write_to(out).unwrap();
        assert_eq!(buf.len() % crate::block::BLOCK_SIZE, 0);
        let back = Fits::from_bytes("x.fits", &buf).unwrap();
        assert_eq!(back.nth(1).unwrap().image(), fits.nth(1).unwrap().image());
    }

    #[test]
    fn write_stops_at_unwritable_hdu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.fits");
        let mut fits = Fits::new(&path);
        fits.append_hdu(image_hdu(3));
        fits.append_hdu(Hdu::new(KeyList::new(), Payload::Unknown));
        fits.append_hdu(image_hdu(4));
        assert!(matches!(fits.write(&path), Err(Error::Unsupported(_))));
        let back = Fits::read(&path).unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Fits::open(dir.path().join("none.fits")),
            Err(Error::Io(_))
        ));
    }
}
