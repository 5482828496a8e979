//! File-backed storage device. The whole image lives in memory; `commit`
//! writes it to a sibling temp file and renames it over the old image, so a
//! crash leaves either the previous or the new image on disk. A failed
//! commit rolls the working image back to the last committed one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use irrigation_core::store::{check_range, StorageDevice};
use irrigation_core::StoreError;
use tracing::info;

/// Fill value of a never-written image, like erased flash.
const ERASED: u8 = 0xFF;

pub struct FileDevice {
    path: PathBuf,
    /// Working image, including uncommitted writes.
    image: Vec<u8>,
    /// Image as of the last successful commit (or open).
    durable: Vec<u8>,
}

impl FileDevice {
    /// Open `path`, creating an erased image of `size` bytes when the file
    /// does not exist. A file of a different size is resized: truncated
    /// images lose their tail, grown ones gain erased bytes.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.is_dir() {
            bail!("storage path is a directory: {}", path.display());
        }
        let mut image = if path.exists() {
            fs::read(&path).with_context(|| format!("failed to read storage: {}", path.display()))?
        } else {
            info!(path = %path.display(), size, "creating storage image");
            Vec::new()
        };
        if image.len() != size {
            if !image.is_empty() {
                info!(from = image.len(), to = size, "storage image resized");
            }
            image.resize(size, ERASED);
        }
        Ok(Self {
            path,
            durable: image.clone(),
            image,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist(&self) -> std::io::Result<()> {
        let tmp = self.temp_path();
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&self.image)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

impl StorageDevice for FileDevice {
    fn size(&self) -> usize {
        self.image.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let end = check_range(offset, buf.len(), self.image.len())?;
        buf.copy_from_slice(&self.image[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        let end = check_range(offset, bytes.len(), self.image.len())?;
        self.image[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        match self.persist() {
            Ok(()) => {
                self.durable.copy_from_slice(&self.image);
                Ok(())
            }
            Err(e) => {
                self.image.copy_from_slice(&self.durable);
                Err(StoreError::Io(format!("{}: {e}", self.path.display())))
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
