//! A file-backed block device, for tests and tooling.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Result, Seek, Write},
    path::Path,
    sync::Mutex,
};

use crate::{BlockDevice, SECTOR_SIZE};

pub struct FileBlockDevice {
    file: Mutex<File>,
    num_sectors: u32,
}

impl FileBlockDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let len = file.metadata()?.len();
        if len % (SECTOR_SIZE as u64) != 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::InvalidData));
        }

        Ok(Self {
            file: Mutex::new(file),
            num_sectors: (len / (SECTOR_SIZE as u64)) as u32,
        })
    }

    pub fn create(path: &Path, num_sectors: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;

        file.set_len((num_sectors as u64) * (SECTOR_SIZE as u64))?;

        Ok(Self {
            file: Mutex::new(file),
            num_sectors,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn num_sectors(&self) -> u32 {
        self.num_sectors
    }

    fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<()> {
        if sector >= self.num_sectors || buf.len() != SECTOR_SIZE {
            return Err(std::io::Error::from(std::io::ErrorKind::InvalidInput));
        }

        let mut file = self.file.lock().unwrap();
        file.seek(std::io::SeekFrom::Start(
            (sector as u64) * (SECTOR_SIZE as u64),
        ))?;
        file.read_exact(buf)
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<()> {
        if sector >= self.num_sectors || buf.len() != SECTOR_SIZE {
            return Err(std::io::Error::from(std::io::ErrorKind::InvalidInput));
        }

        let mut file = self.file.lock().unwrap();
        file.seek(std::io::SeekFrom::Start(
            (sector as u64) * (SECTOR_SIZE as u64),
        ))?;
        file.write_all(buf)
    }
}
