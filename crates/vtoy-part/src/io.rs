//! Sector-based I/O traits used by every filesystem extent enumerator
//! (`vtoy-fat`, `vtoy-udf`, `vtoy-iso`) to read from and write to the
//! underlying block device, without committing to `std::io`.

use crate::error::ReadWriteError;

/// Reads 512-byte sectors from a block device.
///
/// A sector may be read more than once; implementations should not assume
/// sequential access.
pub trait Reader {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8; 512]) -> Result<(), ReadWriteError>;

    /// Reads a byte range that is guaranteed not to cross a sector boundary.
    fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadWriteError> {
        let sector = offset / 512;
        let sector_offset = offset % 512;
        if sector_offset + buffer.len() > 512 {
            return Err(ReadWriteError::OutOfBounds);
        }
        let mut sector_buf = [0u8; 512];
        self.read_sector(sector as u32, &mut sector_buf)?;
        buffer.copy_from_slice(&sector_buf[sector_offset..sector_offset + buffer.len()]);
        Ok(())
    }

    fn read_to_sector(&mut self, sector: u32) -> Result<[u8; 512], ReadWriteError> {
        let mut buffer = [0u8; 512];
        self.read_sector(sector, &mut buffer)?;
        Ok(buffer)
    }
}

/// Writes 512-byte sectors to a block device. Every [`Writer`] is also a [`Reader`], since
/// read-modify-write is required for sub-sector writes.
pub trait Writer: Reader {
    fn write_sector(&mut self, sector: u32, buffer: &[u8; 512]) -> Result<(), ReadWriteError>;

    fn write_bytes(&mut self, offset: usize, buffer: &[u8]) -> Result<(), ReadWriteError> {
        let sector = offset / 512;
        let sector_offset = offset % 512;
        if sector_offset + buffer.len() > 512 {
            return Err(ReadWriteError::OutOfBounds);
        }
        let mut sector_buf = self.read_to_sector(sector as u32)?;
        sector_buf[sector_offset..sector_offset + buffer.len()].copy_from_slice(buffer);
        self.write_sector(sector as u32, &sector_buf)
    }
}

impl Reader for &[u8] {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8; 512]) -> Result<(), ReadWriteError> {
        let offset = sector as usize * 512;
        if offset + buffer.len() > self.len() {
            return Err(ReadWriteError::OutOfBounds);
        }
        buffer.copy_from_slice(&self[offset..offset + buffer.len()]);
        Ok(())
    }

    fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadWriteError> {
        if offset + buffer.len() > self.len() {
            return Err(ReadWriteError::OutOfBounds);
        }
        buffer.copy_from_slice(&self[offset..offset + buffer.len()]);
        Ok(())
    }
}

impl Reader for &mut [u8] {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8; 512]) -> Result<(), ReadWriteError> {
        let offset = sector as usize * 512;
        if offset + buffer.len() > self.len() {
            return Err(ReadWriteError::OutOfBounds);
        }
        buffer.copy_from_slice(&self[offset..offset + buffer.len()]);
        Ok(())
    }

    fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadWriteError> {
        if offset + buffer.len() > self.len() {
            return Err(ReadWriteError::OutOfBounds);
        }
        buffer.copy_from_slice(&self[offset..offset + buffer.len()]);
        Ok(())
    }
}

impl Writer for &mut [u8] {
    fn write_sector(&mut self, sector: u32, buffer: &[u8; 512]) -> Result<(), ReadWriteError> {
        let offset = sector as usize * 512;
        if offset + buffer.len() > self.len() {
            return Err(ReadWriteError::OutOfBounds);
        }
        self[offset..offset + buffer.len()].copy_from_slice(buffer);
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, buffer: &[u8]) -> Result<(), ReadWriteError> {
        if offset + buffer.len() > self.len() {
            return Err(ReadWriteError::OutOfBounds);
        }
        self[offset..offset + buffer.len()].copy_from_slice(buffer);
        Ok(())
    }
}

#[cfg(feature = "alloc")]
impl Reader for alloc::vec::Vec<u8> {
    fn read_sector(&mut self, sector: u32, buffer: &mut [u8; 512]) -> Result<(), ReadWriteError> {
        self.as_slice().read_sector(sector, buffer)
    }

    fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadWriteError> {
        self.as_slice().read_bytes(offset, buffer)
    }
}

#[cfg(feature = "alloc")]
impl Writer for alloc::vec::Vec<u8> {
    fn write_sector(&mut self, sector: u32, buffer: &[u8; 512]) -> Result<(), ReadWriteError> {
        self.as_mut_slice().write_sector(sector, buffer)
    }

    fn write_bytes(&mut self, offset: usize, buffer: &[u8]) -> Result<(), ReadWriteError> {
        self.as_mut_slice().write_bytes(offset, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_write_then_read_round_trips() {
        let mut disk = [0u8; 1024];
        let mut writer = &mut disk[..];
        writer.write_bytes(0, &[0xEE; 16]).unwrap();
        writer.write_bytes(512, &[0xFF; 16]).unwrap();

        let mut reader = &disk[..];
        let mut buf = [0u8; 16];
        reader.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [0xEE; 16]);
        reader.read_bytes(512, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 16]);
    }

    #[test]
    fn out_of_bounds_sector_errors() {
        let mut disk = [0u8; 512];
        let mut writer = &mut disk[..];
        assert_eq!(
            writer.write_sector(5, &[0u8; 512]),
            Err(ReadWriteError::OutOfBounds)
        );
    }
}
