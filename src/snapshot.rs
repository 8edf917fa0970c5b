//! ZX Spectrum 48K snapshot (.sna) reader.

use std::fs;
use std::io;
use std::path::Path;

/// 27 bytes of register state precede the memory image.
pub const SNA_HEADER_SIZE: usize = 27;
/// 48 KiB of RAM, loaded at 4000h.
pub const SNA_IMAGE_SIZE: usize = 0xc000;

/// A parsed snapshot: the RAM image and the entry address recovered from
/// the emulated stack.
#[derive(Debug)]
pub struct SnaFile {
    pub image: Vec<u8>,
    pub sp: u16,
    pub start: u16,
}

/// Parse snapshot bytes. The stack pointer sits at header offsets 23/24;
/// the entry address is read from the image at the stack pointer.
pub fn parse_sna(data: &[u8]) -> io::Result<SnaFile> {
    if data.len() < SNA_HEADER_SIZE + SNA_IMAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot too small: {} bytes", data.len()),
        ));
    }
    let header = &data[..SNA_HEADER_SIZE];
    let image = data[SNA_HEADER_SIZE..SNA_HEADER_SIZE + SNA_IMAGE_SIZE].to_vec();

    let sp = header[23] as u16 + 256 * header[24] as u16;
    let lo_index = sp.wrapping_sub(0x4000) as usize;
    let hi_index = sp.wrapping_sub(1).wrapping_sub(0x4000) as usize;
    if lo_index >= SNA_IMAGE_SIZE || hi_index >= SNA_IMAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot stack pointer {:04X}h outside RAM", sp),
        ));
    }
    let start = image[lo_index] as u16 + 256 * image[hi_index] as u16;

    Ok(SnaFile { image, sp, start })
}

pub fn read_sna<P: AsRef<Path>>(path: P) -> io::Result<SnaFile> {
    let data = fs::read(path)?;
    parse_sna(&data)
}
