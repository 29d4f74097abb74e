//! Container signature sniffing for downloaded media.
//!
//! Only the first bytes are inspected. This is a sanity check against HTML
//! error pages and truncated files, not a decoder; ffprobe has the last word.

use std::io::{self, Read};
use std::path::Path;

const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Wave,
    Avi,
    MpegAudio,
    Adts,
    Flac,
    Ogg,
    IsoBmff,
    Matroska,
    Flv,
    Asf,
}

/// Identify a container from its leading bytes.
pub fn sniff(header: &[u8]) -> Option<Container> {
    if header.len() >= 12 && &header[0..4] == b"RIFF" {
        return match &header[8..12] {
            b"WAVE" => Some(Container::Wave),
            b"AVI " => Some(Container::Avi),
            _ => None,
        };
    }
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return Some(Container::IsoBmff);
    }
    if header.starts_with(b"ID3") {
        return Some(Container::MpegAudio);
    }
    if header.starts_with(b"fLaC") {
        return Some(Container::Flac);
    }
    if header.starts_with(b"OggS") {
        return Some(Container::Ogg);
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(Container::Matroska);
    }
    if header.starts_with(b"FLV") {
        return Some(Container::Flv);
    }
    if header.starts_with(&[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11]) {
        return Some(Container::Asf);
    }
    if header.len() >= 2 && header[0] == 0xFF {
        let second = header[1];
        // ADTS: 12-bit sync word, layer bits always 00
        if second & 0xF6 == 0xF0 {
            return Some(Container::Adts);
        }
        // MPEG audio frame: 11-bit sync word, layer bits non-zero
        if second & 0xE0 == 0xE0 && (second >> 1) & 0x03 != 0 {
            return Some(Container::MpegAudio);
        }
    }
    None
}

pub fn sniff_file(path: &Path) -> io::Result<Option<Container>> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    std::fs::File::open(path)?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(sniff(&header))
}
