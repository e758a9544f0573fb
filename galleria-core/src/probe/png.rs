//! PNG chunk reader for embedded text fields.
//!
//! Only `IHDR`, `tEXt` and uncompressed `iTXt` payloads are read; every other
//! chunk (image data included) is skipped with a seek.

use std::io::{self, Read, Seek, SeekFrom};

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Text chunks larger than this are ignored.
const MAX_TEXT_CHUNK: u32 = 64 * 1024 * 1024;

/// Text fields and header dimensions of one PNG file.
#[derive(Debug, Default)]
pub struct PngInfo {
    pub dimensions: Option<(u32, u32)>,
    /// `(keyword, value)` pairs in file order.
    pub text: Vec<(String, Vec<u8>)>,
}

impl PngInfo {
    /// Value of the first text field whose keyword matches, ignoring case.
    pub fn field(&self, keyword: &str) -> Option<&[u8]> {
        self.text
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v.as_slice())
    }
}

/// Walk the chunk list. Returns `Ok(None)` when the signature does not match.
///
/// A truncated file ends the walk early; whatever was read before is kept.
pub fn read_info<R: Read + Seek>(reader: &mut R) -> io::Result<Option<PngInfo>> {
    let mut signature = [0u8; 8];
    if reader.read_exact(&mut signature).is_err() || signature != SIGNATURE {
        return Ok(None);
    }

    let mut info = PngInfo::default();
    let mut header = [0u8; 8];
    loop {
        if reader.read_exact(&mut header).is_err() {
            break;
        }
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        match &kind {
            b"IHDR" if length >= 8 => {
                // Width and height lead the chunk; the rest is skipped.
                let mut data = [0u8; 8];
                if reader.read_exact(&mut data).is_err() {
                    break;
                }
                let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                info.dimensions = Some((width, height));
                reader.seek(SeekFrom::Current(i64::from(length - 8) + 4))?;
            }
            b"tEXt" | b"iTXt" if length <= MAX_TEXT_CHUNK => {
                let mut data = vec![0u8; length as usize];
                if reader.read_exact(&mut data).is_err() {
                    break;
                }
                let parsed = if &kind == b"tEXt" {
                    parse_text(&data)
                } else {
                    parse_itxt(&data)
                };
                if let Some(field) = parsed {
                    info.text.push(field);
                }
                reader.seek(SeekFrom::Current(4))?;
            }
            b"IEND" => break,
            _ => {
                reader.seek(SeekFrom::Current(i64::from(length) + 4))?;
            }
        }
    }

    Ok(Some(info))
}

/// `keyword\0text`
fn parse_text(data: &[u8]) -> Option<(String, Vec<u8>)> {
    let nul = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8_lossy(&data[..nul]).into_owned();
    Some((keyword, data[nul + 1..].to_vec()))
}

/// `keyword\0 flag method language\0 translated\0 text`; compressed payloads are skipped.
fn parse_itxt(data: &[u8]) -> Option<(String, Vec<u8>)> {
    let nul = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8_lossy(&data[..nul]).into_owned();
    let rest = data.get(nul + 1..)?;
    let (&compressed, rest) = rest.split_first()?;
    if compressed != 0 {
        return None;
    }
    let rest = rest.get(1..)?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = rest.get(lang_end + 1..)?;
    let translated_end = rest.iter().position(|&b| b == 0)?;
    Some((keyword, rest.get(translated_end + 1..)?.to_vec()))
}

/// Serialize a minimal PNG with the given text fields. Test fixture builder.
#[cfg(test)]
pub(crate) fn fixture(width: u32, height: u32, text: &[(&str, &str)]) -> Vec<u8> {
    fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        // CRC is not verified by the reader.
        out.extend_from_slice(&[0, 0, 0, 0]);
    }

    let mut out = SIGNATURE.to_vec();
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    chunk(&mut out, b"IHDR", &ihdr);
    for (key, value) in text {
        let mut data = key.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(value.as_bytes());
        chunk(&mut out, b"tEXt", &data);
    }
    chunk(&mut out, b"IDAT", &[0u8; 16]);
    chunk(&mut out, b"IEND", &[]);
    out
}
