//! ISO base media (MP4 / QuickTime) atom reader.
//!
//! The top level is walked with seeks so `mdat` is never read. The `moov`
//! atom is loaded into memory and walked for metadata text, the movie
//! duration and the first visual track's dimensions.

use std::io::{self, Read, Seek, SeekFrom};

/// `moov` atoms larger than this are not loaded.
const MAX_MOOV: u64 = 64 * 1024 * 1024;

/// Atoms whose payload is a list of child atoms.
const CONTAINERS: &[&[u8; 4]] = &[b"moov", b"udta", b"trak", b"ilst", b"edts"];

/// Metadata found in the movie header atoms.
#[derive(Debug, Default)]
pub struct MovieInfo {
    pub duration_secs: Option<f64>,
    pub dimensions: Option<(u32, u32)>,
    /// `(key, value)` text tags in file order. Keys are lowercased; four-char
    /// tags keep their code with any leading `©` dropped.
    pub tags: Vec<(String, Vec<u8>)>,
}

impl MovieInfo {
    pub fn tag(&self, key: &str) -> Option<&[u8]> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_slice())
    }
}

/// Returns `Ok(None)` when the file has no complete `moov` atom at the top
/// level, which includes files truncated or still being written.
pub fn read_info<R: Read + Seek>(reader: &mut R) -> io::Result<Option<MovieInfo>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut pos = 0u64;
    while pos + 8 <= file_len {
        reader.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let mut size = u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]));
        let kind = [header[4], header[5], header[6], header[7]];
        let mut header_len = 8u64;

        if size == 1 {
            if pos + 16 > file_len {
                break;
            }
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            size = u64::from_be_bytes(large);
            header_len = 16;
        } else if size == 0 {
            size = file_len - pos;
        }
        if size < header_len {
            break;
        }

        if &kind == b"moov" {
            let payload_len = size - header_len;
            if payload_len > MAX_MOOV || pos.saturating_add(size) > file_len {
                return Ok(None);
            }
            let mut payload = vec![0u8; payload_len as usize];
            reader.read_exact(&mut payload)?;
            let mut info = MovieInfo::default();
            walk(&payload, &mut info, 0);
            return Ok(Some(info));
        }

        pos = pos.saturating_add(size);
    }

    Ok(None)
}

/// Iterate `(kind, payload)` pairs of the atoms packed in `data`.
fn atoms(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        let header = data.get(pos..pos + 8)?;
        let mut size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = [header[4], header[5], header[6], header[7]];
        let mut start = pos + 8;
        if size == 1 {
            let large = data.get(pos + 8..pos + 16)?;
            size = usize::try_from(u64::from_be_bytes(large.try_into().ok()?)).ok()?;
            start = pos + 16;
        } else if size == 0 {
            size = data.len() - pos;
        }
        let end = pos.checked_add(size)?;
        if size < start - pos || end > data.len() {
            return None;
        }
        pos = end;
        Some((kind, &data[start..end]))
    })
}

fn walk(data: &[u8], info: &mut MovieInfo, depth: usize) {
    if depth > 8 {
        return;
    }
    for (kind, payload) in atoms(data) {
        match &kind {
            b"mvhd" => info.duration_secs = info.duration_secs.or_else(|| movie_duration(payload)),
            b"tkhd" => {
                if info.dimensions.is_none() {
                    info.dimensions = track_dimensions(payload);
                }
            }
            b"meta" => read_meta(payload, info),
            k if CONTAINERS.contains(&k) => walk(payload, info, depth + 1),
            [0xA9, ..] => {
                // QuickTime user-data text: u16 length, u16 language, text.
                if let Some(text) = payload.get(2..4).and_then(|len| {
                    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
                    payload.get(4..4 + len)
                }) {
                    info.tags.push((tag_name(&kind), text.to_vec()));
                }
            }
            _ => {}
        }
    }
}

/// `meta` is a full box in MP4 but a plain container in QuickTime.
fn read_meta(payload: &[u8], info: &mut MovieInfo) {
    let children = match payload.get(0..4) {
        Some([0, 0, 0, 0]) => &payload[4..],
        _ => payload,
    };

    let mut keys: Vec<String> = Vec::new();
    for (kind, body) in atoms(children) {
        if &kind == b"keys" {
            keys = read_keys(body);
        }
    }
    for (kind, body) in atoms(children) {
        if &kind == b"ilst" {
            read_ilst(body, &keys, info);
        }
    }
}

/// QuickTime `keys` atom: version/flags, count, then `(size, namespace, name)` entries.
fn read_keys(body: &[u8]) -> Vec<String> {
    let Some(rest) = body.get(8..) else {
        return Vec::new();
    };
    atoms(rest)
        .map(|(_, name)| String::from_utf8_lossy(name).to_lowercase())
        .collect()
}

fn read_ilst(body: &[u8], keys: &[String], info: &mut MovieInfo) {
    for (kind, item) in atoms(body) {
        let mut name = match &kind {
            b"----" => None,
            _ => {
                let index = u32::from_be_bytes(kind) as usize;
                // mdta items are 1-based indices into `keys`.
                match keys.get(index.wrapping_sub(1)) {
                    Some(key) if kind[0] != 0xA9 && index <= keys.len() => Some(key.clone()),
                    _ => Some(tag_name(&kind)),
                }
            }
        };

        for (child, data) in atoms(item) {
            match &child {
                b"name" => {
                    name = data.get(4..).map(|n| String::from_utf8_lossy(n).to_lowercase());
                }
                b"data" => {
                    // type indicator (4) + locale (4), then the value.
                    if let (Some(n), Some(value)) = (name.clone(), data.get(8..)) {
                        info.tags.push((n, value.to_vec()));
                    }
                }
                _ => {}
            }
        }
    }
}

fn tag_name(kind: &[u8; 4]) -> String {
    let code = if kind[0] == 0xA9 { &kind[1..] } else { &kind[..] };
    String::from_utf8_lossy(code).to_lowercase()
}

fn movie_duration(payload: &[u8]) -> Option<f64> {
    let version = *payload.first()?;
    let (timescale, duration) = if version == 1 {
        let timescale = u32::from_be_bytes(payload.get(20..24)?.try_into().ok()?);
        let duration = u64::from_be_bytes(payload.get(24..32)?.try_into().ok()?);
        (timescale, duration)
    } else {
        let timescale = u32::from_be_bytes(payload.get(12..16)?.try_into().ok()?);
        let duration = u32::from_be_bytes(payload.get(16..20)?.try_into().ok()?);
        (timescale, u64::from(duration))
    };
    (timescale > 0).then(|| duration as f64 / f64::from(timescale))
}

fn track_dimensions(payload: &[u8]) -> Option<(u32, u32)> {
    let version = *payload.first()?;
    // Width/height follow 52 bytes of layer/volume/matrix after the duration.
    let offset = if version == 1 { 4 + 8 + 8 + 4 + 4 + 8 + 52 } else { 4 + 4 + 4 + 4 + 4 + 4 + 52 };
    let width = u32::from_be_bytes(payload.get(offset..offset + 4)?.try_into().ok()?) >> 16;
    let height = u32::from_be_bytes(payload.get(offset + 4..offset + 8)?.try_into().ok()?) >> 16;
    (width > 0 && height > 0).then_some((width, height))
}

/// Build a minimal MP4 with an `ftyp`, an `mdat` and a `moov` carrying the
/// given comment tag. Test fixture builder.
#[cfg(test)]
pub(crate) fn fixture(comment: &str, duration_secs: u32, width: u32, height: u32) -> Vec<u8> {
    fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    let mut mvhd = vec![0u8; 100];
    mvhd[12..16].copy_from_slice(&1000u32.to_be_bytes());
    mvhd[16..20].copy_from_slice(&(duration_secs * 1000).to_be_bytes());

    let mut tkhd = vec![0u8; 84];
    tkhd[76..80].copy_from_slice(&(width << 16).to_be_bytes());
    tkhd[80..84].copy_from_slice(&(height << 16).to_be_bytes());

    let mut data = vec![0, 0, 0, 1, 0, 0, 0, 0];
    data.extend_from_slice(comment.as_bytes());
    let cmt = atom(&[0xA9, b'c', b'm', b't'], &atom(b"data", &data));
    let ilst = atom(b"ilst", &cmt);
    let mut meta_payload = vec![0, 0, 0, 0];
    meta_payload.extend(atom(b"hdlr", &[0u8; 25]));
    meta_payload.extend(ilst);
    let udta = atom(b"udta", &atom(b"meta", &meta_payload));

    let mut moov_payload = atom(b"mvhd", &mvhd);
    moov_payload.extend(atom(b"trak", &atom(b"tkhd", &tkhd)));
    moov_payload.extend(udta);

    let mut out = atom(b"ftyp", b"isom\0\0\0\0isommp41");
    out.extend(atom(b"mdat", &[0u8; 64]));
    out.extend(atom(b"moov", &moov_payload));
    out
}
