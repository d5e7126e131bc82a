//! Signed package reader
//!
//! Modern-engine packages are cpio archives in the "newc" format. Only
//! selective extraction of named regular files is supported; everything
//! else is skipped without being read into memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};
use crate::{log_debug, log_info};

const MODULE: &str = "archive";

const HEADER_LEN: usize = 110;
const MAGIC: &[u8; 6] = b"070701";
const MAGIC_CRC: &[u8; 6] = b"070702";
const TRAILER: &str = "TRAILER!!!";
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_REGULAR: u32 = 0o100000;

/// Parsed fields of a newc header that the reader needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    mode: u32,
    file_size: u64,
    name_size: u64,
}

fn parse_hex_field(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    u64::from_str_radix(text, 16).ok()
}

fn parse_header(raw: &[u8; HEADER_LEN]) -> Option<Header> {
    if &raw[0..6] != MAGIC && &raw[0..6] != MAGIC_CRC {
        return None;
    }
    // magic(6) ino mode uid gid nlink mtime filesize devmajor devminor rdevmajor rdevminor namesize check
    let field = |index: usize| parse_hex_field(&raw[6 + index * 8..6 + (index + 1) * 8]);
    Some(Header {
        mode: field(1)? as u32,
        file_size: field(6)?,
        name_size: field(11)?,
    })
}

/// Bytes needed to reach the next 4-byte boundary
fn padding(offset: u64) -> u64 {
    (4 - offset % 4) % 4
}

/// Extract the regular files named in `wanted` into `out_dir`.
///
/// Returns the files that were found, keyed by name. Names are compared
/// without a leading `./`. Stops early once every wanted file is out.
pub fn extract_files(
    archive: &Path,
    wanted: &[&str],
    out_dir: &Path,
) -> Result<HashMap<String, PathBuf>> {
    log_info!(
        MODULE,
        "Extracting {:?} from {}",
        wanted,
        archive.display()
    );

    let mut reader = BufReader::new(File::open(archive)?);
    let mut offset: u64 = 0;
    let mut extracted = HashMap::new();

    loop {
        if extracted.len() == wanted.len() {
            break;
        }

        let mut raw = [0u8; HEADER_LEN];
        if read_exact_or_eof(&mut reader, &mut raw)? {
            break;
        }
        offset += HEADER_LEN as u64;

        let header = match parse_header(&raw) {
            Some(header) => header,
            None => {
                log_debug!(MODULE, "Invalid cpio header at offset {}", offset);
                break;
            }
        };

        let mut name_bytes = vec![0u8; header.name_size as usize];
        reader.read_exact(&mut name_bytes)?;
        offset += header.name_size;
        skip(&mut reader, padding(offset))?;
        offset += padding(offset);

        let name = String::from_utf8_lossy(&name_bytes)
            .trim_end_matches('\0')
            .to_string();
        if name == TRAILER {
            break;
        }
        let name = name.trim_start_matches("./").to_string();

        let is_regular = header.mode & MODE_TYPE_MASK == MODE_REGULAR;
        if is_regular && wanted.contains(&name.as_str()) {
            let out_path = out_dir.join(&name);
            let mut writer = BufWriter::new(File::create(&out_path)?);
            let copied = std::io::copy(&mut (&mut reader).take(header.file_size), &mut writer)?;
            writer.flush()?;
            if copied != header.file_size {
                return Err(UpdateError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} is truncated", name),
                )));
            }
            log_debug!(MODULE, "Extracted {} ({} bytes)", name, copied);
            extracted.insert(name, out_path);
        } else {
            skip(&mut reader, header.file_size)?;
        }

        offset += header.file_size;
        skip(&mut reader, padding(offset))?;
        offset += padding(offset);
    }

    Ok(extracted)
}

/// Fill `buf`, returning true on a clean EOF before the first byte
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(true);
        }
        filled += n;
    }
    Ok(false)
}

fn skip<R: Read + Seek>(reader: &mut R, bytes: u64) -> Result<()> {
    if bytes > 0 {
        reader.seek(SeekFrom::Current(bytes as i64))?;
    }
    Ok(())
}

/// Build a newc archive in memory. Test helper.
#[cfg(test)]
pub fn build_newc(entries: &[(&str, &[u8])]) -> Vec<u8> {
    fn push_entry(out: &mut Vec<u8>, name: &str, data: &[u8], mode: u32) {
        let name_size = name.len() + 1;
        let header = format!(
            "070701{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
            0,
            mode,
            0,
            0,
            1,
            0,
            data.len(),
            0,
            0,
            0,
            0,
            name_size,
            0
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    let mut out = Vec::new();
    for (name, data) in entries {
        push_entry(&mut out, name, data, MODE_REGULAR | 0o644);
    }
    push_entry(&mut out, TRAILER, &[], 0);
    out
}
