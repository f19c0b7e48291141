//! For reading AB1 trace files. (Applied Biosystem's sequencing)
//! [BioPython docs](https://biopython.org/wiki/ABI_traces)
//!
//! Only the tags needed to build a [`Chromatogram`] are decoded: the analyzed
//! channels (`DATA` 9-12), their base order (`FWO_` 1), the base calls
//! (`PBAS` 2, falling back to 1) and the peak locations (`PLOC` 2, falling back to 1).

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use log::debug;

use crate::error::{CodonMixError, Result};
use crate::sequence::Base;
use crate::trace::Chromatogram;

const DIR_ENTRY_LEN: usize = 28;
/// The root directory entry follows the 4-byte magic and 2-byte version.
const ROOT_ENTRY_OFFSET: u64 = 6;

#[derive(Debug, Clone)]
struct DirEntry {
    name: [u8; 4],
    number: i32,
    num_elements: usize,
    data_size: usize,
    data_offset: usize,
    /// The offset field itself, which holds the data when it fits in 4 bytes.
    inline: [u8; 4],
}

impl DirEntry {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut name = [0u8; 4];
        cursor.read_exact(&mut name)?;
        let number = cursor.read_i32::<BigEndian>()?;
        let _element_type = cursor.read_i16::<BigEndian>()?;
        let _element_size = cursor.read_i16::<BigEndian>()?;
        let num_elements = cursor.read_i32::<BigEndian>()?;
        let data_size = cursor.read_i32::<BigEndian>()?;
        let mut inline = [0u8; 4];
        cursor.read_exact(&mut inline)?;
        let _data_handle = cursor.read_i32::<BigEndian>()?;

        if num_elements < 0 || data_size < 0 {
            return Err(CodonMixError::Abif(format!(
                "negative size in directory entry {}",
                String::from_utf8_lossy(&name)
            )));
        }
        Ok(DirEntry {
            name,
            number,
            num_elements: num_elements as usize,
            data_size: data_size as usize,
            data_offset: u32::from_be_bytes(inline) as usize,
            inline,
        })
    }

    fn data<'a>(&'a self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        if self.data_size <= 4 {
            return Ok(&self.inline[..self.data_size]);
        }
        let end = self.data_offset + self.data_size;
        bytes.get(self.data_offset..end).ok_or_else(|| {
            CodonMixError::Abif(format!(
                "tag {}{} data runs past end of file",
                String::from_utf8_lossy(&self.name),
                self.number
            ))
        })
    }
}

/// Read an AB1 file; `.gz` files are decompressed first.
pub fn read_ab1(path: &Path) -> Result<Chromatogram> {
    let mut bytes = Vec::new();
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz")) {
        GzDecoder::new(file).read_to_end(&mut bytes)?;
    } else {
        let mut file = file;
        file.read_to_end(&mut bytes)?;
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_end_matches(".gz").trim_end_matches(".ab1").trim_end_matches(".abi"))
        .unwrap_or("unknown");
    debug!("Read {} bytes from {path:?}", bytes.len());
    parse_ab1(name, &bytes)
}

pub fn parse_ab1(name: &str, bytes: &[u8]) -> Result<Chromatogram> {
    if bytes.len() < 4 || &bytes[..4] != b"ABIF" {
        return Err(CodonMixError::Abif(format!("{name}: file does not start with ABIF")));
    }
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(ROOT_ENTRY_OFFSET);
    let root = DirEntry::read(&mut cursor)
        .map_err(|_| CodonMixError::Abif(format!("{name}: truncated header")))?;

    let mut entries = Vec::with_capacity(root.num_elements);
    for i in 0..root.num_elements {
        cursor.set_position((root.data_offset + i * DIR_ENTRY_LEN) as u64);
        let entry = DirEntry::read(&mut cursor)
            .map_err(|_| CodonMixError::Abif(format!("{name}: truncated directory")))?;
        entries.push(entry);
    }

    let find = |tag: &[u8; 4], number: i32| {
        entries.iter().find(|e| &e.name == tag && e.number == number)
    };
    let require = |tag: &[u8; 4], numbers: &[i32]| {
        numbers
            .iter()
            .find_map(|&n| find(tag, n))
            .ok_or_else(|| {
                CodonMixError::Abif(format!("{name}: missing {} tag", String::from_utf8_lossy(tag)))
            })
    };

    let order = require(b"FWO_", &[1])?.data(bytes)?.to_vec();
    if order.len() != 4 {
        return Err(CodonMixError::Abif(format!("{name}: FWO_ must list 4 bases")));
    }

    let mut channels: [Vec<f64>; 4] = Default::default();
    let mut filled = [false; 4];
    for (i, &letter) in order.iter().enumerate() {
        let base = Base::from_byte(letter)
            .ok_or_else(|| {
                CodonMixError::Abif(format!("{name}: bad base '{}' in FWO_", letter as char))
            })?;
        let entry = require(b"DATA", &[9 + i as i32])?;
        channels[base.channel()] = read_shorts(entry.data(bytes)?, entry.num_elements)?
            .into_iter()
            .map(|v| f64::from(v.max(0)))
            .collect();
        filled[base.channel()] = true;
    }
    if filled.iter().any(|f| !f) {
        return Err(CodonMixError::Abif(format!("{name}: FWO_ repeats a base")));
    }

    let calls = require(b"PBAS", &[2, 1])?.data(bytes)?.to_vec();
    let ploc = require(b"PLOC", &[2, 1])?;
    let peak_locations = read_shorts(ploc.data(bytes)?, ploc.num_elements)?
        .into_iter()
        .map(|v| v as u16 as usize)
        .collect();

    Chromatogram::new(name, channels, &calls, peak_locations)
}

fn read_shorts(data: &[u8], count: usize) -> Result<Vec<i16>> {
    let mut cursor = Cursor::new(data);
    (0..count)
        .map(|_| {
            cursor
                .read_i16::<BigEndian>()
                .map_err(|_| CodonMixError::Abif("short array is truncated".to_string()))
        })
        .collect()
}
