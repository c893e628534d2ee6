//! In-memory Tabix index: bin + linear index per sequence, binary (de)serialization,
//! and the `lookup_virtual` query.

use crate::offset::VirtualOffset;
use crate::read::BgzfReader;
use crate::write::BgzfWriter;
use crate::{BinaryReader, Compression, Error};
use indexmap::IndexMap;
use std::convert::TryInto;
use std::io::{self, Read, Write};

const MAGIC: [u8; 4] = [b'T', b'B', b'I', 1];

/// One `[begin, end)` virtual-offset range recorded against a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub begin: VirtualOffset,
    pub end: VirtualOffset,
}

/// Bin and linear index for a single reference sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceIndex {
    /// `bin id → chunks`, iterated in ascending bin-id order on write.
    pub bins: std::collections::BTreeMap<u32, Vec<Chunk>>,
    /// Dense, 16 KiB-window-indexed, fully backfilled minimum virtual offsets.
    pub linear: Vec<VirtualOffset>,
}

/// A parsed or built Tabix (`.tbi`) coordinate index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabixIndex {
    pub file_format: i32,
    pub column_sequence: i32,
    pub column_begin: i32,
    pub column_end: i32,
    pub meta: i32,
    pub skip_lines: i32,
    pub sequences: IndexMap<String, SequenceIndex>,
}

/// `file_format` value for VCF, per the Tabix on-disk format.
pub const FORMAT_VCF: i32 = 2;

impl TabixIndex {
    pub fn new(file_format: i32, column_sequence: i32, column_begin: i32, column_end: i32, meta: i32, skip_lines: i32) -> Self {
        TabixIndex {
            file_format,
            column_sequence,
            column_begin,
            column_end,
            meta,
            skip_lines,
            sequences: IndexMap::new(),
        }
    }

    /// Query the minimal virtual-offset range covering every record that may
    /// overlap `[begin, end]` (both inclusive, 0-based, matching the genomic
    /// coordinates used throughout the public API) on `name`. Returns `None`
    /// if the sequence is absent or the query falls outside any indexed
    /// window.
    pub fn lookup_virtual(
        &self,
        name: &str,
        begin: u64,
        end: u64,
    ) -> Option<(VirtualOffset, VirtualOffset)> {
        let seq = self.sequences.get(name)?;
        let window: usize = (begin >> 14).try_into().ok()?;
        let linear_min = *seq.linear.get(window)?;

        let mut v_start: Option<VirtualOffset> = None;
        let mut v_end: Option<VirtualOffset> = None;

        // bins.rs uses half-open [begin, end) ranges; genomic queries here are inclusive.
        for bin in crate::bins::region_to_bins(begin, end + 1) {
            let chunks = match seq.bins.get(&bin) {
                Some(c) => c,
                None => continue,
            };
            for chunk in chunks {
                if chunk.end <= linear_min {
                    continue;
                }
                let clamped_begin = chunk.begin.min(linear_min);
                v_start = Some(v_start.map_or(clamped_begin, |cur| cur.min(clamped_begin)));
                v_end = Some(v_end.map_or(chunk.end, |cur| cur.max(chunk.end)));
            }
        }

        match (v_start, v_end) {
            (Some(s), Some(e)) => Some((s, e)),
            (None, None) => None,
            _ => unreachable!("v_start/v_end must be set together"),
        }
    }

    /// Parse a `.tbi` index from its BGZF-compressed on-disk form.
    pub fn from_reader<R: Read>(source: R) -> Result<Self, Error> {
        let mut reader = BgzfReader::new(source)?;
        Self::parse_raw(&mut reader)
    }

    fn parse_raw<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::BadIndex("bad magic"));
        }

        let n_ref = reader.read_le_i32()?;
        let file_format = reader.read_le_i32()?;
        let column_sequence = reader.read_le_i32()?;
        let column_begin = reader.read_le_i32()?;
        let column_end = reader.read_le_i32()?;
        let meta = reader.read_le_i32()?;
        let skip_lines = reader.read_le_i32()?;
        let l_nm = reader.read_le_i32()?;

        let mut name_buf = vec![0u8; l_nm.try_into().unwrap()];
        reader.read_exact(&mut name_buf)?;
        let names: Vec<String> = name_buf
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        if names.len() != n_ref.try_into().unwrap() {
            return Err(Error::BadIndex("name count does not match n_ref"));
        }

        let mut index = TabixIndex::new(
            file_format,
            column_sequence,
            column_begin,
            column_end,
            meta,
            skip_lines,
        );

        for name in names {
            let n_bin = reader.read_le_i32()?;
            let mut bins = std::collections::BTreeMap::new();
            for _ in 0..n_bin {
                let bin_id = reader.read_le_u32()?;
                let n_chunk = reader.read_le_i32()?;
                let mut chunks = Vec::with_capacity(n_chunk.try_into().unwrap());
                for _ in 0..n_chunk {
                    let begin = reader.read_le_u64()?;
                    let end = reader.read_le_u64()?;
                    chunks.push(Chunk {
                        begin: VirtualOffset::from_raw(begin),
                        end: VirtualOffset::from_raw(end),
                    });
                }
                bins.insert(bin_id, chunks);
            }

            let n_intv = reader.read_le_i32()?;
            let mut linear = Vec::with_capacity(n_intv.try_into().unwrap());
            for _ in 0..n_intv {
                linear.push(VirtualOffset::from_raw(reader.read_le_u64()?));
            }

            if index
                .sequences
                .insert(name, SequenceIndex { bins, linear })
                .is_some()
            {
                return Err(Error::BadIndex("duplicate sequence name"));
            }
        }

        Ok(index)
    }

    /// Serialize to the BGZF-compressed on-disk `.tbi` form.
    pub fn write<W: Write>(&self, sink: W) -> Result<(), Error> {
        let mut writer = BgzfWriter::new(sink, Compression::default());
        self.write_raw(&mut writer)?;
        writer.close()?;
        Ok(())
    }

    fn write_raw<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&(self.sequences.len() as i32).to_le_bytes())?;
        writer.write_all(&self.file_format.to_le_bytes())?;
        writer.write_all(&self.column_sequence.to_le_bytes())?;
        writer.write_all(&self.column_begin.to_le_bytes())?;
        writer.write_all(&self.column_end.to_le_bytes())?;
        writer.write_all(&self.meta.to_le_bytes())?;
        writer.write_all(&self.skip_lines.to_le_bytes())?;

        let l_nm: usize = self.sequences.keys().map(|n| n.len() + 1).sum();
        writer.write_all(&(l_nm as i32).to_le_bytes())?;
        for name in self.sequences.keys() {
            writer.write_all(name.as_bytes())?;
            writer.write_all(&[0])?;
        }

        for seq in self.sequences.values() {
            writer.write_all(&(seq.bins.len() as i32).to_le_bytes())?;
            for (bin_id, chunks) in &seq.bins {
                writer.write_all(&bin_id.to_le_bytes())?;
                writer.write_all(&(chunks.len() as i32).to_le_bytes())?;
                for chunk in chunks {
                    writer.write_all(&chunk.begin.raw().to_le_bytes())?;
                    writer.write_all(&chunk.end.raw().to_le_bytes())?;
                }
            }

            writer.write_all(&(seq.linear.len() as i32).to_le_bytes())?;
            for offset in &seq.linear {
                writer.write_all(&offset.raw().to_le_bytes())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_index() -> TabixIndex {
        let mut index = TabixIndex::new(FORMAT_VCF, 1, 2, 0, b'#' as i32, 0);
        let mut bins = std::collections::BTreeMap::new();
        // a record spanning [100, 120) and one spanning [130, 140)
        bins.insert(
            crate::bins::region_to_bin(100, 120),
            vec![Chunk {
                begin: VirtualOffset::new(0, 0),
                end: VirtualOffset::new(0, 50),
            }],
        );
        bins.insert(
            crate::bins::region_to_bin(130, 140),
            vec![Chunk {
                begin: VirtualOffset::new(0, 50),
                end: VirtualOffset::new(0, 90),
            }],
        );
        index.sequences.insert(
            "1".to_string(),
            SequenceIndex {
                bins,
                linear: vec![VirtualOffset::new(0, 0)],
            },
        );
        index
    }

    #[test]
    fn round_trips_through_binary_format() -> Result<(), Error> {
        let index = sample_index();
        let mut buf = Vec::new();
        index.write(&mut buf)?;
        let parsed = TabixIndex::from_reader(&buf[..])?;
        assert_eq!(parsed, index);
        Ok(())
    }

    #[test]
    fn lookup_virtual_finds_overlapping_chunk() {
        let index = sample_index();
        let (start, end) = index
            .lookup_virtual("1", 100, 100)
            .expect("record at position 100 must be found");
        assert_eq!(start, VirtualOffset::new(0, 0));
        assert_eq!(end, VirtualOffset::new(0, 50));
    }

    #[test]
    fn lookup_virtual_returns_none_for_unknown_sequence() {
        let index = sample_index();
        assert_eq!(index.lookup_virtual("unknown", 1, 1), None);
    }

    #[test]
    fn lookup_virtual_distinguishes_zero_offset_from_unset() {
        let mut index = TabixIndex::new(FORMAT_VCF, 1, 2, 0, b'#' as i32, 0);
        let mut bins = std::collections::BTreeMap::new();
        bins.insert(
            crate::bins::region_to_bin(0, 1),
            vec![Chunk {
                begin: VirtualOffset::MIN,
                end: VirtualOffset::new(0, 50),
            }],
        );
        index.sequences.insert(
            "1".to_string(),
            SequenceIndex {
                bins,
                linear: vec![VirtualOffset::MIN],
            },
        );
        let (start, _) = index
            .lookup_virtual("1", 0, 0)
            .expect("record at virtual offset 0 must be found, not treated as unset");
        assert_eq!(start, VirtualOffset::MIN);
    }
}
