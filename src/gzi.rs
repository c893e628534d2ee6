//! `.gzi` sidecar index support.
//!
//! This is a flat, BGZF-block-granularity index mapping uncompressed byte
//! offsets to compressed byte offsets. It is unrelated to the Tabix
//! coordinate index in [`crate::tabix`]; it is produced as a free byproduct
//! of [`crate::write::BgzfWriter`] and lets a plain (non-VCF) BGZF stream be
//! seeked to an arbitrary uncompressed position.

use crate::error::Error;
use crate::BinaryReader;
use std::convert::TryInto;

/// A `.gzi` index: a sorted table of block boundaries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GziIndex {
    pub(crate) entries: Vec<GziIndexEntry>,
}

impl GziIndex {
    pub(crate) fn new() -> Self {
        GziIndex::default()
    }

    pub fn entries(&self) -> &[GziIndexEntry] {
        &self.entries
    }

    pub fn from_reader<R: std::io::Read>(mut reader: R) -> std::io::Result<Self> {
        let num_entries = reader.read_le_u64()?;
        let mut result = GziIndex::default();
        for _ in 0..num_entries {
            let compressed_offset = reader.read_le_u64()?;
            let uncompressed_offset = reader.read_le_u64()?;
            result.entries.push(GziIndexEntry {
                compressed_offset,
                uncompressed_offset,
            });
        }
        Ok(result)
    }

    pub fn write<W: std::io::Write>(&self, mut writer: W) -> std::io::Result<()> {
        let entries: u64 = self.entries.len().try_into().unwrap();
        writer.write_all(&entries.to_le_bytes())?;
        for one in &self.entries {
            writer.write_all(&one.compressed_offset.to_le_bytes())?;
            writer.write_all(&one.uncompressed_offset.to_le_bytes())?;
        }
        Ok(())
    }

    /// Convert an uncompressed byte position to a BGZF virtual offset.
    pub fn uncompressed_pos_to_bgzf_pos(&self, pos: u64) -> Result<u64, Error> {
        let i = self
            .entries
            .partition_point(|x| x.uncompressed_offset <= pos);
        let entry = match i {
            0 => GziIndexEntry {
                compressed_offset: 0,
                uncompressed_offset: 0,
            },
            i => self.entries[i - 1],
        };
        Ok((entry.compressed_offset << 16) + ((pos - entry.uncompressed_offset) & 0xffff))
    }

    /// Convert a BGZF virtual offset to an uncompressed byte position.
    pub fn bgzf_pos_to_uncompressed_pos(&self, bgzf_pos: u64) -> Result<u64, Error> {
        let compressed_pos = bgzf_pos >> 16;
        if compressed_pos == 0 {
            return Ok(bgzf_pos);
        }
        let i = self
            .entries
            .binary_search_by(|x| x.compressed_offset.cmp(&compressed_pos))
            .map_err(|_| Error::Other("bgzf position not aligned to a known block boundary"))?;
        Ok(self.entries[i].uncompressed_offset + (bgzf_pos & 0xffff))
    }
}

/// One `.gzi` table entry: a known `(compressed_offset, uncompressed_offset)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GziIndexEntry {
    pub compressed_offset: u64,
    pub uncompressed_offset: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_binary_format() -> std::io::Result<()> {
        let index = GziIndex {
            entries: vec![
                GziIndexEntry {
                    compressed_offset: 0,
                    uncompressed_offset: 0,
                },
                GziIndexEntry {
                    compressed_offset: 100,
                    uncompressed_offset: 65280,
                },
            ],
        };
        let mut buf = Vec::new();
        index.write(&mut buf)?;
        let parsed = GziIndex::from_reader(&buf[..])?;
        assert_eq!(parsed, index);
        Ok(())
    }

    #[test]
    fn converts_positions_both_ways() -> Result<(), Error> {
        let index = GziIndex {
            entries: vec![
                GziIndexEntry {
                    compressed_offset: 0,
                    uncompressed_offset: 0,
                },
                GziIndexEntry {
                    compressed_offset: 120,
                    uncompressed_offset: 65280,
                },
            ],
        };
        let bgzf_pos = index.uncompressed_pos_to_bgzf_pos(65290)?;
        assert_eq!(bgzf_pos, 120 << 16 | 10);
        assert_eq!(index.bgzf_pos_to_uncompressed_pos(bgzf_pos)?, 65290);
        Ok(())
    }
}
