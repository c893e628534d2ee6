//! A flat, sorted `rsid → (chrom, pos)` secondary index, built by one pass over
//! a BGZF VCF's `ID` column. Distinct from the Tabix binning index: its own
//! small binary format, not `.tbi`.

use crate::read::BgzfReader;
use crate::vcf::{VcfLine, VcfParser};
use crate::Error;
use std::convert::TryInto;
use std::io::{Read, Write};

const MAGIC: [u8; 4] = [b'R', b'S', b'I', 1];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    rsid: String,
    chrom: String,
    pos: u32,
}

/// Numeric-aware sort/lookup key: `rsNNNN` ids compare by their numeric
/// suffix (matching dbSNP's own ordering); anything else sorts after, by
/// its literal text.
fn sort_key(rsid: &str) -> (bool, u64, &str) {
    match rsid.strip_prefix("rs").and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => (false, n, rsid),
        None => (true, 0, rsid),
    }
}

/// A sorted table mapping VCF `ID` tokens to their `(chrom, pos)`.
#[derive(Debug, Clone, Default)]
pub struct RsidIndex {
    entries: Vec<Entry>,
}

impl RsidIndex {
    /// Build the index from a single pass over a BGZF-compressed VCF.
    pub fn build_from<R: Read>(bgzf_vcf: R) -> Result<Self, Error> {
        let reader = BgzfReader::new(bgzf_vcf)?;
        let mut entries = Vec::new();

        for item in reader.iter_lines_with_offsets() {
            let item = item?;
            let line = VcfParser::parse_line(&item.line)?;
            let record = match line {
                VcfLine::DataRecord(record) => record,
                _ => continue,
            };
            for id in &record.ids {
                if id == "." {
                    continue;
                }
                entries.push(Entry {
                    rsid: id.clone(),
                    chrom: record.chrom.clone(),
                    pos: record.pos,
                });
            }
        }

        entries.sort_by(|a, b| sort_key(&a.rsid).cmp(&sort_key(&b.rsid)));
        Ok(RsidIndex { entries })
    }

    /// Look up an `rsid`, returning its `(chrom, pos)` if present.
    pub fn lookup(&self, rsid: &str) -> Option<(&str, u32)> {
        let key = sort_key(rsid);
        let idx = self
            .entries
            .binary_search_by(|e| sort_key(&e.rsid).cmp(&key))
            .ok()?;
        let entry = &self.entries[idx];
        Some((entry.chrom.as_str(), entry.pos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to this index's own length-prefixed binary format.
    pub fn write<W: Write>(&self, mut sink: W) -> Result<(), Error> {
        sink.write_all(&MAGIC)?;
        sink.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        for entry in &self.entries {
            write_str(&mut sink, &entry.rsid)?;
            write_str(&mut sink, &entry.chrom)?;
            sink.write_all(&entry.pos.to_le_bytes())?;
        }
        Ok(())
    }

    /// Parse an index previously written by [`Self::write`].
    pub fn from_reader<R: Read>(mut source: R) -> Result<Self, Error> {
        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::BadIndex("bad rsid index magic"));
        }
        let count = read_u32(&mut source)?;
        let mut entries = Vec::with_capacity(count.try_into().unwrap());
        for _ in 0..count {
            let rsid = read_str(&mut source)?;
            let chrom = read_str(&mut source)?;
            let pos = read_u32(&mut source)?;
            entries.push(Entry { rsid, chrom, pos });
        }
        Ok(RsidIndex { entries })
    }
}

fn write_str<W: Write>(sink: &mut W, s: &str) -> Result<(), Error> {
    sink.write_all(&(s.len() as u32).to_le_bytes())?;
    sink.write_all(s.as_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(source: &mut R) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_str<R: Read>(source: &mut R) -> Result<String, Error> {
    let len = read_u32(source)?;
    let mut buf = vec![0u8; len.try_into().unwrap()];
    source.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::BgzfWriter;
    use crate::Compression;
    use std::io::Write as _;

    fn make_vcf() -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = BgzfWriter::new(&mut buf, Compression::default());
        writer
            .write_all(
                b"##fileformat=VCFv4.2\n\
                  #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                  1\t1000\trs10\tA\tG\t.\tPASS\t.\n\
                  1\t2000\trs2\tA\tG\t.\tPASS\t.\n\
                  22\t500000\trs61733845\tA\tG\t.\tPASS\t.\n",
            )
            .unwrap();
        writer.close().unwrap();
        buf
    }

    #[test]
    fn finds_every_rsid() -> anyhow::Result<()> {
        let index = RsidIndex::build_from(&make_vcf()[..])?;
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup("rs10"), Some(("1", 1000)));
        assert_eq!(index.lookup("rs2"), Some(("1", 2000)));
        assert_eq!(index.lookup("rs61733845"), Some(("22", 500_000)));
        assert_eq!(index.lookup("rs999"), None);
        Ok(())
    }

    #[test]
    fn sorts_numerically_not_lexicographically() -> anyhow::Result<()> {
        let index = RsidIndex::build_from(&make_vcf()[..])?;
        let rsids: Vec<&str> = index.entries.iter().map(|e| e.rsid.as_str()).collect();
        assert_eq!(rsids, vec!["rs2", "rs10", "rs61733845"]);
        Ok(())
    }

    #[test]
    fn round_trips_through_binary_format() -> anyhow::Result<()> {
        let index = RsidIndex::build_from(&make_vcf()[..])?;
        let mut buf = Vec::new();
        index.write(&mut buf)?;
        let parsed = RsidIndex::from_reader(&buf[..])?;
        assert_eq!(parsed.lookup("rs10"), Some(("1", 1000)));
        assert_eq!(parsed.len(), index.len());
        Ok(())
    }
}
