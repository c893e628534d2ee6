//! Coordinate-indexed access to a BGZF-compressed tab-delimited file, plus a VCF
//! convenience layer built on top of [`crate::vcf`].

use crate::read::BgzfReader;
use crate::tabix::TabixIndex;
use crate::vcf::{VcfLine, VcfParser};
use crate::Error;
use std::io::{BufRead, Read, Seek};

/// A BGZF file paired with its Tabix coordinate index, supporting random-access
/// region queries.
pub struct TabixIndexedFile<R: Read + Seek> {
    reader: BgzfReader<R>,
    index: TabixIndex,
    vcf_header: Option<String>,
}

impl<R: Read + Seek> TabixIndexedFile<R> {
    pub fn new(source: R, index: TabixIndex) -> Result<Self, Error> {
        let reader = BgzfReader::new(source)?;
        Ok(TabixIndexedFile {
            reader,
            index,
            vcf_header: None,
        })
    }

    pub fn index(&self) -> &TabixIndex {
        &self.index
    }

    /// Raw decompressed bytes covering every record that may overlap `[begin, end]`
    /// (both inclusive). Empty if `name` is not in the index.
    pub fn fetch_bytes(&mut self, name: &str, begin: u64, end: u64) -> Result<Vec<u8>, Error> {
        match self.index.lookup_virtual(name, begin, end) {
            Some((v_start, v_end)) => self.reader.read_range(v_start.raw(), v_end.raw()),
            None => {
                log::debug!("fetch_bytes: {} not indexed or region not covered", name);
                Ok(Vec::new())
            }
        }
    }

    /// Complete, column-filtered record lines overlapping `[begin, end]`.
    pub fn fetch(&mut self, name: &str, begin: u64, end: u64) -> Result<Vec<Vec<u8>>, Error> {
        let bytes = self.fetch_bytes(name, begin, end)?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let meta = self.index.meta;
        let col_seq = self.index.column_sequence as usize;
        let col_beg = self.index.column_begin as usize;
        let col_end = if self.index.column_end != 0 {
            self.index.column_end as usize
        } else {
            col_beg
        };
        let expected_len = col_seq.max(col_beg).max(col_end);
        let skip = self.index.skip_lines as usize;

        let mut out = Vec::new();
        for (i, line) in bytes.split(|&b| b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            if i < skip {
                continue;
            }
            if line[0] as i32 == meta {
                continue;
            }
            let cols: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
            if cols.len() < expected_len {
                continue;
            }
            let parse_col = |idx: usize| -> Option<u64> {
                std::str::from_utf8(cols[idx - 1]).ok()?.parse().ok()
            };
            let begin_val = match parse_col(col_beg) {
                Some(v) => v,
                None => continue,
            };
            let end_val = match parse_col(col_end) {
                Some(v) => v,
                None => continue,
            };
            if begin_val < begin || end_val > end {
                continue;
            }
            out.push(line.to_vec());
        }
        Ok(out)
    }

    /// The accumulated `##`/`#` header lines, cached after the first call.
    pub fn fetch_vcf_header(&mut self) -> Result<&str, Error> {
        if self.vcf_header.is_none() {
            let saved = self.reader.virtual_pos().raw();
            self.reader.bgzf_seek(0)?;

            let mut header = Vec::new();
            loop {
                let mut line = Vec::new();
                let n = self.reader.read_until(b'\n', &mut line)?;
                if n == 0 {
                    break;
                }
                if line.first() != Some(&b'#') {
                    break;
                }
                header.extend_from_slice(&line);
            }

            self.reader.bgzf_seek(saved)?;
            self.vcf_header = Some(String::from_utf8_lossy(&header).into_owned());
        }
        Ok(self.vcf_header.as_deref().unwrap())
    }

    /// [`Self::fetch`] followed by [`VcfParser::parse_line`] over every line,
    /// returning the first parse error encountered rather than skipping it.
    pub fn fetch_vcf_lines(&mut self, name: &str, begin: u64, end: u64) -> Result<Vec<VcfLine>, Error> {
        self.fetch(name, begin, end)?
            .iter()
            .map(|line| VcfParser::parse_line(line))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tabix::IndexBuilder;
    use crate::write::BgzfWriter;
    use crate::Compression;
    use std::io::{Cursor, Write};

    fn make_fixture() -> (Vec<u8>, TabixIndex) {
        let mut buf = Vec::new();
        {
            let mut writer = BgzfWriter::new(&mut buf, Compression::default());
            writer
                .write_all(
                    b"##fileformat=VCFv4.2\n\
                      ##INFO=<ID=NS,Number=1,Type=Integer,Description=\"samples\">\n\
                      #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                      1\t1000\trs1\tA\tG\t.\tPASS\t.\n\
                      1\t1108138\trs61733845\tC\tT\t.\tPASS\t.\n\
                      22\t500000\trs2\tA\tG\t.\tPASS\t.\n",
                )
                .unwrap();
            writer.close().unwrap();
        }
        let index = IndexBuilder::build_from(&buf[..]).unwrap();
        (buf, index)
    }

    #[test]
    fn fetch_finds_exact_record_by_position() -> anyhow::Result<()> {
        let (buf, index) = make_fixture();
        let mut file = TabixIndexedFile::new(Cursor::new(buf), index)?;
        let lines = file.fetch("1", 1_108_138, 1_108_138)?;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].windows(10).any(|w| w == b"rs61733845"));
        Ok(())
    }

    #[test]
    fn fetch_returns_empty_beyond_last_record() -> anyhow::Result<()> {
        let (buf, index) = make_fixture();
        let mut file = TabixIndexedFile::new(Cursor::new(buf), index)?;
        assert!(file.fetch("1", 245_804_117, 245_804_117)?.is_empty());
        Ok(())
    }

    #[test]
    fn fetch_returns_empty_for_unknown_sequence() -> anyhow::Result<()> {
        let (buf, index) = make_fixture();
        let mut file = TabixIndexedFile::new(Cursor::new(buf), index)?;
        assert!(file.fetch("ZZ", 1, 1_000_000)?.is_empty());
        Ok(())
    }

    #[test]
    fn fetch_vcf_header_returns_only_hash_prefixed_lines() -> anyhow::Result<()> {
        let (buf, index) = make_fixture();
        let mut file = TabixIndexedFile::new(Cursor::new(buf), index)?;
        let header = file.fetch_vcf_header()?.to_string();
        assert!(header.starts_with("##fileformat=VCFv4.2"));
        assert!(header.contains("#CHROM"));
        assert!(!header.contains("rs1\t"));
        Ok(())
    }

    #[test]
    fn fetch_vcf_lines_parses_matching_records() -> anyhow::Result<()> {
        let (buf, index) = make_fixture();
        let mut file = TabixIndexedFile::new(Cursor::new(buf), index)?;
        let lines = file.fetch_vcf_lines("22", 500_000, 500_000)?;
        assert_eq!(lines.len(), 1);
        match &lines[0] {
            VcfLine::DataRecord(record) => assert_eq!(record.pos, 500_000),
            other => panic!("expected DataRecord, got {:?}", other),
        }
        Ok(())
    }
}
