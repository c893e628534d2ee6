//! Single-pass Tabix index construction from a sorted, BGZF-compressed VCF.

use super::index::{Chunk, SequenceIndex, TabixIndex, FORMAT_VCF};
use crate::offset::VirtualOffset;
use crate::read::BgzfReader;
use crate::vcf::parser::VcfParser;
use crate::vcf::VcfLine;
use crate::Error;
use std::io::Read;

/// Internal scratch state for one sequence while the builder's single pass is running.
struct BuildingSequence {
    bins: std::collections::BTreeMap<u32, Vec<Chunk>>,
    /// `None` marks a window not yet observed by any record; distinct from
    /// `Some(VirtualOffset::MIN)`, a legitimate record starting at offset 0.
    linear: Vec<Option<VirtualOffset>>,
}

impl BuildingSequence {
    fn new() -> Self {
        BuildingSequence {
            bins: std::collections::BTreeMap::new(),
            linear: Vec::new(),
        }
    }

    fn ensure_window(&mut self, window: usize) {
        if self.linear.len() <= window {
            self.linear.resize(window + 1, None);
        }
    }

    fn observe(&mut self, window: usize, candidate: VirtualOffset) {
        self.ensure_window(window);
        let slot = &mut self.linear[window];
        *slot = Some(match *slot {
            Some(current) => current.min(candidate),
            None => candidate,
        });
    }

    fn finish(mut self) -> SequenceIndex {
        let mut last = VirtualOffset::MIN;
        for slot in self.linear.iter_mut() {
            match slot {
                Some(v) => last = *v,
                None => *slot = Some(last),
            }
        }
        SequenceIndex {
            bins: self.bins,
            linear: self.linear.into_iter().map(|v| v.unwrap()).collect(),
        }
    }
}

/// Builds a [`TabixIndex`] from a single pass over a sorted BGZF VCF.
pub struct IndexBuilder;

impl IndexBuilder {
    /// Build a complete VCF Tabix index (`file_format=2, col_seq=1, col_beg=2,
    /// col_end=0, meta='#', skip=0`) from `bgzf_vcf`, which must already be
    /// coordinate-sorted.
    pub fn build_from<R: Read>(bgzf_vcf: R) -> Result<TabixIndex, Error> {
        let reader = BgzfReader::new(bgzf_vcf)?;
        let mut sequences: indexmap::IndexMap<String, BuildingSequence> = indexmap::IndexMap::new();
        let mut current_name: Option<String> = None;

        for item in reader.iter_lines_with_offsets() {
            let item = item?;
            let line = VcfParser::parse_line(&item.line)?;

            let record = match line {
                VcfLine::DataRecord(record) => record,
                _ => continue,
            };

            if current_name.as_deref() != Some(record.chrom.as_str()) {
                current_name = Some(record.chrom.clone());
            }
            let name = current_name.as_ref().unwrap();
            let seq = sequences.entry(name.clone()).or_insert_with(BuildingSequence::new);

            let record_start = (record.pos - 1) as u64;
            let record_end = record_start + record.reference.len().saturating_sub(1) as u64;

            let bin = crate::bins::region_to_bin(record_start, record_end + 1);
            let chunk_entry = seq.bins.entry(bin).or_default();
            match chunk_entry.last_mut() {
                Some(last) if last.end == item.start => last.end = item.end,
                _ => chunk_entry.push(Chunk {
                    begin: item.start,
                    end: item.end,
                }),
            }

            let win_begin = (record_start >> 14) as usize;
            let win_end = (record_end >> 14) as usize;
            for window in [win_begin, win_end] {
                seq.observe(window, item.start);
            }
        }

        let mut index = TabixIndex::new(FORMAT_VCF, 1, 2, 0, b'#' as i32, 0);
        for (name, seq) in sequences {
            index.sequences.insert(name, seq.finish());
        }
        Ok(index)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::BgzfWriter;
    use crate::Compression;
    use std::io::Write;

    fn make_vcf(records: &[(&str, u32, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = BgzfWriter::new(&mut buf, Compression::default());
        writer
            .write_all(b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n")
            .unwrap();
        for (chrom, pos, id) in records {
            writer
                .write_all(format!("{}\t{}\t{}\tA\tG\t.\tPASS\t.\n", chrom, pos, id).as_bytes())
                .unwrap();
        }
        writer.close().unwrap();
        buf
    }

    #[test]
    fn finds_every_record_by_exact_position() -> anyhow::Result<()> {
        let records = [
            ("1", 1000, "rs1"),
            ("1", 1_108_138, "rs61733845"),
            ("22", 500_000, "rs2"),
        ];
        let vcf = make_vcf(&records);
        let index = IndexBuilder::build_from(&vcf[..])?;

        for (chrom, pos, _) in &records {
            let hit = index.lookup_virtual(chrom, (*pos - 1) as u64, (*pos - 1) as u64);
            assert!(hit.is_some(), "expected a hit for {}:{}", chrom, pos);
        }

        assert!(index.lookup_virtual("1", 50, 50).is_none());
        assert!(index.lookup_virtual("ZZ", 1, 1).is_none());
        Ok(())
    }

    #[test]
    fn linear_index_has_no_unset_gaps() -> anyhow::Result<()> {
        let vcf = make_vcf(&[("1", 1, "rs1"), ("1", 100_000, "rs2")]);
        let index = IndexBuilder::build_from(&vcf[..])?;
        let seq = &index.sequences["1"];
        assert!(seq.linear.len() > 1);
        Ok(())
    }
}
