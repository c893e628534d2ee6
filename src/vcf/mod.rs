//! VCF line parsing: a character-driven state machine producing structured
//! [`VcfLine`] values, round-trippable back to text via [`std::fmt::Display`].

pub mod parser;

pub use parser::VcfParser;

use indexmap::IndexMap;
use std::fmt;

/// A single parsed VCF data record (the non-header, non-comment line shape).
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub chrom: String,
    /// 1-based position, as in the VCF text.
    pub pos: u32,
    pub ids: Vec<String>,
    pub reference: String,
    pub alts: Vec<String>,
    /// The `QUAL` column exactly as written, preserved even when it does not parse as a float.
    pub qual_raw: String,
    pub qual: Option<f64>,
    pub filters: Vec<String>,
    /// `key → values`; an empty value list means a flag (no `=value`).
    pub info: IndexMap<String, Vec<String>>,
    /// `FORMAT` column keys, in column order.
    pub format: Vec<String>,
    /// One ordered map per sample column, keyed by `format`'s keys.
    pub samples: Vec<IndexMap<String, String>>,
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = if self.ids.is_empty() {
            ".".to_string()
        } else {
            self.ids.join(";")
        };
        let alts = if self.alts.is_empty() {
            ".".to_string()
        } else {
            self.alts.join(",")
        };
        let filters = if self.filters.is_empty() {
            ".".to_string()
        } else {
            self.filters.join(";")
        };
        let info = if self.info.is_empty() {
            ".".to_string()
        } else {
            self.info
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{}={}", k, v.join(","))
                    }
                })
                .collect::<Vec<_>>()
                .join(";")
        };

        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom, self.pos, ids, self.reference, alts, self.qual_raw, filters, info
        )?;

        if !self.format.is_empty() {
            write!(f, "\t{}", self.format.join(":"))?;
            for sample in &self.samples {
                let values: Vec<&str> = self
                    .format
                    .iter()
                    .map(|k| sample.get(k).map(|s| s.as_str()).unwrap_or("."))
                    .collect();
                write!(f, "\t{}", values.join(":"))?;
            }
        }
        Ok(())
    }
}

/// A parsed VCF line: exactly one variant is inhabited per instance.
#[derive(Debug, Clone, PartialEq)]
pub enum VcfLine {
    /// A `#`-prefixed (but not `##`) line, kept verbatim.
    Comment(String),
    /// A `##key=value` meta-information line with a scalar value.
    MetaScalar { key: String, value: String },
    /// A `##key=<f1=v1,f2=v2,...>` meta-information line.
    MetaStructured {
        key: String,
        fields: IndexMap<String, String>,
    },
    /// A data record (the `#CHROM` header line is itself parsed as a [`VcfLine::Comment`]).
    DataRecord(DataRecord),
}

impl fmt::Display for VcfLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcfLine::Comment(text) => write!(f, "#{}", text),
            VcfLine::MetaScalar { key, value } => write!(f, "##{}={}", key, value),
            VcfLine::MetaStructured { key, fields } => {
                write!(f, "##{}=<", key)?;
                let rendered: Vec<String> =
                    fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}>", rendered.join(","))
            }
            VcfLine::DataRecord(record) => write!(f, "{}", record),
        }
    }
}
