//! Character-driven finite-state machine turning one VCF text line into a [`VcfLine`].

use super::{DataRecord, VcfLine};
use crate::Error;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    LineStart,
    Comment,
    CommentKey,
    CommentValue,
    CommentStructKey,
    CommentStructValue,
    CommentStructValueQuoted,
    Chrom,
    Pos,
    Id,
    Ref,
    Alt,
    Qual,
    Filter,
    InfoKey,
    InfoValue,
    Format,
    Sample,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::LineStart => "LINE_START",
            State::Comment => "COMMENT",
            State::CommentKey => "COMMENT_KEY",
            State::CommentValue => "COMMENT_VALUE",
            State::CommentStructKey => "COMMENT_STRUCT_KEY",
            State::CommentStructValue => "COMMENT_STRUCT_VALUE",
            State::CommentStructValueQuoted => "COMMENT_STRUCT_VALUE_QUOTED",
            State::Chrom => "CHROM",
            State::Pos => "POS",
            State::Id => "ID",
            State::Ref => "REF",
            State::Alt => "ALT",
            State::Qual => "QUAL",
            State::Filter => "FILTER",
            State::InfoKey => "INFO_KEY",
            State::InfoValue => "INFO_VALUE",
            State::Format => "FORMAT",
            State::Sample => "SAMPLE",
        }
    }
}

/// A transition guard, evaluated uniformly regardless of which state it belongs to.
enum Transition {
    CharIn(&'static [u8]),
    CharNotIn(&'static [u8]),
    Is(u8),
}

impl Transition {
    fn accepts(&self, b: u8) -> bool {
        match self {
            Transition::CharIn(set) => set.contains(&b),
            Transition::CharNotIn(set) => !set.contains(&b),
            Transition::Is(c) => b == *c,
        }
    }
}

const POS_CHARS: Transition = Transition::CharIn(b"0123456789");
const REF_CHARS: Transition = Transition::CharIn(b"ACGTN");
const QUAL_CHARS: Transition = Transition::CharIn(b"0123456789.-");
const ID_CHARS: Transition = Transition::CharNotIn(b" \t\r\n;");

/// Mutable scratch state, reset at the start of every [`VcfParser::parse_line`] call.
#[derive(Default)]
struct Builder {
    token: Vec<u8>,

    is_meta: bool,
    is_structured: bool,
    comment_text: Vec<u8>,
    comment_key: String,
    comment_value: String,
    struct_fields: IndexMap<String, String>,
    struct_key: String,

    chrom: String,
    pos: String,
    ids: Vec<String>,
    reference: String,
    alts: Vec<String>,
    qual_raw: String,
    filters: Vec<String>,
    info: IndexMap<String, Vec<String>>,
    info_key: String,
    format: Vec<String>,
    samples: Vec<IndexMap<String, String>>,
}

impl Builder {
    fn take_token(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.token).into_owned();
        self.token.clear();
        s
    }
}

/// Parses VCF lines via a character-at-a-time state machine.
pub struct VcfParser;

impl VcfParser {
    /// Parse one line, without its trailing `\n`. `line` may also include a
    /// trailing `\n`/`\r\n`, which is stripped before parsing.
    pub fn parse_line(line: &[u8]) -> Result<VcfLine, Error> {
        let line = strip_newline(line);
        let mut state = State::LineStart;
        let mut b = Builder::default();

        // feed every byte, then a final EOI pseudo-step
        for (pos, &ch) in line.iter().enumerate() {
            state = step(state, Some(ch), &mut b, pos)?;
        }
        state = step(state, None, &mut b, line.len())?;

        finish(state, b, line.len())
    }
}

fn strip_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn fail(state: State, position: usize, message: &'static str) -> Error {
    Error::ParseError {
        state: state.name(),
        position,
        message,
    }
}

/// Apply one input symbol (`Some(byte)`, or `None` for end-of-input) and return the next state.
fn step(state: State, input: Option<u8>, b: &mut Builder, pos: usize) -> Result<State, Error> {
    match state {
        State::LineStart => match input {
            Some(b'#') => Ok(State::Comment),
            Some(ch) => {
                b.token.push(ch);
                Ok(State::Chrom)
            }
            None => Ok(State::LineStart),
        },

        State::Comment => match input {
            Some(b'#') => {
                b.is_meta = true;
                Ok(State::CommentKey)
            }
            Some(b'\n') | None => Ok(State::Comment),
            Some(ch) => {
                b.comment_text.push(ch);
                Ok(State::Comment)
            }
        },

        State::CommentKey => match input {
            Some(b'=') => {
                b.comment_key = b.take_token();
                Ok(State::CommentValue)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::CommentKey)
            }
            None => Err(fail(state, pos, "unterminated meta-info key")),
        },

        State::CommentValue => match input {
            Some(b'<') => {
                b.comment_value = b.take_token();
                b.is_structured = true;
                Ok(State::CommentStructKey)
            }
            Some(b'\n') | None => {
                b.comment_value = b.take_token();
                Ok(State::CommentValue)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::CommentValue)
            }
        },

        State::CommentStructKey => match input {
            Some(b'=') => {
                b.struct_key = b.take_token();
                Ok(State::CommentStructValue)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::CommentStructKey)
            }
            None => Err(fail(state, pos, "unterminated structured field key")),
        },

        State::CommentStructValue => match input {
            Some(b'"') => {
                b.token.push(b'"');
                Ok(State::CommentStructValueQuoted)
            }
            Some(b',') => {
                let key = std::mem::take(&mut b.struct_key);
                let value = b.take_token();
                b.struct_fields.insert(key, value);
                Ok(State::CommentStructKey)
            }
            Some(b'>') => {
                let key = std::mem::take(&mut b.struct_key);
                let value = b.take_token();
                b.struct_fields.insert(key, value);
                Ok(State::Comment)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::CommentStructValue)
            }
            None => Err(fail(state, pos, "unterminated structured field value")),
        },

        State::CommentStructValueQuoted => match input {
            Some(b'"') => {
                b.token.push(b'"');
                Ok(State::CommentStructValue)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::CommentStructValueQuoted)
            }
            None => Err(fail(state, pos, "unterminated quoted value")),
        },

        State::Chrom => match input {
            Some(b'\t') => {
                b.chrom = b.take_token();
                Ok(State::Pos)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::Chrom)
            }
            None => Err(fail(state, pos, "unterminated CHROM column")),
        },

        State::Pos => match input {
            Some(b'\t') => {
                b.pos = b.take_token();
                Ok(State::Id)
            }
            Some(ch) if POS_CHARS.accepts(ch) => {
                b.token.push(ch);
                Ok(State::Pos)
            }
            Some(_) => Err(fail(state, pos, "expected digit in POS")),
            None => Err(fail(state, pos, "unterminated POS column")),
        },

        State::Id => match input {
            Some(b';') => {
                b.ids.push(b.take_token());
                Ok(State::Id)
            }
            Some(b'\t') => {
                b.ids.push(b.take_token());
                Ok(State::Ref)
            }
            Some(ch) if ID_CHARS.accepts(ch) => {
                b.token.push(ch);
                Ok(State::Id)
            }
            Some(_) => Err(fail(state, pos, "unexpected character in ID")),
            None => Err(fail(state, pos, "unterminated ID column")),
        },

        State::Ref => match input {
            Some(b'\t') => {
                b.reference = b.take_token();
                Ok(State::Alt)
            }
            Some(ch) if REF_CHARS.accepts(ch) => {
                b.token.push(ch);
                Ok(State::Ref)
            }
            Some(_) => Err(fail(state, pos, "expected [ACGTN] in REF")),
            None => Err(fail(state, pos, "unterminated REF column")),
        },

        State::Alt => match input {
            Some(b',') => {
                b.alts.push(b.take_token());
                Ok(State::Alt)
            }
            Some(b'\t') => {
                b.alts.push(b.take_token());
                Ok(State::Qual)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::Alt)
            }
            None => Err(fail(state, pos, "unterminated ALT column")),
        },

        State::Qual => match input {
            Some(b'\t') => {
                b.qual_raw = b.take_token();
                Ok(State::Filter)
            }
            Some(ch) if QUAL_CHARS.accepts(ch) => {
                b.token.push(ch);
                Ok(State::Qual)
            }
            Some(_) => Err(fail(state, pos, "expected [0-9.-] in QUAL")),
            None => Err(fail(state, pos, "unterminated QUAL column")),
        },

        State::Filter => match input {
            Some(b';') => {
                b.filters.push(b.take_token());
                Ok(State::Filter)
            }
            Some(b'\t') => {
                b.filters.push(b.take_token());
                Ok(State::InfoKey)
            }
            Some(b'\n') | None => {
                b.filters.push(b.take_token());
                Ok(State::Filter)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::Filter)
            }
        },

        State::InfoKey => match input {
            Some(b'=') => {
                b.info_key = b.take_token();
                Ok(State::InfoValue)
            }
            Some(b';') => {
                let key = b.take_token();
                b.info.entry(key).or_default();
                Ok(State::InfoKey)
            }
            Some(b'\t') => {
                let key = b.take_token();
                if key != "." && !key.is_empty() {
                    b.info.entry(key).or_default();
                }
                Ok(State::Format)
            }
            Some(b'\n') | None => {
                let key = b.take_token();
                if key != "." && !key.is_empty() {
                    b.info.entry(key).or_default();
                }
                Ok(State::InfoKey)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::InfoKey)
            }
        },

        State::InfoValue => match input {
            Some(b',') => {
                let key = b.info_key.clone();
                let value = b.take_token();
                b.info.entry(key).or_default().push(value);
                Ok(State::InfoValue)
            }
            Some(b';') => {
                let key = std::mem::take(&mut b.info_key);
                let value = b.take_token();
                b.info.entry(key).or_default().push(value);
                Ok(State::InfoKey)
            }
            Some(b'\t') => {
                let key = std::mem::take(&mut b.info_key);
                let value = b.take_token();
                b.info.entry(key).or_default().push(value);
                Ok(State::Format)
            }
            Some(b'\n') | None => {
                let key = std::mem::take(&mut b.info_key);
                let value = b.take_token();
                b.info.entry(key).or_default().push(value);
                Ok(State::InfoValue)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::InfoValue)
            }
        },

        State::Format => match input {
            Some(b':') => {
                b.format.push(b.take_token());
                Ok(State::Format)
            }
            Some(b'\t') => {
                b.format.push(b.take_token());
                b.samples.push(IndexMap::new());
                Ok(State::Sample)
            }
            Some(b'\n') | None => {
                let tok = b.take_token();
                if !tok.is_empty() {
                    b.format.push(tok);
                }
                Ok(State::Format)
            }
            Some(ch) => {
                b.token.push(ch);
                Ok(State::Format)
            }
        },

        State::Sample => {
            let field_index = b
                .samples
                .last()
                .map(|s| s.len())
                .unwrap_or(0);
            match input {
                Some(b':') => {
                    commit_sample_field(b, field_index);
                    Ok(State::Sample)
                }
                Some(b'\t') => {
                    commit_sample_field(b, field_index);
                    b.samples.push(IndexMap::new());
                    Ok(State::Sample)
                }
                Some(b'\n') | None => {
                    commit_sample_field(b, field_index);
                    Ok(State::Sample)
                }
                Some(ch) => {
                    b.token.push(ch);
                    Ok(State::Sample)
                }
            }
        }
    }
}

fn commit_sample_field(b: &mut Builder, field_index: usize) {
    let value = b.take_token();
    if let (Some(key), Some(sample)) = (b.format.get(field_index), b.samples.last_mut()) {
        sample.insert(key.clone(), value);
    }
}

fn finish(state: State, b: Builder, line_len: usize) -> Result<VcfLine, Error> {
    match state {
        State::Comment if b.is_meta && b.is_structured => Ok(VcfLine::MetaStructured {
            key: b.comment_key,
            fields: b.struct_fields,
        }),
        State::Comment => Ok(VcfLine::Comment(
            String::from_utf8_lossy(&b.comment_text).into_owned(),
        )),
        State::CommentValue => Ok(VcfLine::MetaScalar {
            key: b.comment_key,
            value: b.comment_value,
        }),
        State::Filter | State::InfoKey | State::InfoValue | State::Format | State::Sample => {
            let pos: u32 = b
                .pos
                .parse()
                .map_err(|_| fail(State::Pos, line_len, "POS is not a valid integer"))?;
            let qual = b.qual_raw.parse::<f64>().ok();
            Ok(VcfLine::DataRecord(DataRecord {
                chrom: b.chrom,
                pos,
                ids: b.ids,
                reference: b.reference,
                alts: b.alts,
                qual_raw: b.qual_raw,
                qual,
                filters: b.filters,
                info: b.info,
                format: b.format,
                samples: b.samples,
            }))
        }
        other => Err(fail(other, line_len, "line ended in an unacceptable state")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_comment_line() -> anyhow::Result<()> {
        let line = VcfParser::parse_line(b"#CHROM\tPOS\tID\n")?;
        assert_eq!(line.to_string(), "#CHROM\tPOS\tID");
        Ok(())
    }

    #[test]
    fn parses_meta_scalar_line() -> anyhow::Result<()> {
        let line = VcfParser::parse_line(b"##fileformat=VCFv4.2\n")?;
        match &line {
            VcfLine::MetaScalar { key, value } => {
                assert_eq!(key, "fileformat");
                assert_eq!(value, "VCFv4.2");
            }
            other => panic!("expected MetaScalar, got {:?}", other),
        }
        assert_eq!(line.to_string(), "##fileformat=VCFv4.2");
        Ok(())
    }

    #[test]
    fn parses_meta_structured_line() -> anyhow::Result<()> {
        let raw = r#"##INFO=<ID=NS,Number=1,Type=Integer,Description="Number of samples">"#;
        let line = VcfParser::parse_line(raw.as_bytes())?;
        match &line {
            VcfLine::MetaStructured { key, fields } => {
                assert_eq!(key, "INFO");
                assert_eq!(fields["ID"], "NS");
                assert_eq!(fields["Description"], "\"Number of samples\"");
            }
            other => panic!("expected MetaStructured, got {:?}", other),
        }
        assert_eq!(line.to_string(), raw);
        Ok(())
    }

    #[test]
    fn parses_data_record_with_semicolon_ids() -> anyhow::Result<()> {
        let raw = "1\t1000\trs1;rs2\tA\tG,T\t50.5\tPASS\tNS=3;DP=14\tGT:DP\t0/1:10\t1/1:4";
        let line = VcfParser::parse_line(raw.as_bytes())?;
        match &line {
            VcfLine::DataRecord(record) => {
                assert_eq!(record.chrom, "1");
                assert_eq!(record.pos, 1000);
                assert_eq!(record.ids, vec!["rs1", "rs2"]);
                assert_eq!(record.reference, "A");
                assert_eq!(record.alts, vec!["G", "T"]);
                assert_eq!(record.qual, Some(50.5));
                assert_eq!(record.filters, vec!["PASS"]);
                assert_eq!(record.info["NS"], vec!["3"]);
                assert_eq!(record.info["DP"], vec!["14"]);
                assert_eq!(record.format, vec!["GT", "DP"]);
                assert_eq!(record.samples.len(), 2);
                assert_eq!(record.samples[0]["GT"], "0/1");
                assert_eq!(record.samples[1]["DP"], "4");
            }
            other => panic!("expected DataRecord, got {:?}", other),
        }
        assert_eq!(line.to_string(), raw);
        Ok(())
    }

    #[test]
    fn preserves_unparseable_qual() -> anyhow::Result<()> {
        let raw = "1\t1000\t.\tA\tG\t.\tPASS\t.";
        let line = VcfParser::parse_line(raw.as_bytes())?;
        match &line {
            VcfLine::DataRecord(record) => {
                assert_eq!(record.qual_raw, ".");
                assert_eq!(record.qual, None);
            }
            other => panic!("expected DataRecord, got {:?}", other),
        }
        assert_eq!(line.to_string(), raw);
        Ok(())
    }

    #[test]
    fn info_flag_without_value_round_trips() -> anyhow::Result<()> {
        let raw = "1\t1000\t.\tA\tG\t.\tPASS\tDB;NS=3";
        let line = VcfParser::parse_line(raw.as_bytes())?;
        match &line {
            VcfLine::DataRecord(record) => {
                assert!(record.info["DB"].is_empty());
                assert_eq!(record.info["NS"], vec!["3"]);
            }
            other => panic!("expected DataRecord, got {:?}", other),
        }
        assert_eq!(line.to_string(), raw);
        Ok(())
    }

    #[test]
    fn rejects_non_acgtn_reference_base() {
        let err = VcfParser::parse_line(b"1\t1000\t.\tX\tG\t.\tPASS\t.").unwrap_err();
        match err {
            Error::ParseError { state, .. } => assert_eq!(state, "REF"),
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_digit_position() {
        let err = VcfParser::parse_line(b"1\tabc\t.\tA\tG\t.\tPASS\t.").unwrap_err();
        match err {
            Error::ParseError { state, .. } => assert_eq!(state, "POS"),
            other => panic!("expected ParseError, got {:?}", other),
        }
    }
}
