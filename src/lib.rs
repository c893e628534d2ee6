//! vcf-tabix
//! =========
//!
//! Random-access reading, indexing, and streaming parsing of genomic variant
//! data stored in BGZF files indexed by Tabix.
//!
//! Four subsystems make up the core:
//!
//! * [`read`] / [`write`] / [`header`] / [`deflate`] — the BGZF block codec and
//!   seekable reader/writer.
//! * [`bins`] and [`tabix`] — the UCSC binning scheme, the on-disk Tabix index
//!   format, and the index builder.
//! * [`vcf`] — a character-driven state machine that parses VCF lines into
//!   structured [`vcf::VcfLine`] values.
//! * [`indexed`] — the glue that turns `(sequence, begin, end)` into decompressed
//!   record bytes.
//!
//! Feature flags
//! -------------
//!
//! * `rayon`: multi-threaded reader/writer and the [`parallel`] bulk-lookup
//!   coordinator. Default feature.
//! * `log`: log non-fatal, informational conditions via the [log] crate. Default feature.
//! * `rust_backend`: use `miniz_oxide` as the [flate2] backend. Default feature.
//! * `zlib`, `zlib-ng`, `zlib-ng-compat`, `cloudflare_zlib`: alternative [flate2] backends.
//! * `libdeflater`: use [libdeflater] instead of [flate2].
//!
//! [flate2]: https://github.com/rust-lang/flate2-rs
//! [libdeflater]: https://github.com/adamkewley/libdeflater
//! [log]: https://github.com/rust-lang/log

mod error;

pub(crate) mod bins;
pub(crate) mod deflate;
pub mod gzi;
/// BGZF gzip block header parser.
pub mod header;
pub mod indexed;
pub mod offset;
pub mod read;
pub mod rsid;
pub mod tabix;
pub mod vcf;
pub mod write;

#[cfg(feature = "rayon")]
pub mod parallel;

pub use deflate::Compression;
pub use error::Error;
pub use indexed::TabixIndexedFile;
pub use offset::VirtualOffset;
pub use read::BgzfReader;
pub use write::BgzfWriter;

use std::io;

/// End-of-file marker: a valid, empty BGZF block.
///
/// This marker terminates every well-formed BGZF file.
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

pub(crate) trait BinaryReader: io::Read {
    fn read_le_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(u8::from_le_bytes(buf))
    }
    fn read_le_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }
    fn read_le_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
    fn read_le_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }
    fn read_le_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
    fn read_until(&mut self, byte: u8, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut tmp = [0u8];
        let mut total_bytes = 0usize;
        loop {
            let l = self.read(&mut tmp)?;
            if l == 0 {
                break;
            }
            buf.extend_from_slice(&tmp);
            total_bytes += 1;
            if tmp[0] == byte {
                break;
            }
        }
        Ok(total_bytes)
    }
}

impl<R: io::Read> BinaryReader for R {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::deflate::Compression;
    use std::io::{BufRead, Write};

    #[test]
    fn write_then_read_round_trips() -> Result<(), Error> {
        let mut buf = Vec::new();
        let mut writer = BgzfWriter::new(&mut buf, Compression::default());
        writer.write_all(b"##fileformat=VCFv4.2\n")?;
        writer.write_all(b"#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n")?;
        writer.close()?;

        let mut reader = BgzfReader::new(&buf[..])?;
        let mut line = String::new();
        reader.read_line(&mut line)?;
        assert_eq!(line, "##fileformat=VCFv4.2\n");
        Ok(())
    }
}
