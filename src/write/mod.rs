//! BGZF writer.

#[cfg(feature = "rayon")]
mod thread;

#[cfg(feature = "rayon")]
pub use thread::BgzfMultiThreadWriter;

use crate::gzi::{GziIndex, GziIndexEntry};
use crate::header::BgzfHeader;
use crate::{deflate::*, Error};
use std::convert::TryInto;
use std::io::{self, Write};

/// A BGZF writer.
pub struct BgzfWriter<W: io::Write> {
    writer: W,
    original_data: Vec<u8>,
    compressed_buffer: Vec<u8>,
    compress: Compress,
    compress_unit_size: usize,
    closed: bool,
    current_compressed_pos: u64,
    current_uncompressed_pos: u64,
    gzi_index: Option<GziIndex>,
}

/// Default BGZF compress unit size.
pub const DEFAULT_COMPRESS_UNIT_SIZE: usize = 65280;

/// Maximum BGZF compress unit size: a block's decompressed payload must fit in 64 KiB.
pub const MAXIMUM_COMPRESS_UNIT_SIZE: usize = 64 * 1024;

pub(crate) const EXTRA_COMPRESS_BUFFER_SIZE: usize = 200;

impl<W: io::Write> BgzfWriter<W> {
    /// Create a new BGZF writer.
    pub fn new(writer: W, level: Compression) -> Self {
        Self::with_compress_unit_size(writer, level, DEFAULT_COMPRESS_UNIT_SIZE, true)
            .expect("DEFAULT_COMPRESS_UNIT_SIZE is always valid")
    }

    /// Create a new BGZF writer with an explicit block (decompressed) size.
    ///
    /// `create_index` controls whether a `.gzi` sidecar index is accumulated
    /// and returned from [`Self::close`].
    pub fn with_compress_unit_size(
        writer: W,
        level: Compression,
        compress_unit_size: usize,
        create_index: bool,
    ) -> Result<Self, Error> {
        if compress_unit_size >= MAXIMUM_COMPRESS_UNIT_SIZE {
            return Err(Error::TooLargeCompressUnit);
        }

        Ok(BgzfWriter {
            writer,
            original_data: Vec::with_capacity(compress_unit_size),
            compressed_buffer: Vec::with_capacity(compress_unit_size + EXTRA_COMPRESS_BUFFER_SIZE),
            compress_unit_size,
            compress: Compress::new(level),
            closed: false,
            current_uncompressed_pos: 0,
            current_compressed_pos: 0,
            gzi_index: if create_index {
                Some(GziIndex::new())
            } else {
                None
            },
        })
    }

    /// Current BGZF virtual offset.
    pub fn bgzf_pos(&self) -> u64 {
        self.current_compressed_pos << 16 | (self.original_data.len() & 0xffff) as u64
    }

    /// Current uncompressed write position.
    pub fn pos(&self) -> u64 {
        self.current_uncompressed_pos + TryInto::<u64>::try_into(self.original_data.len()).unwrap()
    }

    fn write_block(&mut self) -> io::Result<()> {
        self.compressed_buffer.clear();
        write_block(
            &mut self.compressed_buffer,
            &self.original_data,
            &mut self.compress,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.writer.write_all(&self.compressed_buffer)?;

        self.current_uncompressed_pos +=
            TryInto::<u64>::try_into(self.original_data.len()).unwrap();
        self.current_compressed_pos +=
            TryInto::<u64>::try_into(self.compressed_buffer.len()).unwrap();

        if let Some(index) = self.gzi_index.as_mut() {
            index.entries.push(GziIndexEntry {
                compressed_offset: self.current_compressed_pos,
                uncompressed_offset: self.current_uncompressed_pos,
            });
        }

        Ok(())
    }

    /// Flush, write the EOF marker, and return the accumulated `.gzi` index
    /// (if one was requested at construction).
    ///
    /// [`Drop`] does this too, but swallows I/O errors; call this explicitly
    /// to observe them, or to retrieve the index.
    pub fn close(mut self) -> io::Result<Option<GziIndex>> {
        if !self.closed {
            self.flush()?;
            self.writer.write_all(&crate::EOF_MARKER)?;
            self.closed = true;
        }

        if let Some(index) = self.gzi_index.as_mut() {
            index.entries.pop();
        }

        Ok(self.gzi_index.take())
    }
}

impl<W: io::Write> io::Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut process_start_pos = 0;
        loop {
            let to_write_bytes = (buf.len() - process_start_pos)
                .min(self.compress_unit_size - self.original_data.len());
            if to_write_bytes == 0 {
                break;
            }
            self.original_data
                .extend_from_slice(&buf[process_start_pos..(process_start_pos + to_write_bytes)]);
            if self.original_data.len() >= self.compress_unit_size {
                self.write_block()?;
                self.original_data.clear();
            }
            process_start_pos += to_write_bytes;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.original_data.is_empty() {
            self.write_block()?;
        }
        Ok(())
    }
}

impl<W: io::Write> Drop for BgzfWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.flush();
            let _ = self.writer.write_all(&crate::EOF_MARKER);
            self.closed = true;
        }
    }
}

const FOOTER_SIZE: usize = 8;

/// Write a single BGZF block to `compressed_data`. Exposed for hand-rolled
/// parallel writers.
pub fn write_block(
    compressed_data: &mut Vec<u8>,
    original_data: &[u8],
    compress: &mut Compress,
) -> Result<usize, CompressError> {
    let original_compressed_data_size = compressed_data.len();
    let mut header = BgzfHeader::new(false, 0, 0);
    let header_size: usize = header.header_size().try_into().unwrap();
    compressed_data.resize(
        original_compressed_data_size
            + original_data.len()
            + EXTRA_COMPRESS_BUFFER_SIZE
            + header_size
            + FOOTER_SIZE,
        0,
    );

    let compressed_len = compress.compress(
        original_data,
        &mut compressed_data[(original_compressed_data_size + header_size)..],
    )?;
    compressed_data.truncate(original_compressed_data_size + header_size + compressed_len);

    let mut crc = Crc::new();
    crc.update(original_data);

    compressed_data.extend_from_slice(&crc.sum().to_le_bytes());
    compressed_data.extend_from_slice(&(original_data.len() as u32).to_le_bytes());

    let block_size = compressed_data.len() - original_compressed_data_size;
    header
        .update_block_size(block_size.try_into().unwrap())
        .expect("just-built header always has a BC subfield");

    header
        .write(
            &mut compressed_data
                [original_compressed_data_size..(header_size + original_compressed_data_size)],
        )
        .expect("compressed_data was sized to hold header_size bytes");

    Ok(block_size)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::read::BgzfReader;
    use rand::prelude::*;
    use std::io::{BufRead, Read};

    #[test]
    fn round_trips_through_flate2() -> anyhow::Result<()> {
        let mut rand = rand_pcg::Pcg64Mcg::seed_from_u64(1);
        let mut original: Vec<u8> = vec![0; 200_000];
        rand.fill_bytes(&mut original);

        let mut buf = Vec::new();
        let mut writer = BgzfWriter::new(&mut buf, Compression::default());
        writer.write_all(&original)?;
        writer.close()?;

        let mut decoder = flate2::read::MultiGzDecoder::new(&buf[..]);
        let mut roundtripped = Vec::new();
        decoder.read_to_end(&mut roundtripped)?;
        assert_eq!(roundtripped, original);
        Ok(())
    }

    #[test]
    fn gzi_index_and_virtual_offsets_agree_across_blocks() -> anyhow::Result<()> {
        let mut rand = rand_pcg::Pcg64Mcg::seed_from_u64(2);
        let mut buf = Vec::new();
        let mut writer = BgzfWriter::with_compress_unit_size(
            &mut buf,
            Compression::fast(),
            2000,
            true,
        )?;

        let mut lines = Vec::new();
        let mut positions = Vec::new();
        for _ in 0..500 {
            let len = rand.gen_range(5..80);
            let line: String = (0..len).map(|_| 'a').collect();
            positions.push(writer.bgzf_pos());
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            lines.push(line);
        }
        let index = writer.close()?.expect("index requested");
        assert!(index.entries().len() > 1, "multiple blocks expected");

        let mut reader = BgzfReader::new(io::Cursor::new(&buf[..]))?;
        let mut rand = rand_pcg::Pcg64Mcg::seed_from_u64(3);
        for _ in 0..100 {
            let i = rand.gen_range(0..lines.len());
            reader.bgzf_seek(positions[i])?;
            let mut got = String::new();
            reader.read_line(&mut got)?;
            assert_eq!(got, format!("{}\n", lines[i]));
        }
        Ok(())
    }
}
