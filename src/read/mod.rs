//! BGZF reader.

#[cfg(feature = "rayon")]
mod thread;

#[cfg(feature = "rayon")]
pub use thread::BgzfMultiThreadReader;

use crate::deflate::*;
use crate::gzi::GziIndex;
use crate::header::BgzfHeader;
use crate::offset::VirtualOffset;
use crate::Error;
use std::convert::TryInto;
use std::io::{self, prelude::*};

/// Read one BGZF block's header and compressed payload (including its trailer)
/// from `reader` into `buffer`. Useful for hand-rolled parallel readers.
pub fn load_block<R: Read>(mut reader: R, buffer: &mut Vec<u8>) -> Result<BgzfHeader, Error> {
    let header = BgzfHeader::from_reader(&mut reader)?;
    let block_size: u64 = header.block_size()?.into();
    buffer.clear();
    buffer.resize((block_size - header.header_size()).try_into().unwrap(), 0);
    reader.read_exact(buffer)?;
    Ok(header)
}

/// Decompress a single BGZF block loaded with [`load_block`], validating CRC32/ISIZE.
pub fn decompress_block(
    decompressed_data: &mut Vec<u8>,
    compressed_block: &[u8],
    decompress: &mut Decompress,
) -> Result<(), Error> {
    if compressed_block.len() < 8 {
        return Err(Error::Truncated("block shorter than its trailer"));
    }
    let original_len = decompressed_data.len();
    let mut crc = Crc::new();

    let expected_len =
        u32::from_le_bytes(compressed_block[compressed_block.len() - 4..].try_into().unwrap())
            as usize;
    decompressed_data.resize(original_len + expected_len, 0);

    decompress.decompress(compressed_block, &mut decompressed_data[original_len..])?;

    let expected_crc = u32::from_le_bytes(
        compressed_block[compressed_block.len() - 8..compressed_block.len() - 4]
            .try_into()
            .unwrap(),
    );
    crc.update(&decompressed_data[original_len..]);
    if expected_crc != crc.sum() {
        return Err(Error::BadBlock("CRC32 mismatch"));
    }

    Ok(())
}

/// A BGZF reader with virtual-offset seek support.
pub struct BgzfReader<R: Read> {
    reader: R,
    decompress: Decompress,
    compressed_buffer: Vec<u8>,
    current_buffer: Vec<u8>,
    current_block: u64,
    next_block: u64,
    current_position_in_block: usize,
    eof_pos: u64,
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Seek to a virtual offset (see [`crate::offset::VirtualOffset`]).
    pub fn bgzf_seek(&mut self, position: u64) -> Result<(), Error> {
        self.next_block = position >> 16;
        self.reader.seek(io::SeekFrom::Start(self.next_block))?;
        self.load_next()?;
        self.current_position_in_block = (position & 0xffff) as usize;
        Ok(())
    }

    /// Read the decompressed bytes in `[v_start, v_end)`. `v_end` of `u64::MAX`
    /// reads to the end of the stream.
    pub fn read_range(&mut self, v_start: u64, v_end: u64) -> Result<Vec<u8>, Error> {
        self.bgzf_seek(v_start)?;
        let mut out = Vec::new();
        loop {
            let vpos = self.bgzf_pos();
            if vpos >= v_end {
                break;
            }
            let remaining_in_block = self.current_buffer.len() - self.current_position_in_block;
            if remaining_in_block == 0 {
                if self.current_block >= self.eof_pos {
                    break;
                }
                self.load_next()?;
                continue;
            }
            let block_end_vpos = (self.current_block << 16) | self.current_buffer.len() as u64;
            let take = if block_end_vpos <= v_end {
                remaining_in_block
            } else {
                (v_end - vpos) as usize
            };
            out.extend_from_slice(
                &self.current_buffer
                    [self.current_position_in_block..self.current_position_in_block + take],
            );
            self.current_position_in_block += take;
        }
        Ok(out)
    }
}

impl<R: Read> BgzfReader<R> {
    /// Open a BGZF stream, validating that it begins with a valid BGZF header.
    pub fn new(mut reader: R) -> Result<Self, Error> {
        let mut decompress = Decompress::new();
        let mut compressed_buffer = Vec::new();
        load_block(&mut reader, &mut compressed_buffer)?;
        let mut buffer = Vec::new();
        decompress_block(&mut buffer, &compressed_buffer, &mut decompress)?;

        Ok(BgzfReader {
            reader,
            decompress,
            current_buffer: buffer,
            current_block: 0,
            next_block: compressed_buffer.len().try_into().unwrap(),
            current_position_in_block: 0,
            eof_pos: u64::MAX,
            compressed_buffer,
        })
    }

    /// Current virtual offset.
    pub fn bgzf_pos(&self) -> u64 {
        self.current_block << 16 | (self.current_position_in_block & 0xffff) as u64
    }

    pub fn virtual_pos(&self) -> VirtualOffset {
        VirtualOffset::from_raw(self.bgzf_pos())
    }

    fn load_next(&mut self) -> Result<(), Error> {
        if self.next_block >= self.eof_pos {
            return Ok(());
        }

        self.compressed_buffer.clear();
        let header = load_block(&mut self.reader, &mut self.compressed_buffer)?;
        let header_size = header.header_size();
        if self.compressed_buffer == crate::EOF_MARKER[header_size as usize..] {
            self.eof_pos = self.next_block;
            self.current_buffer.clear();
            self.current_block = self.next_block;
            self.current_position_in_block = 0;
            return Ok(());
        }

        self.current_buffer.clear();
        decompress_block(&mut self.current_buffer, &self.compressed_buffer, &mut self.decompress)?;
        self.current_block = self.next_block;
        let current_block_size: u64 = self.compressed_buffer.len().try_into().unwrap();
        self.next_block += current_block_size + header_size;
        self.current_position_in_block = 0;

        Ok(())
    }

    /// Iterate complete `\n`-terminated lines (newline stripped), joining lines
    /// that straddle a block boundary. Finite, not restartable.
    pub fn iter_lines(self) -> LineIter<R> {
        LineIter {
            reader: self,
            pending: Vec::new(),
            done: false,
        }
    }

    /// As [`Self::iter_lines`], but each line is tagged with the virtual offset
    /// range `[start, end)` it occupies (end points just past the `\n`).
    pub fn iter_lines_with_offsets(self) -> LineOffsetIter<R> {
        LineOffsetIter {
            reader: self,
            pending: Vec::new(),
            line_start: 0,
            done: false,
        }
    }
}

impl<R: Read> BufRead for BgzfReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.current_position_in_block >= self.current_buffer.len() {
            self.load_next().map_err(|e| e.into_io_error())?;
        }
        let remain = self.current_buffer.len() - self.current_position_in_block;
        if remain > 0 {
            Ok(&self.current_buffer[self.current_position_in_block..])
        } else {
            Ok(&[])
        }
    }

    fn consume(&mut self, amt: usize) {
        let remain = self.current_buffer.len() - self.current_position_in_block;
        if amt <= remain {
            self.current_position_in_block += amt;
        } else {
            unreachable!()
        }
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let internal = self.fill_buf()?;
        let n = buf.len().min(internal.len());
        buf[0..n].copy_from_slice(&internal[0..n]);
        self.consume(n);
        Ok(n)
    }
}

/// Iterator over complete lines, returned by [`BgzfReader::iter_lines`].
pub struct LineIter<R: Read> {
    reader: BgzfReader<R>,
    pending: Vec<u8>,
    done: bool,
}

impl<R: Read> Iterator for LineIter<R> {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(nl) = self.pending.iter().position(|&b| b == b'\n') {
                let line = self.pending[..nl].to_vec();
                self.pending.drain(..=nl);
                return Some(Ok(line));
            }
            let mut chunk = [0u8; 8192];
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    return Some(Ok(std::mem::take(&mut self.pending)));
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::IoError(e)));
                }
            }
        }
    }
}

/// One line with its virtual-offset span, returned by [`BgzfReader::iter_lines_with_offsets`].
pub struct LineWithOffsets {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
    pub line: Vec<u8>,
}

/// Iterator over `(virtual offset span, line)`, returned by
/// [`BgzfReader::iter_lines_with_offsets`].
pub struct LineOffsetIter<R: Read> {
    reader: BgzfReader<R>,
    pending: Vec<u8>,
    line_start: u64,
    done: bool,
}

impl<R: Read> Iterator for LineOffsetIter<R> {
    type Item = Result<LineWithOffsets, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(nl) = self.pending.iter().position(|&b| b == b'\n') {
                let line = self.pending[..nl].to_vec();
                self.pending.drain(..=nl);
                let end = self.reader.bgzf_pos()
                    - TryInto::<u64>::try_into(self.pending.len()).unwrap();
                let item = LineWithOffsets {
                    start: VirtualOffset::from_raw(self.line_start),
                    end: VirtualOffset::from_raw(end),
                    line,
                };
                self.line_start = end;
                return Some(Ok(item));
            }
            let mut chunk = [0u8; 8192];
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut self.pending);
                    let end = self.reader.bgzf_pos();
                    return Some(Ok(LineWithOffsets {
                        start: VirtualOffset::from_raw(self.line_start),
                        end: VirtualOffset::from_raw(end),
                        line,
                    }));
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::IoError(e)));
                }
            }
        }
    }
}

/// A [`BgzfReader`] that can additionally seek to an uncompressed byte
/// position using a `.gzi` sidecar index (see [`crate::gzi`]).
pub struct IndexedBgzfReader<R: Read + Seek> {
    reader: BgzfReader<R>,
    index: GziIndex,
    current_pos: u64,
    end_pos: u64,
}

impl<R: Read + Seek> IndexedBgzfReader<R> {
    pub fn new(mut reader: BgzfReader<R>, index: GziIndex) -> Result<Self, Error> {
        let last_entry = *index.entries.last().ok_or(Error::Other("empty .gzi index"))?;
        reader.bgzf_seek(last_entry.compressed_offset << 16)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        reader.bgzf_seek(0)?;

        Ok(IndexedBgzfReader {
            reader,
            index,
            current_pos: 0,
            end_pos: last_entry.uncompressed_offset + TryInto::<u64>::try_into(buf.len()).unwrap(),
        })
    }
}

impl<R: Read + Seek> Seek for IndexedBgzfReader<R> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            io::SeekFrom::Current(p) => {
                (self.current_pos as i64 + p).try_into().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
                })?
            }
            io::SeekFrom::Start(p) => p,
            io::SeekFrom::End(p) => (self.end_pos as i64 + p).try_into().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
            })?,
        };
        self.reader
            .bgzf_seek(
                self.index
                    .uncompressed_pos_to_bgzf_pos(new_pos)
                    .map_err(Into::<io::Error>::into)?,
            )
            .map_err(Into::<io::Error>::into)?;
        self.current_pos = new_pos;
        Ok(new_pos)
    }
}

impl<R: Read + Seek> BufRead for IndexedBgzfReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt);
        self.current_pos += TryInto::<u64>::try_into(amt).unwrap();
    }
}

impl<R: Read + Seek> Read for IndexedBgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.current_pos += TryInto::<u64>::try_into(n).unwrap();
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::BgzfWriter;
    use crate::Compression;
    use rand::prelude::*;

    fn make_bgzf(lines: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = BgzfWriter::new(&mut buf, Compression::default());
        for line in lines {
            writer.write_all(line.as_bytes()).unwrap();
            writer.write_all(b"\n").unwrap();
        }
        writer.close().unwrap();
        buf
    }

    #[test]
    fn reads_lines_and_seeks_by_virtual_offset() -> Result<(), Error> {
        let data = make_bgzf(&["first line", "second line", "third line"]);
        let mut reader = BgzfReader::new(io::Cursor::new(data))?;
        let mut line = String::new();
        reader.read_line(&mut line)?;
        assert_eq!(line, "first line\n");

        reader.bgzf_seek(0)?;
        assert_eq!(reader.bgzf_pos(), 0);
        Ok(())
    }

    #[test]
    fn iter_lines_with_offsets_has_increasing_starts() -> Result<(), Error> {
        let lines: Vec<String> = (0..2000).map(|i| format!("line number {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let data = make_bgzf(&refs);
        let reader = BgzfReader::new(&data[..])?;

        let mut last_start = None;
        let mut count = 0;
        for item in reader.iter_lines_with_offsets() {
            let item = item?;
            if let Some(prev) = last_start {
                assert!(item.start > prev, "offsets must strictly increase");
            }
            last_start = Some(item.start);
            count += 1;
        }
        assert_eq!(count, lines.len());
        Ok(())
    }

    #[test]
    fn read_range_matches_full_read() -> Result<(), Error> {
        let mut rand = rand_pcg::Pcg64Mcg::seed_from_u64(42);
        let lines: Vec<String> = (0..500)
            .map(|_| (0..rand.gen_range(1..50)).map(|_| 'x').collect())
            .collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let data = make_bgzf(&refs);

        let reader = BgzfReader::new(io::Cursor::new(data.clone()))?;
        let spans: Vec<_> = reader
            .iter_lines_with_offsets()
            .collect::<Result<Vec<_>, _>>()?;

        let mut reader = BgzfReader::new(io::Cursor::new(data))?;
        let chunk = reader.read_range(spans[10].start.raw(), spans[20].end.raw())?;
        let expected: Vec<u8> = spans[10..20]
            .iter()
            .flat_map(|s| {
                let mut v = s.line.clone();
                v.push(b'\n');
                v
            })
            .collect();
        assert_eq!(chunk, expected);
        Ok(())
    }
}
