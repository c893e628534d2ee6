use crate::deflate::*;
use crate::Error;
use std::collections::HashMap;
use std::io::{Result, Write};
use std::sync::mpsc::{channel, Receiver, Sender};

const DEFAULT_WRITE_BLOCK_UNIT_NUM: usize = 50;

struct WriteBlock {
    index: u64,
    compress: Compress,
    compressed_buffer: Vec<u8>,
    raw_buffer: Vec<u8>,
}

impl WriteBlock {
    fn new(level: Compression, compress_unit_size: usize, write_block_num: usize) -> Self {
        let compress = Compress::new(level);

        WriteBlock {
            index: 0,
            compress,
            compressed_buffer: Vec::with_capacity(
                (compress_unit_size + crate::write::EXTRA_COMPRESS_BUFFER_SIZE) * write_block_num,
            ),
            raw_buffer: Vec::with_capacity(compress_unit_size * write_block_num),
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.compressed_buffer.clear();
        self.raw_buffer.clear();
    }
}

/// A multi-threaded BGZF writer.
pub struct BgzfMultiThreadWriter<W: Write> {
    writer: W,
    compress_unit_size: usize,
    write_block_num: usize,
    block_list: Vec<WriteBlock>,
    write_waiting_blocks: HashMap<u64, WriteBlock>,
    writer_receiver: Receiver<WriteBlock>,
    writer_sender: Sender<WriteBlock>,
    next_write_index: u64,
    next_compress_index: u64,
}

impl<W: Write> BgzfMultiThreadWriter<W> {
    pub fn new(writer: W, level: Compression) -> Result<Self> {
        Self::with_compress_unit_size(
            writer,
            crate::write::DEFAULT_COMPRESS_UNIT_SIZE,
            DEFAULT_WRITE_BLOCK_UNIT_NUM,
            level,
        )
    }

    pub fn with_compress_unit_size(
        writer: W,
        compress_unit_size: usize,
        write_block_num: usize,
        level: Compression,
    ) -> Result<Self> {
        if compress_unit_size >= crate::write::MAXIMUM_COMPRESS_UNIT_SIZE {
            return Err(Error::TooLargeCompressUnit.into());
        }

        let (tx, rx) = channel();

        Ok(BgzfMultiThreadWriter {
            writer,
            compress_unit_size,
            write_block_num,
            block_list: (0..(rayon::current_num_threads() * 2))
                .map(|_| WriteBlock::new(level, compress_unit_size, write_block_num))
                .collect(),
            write_waiting_blocks: HashMap::new(),
            writer_receiver: rx,
            writer_sender: tx,
            next_write_index: 0,
            next_compress_index: 0,
        })
    }

    fn process_buffer(&mut self, block: bool, block_all: bool) -> Result<()> {
        let mut current_block = block;
        while self.next_compress_index != self.next_write_index {
            let mut next_data = if current_block {
                self.writer_receiver
                    .recv()
                    .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "closed channel"))?
            } else {
                match self.writer_receiver.try_recv() {
                    Ok(d) => d,
                    Err(std::sync::mpsc::TryRecvError::Empty) => return Ok(()),
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "closed channel",
                        ))
                    }
                }
            };
            if next_data.index == self.next_write_index {
                self.writer.write_all(&next_data.compressed_buffer)?;
                self.next_write_index += 1;
                next_data.reset();
                self.block_list.push(next_data);

                while self
                    .write_waiting_blocks
                    .contains_key(&self.next_write_index)
                {
                    let mut next_data = self
                        .write_waiting_blocks
                        .remove(&self.next_write_index)
                        .unwrap();
                    self.writer.write_all(&next_data.compressed_buffer)?;
                    self.next_write_index += 1;
                    next_data.reset();
                    self.block_list.push(next_data);
                }
                current_block = block_all;
            } else {
                self.write_waiting_blocks.insert(next_data.index, next_data);
            }
        }

        Ok(())
    }

    fn write_current_block(&mut self) {
        let mut block = self.block_list.remove(0);
        block.index = self.next_compress_index;
        self.next_compress_index += 1;
        let sender = self.writer_sender.clone();
        let compress_unit_size = self.compress_unit_size;
        rayon::spawn_fifo(move || {
            block.compressed_buffer.clear();
            let mut wrote_bytes = 0;

            while wrote_bytes < block.raw_buffer.len() {
                let bytes_to_write = (block.raw_buffer.len() - wrote_bytes).min(compress_unit_size);
                crate::write::write_block(
                    &mut block.compressed_buffer,
                    &block.raw_buffer[wrote_bytes..(wrote_bytes + bytes_to_write)],
                    &mut block.compress,
                )
                .expect("failed to write block");
                wrote_bytes += bytes_to_write;
            }

            sender.send(block).expect("failed to send write result");
        });
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.writer.write_all(&crate::EOF_MARKER)?;
        Ok(())
    }
}

impl<W: Write> Write for BgzfMultiThreadWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut wrote_bytes = 0;
        while wrote_bytes < buf.len() {
            self.process_buffer(self.block_list.is_empty(), false)?;
            let current_buffer = self.block_list.get_mut(0).unwrap();
            let remain_buffer =
                (self.compress_unit_size * self.write_block_num) - current_buffer.raw_buffer.len();
            let bytes_to_write = remain_buffer.min(buf.len() - wrote_bytes);
            current_buffer
                .raw_buffer
                .extend_from_slice(&buf[wrote_bytes..(wrote_bytes + bytes_to_write)]);
            if bytes_to_write == remain_buffer {
                self.write_current_block();
            }
            wrote_bytes += bytes_to_write;
        }

        Ok(wrote_bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.process_buffer(self.block_list.is_empty(), false)?;
        if !self.block_list[0].raw_buffer.is_empty() {
            self.write_current_block();
        }
        self.process_buffer(true, true)?;
        Ok(())
    }
}

impl<W: Write> Drop for BgzfMultiThreadWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
        let _ = self.writer.write_all(&crate::EOF_MARKER);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;
    use std::io::Read;

    const WRITE_UNIT: usize = 2000;
    const BUF_SIZE: usize = 1_000_000;

    #[test]
    fn round_trips_through_flate2() -> anyhow::Result<()> {
        let mut rand = rand_pcg::Pcg64Mcg::seed_from_u64(0x9387_4024_5615_7523);
        let mut buf = Vec::new();
        let mut writer = BgzfMultiThreadWriter::with_compress_unit_size(
            &mut buf,
            1024,
            30,
            Compression::best(),
        )?;

        let mut data = vec![0u8; BUF_SIZE];
        rand.fill_bytes(&mut data);

        let mut wrote_bytes = 0;
        loop {
            let to_write_bytes = WRITE_UNIT.min(data.len() - wrote_bytes);
            if to_write_bytes == 0 {
                break;
            }
            wrote_bytes += writer.write(&data[wrote_bytes..(wrote_bytes + to_write_bytes)])?;
        }
        writer.close()?;

        let mut reader = flate2::read::MultiGzDecoder::new(&buf[..]);
        let mut read_data = Vec::new();
        reader.read_to_end(&mut read_data)?;
        assert_eq!(read_data, data);

        Ok(())
    }
}
