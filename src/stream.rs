//! Bit-level temporary file streams.
//!
//! The behaviour-labelling pass spills one record per (node, path) pair:
//! a 64-bit node index, a gamma-coded path length, then the path bits packed
//! most-significant-bit-first into words. The associated behaviour values are
//! tiny (one or two bits each) and stay in memory; only the keys are spilled,
//! which bounds construction memory for large inputs.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::bits::BitVector;
use crate::hash::jenkins_triple;

/// Serial bit writer, most significant bit first.
pub(crate) struct BitWriter<W: Write> {
    inner: W,
    buf: u64,
    filled: u32,
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: 0,
            filled: 0,
        }
    }

    /// Write the `width` low bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, width: u32) -> io::Result<()> {
        debug_assert!(width <= 64);
        debug_assert!(width == 64 || value < (1u64 << width));
        let mut left = width;
        while left > 0 {
            let take = (64 - self.filled).min(left);
            let chunk = if take == 64 {
                value
            } else {
                (value >> (left - take)) & ((1u64 << take) - 1)
            };
            self.buf |= chunk << (64 - self.filled - take);
            self.filled += take;
            left -= take;
            if self.filled == 64 {
                self.inner.write_all(&self.buf.to_be_bytes())?;
                self.buf = 0;
                self.filled = 0;
            }
        }
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> io::Result<()> {
        self.write_bits(value, 64)
    }

    /// Gamma-code a non-negative value (the code proper covers `value + 1`).
    pub fn write_gamma(&mut self, value: u64) -> io::Result<()> {
        let g = value + 1;
        let bits = 64 - g.leading_zeros();
        self.write_bits(0, bits - 1)?;
        self.write_bits(g, bits)
    }

    /// Flush the partial word, padding with zeros to a byte boundary.
    pub fn finish(mut self) -> io::Result<W> {
        if self.filled > 0 {
            let bytes = ((self.filled + 7) / 8) as usize;
            self.inner.write_all(&self.buf.to_be_bytes()[..bytes])?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Serial bit reader matching `BitWriter`'s output.
pub(crate) struct BitReader<R: Read> {
    inner: R,
    buf: u64,
    avail: u32,
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: 0,
            avail: 0,
        }
    }

    pub fn read_bits(&mut self, width: u32) -> io::Result<u64> {
        debug_assert!(width <= 64);
        let mut result = 0u64;
        let mut left = width;
        while left > 0 {
            if self.avail == 0 {
                let mut bytes = [0u8; 8];
                let mut n = 0;
                while n < 8 {
                    let read = self.inner.read(&mut bytes[n..])?;
                    if read == 0 {
                        break;
                    }
                    n += read;
                }
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "key stream truncated",
                    ));
                }
                self.buf = u64::from_be_bytes(bytes);
                self.avail = n as u32 * 8;
            }
            let take = self.avail.min(left);
            let chunk = self.buf >> (64 - take);
            result = if take == 64 {
                chunk
            } else {
                (result << take) | chunk
            };
            self.buf = if take == 64 { 0 } else { self.buf << take };
            self.avail -= take;
            left -= take;
        }
        Ok(result)
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        self.read_bits(64)
    }

    pub fn read_gamma(&mut self) -> io::Result<u64> {
        let mut zeros = 0;
        while self.read_bits(1)? == 0 {
            zeros += 1;
        }
        let rest = self.read_bits(zeros)?;
        Ok(((1u64 << zeros) | rest) - 1)
    }
}

/// Writer side of a spilled key stream.
pub(crate) struct KeyStreamWriter {
    writer: BitWriter<BufWriter<File>>,
    values: Vec<u8>,
}

impl KeyStreamWriter {
    /// Open a fresh anonymous temp file, in `temp_dir` if given.
    pub fn create(temp_dir: Option<&Path>) -> io::Result<Self> {
        let file = match temp_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Self {
            writer: BitWriter::new(BufWriter::new(file)),
            values: Vec::new(),
        })
    }

    /// Append one (node index, path) record with its behaviour value.
    pub fn push(&mut self, node_index: u64, path: &BitVector, value: u8) -> io::Result<()> {
        self.writer.write_u64(node_index)?;
        self.writer.write_gamma(path.len() as u64)?;
        let mut i = 0;
        while i < path.len() {
            let width = 64.min(path.len() - i) as u32;
            self.writer.write_bits(path.get_bits(i, width), width)?;
            i += width as usize;
        }
        self.values.push(value);
        Ok(())
    }

    /// Seal the stream for reading.
    pub fn finish(self) -> io::Result<KeyStream> {
        let file = self
            .writer
            .finish()?
            .into_inner()
            .map_err(|e| e.into_error())?;
        Ok(KeyStream {
            file,
            values: self.values,
        })
    }
}

/// A sealed key stream: replayable as (signature, value) pairs.
///
/// The backing file is anonymous, so it is reclaimed by the OS when the
/// stream is dropped, on success and error paths alike.
pub(crate) struct KeyStream {
    file: File,
    values: Vec<u8>,
}

impl KeyStream {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Rewind and hash every record key with `seed`.
    pub fn signatures(&mut self, seed: u64) -> io::Result<Vec<([u64; 3], u64)>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BitReader::new(BufReader::new(&self.file));
        let mut sigs = Vec::with_capacity(self.values.len());
        for &value in &self.values {
            let index = reader.read_u64()?;
            let path_len = reader.read_gamma()? as usize;
            let mut key = BitVector::with_capacity(64 + path_len);
            key.push_word(index, 64);
            let mut i = 0;
            while i < path_len {
                let width = 64.min(path_len - i) as u32;
                key.push_word(reader.read_bits(width)?, width);
                i += width as usize;
            }
            sigs.push((jenkins_triple(&key, seed), value as u64));
        }
        Ok(sigs)
    }
}
