//! wav.rs
//! Streaming 16-bit PCM RIFF/WAVE writer.
//!
//! The header goes out first with zero sizes; `finalize` seeks back and patches them.
//! A file abandoned before `finalize` still has valid sample data after byte 44.

use std::io::{self, Seek, SeekFrom, Write};

const HEADER_LEN: u32 = 44;
const BITS_PER_SAMPLE: u16 = 16;

pub struct WavWriter<W: Write + Seek> {
    inner: W,
    data_len: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(mut inner: W, channels: u16, sample_rate: u32) -> io::Result<Self> {
        let block_align = channels * (BITS_PER_SAMPLE / 8);
        let byte_rate = sample_rate * u32::from(block_align);

        inner.write_all(b"RIFF")?;
        inner.write_all(&0u32.to_le_bytes())?;
        inner.write_all(b"WAVE")?;
        inner.write_all(b"fmt ")?;
        inner.write_all(&16u32.to_le_bytes())?;
        inner.write_all(&1u16.to_le_bytes())?; // PCM
        inner.write_all(&channels.to_le_bytes())?;
        inner.write_all(&sample_rate.to_le_bytes())?;
        inner.write_all(&byte_rate.to_le_bytes())?;
        inner.write_all(&block_align.to_le_bytes())?;
        inner.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;
        inner.write_all(b"data")?;
        inner.write_all(&0u32.to_le_bytes())?;

        Ok(Self { inner, data_len: 0 })
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> io::Result<()> {
        let bytes = (samples.len() * 2) as u32;
        if self.data_len.checked_add(bytes + HEADER_LEN).is_none() {
            return Err(io::Error::other("WAV data exceeds 4 GiB"));
        }
        let mut buf = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        self.inner.write_all(&buf)?;
        self.data_len += bytes;
        Ok(())
    }

    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    /// Patches the RIFF and data chunk sizes and hands back the sink.
    pub fn finalize(mut self) -> io::Result<W> {
        self.inner.seek(SeekFrom::Start(4))?;
        self.inner.write_all(&(self.data_len + HEADER_LEN - 8).to_le_bytes())?;
        self.inner.seek(SeekFrom::Start(40))?;
        self.inner.write_all(&self.data_len.to_le_bytes())?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u32_at(b: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(b[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn header_sizes_patched_on_finalize() {
        let mut w = WavWriter::new(Cursor::new(Vec::new()), 1, 44_100).unwrap();
        w.write_samples(&[0, 1, -1, i16::MAX]).unwrap();
        w.write_samples(&[i16::MIN]).unwrap();
        let bytes = w.finalize().unwrap().into_inner();

        assert_eq!(bytes.len(), 44 + 10);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), 36 + 10);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(&bytes, 24), 44_100);
        assert_eq!(u32_at(&bytes, 28), 88_200);
        assert_eq!(u32_at(&bytes, 40), 10);
        assert_eq!(&bytes[44..46], &0i16.to_le_bytes());
        assert_eq!(&bytes[46..48], &1i16.to_le_bytes());
        assert_eq!(&bytes[52..54], &i16::MIN.to_le_bytes());
    }
}
