use crc::{Crc, Digest, CRC_32_ISCSI};
use std::io::{self, Read};

/// CRC32 Castagnoli, shared by the record codec and the reader.
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A `Read` adaptor that checksums and counts everything read through it.
pub struct HashReader<R: Read> {
    inner: R,
    digest: Digest<'static, u32>,
    bytes_read: usize,
}

impl<R: Read> HashReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            digest: CRC32.digest(),
            bytes_read: 0,
        }
    }

    /// CRC32C of the bytes read since construction or the previous call.
    /// The digest restarts; the byte count does not.
    pub fn sum32(&mut self) -> u32 {
        std::mem::replace(&mut self.digest, CRC32.digest()).finalize()
    }

    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// The wrapped reader. Bytes read from it directly are neither hashed nor
    /// counted.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        self.bytes_read += n;
        Ok(n)
    }
}
