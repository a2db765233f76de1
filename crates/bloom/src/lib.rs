//! # Bloom Filter
//!
//! A space-efficient probabilistic set used as the per-table key filter.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits and hash functions used.
//!
//! ## Usage in the table builder
//!
//! The builder does not keep the keys themselves around: it records one
//! 64-bit [`hash`] per logical key (version suffix stripped) while entries
//! stream in, and builds the filter from those hashes with
//! [`BloomFilter::from_hashes`] when the table is sealed. Readers hash the
//! probe key the same way and call [`BloomFilter::may_contain_hash`].
//!
//! ## Example
//!
//! ```rust
//! use bloom::{hash, BloomFilter};
//!
//! let hashes = [hash(b"hello"), hash(b"world")];
//! let bf = BloomFilter::from_hashes(&hashes, 0.01);
//! assert!(bf.may_contain(b"hello"));
//! ```
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Safety cap on a deserialized filter (128 MiB).
const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;

/// A bloom filter backed by a bit vector with `k` probe positions per key.
///
/// Uses double hashing: `h(i) = h1 + i * h2`, where `h1` and `h2` are the two
/// 32-bit halves of the key's mixed 64-bit [`hash`].
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// The bit vector storing the filter state.
    bits: Vec<u8>,
    /// Number of bits in the filter.
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a new bloom filter sized for `expected_items` with the given
    /// target `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        // Optimal number of bits: m = -n * ln(p) / (ln(2)^2)
        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as u64;
        let m = m.max(8);

        // Optimal number of hashes: k = (m/n) * ln(2)
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.clamp(1, 30);

        let byte_len = m.div_ceil(8) as usize;

        Self {
            bits: vec![0u8; byte_len],
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Builds a filter holding every hash in `hashes`.
    ///
    /// # Panics
    ///
    /// Panics if `hashes` is empty or `false_positive_rate` is not in `(0, 1)`.
    pub fn from_hashes(hashes: &[u64], false_positive_rate: f64) -> Self {
        let mut bf = Self::new(hashes.len(), false_positive_rate);
        for &h in hashes {
            bf.insert_hash(h);
        }
        bf
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        self.insert_hash(hash(key));
    }

    /// Inserts a precomputed [`hash`].
    pub fn insert_hash(&mut self, h: u64) {
        let (h1, h2) = split(h);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.may_contain_hash(hash(key))
    }

    /// Same as [`may_contain`](Self::may_contain) for a precomputed hash.
    #[must_use]
    pub fn may_contain_hash(&self, h: u64) -> bool {
        let (h1, h2) = split(h);
        (0..self.num_hashes).all(|i| self.get_bit(self.get_bit_index(h1, h2, i)))
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Returns the size of the serialized bloom filter in bytes.
    ///
    /// Layout: `num_bits(u64) + num_hashes(u32) + bits_len(u32) + bits`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 4 + 4 + self.bits.len()
    }

    /// Serializes the bloom filter to a writer.
    ///
    /// Wire format (all big-endian, like the rest of the table image):
    /// ```text
    /// [num_bits: u64][num_hashes: u32][bits_len: u32][bits: bytes]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<BigEndian>(self.num_bits)?;
        w.write_u32::<BigEndian>(self.num_hashes)?;
        w.write_u32::<BigEndian>(self.bits.len() as u32)?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Serializes into a fresh byte vector.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Deserializes a bloom filter from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<BigEndian>()?;
        let num_hashes = r.read_u32::<BigEndian>()?;
        let bits_len = r.read_u32::<BigEndian>()? as usize;

        if bits_len > MAX_BLOOM_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} bytes", bits_len),
            ));
        }
        if num_bits == 0 || num_bits > (bits_len as u64) * 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "bloom filter claims {} bits but carries {} bytes",
                    num_bits, bits_len
                ),
            ));
        }

        let mut bits = vec![0u8; bits_len];
        r.read_exact(&mut bits)?;

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    /// Deserializes from a byte slice produced by [`encode`](Self::encode).
    pub fn decode(mut buf: &[u8]) -> io::Result<Self> {
        Self::read_from(&mut buf)
    }

    // ---- Internal helpers ----

    /// Double hashing: h(i) = (h1 + i * h2) mod num_bits.
    fn get_bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        self.bits[byte_idx] |= 1 << bit_offset;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        (self.bits[byte_idx] >> bit_offset) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// Hashes a key for filter insertion and probing.
///
/// FNV-1a over the bytes, followed by a 64-bit avalanche finalizer so both
/// 32-bit halves are usable as independent probes.
#[must_use]
pub fn hash(key: &[u8]) -> u64 {
    fmix64(fnv1a_64(key, 0xcbf29ce484222325))
}

fn split(h: u64) -> (u64, u64) {
    (h & 0xffff_ffff, (h >> 32) | 1)
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}
