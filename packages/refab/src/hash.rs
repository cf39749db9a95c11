//! Hashing operations and types.
//!
//! The pipeline needs several digests over the same byte stream (raw and
//! stabilized artifact bytes each get hashed under every configured
//! algorithm in one pass). [`MultiHash`] multiplexes a write across an
//! ordered set of hashers; externally each digest is exposed individually
//! in a NIST-name-keyed [`DigestSet`].

use std::collections::BTreeMap;

use digest::DynDigest;

/// NIST-named digests, hex encoded, keyed by algorithm name.
///
/// This is the wire form used by in-toto `DigestSet` fields.
pub type DigestSet = BTreeMap<String, String>;

/// Digest algorithms supported by the pipeline.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Stable numeric id, embedded in the concatenated sum.
    pub fn id(&self) -> u64 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
            Self::Sha512 => 3,
        }
    }

    /// The NIST name for this algorithm.
    pub fn nist_name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Internal block size in bytes.
    pub fn block_size(&self) -> usize {
        match self {
            Self::Sha1 | Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    fn new_hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
            Self::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }
}

/// Computes several cryptographic digests over one byte stream in a single
/// pass.
///
/// Writes fan out to every registered hasher. [`MultiHash::sum`]
/// concatenates `be_u64(algorithm id) || digest` in registration order;
/// that concatenation is only used for internal equality. External
/// consumers read [`MultiHash::digest_set`] instead.
pub struct MultiHash {
    hashers: Vec<(Algorithm, Box<dyn DynDigest + Send>)>,
}

impl std::fmt::Debug for MultiHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algorithms: Vec<_> = self.hashers.iter().map(|(a, _)| a).collect();
        f.debug_struct("MultiHash")
            .field("algorithms", &algorithms)
            .finish()
    }
}

impl MultiHash {
    /// Create a multiplexer over the given algorithms, in order.
    pub fn new(algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        Self {
            hashers: algorithms
                .into_iter()
                .map(|algorithm| (algorithm, algorithm.new_hasher()))
                .collect(),
        }
    }

    /// The algorithm set used for artifact summaries.
    pub fn standard() -> Self {
        Self::new([Algorithm::Sha256])
    }

    /// Feed bytes to every hasher.
    pub fn write(&mut self, bytes: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(bytes);
        }
    }

    /// The concatenated tagged sum over all hashers, in registration order.
    pub fn sum(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (algorithm, hasher) in &self.hashers {
            out.extend_from_slice(&algorithm.id().to_be_bytes());
            out.extend_from_slice(&hasher.box_clone().finalize());
        }
        out
    }

    /// Each digest hex-encoded under its NIST name.
    pub fn digest_set(&self) -> DigestSet {
        self.hashers
            .iter()
            .map(|(algorithm, hasher)| {
                let digest = hasher.box_clone().finalize();
                (algorithm.nist_name().to_string(), hex::encode(digest))
            })
            .collect()
    }

    /// Reset every hasher to its initial state.
    pub fn reset(&mut self) {
        for (_, hasher) in &mut self.hashers {
            hasher.reset();
        }
    }

    /// The minimum block size across registered hashers.
    pub fn block_size(&self) -> usize {
        self.hashers
            .iter()
            .map(|(algorithm, _)| algorithm.block_size())
            .min()
            .unwrap_or(64)
    }
}

impl std::io::Write for MultiHash {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        MultiHash::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn digest_set_known_vectors() {
        let mut hash = MultiHash::new([Algorithm::Sha1, Algorithm::Sha256]);
        hash.write(b"abc");
        let digests = hash.digest_set();
        pretty_assert_eq!(
            digests.get("sha1").map(String::as_str),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        pretty_assert_eq!(
            digests.get("sha256").map(String::as_str),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn sum_is_tagged_and_ordered() {
        let mut hash = MultiHash::new([Algorithm::Sha256, Algorithm::Sha1]);
        hash.write(b"abc");
        let sum = hash.sum();
        // be_u64(2) || sha256 (32 bytes) || be_u64(1) || sha1 (20 bytes)
        pretty_assert_eq!(sum.len(), 8 + 32 + 8 + 20);
        pretty_assert_eq!(&sum[..8], &2u64.to_be_bytes());
        pretty_assert_eq!(&sum[40..48], &1u64.to_be_bytes());
    }

    #[test]
    fn sum_does_not_consume_state() {
        let mut hash = MultiHash::standard();
        hash.write(b"hello");
        let first = hash.sum();
        let second = hash.sum();
        pretty_assert_eq!(first, second);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut hash = MultiHash::standard();
        let initial = hash.sum();
        hash.write(b"some bytes");
        assert_ne!(hash.sum(), initial);
        hash.reset();
        pretty_assert_eq!(hash.sum(), initial);
    }

    #[test]
    fn block_size_is_minimum() {
        let hash = MultiHash::new([Algorithm::Sha512, Algorithm::Sha256]);
        pretty_assert_eq!(hash.block_size(), 64);
    }

    proptest! {
        #[test]
        fn incremental_writes_equal_single_write(a: Vec<u8>, b: Vec<u8>) {
            let mut split = MultiHash::new([Algorithm::Sha1, Algorithm::Sha256]);
            split.write(&a);
            split.write(&b);

            let mut joined = MultiHash::new([Algorithm::Sha1, Algorithm::Sha256]);
            let mut combined = a.clone();
            combined.extend_from_slice(&b);
            joined.write(&combined);

            prop_assert_eq!(split.sum(), joined.sum());
        }
    }
}
