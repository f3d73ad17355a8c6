use std::io;

use sha2::{Digest, Sha256};

use crate::constants::TREE_HASH_CHUNK_SIZE;

/// A 32-byte SHA-256 tree hash value.
pub type TreeHashDigest = [u8; 32];

/// Incremental SHA-256 tree hash.
///
/// Input is split into 1MB leaf chunks. Each leaf is hashed on its own and the
/// leaf hashes are then folded pairwise, level by level, into a single root.
/// An odd hash at the end of a level is promoted to the next level unchanged.
///
/// The hasher is reusable: [`TreeHash::finalize_reset`] returns the root and
/// leaves the hasher empty, ready for the next stream.
///
/// # Example
///
/// ```
/// use glacier_pipe::utils::tree_hash::TreeHash;
///
/// let mut hasher = TreeHash::new();
/// hasher.update(b"hello ");
/// hasher.update(b"world");
/// let digest = hasher.finalize_reset();
///
/// assert_eq!(digest, TreeHash::digest(b"hello world"));
/// ```
#[derive(Clone, Default)]
pub struct TreeHash {
    leaf: Sha256,
    leaf_len: usize,
    leaves: Vec<TreeHashDigest>,
    total: u64,
}

impl TreeHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a complete byte slice in one call.
    pub fn digest(data: &[u8]) -> TreeHashDigest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize_reset()
    }

    /// Number of bytes fed in since the last reset.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Feed bytes into the hash.
    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;

        while !data.is_empty() {
            // A full leaf is only closed once more input arrives, so the
            // last leaf of the stream is always closed by finalize.
            if self.leaf_len == TREE_HASH_CHUNK_SIZE {
                self.close_leaf();
            }

            let take = (TREE_HASH_CHUNK_SIZE - self.leaf_len).min(data.len());
            self.leaf.update(&data[..take]);
            self.leaf_len += take;
            data = &data[take..];
        }
    }

    /// Produce the root hash and reset the hasher.
    ///
    /// Empty input hashes as a single empty leaf, i.e. `SHA-256("")`.
    pub fn finalize_reset(&mut self) -> TreeHashDigest {
        if self.leaf_len > 0 || self.leaves.is_empty() {
            self.close_leaf();
        }

        let leaves = std::mem::take(&mut self.leaves);
        self.reset();
        reduce(leaves)
    }

    /// Discard all input fed so far.
    pub fn reset(&mut self) {
        self.leaf = Sha256::new();
        self.leaf_len = 0;
        self.leaves.clear();
        self.total = 0;
    }

    fn close_leaf(&mut self) {
        let leaf = std::mem::take(&mut self.leaf);
        self.leaves.push(leaf.finalize().into());
        self.leaf_len = 0;
    }
}

/// Fold a level of hashes pairwise until a single root remains.
fn reduce(mut level: Vec<TreeHashDigest>) -> TreeHashDigest {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut parent = Sha256::new();
                    parent.update(left);
                    parent.update(right);
                    parent.finalize().into()
                }
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }

    level[0]
}

impl io::Write for TreeHash {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hex-encode a tree hash in the lowercase form the remote service expects.
pub fn to_hex(digest: &TreeHashDigest) -> String {
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = TREE_HASH_CHUNK_SIZE;

    fn sha256(parts: &[&[u8]]) -> TreeHashDigest {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    #[test]
    fn test_empty_input_is_hash_of_empty_leaf() {
        let digest = TreeHash::digest(&[]);
        assert_eq!(
            to_hex(&digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_single_leaf_is_plain_sha256() {
        let data = vec![7u8; 1000];
        assert_eq!(TreeHash::digest(&data), sha256(&[&data]));

        let full = vec![9u8; MB];
        assert_eq!(TreeHash::digest(&full), sha256(&[&full]));
    }

    #[test]
    fn test_two_leaves() {
        let data: Vec<u8> = (0..MB + 10).map(|i| (i % 251) as u8).collect();
        let left = sha256(&[&data[..MB]]);
        let right = sha256(&[&data[MB..]]);

        assert_eq!(TreeHash::digest(&data), sha256(&[&left, &right]));
    }

    #[test]
    fn test_three_leaves_promotes_odd_leaf() {
        let data: Vec<u8> = (0..2 * MB + 1).map(|i| (i % 13) as u8).collect();
        let a = sha256(&[&data[..MB]]);
        let b = sha256(&[&data[MB..2 * MB]]);
        let c = sha256(&[&data[2 * MB..]]);
        let ab = sha256(&[&a, &b]);

        assert_eq!(TreeHash::digest(&data), sha256(&[&ab, &c]));
    }

    #[test]
    fn test_finalize_resets_state() {
        let mut hasher = TreeHash::new();
        hasher.update(b"first stream");
        let _ = hasher.finalize_reset();
        assert!(hasher.is_empty());

        hasher.update(b"second");
        assert_eq!(hasher.finalize_reset(), TreeHash::digest(b"second"));
    }

    #[test]
    fn test_io_write_feeds_hash() {
        use std::io::Write;

        let mut hasher = TreeHash::new();
        hasher.write_all(b"abc").unwrap();
        assert_eq!(hasher.len(), 3);
        assert_eq!(hasher.finalize_reset(), TreeHash::digest(b"abc"));
    }
}
