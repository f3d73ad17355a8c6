//! Tree hash tests against an independent reference implementation.

use proptest::prelude::*;
use sha2::{Digest, Sha256};

use glacier_pipe::utils::tree_hash::{to_hex, TreeHash, TreeHashDigest};

const MB: usize = 1024 * 1024;

/// Straightforward recursive definition: hash 1MB leaves, then pair up.
fn reference(data: &[u8]) -> TreeHashDigest {
    let mut level: Vec<TreeHashDigest> = if data.is_empty() {
        vec![Sha256::digest(b"").into()]
    } else {
        data.chunks(MB).map(|leaf| Sha256::digest(leaf).into()).collect()
    };

    while level.len() > 1 {
        let mut next = Vec::new();
        let mut i = 0;
        while i < level.len() {
            if i + 1 < level.len() {
                let mut parent = Sha256::new();
                parent.update(level[i]);
                parent.update(level[i + 1]);
                next.push(parent.finalize().into());
            } else {
                next.push(level[i]);
            }
            i += 2;
        }
        level = next;
    }

    level[0]
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[test]
fn test_known_vectors() {
    assert_eq!(
        to_hex(&TreeHash::digest(b"")),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(
        to_hex(&TreeHash::digest(b"abc")),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_leaf_boundaries() {
    for len in [MB - 1, MB, MB + 1, 2 * MB, 3 * MB, 3 * MB + 17, 4 * MB, 5 * MB - 1] {
        let data = pattern(len, 3);
        assert_eq!(TreeHash::digest(&data), reference(&data), "length {}", len);
    }
}

#[test]
fn test_single_byte_writes_match_bulk() {
    let data = pattern(MB + 300, 9);

    let mut hasher = TreeHash::new();
    for byte in &data {
        hasher.update(std::slice::from_ref(byte));
    }

    assert_eq!(hasher.len(), data.len() as u64);
    assert_eq!(hasher.finalize_reset(), TreeHash::digest(&data));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_chunked_updates_match_reference(
        len in 0usize..(3 * MB + 64),
        seed in any::<u8>(),
        chunk_sizes in prop::collection::vec(1usize..(MB / 2), 1..8),
    ) {
        let data = pattern(len, seed);

        let mut hasher = TreeHash::new();
        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();
        while offset < data.len() {
            let size = (*sizes.next().unwrap()).min(data.len() - offset);
            hasher.update(&data[offset..offset + size]);
            offset += size;
        }

        prop_assert_eq!(hasher.finalize_reset(), reference(&data));
    }

    #[test]
    fn prop_small_inputs_are_plain_sha256(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let expected: TreeHashDigest = Sha256::digest(&data).into();
        prop_assert_eq!(TreeHash::digest(&data), expected);
    }
}
