//! sha256 merkle tree over salted witness chunks

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

/// below this many nodes a layer is hashed serially
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 128;

pub fn is_power_of_two(n: usize) -> bool {
    n > 0 && (n & (n - 1)) == 0
}

/// per-leaf salt derived from the prover's secret seed
pub fn leaf_salt(seed: &Hash, index: usize) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(b"salt");
    hasher.update(seed);
    hasher.update((index as u64).to_le_bytes());
    hasher.finalize().into()
}

pub fn hash_leaf(salt: &Hash, words: &[u32]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    for word in words {
        hasher.update(word.to_le_bytes());
    }
    hasher.finalize().into()
}

pub fn hash_siblings(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn hash_layer(layer: &[Hash]) -> Vec<Hash> {
    #[cfg(feature = "parallel")]
    {
        if layer.len() >= PARALLEL_THRESHOLD {
            return layer
                .par_chunks_exact(2)
                .map(|pair| hash_siblings(&pair[0], &pair[1]))
                .collect();
        }
    }
    layer
        .chunks_exact(2)
        .map(|pair| hash_siblings(&pair[0], &pair[1]))
        .collect()
}

/// all layers, leaves first
#[derive(Debug, Clone)]
pub struct MerkleTree {
    layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// `leaf_hashes.len()` must be a power of two
    pub fn from_leaf_hashes(leaf_hashes: Vec<Hash>) -> Option<Self> {
        if !is_power_of_two(leaf_hashes.len()) {
            return None;
        }
        let mut layers = vec![leaf_hashes];
        while let Some(last) = layers.last() {
            if last.len() == 1 {
                break;
            }
            let next = hash_layer(last);
            layers.push(next);
        }
        Some(Self { layers })
    }

    pub fn root(&self) -> Hash {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// sibling hashes from the leaf up to the root
    pub fn auth_path(&self, mut index: usize) -> Vec<Hash> {
        let mut path = Vec::with_capacity(self.depth());
        for layer in &self.layers[..self.depth()] {
            path.push(layer[index ^ 1]);
            index >>= 1;
        }
        path
    }
}

/// recompute the root from a leaf hash and its path
pub fn verify_path(root: &Hash, leaf: Hash, mut index: usize, path: &[Hash]) -> bool {
    let mut node = leaf;
    for sibling in path {
        node = if index & 1 == 0 {
            hash_siblings(&node, sibling)
        } else {
            hash_siblings(sibling, &node)
        };
        index >>= 1;
    }
    index == 0 && node == *root
}
