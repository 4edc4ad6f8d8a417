use std::collections::HashMap;

use sieve_core::Key;

/// Owned key -> vector table, iterated in insertion order.
#[derive(Debug, Default, Clone)]
pub struct EmbeddingTable {
    keys: Vec<Key>,
    vectors: Vec<Vec<f32>>,
    slots: HashMap<Key, usize>,
}

impl EmbeddingTable {
    pub fn new() -> Self { Self::default() }

    /// Insert or overwrite; an overwritten key keeps its slot.
    pub fn upsert(&mut self, key: Key, vector: Vec<f32>) {
        if let Some(&slot) = self.slots.get(&key) {
            self.vectors[slot] = vector;
            return;
        }
        self.slots.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        self.vectors.push(vector);
    }

    pub fn get(&self, key: &Key) -> Option<&[f32]> { self.slots.get(key).map(|&slot| self.vectors[slot].as_slice()) }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &[f32])> + '_ {
        self.keys.iter().zip(self.vectors.iter().map(Vec::as_slice))
    }

    pub fn len(&self) -> usize { self.keys.len() }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}
