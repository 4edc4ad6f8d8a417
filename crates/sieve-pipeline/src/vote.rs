//! Score aggregation for the vote combinator.
//!
//! Each branch's scores are brought to a branch-local 0..1 scale: scored
//! branches through `Normalization`, order-only branches through the
//! reciprocal rank `1 / (rank + 1)`. A key's vote is the mean over the
//! branches that returned it; absent branches contribute nothing.
use std::collections::HashMap;

use sieve_core::{Key, Normalization, ResultList, ScoredItem};

/// Normalised or synthetic score of every item of `list`, in list order.
///
/// A list counts as scored only when every item has a similarity.
pub fn branch_scores(list: &ResultList, normalization: Normalization) -> Vec<f32> {
    if list.is_empty() { return vec![]; }
    if !list.is_scored() {
        #[allow(clippy::cast_precision_loss)]
        let reciprocal: Vec<f32> = (0..list.len()).map(|rank| 1.0 / (rank as f32 + 1.0)).collect();
        return reciprocal;
    }
    let scores: Vec<f32> = list.iter().filter_map(|i| i.similarity).collect();
    normalize(&scores, normalization)
}

/// `Max` divides by the branch maximum when every score is non-negative and
/// the maximum is positive; any other case (and `MinMax`) uses min-max. A
/// branch whose scores are all equal maps to 1.0.
pub fn normalize(scores: &[f32], normalization: Normalization) -> Vec<f32> {
    let finite = scores.iter().copied().filter(|s| s.is_finite());
    let (min, max) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| (lo.min(s), hi.max(s)));
    let clean = |s: f32| if s.is_finite() { s } else { min };
    if normalization == Normalization::Max && min >= 0.0 && max > 0.0 {
        return scores.iter().map(|&s| clean(s) / max).collect();
    }
    if !(max - min).is_normal() {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|&s| (clean(s) - min) / (max - min)).collect()
}

pub fn merge<'a>(lists: impl IntoIterator<Item = &'a ResultList>, normalization: Normalization, k: Option<usize>) -> ResultList {
    let mut order: Vec<Key> = Vec::new();
    let mut first: HashMap<Key, ScoredItem> = HashMap::new();
    let mut votes: HashMap<Key, (f32, u32)> = HashMap::new();
    for list in lists {
        for (item, score) in list.iter().zip(branch_scores(list, normalization)) {
            let entry = votes.entry(item.key().clone()).or_insert_with(|| {
                order.push(item.key().clone());
                first.insert(item.key().clone(), item.clone());
                (0.0, 0)
            });
            entry.0 += score;
            entry.1 += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let mut voted: Vec<(Key, f32)> = order
        .into_iter()
        .map(|key| {
            let (sum, count) = votes[&key];
            (key, sum / count as f32)
        })
        .collect();
    // stable: ties keep first-appearance order
    voted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: ResultList = voted
        .into_iter()
        .filter_map(|(key, score)| first.remove(&key).map(|item| item.with_similarity(score)))
        .collect();
    merged.cap(k);
    merged
}
