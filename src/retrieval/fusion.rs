//! Reciprocal Rank Fusion over the dense and sparse result lists.

/// Default RRF rank constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Fuse two ranked lists of chunk ids.
///
/// A chunk at 1-based rank `r` in a list contributes `1 / (k + r)`;
/// appearing in both lists sums the contributions. Results are ordered
/// by descending fused score, ties broken by ascending chunk id, and
/// truncated to `top_k`.
pub fn rrf_fuse(dense: &[u32], sparse: &[u32], k: f32, top_k: usize) -> Vec<(u32, f32)> {
    let mut scores: Vec<(u32, f32)> = Vec::with_capacity(dense.len() + sparse.len());

    let mut add = |chunk_id: u32, rank: usize| {
        let contribution = 1.0 / (k + (rank + 1) as f32);
        match scores.iter_mut().find(|(id, _)| *id == chunk_id) {
            Some((_, score)) => *score += contribution,
            None => scores.push((chunk_id, contribution)),
        }
    };

    for (rank, &chunk_id) in sparse.iter().enumerate() {
        add(chunk_id, rank);
    }
    for (rank, &chunk_id) in dense.iter().enumerate() {
        add(chunk_id, rank);
    }

    scores.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scores.truncate(top_k);
    scores
}
