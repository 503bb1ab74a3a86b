//! Weighted reduction of a text group into a single entity vector.

use profiledb_core::error::Result;
use profiledb_core::traits::Embedder;
use profiledb_core::types::WeightedTextGroup;

/// Embed every text of `group` in one batched call, scale each vector
/// component-wise by its weight, sum, and divide by the vector count.
///
/// The division is by count, not by the weight sum: with unit weights this
/// is exactly the plain arithmetic mean of the raw embeddings, which is the
/// contract for the "no weights supplied" path.
///
/// An empty group yields `Ok(None)`, a skip condition rather than an
/// error; the caller produces no vector for the entity.
pub fn aggregate(embedder: &dyn Embedder, group: &WeightedTextGroup) -> Result<Option<Vec<f32>>> {
    if group.is_empty() {
        return Ok(None);
    }
    let texts = group.texts();
    let weights = group.weights();
    let embedded = embedder.embed_many(&texts)?;
    if embedded.is_empty() {
        return Ok(None);
    }

    let dim = embedder.dim();
    let mut sum = vec![0f32; dim];
    for (vector, weight) in embedded.iter().zip(weights.iter()) {
        for (acc, component) in sum.iter_mut().zip(vector.iter()) {
            *acc += component * weight;
        }
    }
    let count = embedded.len() as f32;
    for component in &mut sum {
        *component /= count;
    }
    Ok(Some(sum))
}
