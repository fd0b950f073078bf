//! Chunk hits to document scores.
//!
//! Hit `i` of `N` scores `1 - i/N`. A document keeps its best score and
//! counts all of its hits. Documents are ordered by score descending, ties
//! in first-seen order.

use std::collections::HashMap;

use crate::types::DocumentId;
use crate::vector::ChunkMatch;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DocumentHit {
    pub document_id: DocumentId,
    pub score: f32,
    pub matching_chunks: usize,
}

pub(crate) fn aggregate(matches: &[ChunkMatch<'_>]) -> Vec<DocumentHit> {
    let total = matches.len() as f32;
    let mut hits: Vec<DocumentHit> = Vec::new();
    let mut positions: HashMap<DocumentId, usize> = HashMap::new();

    for (rank, hit) in matches.iter().enumerate() {
        let score = 1.0 - rank as f32 / total;
        let document_id = hit.chunk.document_id;
        match positions.get(&document_id) {
            Some(&position) => {
                let entry = &mut hits[position];
                entry.score = entry.score.max(score);
                entry.matching_chunks += 1;
            }
            None => {
                positions.insert(document_id, hits.len());
                hits.push(DocumentHit {
                    document_id,
                    score,
                    matching_chunks: 1,
                });
            }
        }
    }

    // Stable sort keeps first-seen order among equal scores
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}
