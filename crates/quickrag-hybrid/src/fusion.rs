//! Merging of the sparse and dense ranked lists.
//!
//! Ranks are zero-based. A chunk missing from one list is ranked at that
//! list's length, so it still receives a (small) contribution from it.
//! Output order is score descending, then `chunk_id` ascending, which makes
//! the result independent of how ties were ordered in the inputs.
use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use quickrag_core::config::FusionSettings;
use quickrag_core::types::{FusionMethod, FusionParams, HybridRetrievalResult, Origin, RetrievalDebug, RetrievalResult};
use quickrag_core::{Error, Result};

/// Per-list lookup: first position and payload of every chunk id.
struct Ranked<'a> {
    ranks: HashMap<&'a str, (usize, &'a RetrievalResult)>,
    len: usize,
}

impl<'a> Ranked<'a> {
    fn new(list: &'a [RetrievalResult]) -> Self {
        let mut ranks = HashMap::with_capacity(list.len());
        for (rank, r) in list.iter().enumerate() {
            ranks.entry(r.chunk_id.as_str()).or_insert((rank, r));
        }
        Self { ranks, len: list.len() }
    }

    fn get(&self, id: &str) -> Option<(usize, &'a RetrievalResult)> {
        self.ranks.get(id).copied()
    }

    fn rank_of(&self, id: &str) -> usize {
        self.get(id).map_or(self.len, |(rank, _)| rank)
    }

    fn score_of(&self, id: &str) -> f32 {
        self.get(id).map_or(0.0, |(_, r)| r.score)
    }
}

/// Chunk ids of both lists, dense first, each once.
fn union_ids<'a>(sparse: &'a [RetrievalResult], dense: &'a [RetrievalResult]) -> Vec<&'a str> {
    let mut seen = std::collections::HashSet::new();
    dense.iter().chain(sparse).map(|r| r.chunk_id.as_str()).filter(|id| seen.insert(*id)).collect()
}

/// Dense copy when present, otherwise the sparse one.
fn canonical<'a>(id: &str, sparse: &Ranked<'a>, dense: &Ranked<'a>) -> Option<&'a RetrievalResult> {
    dense.get(id).or_else(|| sparse.get(id)).map(|(_, r)| r)
}

fn hybrid_copy(base: &RetrievalResult, score: f32, provenance: [(&str, Value); 4]) -> RetrievalResult {
    let mut metadata = base.metadata.clone();
    for (k, v) in provenance {
        metadata.insert(k.to_string(), v);
    }
    RetrievalResult {
        doc_id: base.doc_id.clone(),
        chunk_id: base.chunk_id.clone(),
        source: base.source.clone(),
        title: base.title.clone(),
        content: base.content.clone(),
        score,
        origin: Origin::Hybrid,
        metadata,
    }
}

fn by_score_then_id(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

pub fn reciprocal_rank_fusion(sparse: &[RetrievalResult], dense: &[RetrievalResult], k: u32) -> Vec<RetrievalResult> {
    let s = Ranked::new(sparse);
    let d = Ranked::new(dense);
    let k = f64::from(k);
    let mut fused: Vec<RetrievalResult> = union_ids(sparse, dense)
        .into_iter()
        .filter_map(|id| {
            let (rs, rd) = (s.rank_of(id), d.rank_of(id));
            let score = 1.0 / (k + rs as f64) + 1.0 / (k + rd as f64);
            canonical(id, &s, &d).map(|base| {
                hybrid_copy(
                    base,
                    score as f32,
                    [
                        ("sparse_rank", rs.into()),
                        ("dense_rank", rd.into()),
                        ("sparse_score", s.score_of(id).into()),
                        ("dense_score", d.score_of(id).into()),
                    ],
                )
            })
        })
        .collect();
    fused.sort_by(by_score_then_id);
    fused
}

/// Max score used to scale a list into `[0,1]`; 1.0 for an empty list or
/// one without a positive maximum.
fn list_max(list: &[RetrievalResult]) -> f32 {
    let max = list.iter().map(|r| r.score).fold(f32::NEG_INFINITY, f32::max);
    if max.is_finite() && max > 0.0 {
        max
    } else {
        1.0
    }
}

pub fn weighted_fusion(
    sparse: &[RetrievalResult],
    dense: &[RetrievalResult],
    sparse_weight: f32,
    dense_weight: f32,
) -> Vec<RetrievalResult> {
    let s = Ranked::new(sparse);
    let d = Ranked::new(dense);
    let (s_max, d_max) = (list_max(sparse), list_max(dense));
    let mut fused: Vec<RetrievalResult> = union_ids(sparse, dense)
        .into_iter()
        .filter_map(|id| {
            let sn = s.get(id).map_or(0.0, |(_, r)| r.score / s_max);
            let dn = d.get(id).map_or(0.0, |(_, r)| r.score / d_max);
            let score = sparse_weight * sn + dense_weight * dn;
            canonical(id, &s, &d).map(|base| {
                hybrid_copy(
                    base,
                    score,
                    [
                        ("sparse_normalized", sn.into()),
                        ("dense_normalized", dn.into()),
                        ("sparse_weight", sparse_weight.into()),
                        ("dense_weight", dense_weight.into()),
                    ],
                )
            })
        })
        .collect();
    fused.sort_by(by_score_then_id);
    fused
}

/// Keep the first occurrence of every chunk id.
pub fn deduplicate(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = std::collections::HashSet::new();
    results.into_iter().filter(|r| seen.insert(r.chunk_id.clone())).collect()
}

/// Fusion with the configured parameters for each method.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    rrf_k: u32,
    sparse_weight: f32,
    dense_weight: f32,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::from(&FusionSettings::default())
    }
}

impl From<&FusionSettings> for FusionEngine {
    fn from(s: &FusionSettings) -> Self {
        Self { rrf_k: s.rrf_k, sparse_weight: s.sparse_weight, dense_weight: s.dense_weight }
    }
}

impl FusionEngine {
    pub fn params_for(&self, method: FusionMethod) -> FusionParams {
        match method {
            FusionMethod::Rrf => FusionParams::Rrf { k: self.rrf_k },
            FusionMethod::Weighted => {
                FusionParams::Weighted { sparse_weight: self.sparse_weight, dense_weight: self.dense_weight }
            }
        }
    }

    pub fn fuse_method(
        &self,
        sparse: &[RetrievalResult],
        dense: &[RetrievalResult],
        method: FusionMethod,
    ) -> Result<HybridRetrievalResult> {
        fuse(sparse, dense, self.params_for(method))
    }
}

/// Fuse with explicit parameters. Only invalid parameters fail.
pub fn fuse(sparse: &[RetrievalResult], dense: &[RetrievalResult], params: FusionParams) -> Result<HybridRetrievalResult> {
    let fused = match params {
        FusionParams::Rrf { k } => {
            if k == 0 {
                return Err(Error::InvalidConfig("rrf k must be > 0".into()));
            }
            reciprocal_rank_fusion(sparse, dense, k)
        }
        FusionParams::Weighted { sparse_weight, dense_weight } => {
            for w in [sparse_weight, dense_weight] {
                if !(0.0..=1.0).contains(&w) {
                    return Err(Error::InvalidConfig(format!("fusion weight must be in [0,1], got {w}")));
                }
            }
            weighted_fusion(sparse, dense, sparse_weight, dense_weight)
        }
    };
    let results = deduplicate(fused);
    debug!(
        method = %params.method(),
        sparse = sparse.len(),
        dense = dense.len(),
        fused = results.len(),
        "fused ranked lists"
    );
    Ok(HybridRetrievalResult {
        debug: RetrievalDebug {
            sparse_count: sparse.len(),
            dense_count: dense.len(),
            fused_count: results.len(),
            ..RetrievalDebug::default()
        },
        results,
        fusion_method: params.method(),
        fusion_params: params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32, origin: Origin) -> RetrievalResult {
        RetrievalResult {
            doc_id: format!("doc-{id}"),
            chunk_id: id.to_string(),
            source: format!("{origin:?}").to_lowercase(),
            title: String::new(),
            content: format!("content {id}"),
            score,
            origin,
            metadata: Default::default(),
        }
    }

    #[test]
    fn rrf_prefers_dense_payload_and_records_provenance() {
        let sparse = vec![hit("a", 3.0, Origin::Sparse), hit("b", 1.0, Origin::Sparse)];
        let dense = vec![hit("b", 0.9, Origin::Dense)];
        let out = reciprocal_rank_fusion(&sparse, &dense, 60);
        let b = out.iter().find(|r| r.chunk_id == "b").unwrap();
        assert_eq!(b.source, "dense");
        assert_eq!(b.origin, Origin::Hybrid);
        assert_eq!(b.metadata["sparse_rank"], 1);
        assert_eq!(b.metadata["dense_rank"], 0);
        let a = out.iter().find(|r| r.chunk_id == "a").unwrap();
        assert_eq!(a.source, "sparse");
        assert_eq!(a.metadata["dense_rank"], 1);
        assert_eq!(a.metadata["dense_score"], 0.0);
    }

    #[test]
    fn absent_chunk_is_ranked_at_list_length() {
        let sparse = vec![hit("a", 1.0, Origin::Sparse)];
        let dense = vec![hit("x", 1.0, Origin::Dense), hit("y", 0.5, Origin::Dense)];
        let out = reciprocal_rank_fusion(&sparse, &dense, 60);
        let a = out.iter().find(|r| r.chunk_id == "a").unwrap();
        let expected = 1.0 / 60.0 + 1.0 / 62.0;
        assert!((f64::from(a.score) - expected).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_chunk_id() {
        let sparse = vec![hit("b", 1.0, Origin::Sparse), hit("a", 1.0, Origin::Sparse)];
        let out = weighted_fusion(&sparse, &[], 1.0, 0.0);
        assert_eq!(out.iter().map(|r| r.chunk_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn weighted_normalizes_by_list_max() {
        let sparse = vec![hit("a", 10.0, Origin::Sparse), hit("b", 5.0, Origin::Sparse)];
        let dense = vec![hit("b", 0.8, Origin::Dense)];
        let out = weighted_fusion(&sparse, &dense, 0.4, 0.6);
        let b = out.iter().find(|r| r.chunk_id == "b").unwrap();
        assert!((b.score - (0.4 * 0.5 + 0.6 * 1.0)).abs() < 1e-6);
        assert_eq!(out[0].chunk_id, "b");
    }

    #[test]
    fn non_positive_max_falls_back_to_one() {
        let sparse = vec![hit("a", -2.0, Origin::Sparse)];
        let out = weighted_fusion(&sparse, &[], 1.0, 0.0);
        assert!((out[0].score + 2.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_ids_within_a_list_use_first_position() {
        let sparse = vec![hit("a", 2.0, Origin::Sparse), hit("a", 1.0, Origin::Sparse)];
        let out = fuse(&sparse, &[], FusionParams::Rrf { k: 60 }).unwrap();
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].metadata["sparse_rank"], 0);
        assert_eq!(out.debug.sparse_count, 2);
    }

    #[test]
    fn invalid_params_are_config_errors() {
        assert!(fuse(&[], &[], FusionParams::Rrf { k: 0 }).unwrap_err().is_config());
        let bad = FusionParams::Weighted { sparse_weight: -0.1, dense_weight: 1.0 };
        assert!(fuse(&[], &[], bad).unwrap_err().is_config());
    }

    #[test]
    fn empty_inputs_give_empty_result() {
        let out = FusionEngine::default().fuse_method(&[], &[], FusionMethod::Rrf).unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.fusion_params, FusionParams::Rrf { k: 60 });
        assert_eq!(out.debug.fused_count, 0);
    }
}
