//! Tiered duplicate grouping.
//!
//! 1. **Exact**: identical content hashes.
//! 2. **Image**: perceptual hashes of page 1 at or above the threshold, for
//!    files within `size_ratio_limit` of each other.
//! 3. **Text**: token-set Jaccard at or above the threshold, for pairs the
//!    image tier cannot decide (a side has no page image, or the image score
//!    sits just below the threshold).
//!
//! Tiers 2 and 3 add edges to one union-find; each connected component of
//! two or more files is a group. Raising the threshold can only remove edges,
//! so groups only ever split as it rises.

mod union_find;

pub use union_find::UnionFind;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::cache::FileSignature;
use crate::hasher::{perceptual, text};

/// Largest number of files sampled for the "closest pairs" diagnostics.
const DIAGNOSTIC_SAMPLE: usize = 100;
const DIAGNOSTIC_PAIRS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchMethod {
    ContentHash,
    ImageHash,
    TextSimilarity,
    DirectComparison,
}

impl MatchMethod {
    pub fn label(&self) -> &'static str {
        match self {
            MatchMethod::ContentHash => "identical content",
            MatchMethod::ImageHash => "similar first page",
            MatchMethod::TextSimilarity => "similar text",
            MatchMethod::DirectComparison => "similar page and text",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_ns: i64,
    pub page_count: u32,
}

impl GroupMember {
    fn from_signature(sig: &FileSignature) -> Self {
        Self {
            path: sig.path.clone(),
            size_bytes: sig.size_bytes,
            modified_ns: sig.modified_ns,
            page_count: sig.page_count,
        }
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.modified_ns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Index 0 is the copy to keep: smallest, then newest.
    pub members: Vec<GroupMember>,
    pub method: MatchMethod,
    pub similarity: f64,
}

impl DuplicateGroup {
    pub fn original(&self) -> &GroupMember {
        &self.members[0]
    }

    pub fn duplicates(&self) -> &[GroupMember] {
        &self.members[1..]
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.duplicates().iter().map(|m| m.size_bytes).sum()
    }
}

#[derive(Debug, Clone)]
pub struct GroupingOptions {
    pub threshold: f64,
    pub enable_text_compare: bool,
    pub size_ratio_limit: f64,
    pub ambiguity_margin: f64,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            enable_text_compare: true,
            size_ratio_limit: 1.5,
            ambiguity_margin: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Image,
    Text,
}

struct Edge {
    a: usize,
    b: usize,
    similarity: f64,
    kind: EdgeKind,
}

#[derive(Default)]
struct ComponentSummary {
    members: Vec<usize>,
    min_similarity: f64,
    has_image: bool,
    has_text: bool,
}

pub fn group_duplicates(
    signatures: &[FileSignature],
    options: &GroupingOptions,
) -> Vec<DuplicateGroup> {
    let mut unique: Vec<&FileSignature> = signatures.iter().collect();
    unique.sort_by(|a, b| a.path.cmp(&b.path));
    unique.dedup_by(|a, b| a.path == b.path);

    let mut groups = Vec::new();

    // Tier 1: exact content
    let mut by_hash: BTreeMap<&str, Vec<&FileSignature>> = BTreeMap::new();
    for sig in &unique {
        by_hash.entry(sig.content_hash.as_str()).or_default().push(sig);
    }
    let mut remaining: Vec<&FileSignature> = Vec::new();
    for (_, bucket) in by_hash {
        if bucket.len() >= 2 {
            groups.push(build_group(&bucket, MatchMethod::ContentHash, 1.0));
        } else {
            remaining.extend(bucket);
        }
    }
    let exact_groups = groups.len();

    // Tiers 2 and 3 over everything the exact tier did not claim.
    remaining.sort_by(|a, b| {
        a.size_bytes
            .cmp(&b.size_bytes)
            .then_with(|| a.path.cmp(&b.path))
    });
    let edges = similarity_edges(&remaining, options);

    let mut uf = UnionFind::new(remaining.len());
    for edge in &edges {
        uf.union(edge.a, edge.b);
    }

    let mut components: BTreeMap<usize, ComponentSummary> = BTreeMap::new();
    for i in 0..remaining.len() {
        let root = uf.find(i);
        components
            .entry(root)
            .or_insert_with(|| ComponentSummary {
                min_similarity: 1.0,
                ..ComponentSummary::default()
            })
            .members
            .push(i);
    }
    for edge in &edges {
        let root = uf.find(edge.a);
        if let Some(summary) = components.get_mut(&root) {
            summary.min_similarity = summary.min_similarity.min(edge.similarity);
            match edge.kind {
                EdgeKind::Image => summary.has_image = true,
                EdgeKind::Text => summary.has_text = true,
            }
        }
    }

    for summary in components.into_values() {
        if summary.members.len() < 2 {
            continue;
        }
        let method = match (summary.has_image, summary.has_text) {
            (true, true) => MatchMethod::DirectComparison,
            (false, true) => MatchMethod::TextSimilarity,
            _ => MatchMethod::ImageHash,
        };
        let sigs: Vec<&FileSignature> = summary.members.iter().map(|&i| remaining[i]).collect();
        groups.push(build_group(&sigs, method, summary.min_similarity));
    }

    groups.sort_by(|a, b| {
        a.method
            .cmp(&b.method)
            .then_with(|| a.original().path.cmp(&b.original().path))
    });

    debug!(
        "Grouped {} signatures: {} exact groups, {} similarity groups",
        unique.len(),
        exact_groups,
        groups.len() - exact_groups
    );

    if groups.is_empty() {
        log_closest_pairs(&unique);
    }

    groups
}

/// Candidate edges over `sigs`, which must be sorted by size ascending.
fn similarity_edges(sigs: &[&FileSignature], options: &GroupingOptions) -> Vec<Edge> {
    let threshold = options.threshold;
    let band_floor = threshold - options.ambiguity_margin;
    let mut edges = Vec::new();

    // Pairs with two page images, within the size ratio, whose score fell
    // into the band just below the threshold.
    let mut ambiguous: HashSet<(usize, usize)> = HashSet::new();

    for i in 0..sigs.len() {
        let Some(hash_i) = &sigs[i].perceptual_hash else {
            continue;
        };
        let size_cap = sigs[i].size_bytes as f64 * options.size_ratio_limit;
        for j in (i + 1)..sigs.len() {
            if sigs[j].size_bytes as f64 > size_cap {
                break;
            }
            let Some(hash_j) = &sigs[j].perceptual_hash else {
                continue;
            };
            let similarity = perceptual::compare(hash_i, hash_j);
            if similarity >= threshold {
                edges.push(Edge {
                    a: i,
                    b: j,
                    similarity,
                    kind: EdgeKind::Image,
                });
            } else if similarity >= band_floor {
                ambiguous.insert((i, j));
            }
        }
    }

    if !options.enable_text_compare {
        return edges;
    }

    let token_sets: Vec<Option<HashSet<&str>>> = sigs
        .iter()
        .map(|sig| {
            sig.normalized_text
                .as_deref()
                .map(text::tokens)
                .filter(|tokens| !tokens.is_empty())
        })
        .collect();

    for i in 0..sigs.len() {
        let Some(tokens_i) = &token_sets[i] else {
            continue;
        };
        for j in (i + 1)..sigs.len() {
            let Some(tokens_j) = &token_sets[j] else {
                continue;
            };
            let image_undecided =
                sigs[i].perceptual_hash.is_none() || sigs[j].perceptual_hash.is_none();
            if !image_undecided && !ambiguous.contains(&(i, j)) {
                continue;
            }
            let similarity = text::jaccard(tokens_i, tokens_j);
            if similarity >= threshold {
                edges.push(Edge {
                    a: i,
                    b: j,
                    similarity,
                    kind: EdgeKind::Text,
                });
            }
        }
    }

    edges
}

fn build_group(sigs: &[&FileSignature], method: MatchMethod, similarity: f64) -> DuplicateGroup {
    let mut members: Vec<GroupMember> = sigs.iter().map(|s| GroupMember::from_signature(s)).collect();
    members.sort_by(|a, b| {
        a.size_bytes
            .cmp(&b.size_bytes)
            .then_with(|| b.modified_ns.cmp(&a.modified_ns))
            .then_with(|| a.path.cmp(&b.path))
    });
    DuplicateGroup {
        members,
        method,
        similarity,
    }
}

/// With no groups at all, the closest image pairs say more about the
/// threshold than silence does.
fn log_closest_pairs(sigs: &[&FileSignature]) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let sample: Vec<&FileSignature> = sigs
        .iter()
        .filter(|s| s.perceptual_hash.is_some())
        .take(DIAGNOSTIC_SAMPLE)
        .copied()
        .collect();

    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for i in 0..sample.len() {
        for j in (i + 1)..sample.len() {
            if let (Some(a), Some(b)) = (&sample[i].perceptual_hash, &sample[j].perceptual_hash) {
                pairs.push((perceptual::compare(a, b), i, j));
            }
        }
    }
    pairs.sort_by(|x, y| y.0.total_cmp(&x.0));

    for (similarity, i, j) in pairs.into_iter().take(DIAGNOSTIC_PAIRS) {
        debug!(
            "Closest pair {:.3}: {} <-> {}",
            similarity,
            sample[i].path.display(),
            sample[j].path.display()
        );
    }
}
