use std::collections::HashSet;
use std::hash::Hasher as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash64;

use crate::pdf::{run_bounded, Bounded, PdfBackend};

/// Options controlling how extracted text is normalized.
#[derive(Debug, Clone)]
pub struct TextOptions {
    pub min_token_len: usize,
    pub max_pages: u32,
    pub timeout: Duration,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            min_token_len: 3,
            max_pages: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
    Extracted { text: String, page_count: u32 },
    TimedOut,
    Failed(String),
}

/// Lowercase, turn punctuation into whitespace, and drop short tokens.
/// `_` counts as part of a word.
pub fn normalize(raw: &str, min_token_len: usize) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() >= min_token_len)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract a document's text and normalize it, giving up after
/// `options.timeout`.
pub fn extract_and_normalize(
    backend: &Arc<dyn PdfBackend>,
    path: &Path,
    options: &TextOptions,
) -> TextOutcome {
    let backend = Arc::clone(backend);
    let owned_path = path.to_path_buf();
    let max_pages = options.max_pages;

    let outcome = run_bounded("text", options.timeout, move || {
        backend.extract_text(&owned_path, max_pages)
    });

    match outcome {
        Bounded::Finished(Ok(extracted)) => TextOutcome::Extracted {
            text: normalize(&extracted.joined(), options.min_token_len),
            page_count: extracted.page_count,
        },
        Bounded::Finished(Err(e)) => TextOutcome::Failed(e.to_string()),
        Bounded::TimedOut => TextOutcome::TimedOut,
        Bounded::Abandoned => TextOutcome::Failed("text extraction worker died".to_string()),
    }
}

pub fn tokens(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().collect()
}

/// `|A ∩ B| / |A ∪ B|`. Two empty sets are trivially equal.
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

pub fn compare_texts(a: &str, b: &str) -> f64 {
    jaccard(&tokens(a), &tokens(b))
}

pub fn text_hash(normalized: &str) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(normalized.as_bytes());
    format!("{:016x}", hasher.finish())
}
