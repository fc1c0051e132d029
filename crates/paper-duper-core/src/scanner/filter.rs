use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;

use crate::error::Error;

/// Optional restrictions on which PDFs take part in a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    /// Regular expression searched (case-insensitively) in the file name.
    pub name_pattern: Option<String>,
}

impl FilterSpec {
    pub fn compile(&self) -> Result<CompiledFilter, Error> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(Error::InvalidArgument(format!(
                    "min_size ({}) is larger than max_size ({})",
                    min, max
                )));
            }
        }

        let name_regex = match &self.name_pattern {
            Some(pattern) if !pattern.is_empty() => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()?,
            ),
            _ => None,
        };

        Ok(CompiledFilter {
            spec: self.clone(),
            name_regex,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilter {
    spec: FilterSpec,
    name_regex: Option<Regex>,
}

impl CompiledFilter {
    pub fn accepts(&self, path: &Path, metadata: &Metadata) -> bool {
        let size = metadata.len();
        if self.spec.min_size.is_some_and(|min| size < min) {
            return false;
        }
        if self.spec.max_size.is_some_and(|max| size > max) {
            return false;
        }

        if self.spec.modified_after.is_some() || self.spec.modified_before.is_some() {
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(t) => t.into(),
                Err(_) => return false,
            };
            if self.spec.modified_after.is_some_and(|after| modified < after) {
                return false;
            }
            if self.spec.modified_before.is_some_and(|before| modified > before) {
                return false;
            }
        }

        if let Some(regex) = &self.name_regex {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default();
            if !regex.is_match(&name) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn sample(dir: &TempDir, name: &str, len: usize) -> (std::path::PathBuf, Metadata) {
        let path = dir.path().join(name);
        fs::write(&path, vec![b'x'; len]).unwrap();
        let metadata = fs::metadata(&path).unwrap();
        (path, metadata)
    }

    #[test]
    fn test_default_accepts_everything() {
        let dir = TempDir::new().unwrap();
        let (path, metadata) = sample(&dir, "a.pdf", 10);
        let filter = FilterSpec::default().compile().unwrap();
        assert!(filter.accepts(&path, &metadata));
    }

    #[test]
    fn test_size_bounds_are_inclusive() {
        let dir = TempDir::new().unwrap();
        let (path, metadata) = sample(&dir, "a.pdf", 100);

        let exact = FilterSpec {
            min_size: Some(100),
            max_size: Some(100),
            ..FilterSpec::default()
        };
        assert!(exact.compile().unwrap().accepts(&path, &metadata));

        let too_small = FilterSpec {
            min_size: Some(101),
            ..FilterSpec::default()
        };
        assert!(!too_small.compile().unwrap().accepts(&path, &metadata));

        let too_big = FilterSpec {
            max_size: Some(99),
            ..FilterSpec::default()
        };
        assert!(!too_big.compile().unwrap().accepts(&path, &metadata));
    }

    #[test]
    fn test_modified_window() {
        let dir = TempDir::new().unwrap();
        let (path, metadata) = sample(&dir, "a.pdf", 1);
        let now = Utc::now();

        let in_window = FilterSpec {
            modified_after: Some(now - Duration::days(1)),
            modified_before: Some(now + Duration::days(1)),
            ..FilterSpec::default()
        };
        assert!(in_window.compile().unwrap().accepts(&path, &metadata));

        let future_only = FilterSpec {
            modified_after: Some(now + Duration::days(1)),
            ..FilterSpec::default()
        };
        assert!(!future_only.compile().unwrap().accepts(&path, &metadata));
    }

    #[test]
    fn test_name_pattern_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let (path, metadata) = sample(&dir, "Invoice_2023.PDF", 1);

        let filter = FilterSpec {
            name_pattern: Some("^invoice_\\d+".to_string()),
            ..FilterSpec::default()
        };
        assert!(filter.compile().unwrap().accepts(&path, &metadata));

        let other = FilterSpec {
            name_pattern: Some("receipt".to_string()),
            ..FilterSpec::default()
        };
        assert!(!other.compile().unwrap().accepts(&path, &metadata));
    }

    #[test]
    fn test_invalid_pattern_and_inverted_sizes() {
        let bad_regex = FilterSpec {
            name_pattern: Some("(unclosed".to_string()),
            ..FilterSpec::default()
        };
        assert!(matches!(bad_regex.compile(), Err(Error::Pattern(_))));

        let inverted = FilterSpec {
            min_size: Some(10),
            max_size: Some(5),
            ..FilterSpec::default()
        };
        assert!(matches!(inverted.compile(), Err(Error::InvalidArgument(_))));
    }
}
