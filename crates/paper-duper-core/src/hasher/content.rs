use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// BLAKE3 digest of a file's raw bytes as lowercase hex.
///
/// Streams the file in 64 KiB chunks so memory use does not depend on file
/// size. Used for exact-duplicate detection only.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = match f.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a.pdf");
        fs::write(&file_path, b"%PDF-1.4 identical bytes").unwrap();

        let first = hash_file(&file_path).unwrap();
        let second = hash_file(&file_path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_matches_one_shot_digest_across_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("big.pdf");
        let content: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&file_path, &content).unwrap();

        let expected = blake3::hash(&content).to_hex().to_string();
        assert_eq!(hash_file(&file_path).unwrap(), expected);
    }

    #[test]
    fn test_different_content_different_hash() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.pdf");
        let b = temp_dir.path().join("b.pdf");
        fs::write(&a, b"one").unwrap();
        fs::write(&b, b"two").unwrap();

        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(hash_file(Path::new("/nonexistent/file.pdf")).is_err());
    }
}
