use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HASH_SIZE: u32 = 8;

/// Fixed-length fingerprint of a rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash {
    bytes: Vec<u8>,
}

impl PerceptualHash {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn hamming_distance(&self, other: &PerceptualHash) -> Option<u32> {
        if self.bytes.len() != other.bytes.len() {
            return None;
        }
        Some(
            self.bytes
                .iter()
                .zip(other.bytes.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }
}

/// Difference hash of a page raster: grayscale, shrink to a
/// `(hash_size + 1) x hash_size` grid, one bit per horizontal gradient.
pub fn hash_page_image(image: &DynamicImage, hash_size: u32) -> PerceptualHash {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(hash_size, hash_size)
        .to_hasher();

    PerceptualHash::from_bytes(hasher.hash_image(image).as_bytes().to_vec())
}

/// `1 - hamming / bits`, or 0.0 when the hashes are not comparable.
pub fn compare(a: &PerceptualHash, b: &PerceptualHash) -> f64 {
    let bits = a.bit_len();
    if bits == 0 {
        return 0.0;
    }
    match a.hamming_distance(b) {
        Some(distance) => 1.0 - (distance as f64 / bits as f64),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn stripes(width: u32, height: u32, period: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if (x / period) % 2 == 0 {
                Rgb([250, 250, 250])
            } else {
                Rgb([10, 10, 10])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 255) / width.max(1)) as u8;
            Rgb([v, (y % 255) as u8, 255 - v])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_hash_is_fixed_length_and_deterministic() {
        let img = gradient(120, 160);
        let h1 = hash_page_image(&img, DEFAULT_HASH_SIZE);
        let h2 = hash_page_image(&img, DEFAULT_HASH_SIZE);
        assert_eq!(h1, h2);
        assert_eq!(h1.bit_len(), 64);
        assert_eq!(compare(&h1, &h2), 1.0);
    }

    #[test]
    fn test_rescaled_page_stays_similar() {
        let small = hash_page_image(&gradient(200, 260), DEFAULT_HASH_SIZE);
        let large = hash_page_image(&gradient(400, 520), DEFAULT_HASH_SIZE);
        assert!(compare(&small, &large) >= 0.9);
    }

    #[test]
    fn test_compare_is_symmetric() {
        let a = hash_page_image(&stripes(100, 100, 7), DEFAULT_HASH_SIZE);
        let b = hash_page_image(&gradient(100, 100), DEFAULT_HASH_SIZE);
        assert_eq!(compare(&a, &b), compare(&b, &a));
    }

    #[test]
    fn test_length_mismatch_is_zero() {
        let a = PerceptualHash::from_bytes(vec![0xff; 8]);
        let b = PerceptualHash::from_bytes(vec![0xff; 32]);
        assert_eq!(compare(&a, &b), 0.0);
        assert_eq!(a.hamming_distance(&b), None);
    }

    #[test]
    fn test_compare_counts_differing_bits() {
        let a = PerceptualHash::from_bytes(vec![0b0000_0000; 8]);
        let b = PerceptualHash::from_bytes(vec![0b0000_0000, 0b0000_1111, 0, 0, 0, 0, 0, 0]);
        assert_eq!(a.hamming_distance(&b), Some(4));
        assert!((compare(&a, &b) - (1.0 - 4.0 / 64.0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_hashes_are_not_similar() {
        let empty = PerceptualHash::from_bytes(Vec::new());
        assert_eq!(compare(&empty, &empty), 0.0);
    }
}
