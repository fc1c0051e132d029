pub mod content;
pub mod perceptual;
pub mod text;

pub use content::hash_file;
pub use perceptual::{compare, hash_page_image, PerceptualHash};
pub use text::{compare_texts, jaccard, TextOptions, TextOutcome};
