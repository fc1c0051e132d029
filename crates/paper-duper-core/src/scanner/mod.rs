mod filter;
mod walk;

pub use filter::{CompiledFilter, FilterSpec};
pub use walk::collect_pdf_candidates;
