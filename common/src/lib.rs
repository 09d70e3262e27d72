//! OKPD Common Library
//!
//! Типы и чистая логика сверки, не зависящие от Excel и внешних сервисов

pub mod error;
pub mod filter;
pub mod grouper;
pub mod parser;
pub mod prompts;
pub mod text;
pub mod types;

pub use error::{Error, Result};
pub use filter::{NoiseReason, RowClass, RowFilter, DEFAULT_HEADER_ROWS, DEFAULT_NOISE_PATTERNS};
pub use grouper::{group_items, group_key};
pub use parser::{extract_code, extract_json, remove_links};
pub use text::{fuzzy_best_match, normalize_cell_text, normalize_term, without_spaces};
pub use types::{ClassificationResult, CodeEntry, ColumnMap, Group, Item, Message, Role};
