//! Storebench Data Generator
//!
//! Produces the synthetic relational workload every backend loads:
//!
//! ```text
//!   Section ──1:N──► Support ──1:1──► Attachment
//!      │
//!      └─────1:N──► Span
//! ```
//!
//! Every 100th Section carries a caller-supplied needle in its
//! `search_string`, which the search phase then looks for. Generation is pure
//! and can be made deterministic with [`DataGenerator::seeded`].

pub mod generate;
pub mod model;

pub use generate::{
    expected_needle_count, is_needle_index, random_string, DataGenerator, NEEDLE_INTERVAL,
    SEARCH_STRING_LEN, SPANS_PER_SECTION, SUPPORTS_PER_SECTION,
};
pub use model::{Attachment, Dataset, PayloadSize, Section, Span, Support};

/// Sections generated per load unless configured otherwise.
pub const DEFAULT_SECTION_COUNT: usize = 300;
