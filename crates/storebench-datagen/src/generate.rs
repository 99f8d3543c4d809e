//! Randomized dataset generation.
//!
//! Shapes are fixed (documented ranges below), contents are random. A
//! generator seeded with [`DataGenerator::seeded`] is fully deterministic,
//! which the tests rely on; the benchmark itself uses entropy.

use std::ops::RangeInclusive;

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Builder;

use crate::model::{Attachment, Dataset, Section, Span, Support};

/// Every section whose index is a multiple of this carries the needle.
pub const NEEDLE_INTERVAL: usize = 100;

/// Length of every non-needle search string.
pub const SEARCH_STRING_LEN: usize = 500;

pub const SUPPORTS_PER_SECTION: RangeInclusive<usize> = 5..=12;
pub const SPANS_PER_SECTION: RangeInclusive<usize> = 4..=10;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

const EASTING: RangeInclusive<i64> = 1_000_000..=1_100_000;
const NORTHING: RangeInclusive<i64> = 6_100_000..=6_200_000;
const OFFSET: RangeInclusive<i64> = -20..=20;

/// Random `[A-Za-z0-9]` string of `len` characters.
pub fn random_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    pick_chars(rng, ALPHANUMERIC, len)
}

fn pick_chars<R: Rng + ?Sized>(rng: &mut R, charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

/// Whether the section at `index` receives the needle.
pub fn is_needle_index(index: usize) -> bool {
    index % NEEDLE_INTERVAL == 0
}

/// Number of needle sections in a batch of `count`.
pub fn expected_needle_count(count: usize) -> usize {
    count.div_ceil(NEEDLE_INTERVAL)
}

pub struct DataGenerator<R = StdRng> {
    rng: R,
    survey_start: NaiveDate,
    survey_days: u64,
}

impl DataGenerator<StdRng> {
    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic generator; the same seed yields the same dataset.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// `seeded` when a seed is given, entropy otherwise.
    pub fn with_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::new(),
        }
    }
}

impl Default for DataGenerator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> DataGenerator<R> {
    pub fn from_rng(rng: R) -> Self {
        let survey_start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();
        let survey_end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap_or_default();
        let survey_days = (survey_end - survey_start).num_days().max(0) as u64;
        Self {
            rng,
            survey_start,
            survey_days,
        }
    }

    /// Generate `count` sections with their supports and spans.
    ///
    /// `needle` is planted verbatim into every section whose zero-based index
    /// is divisible by [`NEEDLE_INTERVAL`]; every other section gets a fresh
    /// random string of [`SEARCH_STRING_LEN`] characters that never equals the
    /// needle.
    pub fn generate(&mut self, count: usize, needle: &str) -> Dataset {
        let mut dataset = Dataset {
            sections: Vec::with_capacity(count),
            supports: Vec::with_capacity(count),
            spans: Vec::with_capacity(count),
        };

        for index in 0..count {
            let search_string = if is_needle_index(index) {
                needle.to_string()
            } else {
                self.filler_string(needle)
            };
            let (section, supports, spans) = self.section(search_string);
            dataset.sections.push(section);
            dataset.supports.push(supports);
            dataset.spans.push(spans);
        }

        dataset
    }

    /// Random search string guaranteed to differ from `needle`.
    pub fn filler_string(&mut self, needle: &str) -> String {
        loop {
            let candidate = random_string(&mut self.rng, SEARCH_STRING_LEN);
            if candidate != needle {
                return candidate;
            }
        }
    }

    fn section(&mut self, search_string: String) -> (Section, Vec<Support>, Vec<Span>) {
        let section_id = self.id("SECT");
        let support_count = self.rng.gen_range(SUPPORTS_PER_SECTION);
        let span_count = self.rng.gen_range(SPANS_PER_SECTION);

        let supports: Vec<Support> = (0..support_count)
            .map(|_| self.support(&section_id))
            .collect();
        let spans: Vec<Span> = (0..span_count).map(|_| self.span()).collect();

        let section = Section {
            name: format!("section_{section_id}"),
            surveyed_on: self.date(),
            external_ref: self.id(""),
            kind: if self.rng.gen_bool(0.7) { "PHASE" } else { "GROUND" }.to_string(),
            circuit_code: format!(
                "{}{}_ID",
                self.base36(7).to_ascii_uppercase(),
                self.rng.gen_range(100..=999)
            ),
            line_code: format!(
                "{}{}",
                self.base36(7).to_ascii_uppercase(),
                self.rng.gen_range(100..=999)
            ),
            phase_count: self.rng.gen_range(1..=3),
            conductor_count: self.rng.gen_range(3..=12),
            ground_wire_count: self.rng.gen_range(2..=8),
            support_ids: supports.iter().map(|s| s.support_id.clone()).collect(),
            span_ids: spans.iter().map(|s| s.span_id.clone()).collect(),
            search_string,
            section_id,
        };

        (section, supports, spans)
    }

    fn support(&mut self, section_id: &str) -> Support {
        let support_id = self.id("SUPP");
        let attachment_id = self.id("ATTA");
        let attachment = self.attachment(attachment_id.clone());

        Support {
            support_id,
            attachment_id,
            section_id: section_id.to_string(),
            model_file: format!("{}.tow", self.base36(10)),
            azimuth_deg: self.rng.gen_range(0..=360),
            offset: self.rng.gen_range(OFFSET),
            easting: self.rng.gen_range(EASTING),
            northing: self.rng.gen_range(NORTHING),
            attachment,
            name: format!("pole_{}", self.rng.gen_range(100..=999)),
            suspension: self.rng.gen_bool(0.5),
            elevation_offset: self.rng.gen_range(OFFSET),
            circuit_count: self.rng.gen_range(1..=5),
            height_m: self.rng.gen_range(5..=15),
        }
    }

    fn attachment(&mut self, attachment_id: String) -> Attachment {
        Attachment {
            attachment_id,
            kind: if self.rng.gen_bool(0.5) { "SUSPENSION" } else { "ANCHOR" }.to_string(),
            label: format!("ATTACH{}", self.base36(5)),
            position: self.rng.gen_range(1..=20),
            offset: self.rng.gen_range(OFFSET),
            easting: self.rng.gen_range(EASTING),
            northing: self.rng.gen_range(NORTHING),
            set_ref: self.id("SET"),
            insulator_ref: self.id("INS"),
            energized: self.rng.gen_bool(0.5),
            load_kg: self.rng.gen_range(100..=500),
            tension_pct: self.rng.gen_range(50..=100),
        }
    }

    fn span(&mut self) -> Span {
        let order = self.rng.gen_range(100..=999);
        Span {
            span_id: self.id("SSPAN"),
            surveyed_on: self.date(),
            order_key: order,
            number: order,
            from_ref: self.id("YPRHAL"),
            to_ref: self.id("YPRHAL"),
            conductor_count: self.rng.gen_range(1..=10),
            crew: format!("TEAM_{}", self.base36(5).to_ascii_uppercase()),
            length_m: self.rng.gen_range(100..=1000),
            bearing_deg: self.rng.gen_range(0..=359),
        }
    }

    /// Prefix + 128 random bits in UUIDv4 layout.
    fn id(&mut self, prefix: &str) -> String {
        let bytes: [u8; 16] = self.rng.gen();
        let uuid = Builder::from_random_bytes(bytes).into_uuid();
        format!("{prefix}{}", uuid.simple())
    }

    fn base36(&mut self, len: usize) -> String {
        pick_chars(&mut self.rng, BASE36, len)
    }

    fn date(&mut self) -> String {
        let offset = self.rng.gen_range(0..=self.survey_days);
        self.survey_start
            .checked_add_days(Days::new(offset))
            .unwrap_or(self.survey_start)
            .format("%Y-%m-%d")
            .to_string()
    }
}
