//! Relational entities produced by the generator.
//!
//! A [`Section`] is the aggregate root of one benchmark row group. It owns a
//! set of [`Support`]s (each carrying exactly one [`Attachment`]) and a set of
//! [`Span`]s, referenced by identifier lists so that relational backends can
//! persist them through join tables.

use serde::{Deserialize, Serialize};

/// Leaf record owned by exactly one support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: String,
    /// `SUSPENSION` or `ANCHOR`.
    pub kind: String,
    pub label: String,
    pub position: i64,
    pub offset: i64,
    pub easting: i64,
    pub northing: i64,
    pub set_ref: String,
    pub insulator_ref: String,
    pub energized: bool,
    pub load_kg: i64,
    pub tension_pct: i64,
}

/// A support structure inside a section. Created together with its attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Support {
    pub support_id: String,
    /// Foreign key to [`Attachment::attachment_id`].
    pub attachment_id: String,
    pub section_id: String,
    pub model_file: String,
    pub azimuth_deg: i64,
    pub offset: i64,
    pub easting: i64,
    pub northing: i64,
    pub attachment: Attachment,
    pub name: String,
    pub suspension: bool,
    pub elevation_offset: i64,
    pub circuit_count: i64,
    pub height_m: i64,
}

/// A span between supports. `order_key` and `number` always hold the same
/// value; one is used for ordering, the other is exposed as a plain number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub surveyed_on: String,
    pub order_key: i64,
    pub number: i64,
    pub from_ref: String,
    pub to_ref: String,
    pub conductor_count: i64,
    pub crew: String,
    pub length_m: i64,
    pub bearing_deg: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub surveyed_on: String,
    pub external_ref: String,
    pub name: String,
    /// `PHASE` or `GROUND`.
    pub kind: String,
    pub circuit_code: String,
    pub line_code: String,
    pub phase_count: i64,
    pub conductor_count: i64,
    pub ground_wire_count: i64,
    pub support_ids: Vec<String>,
    pub span_ids: Vec<String>,
    /// Free-text search target. Holds the needle for every 100th section.
    pub search_string: String,
}

/// One generation batch, kept grouped per section.
///
/// `supports[i]` and `spans[i]` belong to `sections[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub sections: Vec<Section>,
    pub supports: Vec<Vec<Support>>,
    pub spans: Vec<Vec<Span>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn support_count(&self) -> usize {
        self.supports.iter().map(Vec::len).sum()
    }

    pub fn span_count(&self) -> usize {
        self.spans.iter().map(Vec::len).sum()
    }

    /// Number of sections whose search string is exactly `needle`.
    pub fn needle_count(&self, needle: &str) -> usize {
        self.sections
            .iter()
            .filter(|s| s.search_string == needle)
            .count()
    }

    pub fn all_supports(&self) -> impl Iterator<Item = &Support> {
        self.supports.iter().flatten()
    }

    pub fn all_spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter().flatten()
    }

    /// Iterate `(section, supports, spans)` groups in generation order.
    pub fn groups(&self) -> impl Iterator<Item = (&Section, &[Support], &[Span])> {
        self.sections
            .iter()
            .zip(self.supports.iter())
            .zip(self.spans.iter())
            .map(|((section, supports), spans)| (section, supports.as_slice(), spans.as_slice()))
    }

    /// Rough in-memory payload size: strings count their length, integers
    /// 8 bytes and booleans 4 bytes. Used for load logging only.
    pub fn approx_payload_bytes(&self) -> usize {
        let sections: usize = self.sections.iter().map(PayloadSize::payload_bytes).sum();
        let supports: usize = self.all_supports().map(PayloadSize::payload_bytes).sum();
        let spans: usize = self.all_spans().map(PayloadSize::payload_bytes).sum();
        sections + supports + spans
    }
}

const INT_BYTES: usize = 8;
const BOOL_BYTES: usize = 4;

pub trait PayloadSize {
    fn payload_bytes(&self) -> usize;
}

impl PayloadSize for Attachment {
    fn payload_bytes(&self) -> usize {
        self.attachment_id.len()
            + self.kind.len()
            + self.label.len()
            + self.set_ref.len()
            + self.insulator_ref.len()
            + BOOL_BYTES
            + 6 * INT_BYTES
    }
}

impl PayloadSize for Support {
    fn payload_bytes(&self) -> usize {
        self.support_id.len()
            + self.attachment_id.len()
            + self.section_id.len()
            + self.model_file.len()
            + self.name.len()
            + BOOL_BYTES
            + 8 * INT_BYTES
            + self.attachment.payload_bytes()
    }
}

impl PayloadSize for Span {
    fn payload_bytes(&self) -> usize {
        self.span_id.len()
            + self.surveyed_on.len()
            + self.from_ref.len()
            + self.to_ref.len()
            + self.crew.len()
            + 6 * INT_BYTES
    }
}

impl PayloadSize for Section {
    fn payload_bytes(&self) -> usize {
        let ids: usize = self
            .support_ids
            .iter()
            .chain(self.span_ids.iter())
            .map(String::len)
            .sum();
        self.section_id.len()
            + self.surveyed_on.len()
            + self.external_ref.len()
            + self.name.len()
            + self.kind.len()
            + self.circuit_code.len()
            + self.line_code.len()
            + self.search_string.len()
            + 3 * INT_BYTES
            + ids
    }
}
