//! Result registry: one row per result kind, one column per backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storebench_backends::ElapsedMs;

use crate::protocol::{ResultKind, WorkerEvent};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum Cell {
    #[default]
    Pending,
    Done(ElapsedMs),
    Failed(String),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Pending => "-".to_string(),
            Cell::Done(elapsed) => format!("{:.0} ms", elapsed.as_f64()),
            Cell::Failed(_) => "FAILED".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub kind: ResultKind,
    pub label: String,
    pub cells: BTreeMap<String, Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRegistry {
    pub section_count: usize,
    /// Column order.
    pub backends: Vec<String>,
    pub rows: Vec<ReportRow>,
}

impl ResultRegistry {
    pub fn new<I, S>(section_count: usize, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self {
            section_count,
            backends: Vec::new(),
            rows: ResultKind::ALL
                .iter()
                .map(|kind| ReportRow {
                    kind: *kind,
                    label: kind.label(section_count),
                    cells: BTreeMap::new(),
                })
                .collect(),
        };
        for backend in backends {
            registry.add_backend(backend.into());
        }
        registry
    }

    fn add_backend(&mut self, backend: String) {
        if self.backends.contains(&backend) {
            return;
        }
        for row in &mut self.rows {
            row.cells.entry(backend.clone()).or_default();
        }
        self.backends.push(backend);
    }

    fn row_mut(&mut self, kind: ResultKind) -> Option<&mut ReportRow> {
        self.rows.iter_mut().find(|row| row.kind == kind)
    }

    /// Record an event. A setup failure marks every row of that backend as
    /// failed since no phase after it ran.
    pub fn apply(&mut self, event: &WorkerEvent) {
        let backend = event.database().to_string();
        self.add_backend(backend.clone());

        let (kinds, cell) = match event {
            WorkerEvent::PhaseFailed { error, .. } => {
                let kinds = match event.kind() {
                    Some(kind) => vec![kind],
                    None => ResultKind::ALL.to_vec(),
                };
                (kinds, Cell::Failed(error.clone()))
            }
            _ => match (event.kind(), event.total_time()) {
                (Some(kind), Some(elapsed)) => (vec![kind], Cell::Done(elapsed)),
                _ => return,
            },
        };

        for kind in kinds {
            if let Some(row) = self.row_mut(kind) {
                row.cells.insert(backend.clone(), cell.clone());
            }
        }
    }

    pub fn cell(&self, kind: ResultKind, backend: &str) -> Option<&Cell> {
        self.rows
            .iter()
            .find(|row| row.kind == kind)
            .and_then(|row| row.cells.get(backend))
    }

    /// Every failure message, as `(kind, backend, message)`.
    pub fn failures(&self) -> Vec<(ResultKind, &str, &str)> {
        let mut failures = Vec::new();
        for row in &self.rows {
            for (backend, cell) in &row.cells {
                if let Cell::Failed(message) = cell {
                    failures.push((row.kind, backend.as_str(), message.as_str()));
                }
            }
        }
        failures
    }

    /// Plain-text table, times rounded to whole milliseconds.
    pub fn render_table(&self) -> String {
        let mut header = vec![String::new()];
        header.extend(self.backends.iter().cloned());

        let mut lines: Vec<Vec<String>> = vec![header];
        for row in &self.rows {
            let mut line = vec![row.label.clone()];
            for backend in &self.backends {
                line.push(row.cells.get(backend).cloned().unwrap_or_default().render());
            }
            lines.push(line);
        }

        let columns = self.backends.len() + 1;
        let widths: Vec<usize> = (0..columns)
            .map(|col| lines.iter().map(|line| line[col].len()).max().unwrap_or(0))
            .collect();

        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            let cells: Vec<String> = line
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(col, (cell, &width))| {
                    if col == 0 {
                        format!("{cell:<width$}")
                    } else {
                        format!("{cell:>width$}")
                    }
                })
                .collect();
            out.push_str(cells.join(" | ").trim_end());
            out.push('\n');
            if i == 0 {
                let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
                out.push_str(&rule.join("-+-"));
                out.push('\n');
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
