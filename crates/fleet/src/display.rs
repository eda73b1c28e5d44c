// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic ranking and table rendering of sandbox records.

use std::cmp::Ordering;

use crate::detail::{SandboxRecord, NOT_AVAILABLE};
use crate::error::FleetError;
use crate::registry::LifecycleState;

/// Widest the table gets; wider terminals center it.
pub const MAX_TABLE_WIDTH: usize = 160;

/// Border and spacing allowance subtracted from the available width.
const CHROME: usize = 4;

const EMPTY_CELL: &str = "—";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub title: &'static str,
    pub base: usize,
    pub min: usize,
}

pub const COLUMNS: [Column; 6] = [
    Column { title: "NAME", base: 25, min: 15 },
    Column { title: "STATUS", base: 14, min: 12 },
    Column { title: "BRANCH", base: 25, min: 15 },
    Column { title: "GIT", base: 10, min: 8 },
    Column { title: "ACTIVITY", base: 12, min: 10 },
    Column { title: "AUTH", base: 12, min: 10 },
];

/// Columns that absorb leftover width: NAME and BRANCH.
const EXPANDABLE: [usize; 2] = [0, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Plain,
    /// Prefix each row with its 1-based selection index.
    Numbered,
}

fn total_base() -> usize {
    COLUMNS.iter().map(|c| c.base).sum()
}

/// Column widths for a table drawn into `available` terminal columns.
pub fn column_widths(available: usize) -> [usize; 6] {
    let total = total_base();
    let usable = available.min(MAX_TABLE_WIDTH).saturating_sub(CHROME).max(total);

    let mut widths = [0; 6];
    let mut remaining = usable as isize;
    for (width, col) in widths.iter_mut().zip(COLUMNS.iter()) {
        *width = (col.base * usable / total).max(col.min);
        remaining -= *width as isize;
    }
    if remaining > 0 {
        let extra = remaining as usize / EXPANDABLE.len();
        for idx in EXPANDABLE {
            widths[idx] += extra;
        }
    }
    widths
}

/// Running before everything else, then attention first, then by name.
pub fn rank_order(a: &SandboxRecord, b: &SandboxRecord) -> Ordering {
    b.state
        .is_running()
        .cmp(&a.state.is_running())
        .then_with(|| b.needs_attention.cmp(&a.needs_attention))
        .then_with(|| a.name.cmp(&b.name))
}

pub fn status_cell(record: &SandboxRecord) -> String {
    match &record.state {
        LifecycleState::Running if record.needs_attention => "⚠ Waiting".to_owned(),
        LifecycleState::Running if record.dormant => "○ Dormant".to_owned(),
        LifecycleState::Running => "● Running".to_owned(),
        LifecycleState::Exited => "■ Stopped".to_owned(),
        LifecycleState::Other(state) => format!("? {state}"),
    }
}

/// Records in display order.
#[derive(Debug, Clone, Default)]
pub struct Ranked {
    records: Vec<SandboxRecord>,
}

impl Ranked {
    pub fn new(mut records: Vec<SandboxRecord>) -> Self {
        records.sort_by(rank_order);
        Self { records }
    }

    pub fn records(&self) -> &[SandboxRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Map a 1-based index typed by the user back to its record.
    pub fn select(&self, input: &str) -> Result<&SandboxRecord, FleetError> {
        let trimmed = input.trim();
        let index: usize =
            trimmed.parse().map_err(|_| FleetError::InvalidSelection(trimmed.to_owned()))?;
        index
            .checked_sub(1)
            .and_then(|i| self.records.get(i))
            .ok_or_else(|| FleetError::InvalidSelection(trimmed.to_owned()))
    }

    /// Render the table for a terminal `width` columns wide.
    pub fn render(&self, mode: DisplayMode, width: usize) -> String {
        let widths = column_widths(width);
        let index_width = match mode {
            DisplayMode::Plain => 0,
            DisplayMode::Numbered => self.records.len().max(1).to_string().len() + 1,
        };

        let mut lines = Vec::with_capacity(self.records.len() + 2);
        let titles: Vec<String> = COLUMNS.iter().map(|c| c.title.to_owned()).collect();
        lines.push(row_line(index_cell(mode, index_width, None), &titles, &widths));

        let rule_width = widths.iter().sum::<usize>() + widths.len() - 1;
        let indent = if index_width > 0 { index_width + 1 } else { 0 };
        lines.push(format!("{}{}", " ".repeat(indent), "─".repeat(rule_width)));

        for (i, record) in self.records.iter().enumerate() {
            let cells = [
                record.short_name.clone(),
                status_cell(record),
                field(&record.branch),
                field(&record.git_status),
                field(&record.last_activity),
                field(&record.auth_status),
            ];
            lines.push(row_line(index_cell(mode, index_width, Some(i + 1)), &cells, &widths));
        }

        let table_width = indent + rule_width;
        let pad = if width > MAX_TABLE_WIDTH { (width - table_width.min(width)) / 2 } else { 0 };
        let margin = " ".repeat(pad);

        let mut out = String::new();
        for line in lines {
            out.push_str(&margin);
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

fn index_cell(mode: DisplayMode, width: usize, index: Option<usize>) -> Option<String> {
    match (mode, index) {
        (DisplayMode::Plain, _) => None,
        (DisplayMode::Numbered, Some(n)) => Some(format!("{:>width$}", format!("{n})"))),
        (DisplayMode::Numbered, None) => Some(" ".repeat(width)),
    }
}

fn row_line(index: Option<String>, cells: &[String], widths: &[usize]) -> String {
    let mut parts: Vec<String> = index.into_iter().collect();
    for (cell, &w) in cells.iter().zip(widths) {
        parts.push(format!("{:<w$}", truncate(cell, w)));
    }
    parts.join(" ")
}

/// Missing values render as an em dash.
fn field(value: &str) -> String {
    if value.is_empty() || value == NOT_AVAILABLE {
        EMPTY_CELL.to_owned()
    } else {
        value.to_owned()
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_owned();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
#[path = "display_tests.rs"]
mod tests;
