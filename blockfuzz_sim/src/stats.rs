//! Event statistics and the per-action results table.

use crate::error::SimError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Nested `route -> operation -> result -> count` tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventStats {
    events: BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>,
}

impl EventStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments one counter.
    pub fn tally(&mut self, route: &str, op: &str, result: &str) {
        self.add(route, op, result, 1);
    }

    /// Adds `count` to one counter.
    pub fn add(&mut self, route: &str, op: &str, result: &str, count: u64) {
        *self
            .events
            .entry(route.to_string())
            .or_default()
            .entry(op.to_string())
            .or_default()
            .entry(result.to_string())
            .or_insert(0) += count;
    }

    pub fn get(&self, route: &str, op: &str, result: &str) -> u64 {
        self.events
            .get(route)
            .and_then(|ops| ops.get(op))
            .and_then(|results| results.get(result))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.events
            .values()
            .flat_map(|ops| ops.values())
            .flat_map(|results| results.values())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Writes the tallies as pretty JSON.
    pub fn print<W: Write>(&self, w: &mut W) -> Result<(), SimError> {
        serde_json::to_writer_pretty(&mut *w, self)?;
        writeln!(w)?;
        Ok(())
    }

    /// Writes the tallies to a JSON file.
    pub fn export_json(&self, path: &Path) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Exported event statistics to {}", path.display());
        Ok(())
    }
}

/// One executed action, as stored in the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    pub height: u64,
    pub module: String,
    pub name: String,
    pub comment: String,
    pub passed: bool,
    pub gas_wanted: u64,
    pub gas_used: u64,

    /// Delivered message (null for no-ops)
    pub msg: serde_json::Value,

    /// Hex of the raw result payload
    pub result_data: String,

    /// Hex of the application's last commit hash after the action
    pub app_hash: String,
}

/// Append-only JSON-lines table of executed actions.
pub struct StatsTable {
    writer: BufWriter<File>,
}

impl StatsTable {
    /// Opens (or creates) the table file for appending.
    pub fn open(path: &Path) -> Result<Self, SimError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, row: &StatsRow) -> Result<(), SimError> {
        serde_json::to_writer(&mut self.writer, row)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SimError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Reads every row of a table file.
    pub fn read_rows(path: &Path) -> Result<Vec<StatsRow>, SimError> {
        let reader = BufReader::new(File::open(path)?);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Ok(rows)
    }
}
