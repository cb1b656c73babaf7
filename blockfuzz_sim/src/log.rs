//! Deterministic operation log.
//!
//! Separate from diagnostic `tracing` output: this log records exactly what
//! was executed, in order, so two runs with the same seed can be diffed.

use crate::action::OperationMsg;
use crate::error::SimError;

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    BeginBlock,
    EndBlock,
    Msg,
    QueuedMsg,
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub kind: EntryKind,
    pub height: u64,

    /// Position within the block (0 for block boundaries)
    pub order: u64,

    /// Seed of the randomness scope the step ran in
    pub sub_seed: u64,

    /// Whether a message was delivered (always true for block boundaries)
    pub ok: bool,

    /// The outcome record, or null for block boundaries
    pub operation: serde_json::Value,

    /// Hex of the raw result payload
    pub result: String,
}

impl OperationEntry {
    pub fn begin_block(height: u64, sub_seed: u64) -> Self {
        Self::boundary(EntryKind::BeginBlock, height, sub_seed)
    }

    pub fn end_block(height: u64, sub_seed: u64) -> Self {
        Self::boundary(EntryKind::EndBlock, height, sub_seed)
    }

    fn boundary(kind: EntryKind, height: u64, sub_seed: u64) -> Self {
        Self {
            kind,
            height,
            order: 0,
            sub_seed,
            ok: true,
            operation: serde_json::Value::Null,
            result: String::new(),
        }
    }

    pub fn msg(height: u64, order: u64, sub_seed: u64, msg: &OperationMsg, result: &[u8]) -> Self {
        Self::executed(EntryKind::Msg, height, order, sub_seed, msg, result)
    }

    pub fn queued_msg(
        height: u64,
        order: u64,
        sub_seed: u64,
        msg: &OperationMsg,
        result: &[u8],
    ) -> Self {
        Self::executed(EntryKind::QueuedMsg, height, order, sub_seed, msg, result)
    }

    fn executed(
        kind: EntryKind,
        height: u64,
        order: u64,
        sub_seed: u64,
        msg: &OperationMsg,
        result: &[u8],
    ) -> Self {
        Self {
            kind,
            height,
            order,
            sub_seed,
            ok: msg.ok,
            operation: serde_json::to_value(msg).unwrap_or(serde_json::Value::Null),
            result: hex::encode_upper(result),
        }
    }
}

/// Ordered record of every executed step.
///
/// In lean mode, skipped (no-op) messages are not recorded.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<OperationEntry>,
    lean: bool,
}

impl OperationLog {
    pub fn new(lean: bool) -> Self {
        Self {
            entries: Vec::new(),
            lean,
        }
    }

    pub fn push(&mut self, entry: OperationEntry) {
        if self.lean && !entry.ok {
            return;
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[OperationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes one JSON line per entry.
    pub fn print_logs<W: Write>(&self, w: &mut W) -> Result<(), SimError> {
        for entry in &self.entries {
            serde_json::to_writer(&mut *w, entry)?;
            writeln!(w)?;
        }
        Ok(())
    }

    /// Writes the whole log as a pretty JSON array.
    pub fn write_to_file(&self, path: &Path) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json)?;
        info!("Exported {} log entries to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Finds the first entry where two logs differ.
    pub fn first_divergence(&self, other: &OperationLog) -> Option<usize> {
        let common = self.entries.len().min(other.entries.len());
        (0..common)
            .find(|i| self.entries[*i] != other.entries[*i])
            .or_else(|| (self.entries.len() != other.entries.len()).then_some(common))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivered() -> OperationMsg {
        OperationMsg::new("bank", "transfer", serde_json::json!({"amount": 3}), "")
    }

    #[test]
    fn test_lean_log_skips_no_ops() {
        let skipped = OperationMsg::no_op("bank", "transfer", "no funds");

        let mut full = OperationLog::new(false);
        let mut lean = OperationLog::new(true);
        for log in [&mut full, &mut lean] {
            log.push(OperationEntry::begin_block(1, 9));
            log.push(OperationEntry::msg(1, 0, 10, &delivered(), b"ok"));
            log.push(OperationEntry::msg(1, 1, 11, &skipped, &[]));
            log.push(OperationEntry::end_block(1, 9));
        }

        assert_eq!(full.len(), 4);
        assert_eq!(lean.len(), 3);
        assert!(lean.entries().iter().all(|e| e.ok));
    }

    #[test]
    fn test_entry_records_result_hex() {
        let entry = OperationEntry::queued_msg(4, 2, 77, &delivered(), &[0xab, 0x01]);

        assert_eq!(entry.kind, EntryKind::QueuedMsg);
        assert_eq!(entry.result, "AB01");
        assert_eq!(entry.operation["route"], "bank");
    }

    #[test]
    fn test_print_logs_one_line_per_entry() {
        let mut log = OperationLog::new(false);
        log.push(OperationEntry::begin_block(1, 1));
        log.push(OperationEntry::end_block(1, 1));

        let mut out = Vec::new();
        log.print_logs(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"begin_block\""));
    }

    #[test]
    fn test_first_divergence() {
        let mut a = OperationLog::new(false);
        let mut b = OperationLog::new(false);
        a.push(OperationEntry::begin_block(1, 1));
        b.push(OperationEntry::begin_block(1, 1));
        assert_eq!(a.first_divergence(&b), None);

        a.push(OperationEntry::msg(1, 0, 5, &delivered(), b"x"));
        b.push(OperationEntry::msg(1, 0, 6, &delivered(), b"x"));
        assert_eq!(a.first_divergence(&b), Some(1));

        let mut c = OperationLog::new(false);
        c.push(OperationEntry::begin_block(1, 1));
        assert_eq!(a.first_divergence(&c), Some(1));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.json");
        let mut log = OperationLog::new(false);
        log.push(OperationEntry::begin_block(3, 1));

        log.write_to_file(&path).unwrap();

        let entries: Vec<OperationEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(entries, log.entries());
    }
}
