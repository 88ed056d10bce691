//! Persisted model of one save attempt
//!
//! A save is described by a `SaveStatus`: the exhaustive per-unit transfer
//! and deletion lists, grouped by disc pair, plus the ordered scheme of
//! disc-level steps the executor walks through. The document is rewritten
//! after every completed unit of work, which is what makes an interrupted
//! save resumable. Scheme steps are a serde tagged union so the executor
//! matches exhaustively instead of sniffing shapes at runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Save mode. Copy leaves sources (and the VFS links) untouched; move
/// relocates content and repoints the VFS links at the new locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    Copy,
    Move,
}

impl SaveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
        }
    }
}

/// Progress flag for one virtual file or directory that must be
/// materialized at its save-mapped destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferStatus {
    pub virtual_path: PathBuf,
    #[serde(default)]
    pub completed: bool,
}

impl TransferStatus {
    pub fn new(virtual_path: impl Into<PathBuf>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            completed: false,
        }
    }
}

/// Progress flag for one actual file that lost its last virtual link and
/// must be deleted from disc (move mode only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionStatus {
    pub actual_path: PathBuf,
    #[serde(default)]
    pub completed: bool,
}

impl DeletionStatus {
    pub fn new(actual_path: impl Into<PathBuf>) -> Self {
        Self {
            actual_path: actual_path.into(),
            completed: false,
        }
    }
}

/// One disc-level step of the scheme, executed strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemeStep {
    /// Move or copy up to `byte_budget` bytes of pending transfers from
    /// `source_disc` to `dest_disc`. When `is_final_for_pair` is false the
    /// budget is a hard cap and the remainder rolls into a later step for
    /// the same pair; the final step accepts overflow.
    Transfer {
        source_disc: String,
        dest_disc: String,
        byte_budget: u64,
        is_final_for_pair: bool,
        #[serde(default)]
        bytes_done: u64,
        #[serde(default)]
        completed: bool,
    },
    /// Delete every pending no-longer-linked file from `disc`.
    Deletion {
        disc: String,
        #[serde(default)]
        completed: bool,
    },
}

impl SchemeStep {
    pub fn transfer(
        source_disc: impl Into<String>,
        dest_disc: impl Into<String>,
        byte_budget: u64,
        is_final_for_pair: bool,
    ) -> Self {
        Self::Transfer {
            source_disc: source_disc.into(),
            dest_disc: dest_disc.into(),
            byte_budget,
            is_final_for_pair,
            bytes_done: 0,
            completed: false,
        }
    }

    pub fn deletion(disc: impl Into<String>) -> Self {
        Self::Deletion {
            disc: disc.into(),
            completed: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self {
            Self::Transfer { completed, .. } | Self::Deletion { completed, .. } => *completed,
        }
    }

    pub fn mark_completed(&mut self) {
        match self {
            Self::Transfer { completed, .. } | Self::Deletion { completed, .. } => {
                *completed = true;
            }
        }
    }

    /// Short operator-facing description of the step.
    pub fn describe(&self) -> String {
        match self {
            Self::Transfer {
                source_disc,
                dest_disc,
                byte_budget,
                is_final_for_pair,
                ..
            } => format!(
                "transfer {} from disc {} to disc {}{}",
                crate::format::format_bytes(*byte_budget),
                source_disc,
                dest_disc,
                if *is_final_for_pair { " (final)" } else { "" }
            ),
            Self::Deletion { disc, .. } => format!("delete files from disc {disc}"),
        }
    }
}

/// Transfer obligations for one (source disc, destination disc) pair, in
/// the order they were discovered in the virtual tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairTransfers {
    pub source_disc: String,
    pub dest_disc: String,
    pub entries: Vec<TransferStatus>,
}

/// Deletion obligations for one disc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscDeletions {
    pub disc: String,
    pub entries: Vec<DeletionStatus>,
}

/// The root persisted object for one save attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveStatus {
    pub mode: SaveMode,
    pub transfers: Vec<PairTransfers>,
    pub deletions: Vec<DiscDeletions>,
    pub scheme: Vec<SchemeStep>,
    /// Copy mode starts with cleanup already done: copying never empties
    /// source directories.
    #[serde(default)]
    pub cleanup_done: bool,
}

impl SaveStatus {
    pub fn transfers_for(&self, source_disc: &str, dest_disc: &str) -> Option<&PairTransfers> {
        self.transfers
            .iter()
            .find(|pair| pair.source_disc == source_disc && pair.dest_disc == dest_disc)
    }

    pub fn transfers_for_mut(
        &mut self,
        source_disc: &str,
        dest_disc: &str,
    ) -> Option<&mut PairTransfers> {
        self.transfers
            .iter_mut()
            .find(|pair| pair.source_disc == source_disc && pair.dest_disc == dest_disc)
    }

    pub fn deletions_for(&self, disc: &str) -> Option<&DiscDeletions> {
        self.deletions.iter().find(|entry| entry.disc == disc)
    }

    pub fn deletions_for_mut(&mut self, disc: &str) -> Option<&mut DiscDeletions> {
        self.deletions.iter_mut().find(|entry| entry.disc == disc)
    }

    /// Whether a transfer entry for this virtual path is still pending
    /// anywhere in the status.
    pub fn is_transfer_pending(&self, virtual_path: &Path) -> bool {
        self.transfers.iter().any(|pair| {
            pair.entries
                .iter()
                .any(|entry| entry.virtual_path == virtual_path && !entry.completed)
        })
    }

    pub fn all_steps_completed(&self) -> bool {
        self.scheme.iter().all(SchemeStep::is_completed)
    }
}
