use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::flow::EmployeeId;
use crate::domain::request::{RequestId, RequestStatus};

/// Every state-changing call maps to exactly one action kind. The level-bound
/// variants keep the acted-on level in the record so the trail reads without
/// joining back to the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Created,
    Edited,
    Approved { level: u32 },
    Rejected { level: u32 },
    Cancelled,
    Deleted,
}

impl ActionKind {
    /// Stable storage key, also indexed for action-type queries.
    pub fn as_key(&self) -> String {
        match self {
            Self::Created => "created".to_string(),
            Self::Edited => "edited".to_string(),
            Self::Approved { level } => format!("approved_level_{level}"),
            Self::Rejected { level } => format!("rejected_level_{level}"),
            Self::Cancelled => "cancelled".to_string(),
            Self::Deleted => "deleted".to_string(),
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        match raw {
            "created" => return Some(Self::Created),
            "edited" => return Some(Self::Edited),
            "cancelled" => return Some(Self::Cancelled),
            "deleted" => return Some(Self::Deleted),
            _ => {}
        }
        if let Some(level) = raw.strip_prefix("approved_level_") {
            return level.parse().ok().map(|level| Self::Approved { level });
        }
        if let Some(level) = raw.strip_prefix("rejected_level_") {
            return level.parse().ok().map(|level| Self::Rejected { level });
        }
        None
    }
}

/// Who acted, captured at action time so the trail survives employee churn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub actor_id: EmployeeId,
    pub name: String,
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub request_id: RequestId,
    pub seq: u32,
    pub action: ActionKind,
    pub actor: ActorSnapshot,
    pub comment: Option<String>,
    pub previous_status: Option<RequestStatus>,
    pub new_status: RequestStatus,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub valid: bool,
    pub verified_entries: usize,
    pub failure_reason: Option<String>,
}

/// Append-only trail owned by one request. The public surface has no update
/// or remove; entries are hash-chained so a rewritten stored entry no longer
/// verifies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLedger {
    entries: Vec<HistoryEntry>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate a ledger read back from storage. Entries must already be in
    /// seq order; `verify` reports any tampering or reordering.
    pub fn from_stored(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn append(
        &mut self,
        request_id: RequestId,
        action: ActionKind,
        actor: ActorSnapshot,
        comment: Option<String>,
        previous_status: Option<RequestStatus>,
        new_status: RequestStatus,
        created_at: DateTime<Utc>,
    ) -> &HistoryEntry {
        let seq = self.entries.len() as u32 + 1;
        let prev_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let entry_hash = hash_entry_material(
            &request_id,
            seq,
            &action,
            &actor.actor_id,
            comment.as_deref(),
            previous_status,
            new_status,
            prev_hash.as_deref(),
            created_at,
        );

        self.entries.push(HistoryEntry {
            request_id,
            seq,
            action,
            actor,
            comment,
            previous_status,
            new_status,
            prev_hash,
            entry_hash,
            created_at,
        });
        self.entries.last().unwrap_or_else(|| unreachable!("entry was just pushed"))
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Walk the chain recomputing every hash. Any mismatch identifies the
    /// first entry that no longer matches what was appended.
    pub fn verify(&self) -> LedgerVerification {
        let mut previous_hash: Option<&str> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let expected_seq = index as u32 + 1;
            if entry.seq != expected_seq {
                return failure(index, format!(
                    "seq mismatch at position {index}: expected {expected_seq}, found {}",
                    entry.seq
                ));
            }
            if entry.prev_hash.as_deref() != previous_hash {
                return failure(index, format!("previous hash mismatch at seq {}", entry.seq));
            }
            let computed = hash_entry_material(
                &entry.request_id,
                entry.seq,
                &entry.action,
                &entry.actor.actor_id,
                entry.comment.as_deref(),
                entry.previous_status,
                entry.new_status,
                entry.prev_hash.as_deref(),
                entry.created_at,
            );
            if computed != entry.entry_hash {
                return failure(index, format!("entry hash mismatch at seq {}", entry.seq));
            }
            previous_hash = Some(entry.entry_hash.as_str());
        }

        LedgerVerification {
            valid: true,
            verified_entries: self.entries.len(),
            failure_reason: None,
        }
    }
}

fn failure(verified_entries: usize, reason: String) -> LedgerVerification {
    LedgerVerification { valid: false, verified_entries, failure_reason: Some(reason) }
}

#[allow(clippy::too_many_arguments)]
fn hash_entry_material(
    request_id: &RequestId,
    seq: u32,
    action: &ActionKind,
    actor_id: &EmployeeId,
    comment: Option<&str>,
    previous_status: Option<RequestStatus>,
    new_status: RequestStatus,
    prev_hash: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        request_id.0,
        seq,
        action.as_key(),
        actor_id.0,
        comment.unwrap_or(""),
        previous_status.map(|status| status.as_key()).unwrap_or(""),
        new_status.as_key(),
        prev_hash.unwrap_or(""),
        created_at.to_rfc3339(),
    );
    sha256_hex(material.as_bytes())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
