//! Per-user tender actions and corrigendum change tracking.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Action requested on `POST /tenderiq/tenders/:id/actions`
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenderActionType {
    ToggleWishlist,
    ToggleFavorite,
    ToggleArchive,
    UpdateStatus,
}

/// Bid pipeline status a user assigns to a tender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenderStatus {
    New,
    Reviewed,
    Shortlisted,
    BidSubmitted,
    Won,
    Lost,
    NotInterested,
}

impl TenderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reviewed => "reviewed",
            Self::Shortlisted => "shortlisted",
            Self::BidSubmitted => "bid_submitted",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::NotInterested => "not_interested",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "reviewed" => Some(Self::Reviewed),
            "shortlisted" => Some(Self::Shortlisted),
            "bid_submitted" => Some(Self::BidSubmitted),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            "not_interested" => Some(Self::NotInterested),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenderActionPayload {
    #[serde(default)]
    pub status: Option<TenderStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenderActionRequest {
    pub action: TenderActionType,
    #[serde(default)]
    pub payload: Option<TenderActionPayload>,
}

impl TenderActionRequest {
    pub fn notes(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.notes.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

/// Entry written to the tender action log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggedAction {
    Wishlisted,
    Unwishlisted,
    Favorited,
    Unfavorited,
    Archived,
    Unarchived,
    StatusChanged,
    Shortlisted,
    CorrigendumApplied,
}

impl LoggedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wishlisted => "wishlisted",
            Self::Unwishlisted => "unwishlisted",
            Self::Favorited => "favorited",
            Self::Unfavorited => "unfavorited",
            Self::Archived => "archived",
            Self::Unarchived => "unarchived",
            Self::StatusChanged => "status_changed",
            Self::Shortlisted => "shortlisted",
            Self::CorrigendumApplied => "corrigendum_applied",
        }
    }

    /// Confirmation shown to the user.
    pub fn message(self) -> &'static str {
        match self {
            Self::Wishlisted => "Added to wishlist",
            Self::Unwishlisted => "Removed from wishlist",
            Self::Favorited => "Added to favourites",
            Self::Unfavorited => "Removed from favourites",
            Self::Archived => "Tender archived",
            Self::Unarchived => "Tender restored from archive",
            Self::StatusChanged => "Tender status updated",
            Self::Shortlisted => "Tender shortlisted",
            Self::CorrigendumApplied => "Corrigendum applied",
        }
    }
}

impl fmt::Display for LoggedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's flags on one tender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenderFlags {
    pub is_wishlisted: bool,
    pub is_favorite: bool,
    pub is_archived: bool,
    pub status: Option<TenderStatus>,
}

impl TenderFlags {
    /// Flags after `request`, and the log entry it produces.
    pub fn apply(self, request: &TenderActionRequest) -> Result<(Self, LoggedAction), String> {
        let mut next = self;
        let logged = match request.action {
            TenderActionType::ToggleWishlist => {
                next.is_wishlisted = !self.is_wishlisted;
                if next.is_wishlisted {
                    LoggedAction::Wishlisted
                } else {
                    LoggedAction::Unwishlisted
                }
            }
            TenderActionType::ToggleFavorite => {
                next.is_favorite = !self.is_favorite;
                if next.is_favorite {
                    LoggedAction::Favorited
                } else {
                    LoggedAction::Unfavorited
                }
            }
            TenderActionType::ToggleArchive => {
                next.is_archived = !self.is_archived;
                if next.is_archived {
                    LoggedAction::Archived
                } else {
                    LoggedAction::Unarchived
                }
            }
            TenderActionType::UpdateStatus => {
                let status = request
                    .payload
                    .as_ref()
                    .and_then(|p| p.status)
                    .ok_or_else(|| "Status payload is required for this action".to_string())?;
                next.status = Some(status);
                if status == TenderStatus::Shortlisted {
                    LoggedAction::Shortlisted
                } else {
                    LoggedAction::StatusChanged
                }
            }
        };
        Ok((next, logged))
    }

    /// Whether this transition should start an analysis.
    pub fn newly_wishlisted(self, next: Self) -> bool {
        !self.is_wishlisted && next.is_wishlisted
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenderActionResponse {
    pub message: String,
    pub tender_id: Uuid,
    pub is_wishlisted: bool,
    pub is_favorite: bool,
    pub is_archived: bool,
    pub status: Option<TenderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenderActionLogEntry {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub action: String,
    pub notes: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// A tracked field that differs between two scraped versions of a tender
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub field_label: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_type: ChangeType,
}

/// Fields of a scraped tender that a corrigendum can change
#[derive(Debug, Clone, Default)]
pub struct TenderSnapshot {
    pub tender_name: Option<String>,
    pub summary: Option<String>,
    pub value: Option<String>,
    pub tender_value: Option<String>,
    pub tender_type: Option<String>,
    pub due_date: Option<String>,
    pub last_date_of_bid_submission: Option<String>,
    pub tender_opening_date: Option<String>,
    pub tendering_authority: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl TenderSnapshot {
    fn tracked(&self) -> [(&'static str, &'static str, Option<&str>); 11] {
        [
            ("tender_name", "Tender Name", self.tender_name.as_deref()),
            ("summary", "Summary", self.summary.as_deref()),
            ("value", "Tender Value", self.value.as_deref()),
            ("tender_value", "Estimated Value", self.tender_value.as_deref()),
            ("tender_type", "Tender Type", self.tender_type.as_deref()),
            ("due_date", "Due Date", self.due_date.as_deref()),
            (
                "last_date_of_bid_submission",
                "Last Date of Bid Submission",
                self.last_date_of_bid_submission.as_deref(),
            ),
            ("tender_opening_date", "Tender Opening Date", self.tender_opening_date.as_deref()),
            ("tendering_authority", "Tendering Authority", self.tendering_authority.as_deref()),
            ("city", "City", self.city.as_deref()),
            ("state", "State", self.state.as_deref()),
        ]
    }
}

/// Field-level differences from `old` to `new`. Blank values count as unset
/// and surrounding whitespace is ignored.
pub fn diff_versions(old: &TenderSnapshot, new: &TenderSnapshot) -> Vec<FieldChange> {
    fn clean(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|v| !v.is_empty())
    }

    old.tracked()
        .into_iter()
        .zip(new.tracked())
        .filter_map(|((field, label, before), (_, _, after))| {
            let (before, after) = (clean(before), clean(after));
            let change_type = match (before, after) {
                (None, None) => return None,
                (Some(a), Some(b)) if a == b => return None,
                (None, Some(_)) => ChangeType::Added,
                (Some(_), None) => ChangeType::Removed,
                (Some(_), Some(_)) => ChangeType::Modified,
            };
            Some(FieldChange {
                field: field.to_string(),
                field_label: label.to_string(),
                old_value: before.map(String::from),
                new_value: after.map(String::from),
                change_type,
            })
        })
        .collect()
}

/// Changes of the newest version of a tender against the one before it
#[derive(Debug, Clone, Serialize)]
pub struct TenderChangesResponse {
    pub tender_id: Uuid,
    pub latest_version_id: Uuid,
    pub previous_version_id: Option<Uuid>,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplyCorrigendumRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyCorrigendumResponse {
    pub status: &'static str,
    pub message: String,
    pub changes: Vec<FieldChange>,
    pub action_log_id: Option<Uuid>,
}

/// One scraped version of a tender and what changed in it
#[derive(Debug, Clone, Serialize)]
pub struct TenderHistoryEntry {
    pub version_id: Uuid,
    pub scrape_run_id: Uuid,
    pub release_date: NaiveDate,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenderHistoryResponse {
    pub tender_id_str: String,
    pub total_changes: usize,
    pub history: Vec<TenderHistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: TenderActionType, status: Option<TenderStatus>) -> TenderActionRequest {
        TenderActionRequest {
            action,
            payload: Some(TenderActionPayload {
                status,
                notes: Some("  ".into()),
            }),
        }
    }

    #[test]
    fn wishlist_toggles_and_reports_first_add() {
        let flags = TenderFlags::default();
        let (wishlisted, logged) = flags
            .apply(&request(TenderActionType::ToggleWishlist, None))
            .unwrap();
        assert!(wishlisted.is_wishlisted);
        assert_eq!(logged, LoggedAction::Wishlisted);
        assert!(flags.newly_wishlisted(wishlisted));

        let (removed, logged) = wishlisted
            .apply(&request(TenderActionType::ToggleWishlist, None))
            .unwrap();
        assert!(!removed.is_wishlisted);
        assert_eq!(logged, LoggedAction::Unwishlisted);
        assert!(!wishlisted.newly_wishlisted(removed));
    }

    #[test]
    fn toggles_leave_other_flags_alone() {
        let flags = TenderFlags {
            is_wishlisted: true,
            status: Some(TenderStatus::Reviewed),
            ..Default::default()
        };
        let (next, logged) = flags
            .apply(&request(TenderActionType::ToggleArchive, None))
            .unwrap();
        assert_eq!(logged, LoggedAction::Archived);
        assert!(next.is_archived && next.is_wishlisted && !next.is_favorite);
        assert_eq!(next.status, Some(TenderStatus::Reviewed));
    }

    #[test]
    fn status_update_requires_a_status() {
        let flags = TenderFlags::default();
        assert!(flags
            .apply(&request(TenderActionType::UpdateStatus, None))
            .is_err());

        let (next, logged) = flags
            .apply(&request(TenderActionType::UpdateStatus, Some(TenderStatus::Shortlisted)))
            .unwrap();
        assert_eq!(next.status, Some(TenderStatus::Shortlisted));
        assert_eq!(logged, LoggedAction::Shortlisted);

        let (_, logged) = next
            .apply(&request(TenderActionType::UpdateStatus, Some(TenderStatus::Won)))
            .unwrap();
        assert_eq!(logged, LoggedAction::StatusChanged);
    }

    #[test]
    fn blank_notes_are_dropped() {
        assert_eq!(request(TenderActionType::ToggleFavorite, None).notes(), None);
        let parsed: TenderActionRequest = serde_json::from_str(
            r#"{"action": "update_status", "payload": {"status": "bid_submitted", "notes": " sent "}}"#,
        )
        .unwrap();
        assert_eq!(parsed.notes(), Some("sent"));
        assert_eq!(parsed.payload.and_then(|p| p.status), Some(TenderStatus::BidSubmitted));
    }

    #[test]
    fn diff_reports_added_removed_and_modified_fields() {
        let old = TenderSnapshot {
            tender_name: Some("Road works".into()),
            due_date: Some("10-11-2025".into()),
            city: Some("Pune".into()),
            value: Some(" ".into()),
            ..Default::default()
        };
        let new = TenderSnapshot {
            tender_name: Some(" Road works ".into()),
            due_date: Some("24-11-2025".into()),
            tender_value: Some("2.5 Cr".into()),
            ..Default::default()
        };

        let changes = diff_versions(&old, &new);
        let fields: Vec<_> = changes.iter().map(|c| (c.field.as_str(), c.change_type)).collect();
        assert_eq!(
            fields,
            vec![
                ("tender_value", ChangeType::Added),
                ("due_date", ChangeType::Modified),
                ("city", ChangeType::Removed),
            ]
        );
        assert_eq!(changes[1].old_value.as_deref(), Some("10-11-2025"));
        assert_eq!(changes[1].field_label, "Due Date");
        assert!(diff_versions(&new, &new).is_empty());
    }

    #[test]
    fn status_text_round_trips() {
        for status in [TenderStatus::New, TenderStatus::BidSubmitted, TenderStatus::NotInterested] {
            assert_eq!(TenderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TenderStatus::parse("Shortlisted"), None);
    }
}
