/*!
Undo events and their lifecycle.

```text
scheduled ──► restored
    │
    ├──────► expired
    │
    └──────► failed
```

`scheduled` is the only non-terminal state. Terminal events are kept for
audit and never move again.
*/

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::snapshot::Snapshot;
use crate::{Result, UndoError};

/// Default toast auto-hide delay in milliseconds.
pub const DEFAULT_AUTO_HIDE_MS: u64 = 5_000;

/// Lifecycle state of an [`UndoEvent`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UndoState {
    Scheduled,
    Restored,
    Expired,
    Failed,
}

impl UndoState {
    pub const ALL: [UndoState; 4] = [
        UndoState::Scheduled,
        UndoState::Restored,
        UndoState::Expired,
        UndoState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        self != Self::Scheduled
    }

    /// Only `scheduled` may move, and only into a terminal state.
    pub fn can_transition_to(self, next: UndoState) -> bool {
        self == Self::Scheduled && next.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Restored => "restored",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UndoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UndoState {
    type Err = UndoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UndoError::invalid_format(format!("unknown undo state '{s}'")))
    }
}

/// Presentation data handed back to the caller with the token
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UndoMetadata {
    pub toast_message: String,
    pub resource_label: String,
    pub resource_dom_id: String,
    /// Toast auto-hide delay in milliseconds
    pub auto_hide_after: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// A scheduled deletion and the snapshot needed to undo it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UndoEvent {
    /// The undo token
    pub id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub snapshot: Snapshot,
    /// SHA-256 of the snapshot taken when the event was created
    pub snapshot_digest: String,
    pub metadata: UndoMetadata,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: UndoState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl UndoEvent {
    /// Create a `scheduled` event expiring `ttl` after `now`.
    ///
    /// # Errors
    /// * `UndoError::Argument` - If `ttl` is negative
    pub fn schedule(
        snapshot: Snapshot,
        resource_id: String,
        metadata: UndoMetadata,
        deleted_by: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        if ttl < Duration::zero() {
            return Err(UndoError::argument("undo TTL cannot be negative"));
        }
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| UndoError::argument("undo TTL overflows the calendar"))?;

        Ok(Self {
            id: Uuid::new_v4(),
            resource_type: snapshot.entity_type.clone(),
            resource_id,
            snapshot_digest: snapshot.digest()?,
            snapshot,
            metadata,
            deleted_by,
            created_at: now,
            expires_at,
            updated_at: now,
            state: UndoState::Scheduled,
            failure_reason: None,
        })
    }

    pub fn token(&self) -> String {
        self.id.to_string()
    }

    /// Whether the undo window has closed at `now`.
    ///
    /// The deadline instant itself is already outside the window, so a zero
    /// TTL is never restorable.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move to a terminal state.
    ///
    /// # Errors
    /// * `UndoError::ExpiredToken` - If the event already left `scheduled`
    pub fn transition(&mut self, next: UndoState, at: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(UndoError::expired(self.token()));
        }
        self.state = next;
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_restored(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(UndoState::Restored, at)
    }

    pub fn mark_expired(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(UndoState::Expired, at)
    }

    pub fn mark_failed<S: Into<String>>(&mut self, reason: S, at: DateTime<Utc>) -> Result<()> {
        self.transition(UndoState::Failed, at)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Check the stored snapshot against the digest taken at schedule time
    pub fn verify_snapshot(&self) -> Result<()> {
        let actual = self.snapshot.digest()?;
        if actual == self.snapshot_digest {
            Ok(())
        } else {
            Err(UndoError::IntegrityCheckFailed {
                expected: self.snapshot_digest.clone(),
                actual,
            })
        }
    }

    pub fn receipt(&self) -> ScheduleReceipt {
        ScheduleReceipt {
            token: self.id,
            expires_at: self.expires_at,
            toast_message: self.metadata.toast_message.clone(),
            resource_label: self.metadata.resource_label.clone(),
            resource_dom_id: self.metadata.resource_dom_id.clone(),
            auto_hide_after: self.metadata.auto_hide_after,
            redirect_path: self.metadata.redirect_path.clone(),
        }
    }
}

/// What the calling layer needs to render an undo toast
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduleReceipt {
    #[serde(rename = "undo_token")]
    pub token: Uuid,
    #[serde(rename = "undo_deadline")]
    pub expires_at: DateTime<Utc>,
    pub toast_message: String,
    #[serde(rename = "resource")]
    pub resource_label: String,
    pub resource_dom_id: String,
    pub auto_hide_after: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> UndoMetadata {
        UndoMetadata {
            toast_message: "Deleted Aphid".to_string(),
            resource_label: "Aphid".to_string(),
            resource_dom_id: "pest_1".to_string(),
            auto_hide_after: DEFAULT_AUTO_HIDE_MS,
            redirect_path: None,
            extra: BTreeMap::new(),
        }
    }

    fn event(ttl: Duration) -> UndoEvent {
        let snapshot = Snapshot::new("Pest");
        UndoEvent::schedule(snapshot, "1".into(), metadata(), None, Utc::now(), ttl).unwrap()
    }

    #[test]
    fn test_state_machine() {
        use UndoState::*;
        assert!(Scheduled.can_transition_to(Restored));
        assert!(Scheduled.can_transition_to(Expired));
        assert!(Scheduled.can_transition_to(Failed));
        assert!(!Scheduled.can_transition_to(Scheduled));
        for terminal in [Restored, Expired, Failed] {
            assert!(terminal.is_terminal());
            for next in UndoState::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_terminal_event_is_immutable() {
        let mut event = event(Duration::minutes(5));
        event.mark_restored(Utc::now()).unwrap();

        let err = event.mark_expired(Utc::now()).unwrap_err();
        assert!(matches!(err, UndoError::ExpiredToken { .. }));
        assert_eq!(event.state, UndoState::Restored);
    }

    #[test]
    fn test_failure_reason_recorded() {
        let mut event = event(Duration::minutes(5));
        event.mark_failed("name has already been taken", Utc::now()).unwrap();
        assert_eq!(event.state, UndoState::Failed);
        assert_eq!(event.failure_reason.as_deref(), Some("name has already been taken"));
    }

    #[test]
    fn test_expiry_boundary() {
        let event = event(Duration::minutes(5));
        assert!(!event.is_expired_at(event.created_at));
        assert!(event.is_expired_at(event.expires_at));

        let instant = self::event(Duration::zero());
        assert!(instant.is_expired_at(instant.created_at));
    }

    #[test]
    fn test_negative_ttl_rejected() {
        let result = UndoEvent::schedule(
            Snapshot::new("Pest"),
            "1".into(),
            metadata(),
            None,
            Utc::now(),
            Duration::seconds(-1),
        );
        assert!(matches!(result, Err(UndoError::Argument(_))));
    }

    #[test]
    fn test_snapshot_tampering_detected() {
        let mut event = event(Duration::minutes(5));
        assert!(event.verify_snapshot().is_ok());

        event
            .snapshot
            .attributes
            .insert("name".into(), Value::from("Mite"));
        assert!(matches!(
            event.verify_snapshot(),
            Err(UndoError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn test_receipt_wire_names() {
        let event = event(Duration::minutes(5));
        let json = serde_json::to_value(event.receipt()).unwrap();
        for key in [
            "undo_token",
            "undo_deadline",
            "toast_message",
            "resource",
            "resource_dom_id",
            "auto_hide_after",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["undo_token"], event.token());
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("expired".parse::<UndoState>().unwrap(), UndoState::Expired);
        assert!("pending".parse::<UndoState>().is_err());
        assert_eq!(
            serde_json::to_value(UndoState::Restored).unwrap(),
            Value::from("restored")
        );
    }
}
