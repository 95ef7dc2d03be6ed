/*!
Deletion-undo lifecycle.

[`DeletionUndoManager`] ties the snapshot builder, the restorer and the event
store together behind three operations:

- `schedule`: snapshot a persisted record, destroy it and hand back an undo token
- `restore`: rebuild the snapshot while the token is still valid
- `finalize_expired`: sweep every scheduled event whose deadline has passed

Each operation runs inside one [`Database::transaction`]. The check of an
event's state and its transition happen under the same transaction, so two
callers racing on one token cannot both restore it.
*/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::UndoConfig;
use crate::entity::{EntityStore, Record};
use crate::event::{UndoEvent, UndoMetadata, UndoState};
use crate::observability;
use crate::registry::TypeRegistry;
use crate::snapshot::{SnapshotBuilder, SnapshotRestorer};
use crate::store::{Database, UndoEventStore};
use crate::{Result, UndoError};

/// Per-call TTL override key in [`ScheduleRequest::metadata`] entries
pub const TTL_METADATA_KEY: &str = "ttl_seconds";

/// Everything `schedule` needs to know about one deletion
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    record: Record,
    actor: Option<String>,
    toast_message: Option<String>,
    auto_hide_after: Option<u64>,
    redirect_path: Option<String>,
    extra: BTreeMap<String, Value>,
    ttl: Option<Duration>,
}

impl ScheduleRequest {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            actor: None,
            toast_message: None,
            auto_hide_after: None,
            redirect_path: None,
            extra: BTreeMap::new(),
            ttl: None,
        }
    }

    /// Who performed the deletion
    pub fn actor<S: Into<String>>(mut self, actor: S) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Toast text; defaults to "`<label>` deleted"
    pub fn toast_message<S: Into<String>>(mut self, message: S) -> Self {
        self.toast_message = Some(message.into());
        self
    }

    /// Toast auto-hide delay in milliseconds
    pub fn auto_hide_after(mut self, millis: u64) -> Self {
        self.auto_hide_after = Some(millis);
        self
    }

    pub fn redirect_path<S: Into<String>>(mut self, path: S) -> Self {
        self.redirect_path = Some(path.into());
        self
    }

    /// Free-form metadata stored with the event. A `ttl_seconds` entry
    /// overrides the configured undo window.
    pub fn metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Undo window for this deletion only; takes precedence over `ttl_seconds`
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn resolve_ttl(&self, config: &UndoConfig) -> Result<Duration> {
        if let Some(ttl) = self.ttl {
            return Ok(ttl);
        }
        let Some(raw) = self.extra.get(TTL_METADATA_KEY) else {
            return Ok(config.ttl());
        };

        let seconds = match raw {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        seconds
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                UndoError::argument(format!("{TTL_METADATA_KEY} must be an integer, got {raw}"))
            })
    }
}

enum RestoreOutcome {
    Restored { event: UndoEvent, rows: usize },
    Expired,
}

/// Entry point for scheduling and undoing deletions
pub struct DeletionUndoManager<D: Database> {
    registry: Arc<TypeRegistry>,
    database: D,
    config: UndoConfig,
}

impl<D: Database> DeletionUndoManager<D> {
    /// Manager with the default configuration
    pub fn new(registry: Arc<TypeRegistry>, database: D) -> Self {
        Self::with_config(registry, database, UndoConfig::default())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, database: D, config: UndoConfig) -> Self {
        Self {
            registry,
            database,
            config,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    /// Snapshot `request.record`, destroy it and record an undo event.
    ///
    /// # Returns
    /// The new `scheduled` event; [`UndoEvent::receipt`] has what a toast needs
    ///
    /// # Errors
    /// * `UndoError::Argument` - If the record was never persisted, no longer
    ///   exists, or the TTL override is invalid
    /// * `UndoError::ReferenceConstraint` - If surviving rows still reference
    ///   something the destroy would remove, or a singular relationship holds
    ///   more than one row
    pub fn schedule(&self, request: ScheduleRequest) -> Result<UndoEvent> {
        self.schedule_at(request, Utc::now())
    }

    /// [`schedule`](Self::schedule) with an explicit clock
    pub fn schedule_at(&self, request: ScheduleRequest, now: DateTime<Utc>) -> Result<UndoEvent> {
        let key = request.record.key().ok_or_else(|| {
            UndoError::argument(format!(
                "cannot schedule deletion of an unsaved {}",
                request.record.entity_type
            ))
        })?;
        let ttl = request.resolve_ttl(&self.config)?;
        let registry = &*self.registry;
        let auto_hide_after = request
            .auto_hide_after
            .unwrap_or(self.config.auto_hide_after_ms);

        let event = self.database.transaction(|tx| {
            let current = tx
                .find(&key.entity_type, key.id)?
                .ok_or_else(|| UndoError::argument(format!("{key} does not exist")))?;

            let snapshot = SnapshotBuilder::new(registry, &*tx).build(&current)?;
            let label = current.label();
            let metadata = UndoMetadata {
                toast_message: request
                    .toast_message
                    .clone()
                    .unwrap_or_else(|| format!("{label} deleted")),
                resource_dom_id: current.dom_id(),
                resource_label: label,
                auto_hide_after,
                redirect_path: request.redirect_path.clone(),
                extra: request.extra.clone(),
            };

            let event = UndoEvent::schedule(
                snapshot,
                key.id.to_string(),
                metadata,
                request.actor.clone(),
                now,
                ttl,
            )?;
            tx.insert_event(event.clone())?;
            tx.destroy(&current)?;
            Ok(event)
        })?;

        let nodes = event.snapshot.node_count();
        observability::record_scheduled(nodes);
        info!(
            token = %event.id,
            resource = %key,
            nodes,
            expires_at = %event.expires_at,
            "Deletion scheduled for undo"
        );
        Ok(event)
    }

    /// Rebuild the deletion behind `token`.
    ///
    /// # Errors
    /// * `UndoError::NotFound` - If the token is unknown or malformed
    /// * `UndoError::ExpiredToken` - If the undo window has closed or the event
    ///   was already handled; a lapsed `scheduled` event is marked `expired`
    /// * `UndoError::RestoreConflict` - If the store rejected a restored row;
    ///   the event is marked `failed`
    ///
    /// Any other failure also marks the event `failed` and is returned as is.
    pub fn restore(&self, token: &str) -> Result<UndoEvent> {
        self.restore_at(token, Utc::now())
    }

    /// [`restore`](Self::restore) with an explicit clock
    pub fn restore_at(&self, token: &str, now: DateTime<Utc>) -> Result<UndoEvent> {
        let id = Uuid::parse_str(token.trim()).map_err(|_| UndoError::NotFound(token.to_string()))?;
        let registry = &*self.registry;
        let started = Instant::now();

        let outcome = self.database.transaction(|tx| {
            let mut event = tx
                .find_event(id)?
                .ok_or_else(|| UndoError::NotFound(token.to_string()))?;

            if event.state == UndoState::Scheduled && event.is_expired_at(now) {
                event.mark_expired(now)?;
                tx.update_event(&event)?;
                return Ok(RestoreOutcome::Expired);
            }
            if event.state != UndoState::Scheduled {
                return Err(UndoError::expired(token));
            }

            event.verify_snapshot()?;
            let mut restorer = SnapshotRestorer::new(registry, &mut *tx);
            restorer.restore(&event.snapshot)?;
            let rows = restorer.restored_count();

            event.mark_restored(now)?;
            tx.update_event(&event)?;
            Ok(RestoreOutcome::Restored { event, rows })
        });

        match outcome {
            Ok(RestoreOutcome::Restored { event, rows }) => {
                observability::record_restored(started.elapsed());
                info!(
                    token = %event.id,
                    resource_type = %event.resource_type,
                    resource_id = %event.resource_id,
                    rows,
                    "Deletion undone"
                );
                Ok(event)
            }
            Ok(RestoreOutcome::Expired) => {
                observability::record_expired(1);
                info!(token = %id, "Undo attempted after the deadline; event expired");
                Err(UndoError::expired(token))
            }
            Err(err @ (UndoError::NotFound(_) | UndoError::ExpiredToken { .. })) => Err(err),
            Err(err) => {
                self.mark_failed(id, &err, now);
                if err.is_persistence_conflict() {
                    Err(UndoError::RestoreConflict(err.to_string()))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Record a failed restore in its own transaction, after the restore's
    /// writes were rolled back. Only a still-`scheduled` event is touched.
    fn mark_failed(&self, id: Uuid, cause: &UndoError, now: DateTime<Utc>) {
        let reason = cause.to_string();
        let marked = self.database.transaction(|tx| {
            let Some(mut event) = tx.find_event(id)? else {
                return Ok(false);
            };
            if event.state != UndoState::Scheduled {
                return Ok(false);
            }
            event.mark_failed(reason.clone(), now)?;
            tx.update_event(&event)?;
            Ok(true)
        });

        match marked {
            Ok(true) => {
                observability::record_failed();
                warn!(token = %id, reason = %reason, "Restore failed; event marked failed");
            }
            Ok(false) => debug!(token = %id, "Restore failed after the event left scheduled"),
            Err(e) => error!(token = %id, error = %e, "Could not mark undo event failed"),
        }
    }

    /// Expire every `scheduled` event whose deadline is at or before `now`.
    ///
    /// # Returns
    /// How many events were expired
    pub fn finalize_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.database.transaction(|tx| {
            let due = tx.due_events(now)?;
            for mut event in due.iter().cloned() {
                event.mark_expired(now)?;
                tx.update_event(&event)?;
            }
            Ok(due.len())
        })?;

        if expired > 0 {
            observability::record_expired(expired);
            info!(expired, "Expired undo events finalized");
        } else {
            debug!("No undo events due");
        }
        Ok(expired)
    }

    /// Look up an event by token, whatever its state
    pub fn find(&self, token: &str) -> Result<Option<UndoEvent>> {
        let Ok(id) = Uuid::parse_str(token.trim()) else {
            return Ok(None);
        };
        self.database.transaction(|tx| tx.find_event(id))
    }

    /// Every event, oldest first
    pub fn events(&self) -> Result<Vec<UndoEvent>> {
        self.database.transaction(|tx| tx.all_events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use crate::registry::{EntityType, FieldDescriptor, RelationshipDescriptor};

    fn manager() -> DeletionUndoManager<MemoryDatabase> {
        let registry = Arc::new(
            TypeRegistry::new()
                .with_type(
                    EntityType::new("Crop")
                        .with_field(FieldDescriptor::text("name").required().unique())
                        .with_relationship(RelationshipDescriptor::has_many(
                            "stages", "CropStage", "crop_id",
                        )),
                )
                .with_type(
                    EntityType::new("CropStage")
                        .with_field(FieldDescriptor::reference("crop_id", "Crop"))
                        .with_field(FieldDescriptor::text("name")),
                ),
        );
        let database = MemoryDatabase::new(Arc::clone(&registry));
        DeletionUndoManager::new(registry, database)
    }

    fn seed(manager: &DeletionUndoManager<MemoryDatabase>) -> Record {
        manager
            .database()
            .transaction(|tx| {
                let crop = tx.save(Record::new("Crop").with("name", "Rice"))?;
                let crop_id = crop.id.unwrap_or_default();
                tx.save(Record::new("CropStage").with("crop_id", crop_id).with("name", "Seedling"))?;
                Ok(crop)
            })
            .unwrap()
    }

    #[test]
    fn test_schedule_defaults() {
        let manager = manager();
        let crop = seed(&manager);

        let event = manager.schedule(ScheduleRequest::new(crop)).unwrap();
        assert_eq!(event.state, UndoState::Scheduled);
        assert_eq!(event.metadata.toast_message, "Rice deleted");
        assert_eq!(event.metadata.resource_dom_id, "crop_1");
        assert_eq!(event.metadata.auto_hide_after, 5_000);
        assert_eq!(event.expires_at - event.created_at, Duration::minutes(5));

        let state = manager.database().state().unwrap();
        assert_eq!(state.count("Crop"), 0);
        assert_eq!(state.count("CropStage"), 0);
    }

    #[test]
    fn test_ttl_override_precedence() {
        let config = UndoConfig::default();
        let record = Record::new("Crop").with_id(1);

        let from_metadata = ScheduleRequest::new(record.clone()).metadata(TTL_METADATA_KEY, 30);
        assert_eq!(from_metadata.resolve_ttl(&config).unwrap(), Duration::seconds(30));

        let explicit = from_metadata.ttl(Duration::seconds(5));
        assert_eq!(explicit.resolve_ttl(&config).unwrap(), Duration::seconds(5));

        let from_string = ScheduleRequest::new(record.clone()).metadata(TTL_METADATA_KEY, "90");
        assert_eq!(from_string.resolve_ttl(&config).unwrap(), Duration::seconds(90));

        let bad = ScheduleRequest::new(record).metadata(TTL_METADATA_KEY, "soon");
        assert!(matches!(bad.resolve_ttl(&config), Err(UndoError::Argument(_))));
    }

    #[test]
    fn test_schedule_unsaved_record() {
        let manager = manager();
        let err = manager
            .schedule(ScheduleRequest::new(Record::new("Crop").with("name", "Oat")))
            .unwrap_err();
        assert!(matches!(err, UndoError::Argument(_)));
        assert!(manager.events().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_token_is_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.restore("not-a-token"),
            Err(UndoError::NotFound(_))
        ));
        assert!(manager.find("not-a-token").unwrap().is_none());
    }

    #[test]
    fn test_lazy_expiry_commits_transition() {
        let manager = manager();
        let crop = seed(&manager);
        let event = manager.schedule(ScheduleRequest::new(crop)).unwrap();

        let later = event.expires_at + Duration::seconds(1);
        let err = manager.restore_at(&event.token(), later).unwrap_err();
        assert!(matches!(err, UndoError::ExpiredToken { .. }));

        let stored = manager.find(&event.token()).unwrap().unwrap();
        assert_eq!(stored.state, UndoState::Expired);
        assert_eq!(manager.database().state().unwrap().count("Crop"), 0);
    }
}
