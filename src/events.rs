//! Persisted admin events.
//!
//! State changes go through `transition`, which re-reads the event inside a
//! write transaction and refuses anything but a forward step, so two
//! dispatchers can never both claim the same NEW event.

use chrono::{DateTime, Utc};
use heed::Env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{AdminEvent, EventState};
use crate::store::StrDb;

/// How long terminal events stay around for polling.
pub const DEFAULT_EVENT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone)]
pub struct EventStore {
    env: Arc<Env>,
    events: StrDb,
}

impl EventStore {
    pub fn new(env: Arc<Env>, events: StrDb) -> Self {
        Self { env, events }
    }

    /// Persists a NEW event and returns its id.
    pub fn submit(&self, event: AdminEvent) -> Result<Uuid> {
        if event.state != EventState::New {
            return Err(Error::InvalidTransition {
                id: event.id,
                from: event.state,
                to: EventState::New,
            });
        }
        let key = event.id.to_string();
        let payload = serde_json::to_string(&event)?;
        let mut wtxn = self.env.write_txn()?;
        self.events.put(&mut wtxn, key.as_str(), payload.as_str())?;
        wtxn.commit()?;

        tracing::info!(
            event_id = %event.id,
            requested_by = %event.requested_by,
            event_type = ?event.event_type(),
            "event submitted"
        );
        Ok(event.id)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<AdminEvent>> {
        let key = id.to_string();
        let rtxn = self.env.read_txn()?;
        match self.events.get(&rtxn, key.as_str())? {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    /// All events, oldest request first.
    pub fn list(&self) -> Result<Vec<AdminEvent>> {
        let rtxn = self.env.read_txn()?;
        let mut events = Vec::new();
        for item in self.events.iter(&rtxn)? {
            let (_, raw) = item?;
            events.push(serde_json::from_str::<AdminEvent>(raw)?);
        }
        events.sort_by(|a, b| {
            a.requested_on
                .cmp(&b.requested_on)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(events)
    }

    /// NEW events, oldest request first.
    pub fn pending(&self) -> Result<Vec<AdminEvent>> {
        let mut events = self.list()?;
        events.retain(|e| e.state == EventState::New);
        Ok(events)
    }

    /// Moves the event one step forward. Terminal states are stamped with
    /// the completion time; `error` is kept for FAILED.
    pub fn transition(
        &self,
        id: Uuid,
        next: EventState,
        error: Option<String>,
    ) -> Result<AdminEvent> {
        let key = id.to_string();
        let mut wtxn = self.env.write_txn()?;
        let mut event: AdminEvent = match self.events.get(&wtxn, key.as_str())? {
            Some(raw) => serde_json::from_str(raw)?,
            None => return Err(Error::EventNotFound(id)),
        };
        if !event.state.can_advance_to(next) {
            return Err(Error::InvalidTransition {
                id,
                from: event.state,
                to: next,
            });
        }

        event.state = next;
        if next.is_terminal() {
            event.completed = Some(Utc::now());
        }
        if next == EventState::Failed {
            event.error = error;
        }
        let payload = serde_json::to_string(&event)?;
        self.events.put(&mut wtxn, key.as_str(), payload.as_str())?;
        wtxn.commit()?;

        tracing::debug!(event_id = %id, state = %next, "event transitioned");
        Ok(event)
    }

    /// NEW -> PROCESSING.
    pub fn claim(&self, id: Uuid) -> Result<AdminEvent> {
        self.transition(id, EventState::Processing, None)
    }

    /// Removes terminal events completed more than `ttl` before `now`.
    pub fn expire(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut wtxn = self.env.write_txn()?;
        let mut expired = Vec::new();
        for item in self.events.iter(&wtxn)? {
            let (key, raw) = item?;
            let event: AdminEvent = serde_json::from_str(raw)?;
            if event.state.is_terminal() && event.completed.is_some_and(|done| done < cutoff) {
                expired.push(key.to_string());
            }
        }
        for key in expired.iter() {
            self.events.delete(&mut wtxn, key.as_str())?;
        }
        wtxn.commit()?;

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "expired completed events");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiOperation, ApiTarget};
    use crate::store::IndexStore;

    fn open_events() -> anyhow::Result<(tempfile::TempDir, EventStore)> {
        let dir = tempfile::tempdir()?;
        let store = IndexStore::open(dir.path().join("events.lmdb"))?;
        Ok((dir, store.events()))
    }

    fn delete_event() -> AdminEvent {
        AdminEvent::new("admin", ApiOperation::Delete(ApiTarget::by_name("Servlet")))
    }

    #[test]
    fn lifecycle_moves_forward_only() -> anyhow::Result<()> {
        let (_dir, events) = open_events()?;
        let id = events.submit(delete_event())?;
        assert_eq!(events.get(id)?.map(|e| e.state), Some(EventState::New));

        let err = events
            .transition(id, EventState::Completed, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let claimed = events.claim(id)?;
        assert_eq!(claimed.state, EventState::Processing);
        assert!(claimed.completed.is_none());
        assert!(matches!(events.claim(id), Err(Error::InvalidTransition { .. })));

        let done = events.transition(id, EventState::Failed, Some("boom".to_string()))?;
        assert_eq!(done.state, EventState::Failed);
        assert_eq!(done.error.as_deref(), Some("boom"));
        assert!(done.completed.is_some());

        assert!(matches!(
            events.transition(id, EventState::Completed, None),
            Err(Error::InvalidTransition { .. })
        ));
        Ok(())
    }

    #[test]
    fn pending_lists_new_events_in_request_order() -> anyhow::Result<()> {
        let (_dir, events) = open_events()?;
        let mut first = delete_event();
        first.requested_on = Utc::now() - chrono::Duration::minutes(5);
        let first = events.submit(first)?;
        let second = events.submit(delete_event())?;
        let third = events.submit(delete_event())?;
        events.claim(third)?;

        let ids: Vec<_> = events.pending()?.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, second]);
        Ok(())
    }

    #[test]
    fn expire_drops_only_old_terminal_events() -> anyhow::Result<()> {
        let (_dir, events) = open_events()?;
        let done = events.submit(delete_event())?;
        events.claim(done)?;
        events.transition(done, EventState::Completed, None)?;
        let waiting = events.submit(delete_event())?;

        assert_eq!(events.expire(Utc::now(), DEFAULT_EVENT_TTL)?, 0);
        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(events.expire(later, DEFAULT_EVENT_TTL)?, 1);
        assert!(events.get(done)?.is_none());
        assert!(events.get(waiting)?.is_some());
        Ok(())
    }

    #[test]
    fn unknown_event_is_reported() -> anyhow::Result<()> {
        let (_dir, events) = open_events()?;
        let id = Uuid::new_v4();
        assert!(matches!(events.claim(id), Err(Error::EventNotFound(missing)) if missing == id));
        Ok(())
    }
}
