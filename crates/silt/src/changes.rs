//! The durable change feed: event log polling, cursor persistence, dispatch.
//!
//! One runner task per collection polls `_events` past the earliest
//! subscription cursor, processes all rows sharing the next timestamp as a
//! single batch, and dispatches each event to every matching subscription.
//! A cursor is advanced (in memory and in `_cursors`) only after its
//! subscriber returns `Ok`, which is what makes delivery at-least-once: a
//! crash or callback failure between delivery and cursor write replays the
//! event.
//!
//! Subscriptions registered under a durable name resume from their persisted
//! cursor across restarts; anonymous subscriptions mint a fresh name and
//! start at the time of registration (no history replay).

use crate::db::now_ms;
use crate::gateway::Gateway;
use crate::schema::ensure_feed_tables;
use crate::triggers;
use rusqlite::types::Value as SqlValue;
use silt_core::{EventKind, EventRecord, FeedConfig, Result, Subscriber};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// What to subscribe to: a collection, an event kind, and optionally a
/// durable name under which the cursor survives process restarts.
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    pub collection: String,
    pub kind: EventKind,
    pub name: Option<String>,
}

impl SubscriptionSpec {
    pub fn new(collection: impl Into<String>, kind: EventKind) -> Self {
        Self {
            collection: collection.into(),
            kind,
            name: None,
        }
    }

    /// Durable variant: the same name resumes from its stored cursor.
    pub fn durable(collection: impl Into<String>, kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            kind,
            name: Some(name.into()),
        }
    }
}

struct Registration {
    cursor_name: String,
    kind: EventKind,
    cursor: i64,
    subscriber: Arc<dyn Subscriber>,
}

struct RunnerHandle {
    stopped: Arc<AtomicBool>,
    /// Set by the runner, under the subscriptions lock, once it has decided
    /// to exit; `register` checks it under the same lock so a registration is
    /// never pushed into a runner that will not see it.
    exited: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<Vec<Registration>>>,
    join: JoinHandle<()>,
}

/// The change feed engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    gateway: Gateway,
    config: FeedConfig,
    runners: Mutex<HashMap<String, RunnerHandle>>,
}

impl ChangeFeed {
    pub(crate) fn new(gateway: Gateway, config: FeedConfig) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                gateway,
                config,
                runners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a subscription and start its collection runner if needed.
    ///
    /// Errors during table/trigger/cursor installation propagate, so a caller
    /// that gets `Ok` knows the subscription took effect. The collection
    /// table must already exist (`SiltDb::subscribe` guarantees this).
    pub async fn register(
        &self,
        spec: SubscriptionSpec,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Subscription> {
        ensure_feed_tables(&self.inner.gateway).await?;
        triggers::install(&self.inner.gateway, &spec.collection, spec.kind).await?;

        let cursor_name = spec
            .name
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let existing = self
            .inner
            .gateway
            .find_one(
                "SELECT date FROM _cursors WHERE name = ?1",
                vec![SqlValue::Text(cursor_name.clone())],
            )
            .await?;
        let cursor = match existing {
            Some(row) => row.integer("date")?,
            None => {
                let now = now_ms();
                self.inner
                    .gateway
                    .run(
                        "INSERT INTO _cursors (name, date) VALUES (?1, ?2)",
                        vec![SqlValue::Text(cursor_name.clone()), SqlValue::Integer(now)],
                    )
                    .await?;
                now
            }
        };

        let mut registration = Some(Registration {
            cursor_name: cursor_name.clone(),
            kind: spec.kind,
            cursor,
            subscriber,
        });

        let mut runners = self.inner.runners.lock().await;

        if let Some(handle) = runners.get(&spec.collection) {
            let mut subs = handle.subscriptions.lock().await;
            if !handle.exited.load(Ordering::SeqCst) {
                subs.push(registration.take().unwrap());
            }
        }

        if let Some(registration) = registration {
            // first subscription for the collection, or its runner exited
            let subscriptions = Arc::new(Mutex::new(vec![registration]));
            let stopped = Arc::new(AtomicBool::new(false));
            let exited = Arc::new(AtomicBool::new(false));
            let join = tokio::spawn(run_collection(
                spec.collection.clone(),
                self.inner.gateway.clone(),
                self.inner.config.clone(),
                subscriptions.clone(),
                stopped.clone(),
                exited.clone(),
            ));
            runners.insert(
                spec.collection.clone(),
                RunnerHandle {
                    stopped,
                    exited,
                    subscriptions,
                    join,
                },
            );
        }

        Ok(Subscription {
            collection: spec.collection,
            cursor_name,
            feed: self.clone(),
        })
    }

    /// Signal every runner to stop and wait for them to exit.
    pub async fn stop(&self) {
        let mut runners = self.inner.runners.lock().await;
        for handle in runners.values() {
            handle.stopped.store(true, Ordering::SeqCst);
        }
        for handle in runners.values_mut() {
            // a handle already joined by an earlier stop must not be polled again
            if !handle.join.is_finished() {
                let _ = (&mut handle.join).await;
            }
        }
    }

    /// Stop all runners and clear in-memory state. Table teardown belongs to
    /// `SiltDb::reset`; the feed re-initializes on the next `register`.
    pub async fn reset(&self) {
        self.stop().await;
        self.inner.runners.lock().await.clear();
    }
}

/// Live subscription handle; unsubscribe to detach and delete the cursor.
pub struct Subscription {
    collection: String,
    cursor_name: String,
    feed: ChangeFeed,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The `_cursors` row name (the durable name, or the minted id).
    pub fn cursor_name(&self) -> &str {
        &self.cursor_name
    }

    /// Detach this subscription and delete its cursor row. A runner with no
    /// remaining subscriptions exits at its next iteration.
    ///
    /// Must not be called from inside the subscription's own callback.
    pub async fn unsubscribe(self) -> Result<()> {
        {
            let runners = self.feed.inner.runners.lock().await;
            if let Some(handle) = runners.get(&self.collection) {
                handle
                    .subscriptions
                    .lock()
                    .await
                    .retain(|r| r.cursor_name != self.cursor_name);
            }
        }

        self.feed
            .inner
            .gateway
            .run(
                "DELETE FROM _cursors WHERE name = ?1",
                vec![SqlValue::Text(self.cursor_name)],
            )
            .await?;
        Ok(())
    }
}

async fn persist_cursor(gateway: &Gateway, name: &str, date: i64) -> Result<()> {
    gateway
        .run(
            "UPDATE _cursors SET date = ?1 WHERE name = ?2",
            vec![SqlValue::Integer(date), SqlValue::Text(name.to_string())],
        )
        .await?;
    Ok(())
}

/// All event rows sharing `date`, deduplicated by document id (first wins),
/// in id order.
async fn fetch_batch(gateway: &Gateway, collection: &str, date: i64) -> Result<Vec<EventRecord>> {
    let rows = gateway
        .query(
            "SELECT col, id, type, date, before, after FROM _events \
             WHERE col = ?1 AND date = ?2 ORDER BY date ASC, id ASC",
            vec![
                SqlValue::Text(collection.to_string()),
                SqlValue::Integer(date),
            ],
        )
        .await?;

    let mut records = Vec::with_capacity(rows.len());
    let mut seen = HashSet::new();
    for row in rows {
        let record = EventRecord {
            collection: row.text("col")?,
            id: row.text("id")?,
            kind: EventKind::from_str(&row.text("type")?)?,
            date: row.integer("date")?,
            before: row.opt_text("before")?,
            after: row.opt_text("after")?,
        };
        if seen.insert(record.id.clone()) {
            records.push(record);
        }
    }
    Ok(records)
}

/// The poll/dispatch loop for one collection.
async fn run_collection(
    collection: String,
    gateway: Gateway,
    config: FeedConfig,
    subscriptions: Arc<Mutex<Vec<Registration>>>,
    stopped: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
) {
    tracing::info!(collection = %collection, "change feed runner started");
    let mut empty_polls: u32 = 0;

    loop {
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        // Held for the whole iteration: register/unsubscribe wait for the
        // iteration boundary.
        let mut subs = subscriptions.lock().await;
        if subs.is_empty() {
            // flagged under the lock so no registration lands here unseen
            exited.store(true, Ordering::SeqCst);
            break;
        }

        let earliest = subs.iter().map(|s| s.cursor).min().unwrap_or(i64::MAX);

        let peek = match gateway
            .find_one(
                "SELECT date FROM _events WHERE col = ?1 AND date > ?2 \
                 ORDER BY date ASC LIMIT 1",
                vec![
                    SqlValue::Text(collection.clone()),
                    SqlValue::Integer(earliest),
                ],
            )
            .await
        {
            Ok(peek) => peek,
            Err(e) => {
                tracing::error!(collection = %collection, error = %e, "event poll failed");
                drop(subs);
                tokio::time::sleep(config.error_backoff()).await;
                continue;
            }
        };

        let Some(peek) = peek else {
            drop(subs);
            tokio::time::sleep(config.idle_backoff(empty_polls)).await;
            empty_polls += 1;
            continue;
        };

        let batch = match peek.integer("date") {
            Ok(date) => fetch_batch(&gateway, &collection, date).await,
            Err(e) => Err(e),
        };
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(collection = %collection, error = %e, "event batch read failed");
                drop(subs);
                tokio::time::sleep(config.error_backoff()).await;
                continue;
            }
        };

        // Replay guard: every row in the batch shares one date, so the filter
        // must compare against cursors as of batch start, not cursors already
        // advanced by earlier rows of this batch.
        let snapshot: Vec<i64> = subs.iter().map(|s| s.cursor).collect();

        let mut failed = false;
        'events: for record in batch {
            let date = record.date;
            let event = match record.inflate() {
                Ok(event) => Some(event),
                Err(e) => {
                    // An undecodable row would stall the feed; cursors still
                    // advance past it below.
                    tracing::error!(collection = %collection, error = %e, "skipping undecodable event");
                    None
                }
            };

            for (i, sub) in subs.iter_mut().enumerate() {
                if snapshot[i] >= date {
                    continue;
                }

                let matching = event
                    .as_ref()
                    .map(|e| sub.kind.accepts(e.kind()))
                    .unwrap_or(false);

                if matching {
                    // `matching` implies the event inflated
                    let event = event.clone().unwrap();
                    if let Err(e) = sub.subscriber.on_event(event).await {
                        tracing::error!(
                            collection = %collection,
                            subscription = %sub.cursor_name,
                            error = %e,
                            "subscriber callback failed"
                        );
                        failed = true;
                        break 'events;
                    }
                }

                // Non-matching events also move the cursor: a subscription
                // must not pin the runner on events it will never consume.
                sub.cursor = date;
                if let Err(e) = persist_cursor(&gateway, &sub.cursor_name, date).await {
                    tracing::error!(
                        subscription = %sub.cursor_name,
                        error = %e,
                        "cursor update failed"
                    );
                    failed = true;
                    break 'events;
                }
            }
        }

        drop(subs);
        if failed {
            tokio::time::sleep(config.error_backoff()).await;
            continue;
        }
        empty_polls = 0;
    }

    exited.store(true, Ordering::SeqCst);
    tracing::info!(collection = %collection, "change feed runner stopped");
}
