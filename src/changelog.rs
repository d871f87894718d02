//! Membership Change Log
//!
//! An append-only, broadcast log of membership deltas. The pool actor is the
//! only writer; every subscriber reads through its own [`Cursor`], so one
//! consumer never steals or delays events meant for another.
//!
//! Appends take a short write lock on the arena and then bump the tail
//! position on a `watch` channel, which wakes any cursor awaiting the next
//! event. When the log is dropped, cursors drain whatever was appended and
//! then report [`Error::Closed`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use futures::stream::{self, Stream};
use tokio::sync::watch;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// A single membership delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// Endpoint joined the published set
    Add(Endpoint),
    /// Endpoint left the published set
    Rem(Endpoint),
}

impl ChangeEvent {
    /// The endpoint this event refers to
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            ChangeEvent::Add(ep) | ChangeEvent::Rem(ep) => ep,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, ChangeEvent::Add(_))
    }

    /// Replay this event onto a membership set
    pub fn apply(&self, set: &mut BTreeSet<Endpoint>) {
        match self {
            ChangeEvent::Add(ep) => {
                set.replace(ep.clone());
            }
            ChangeEvent::Rem(ep) => {
                set.remove(ep);
            }
        }
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeEvent::Add(ep) => write!(f, "ADD {}", ep),
            ChangeEvent::Rem(ep) => write!(f, "REM {}", ep),
        }
    }
}

type Arena = Arc<RwLock<Vec<ChangeEvent>>>;

/// Writer side of the log, owned by the pool actor
pub struct ChangeLog {
    events: Arena,
    tail: watch::Sender<usize>,
}

impl ChangeLog {
    /// Create an empty log
    pub fn new() -> Self {
        let (tail, _) = watch::channel(0);
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            tail,
        }
    }

    /// Append a batch of events atomically; returns the new tail position
    ///
    /// Cursors observe either none or all of the batch.
    pub fn append(&self, batch: Vec<ChangeEvent>) -> usize {
        if batch.is_empty() {
            return self.len();
        }

        let new_len = {
            let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
            events.extend(batch);
            events.len()
        };
        self.tail.send_replace(new_len);
        new_len
    }

    /// Number of events appended so far
    pub fn len(&self) -> usize {
        *self.tail.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh cursor positioned at the current tail
    pub fn cursor(&self) -> Cursor {
        Cursor {
            events: Arc::clone(&self.events),
            tail: self.tail.subscribe(),
            position: self.len(),
        }
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's position in the change log
///
/// Cloning a cursor yields an independent cursor at the same position.
#[derive(Clone)]
pub struct Cursor {
    events: Arena,
    tail: watch::Receiver<usize>,
    position: usize,
}

impl Cursor {
    /// Index of the next event this cursor will return
    pub fn position(&self) -> usize {
        self.position
    }

    /// Return the next event if one is already available
    ///
    /// `Ok(None)` means the cursor is caught up. `Err(Error::Closed)` means the
    /// log was closed and every event has been delivered.
    pub fn try_next(&mut self) -> Result<Option<ChangeEvent>> {
        // Closure must be observed before the tail so no trailing batch is lost
        let closed = self.tail.has_changed().is_err();
        let tail = *self.tail.borrow_and_update();

        if self.position < tail {
            let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
            let event = events
                .get(self.position)
                .cloned()
                .ok_or_else(|| Error::Internal("change log tail ahead of arena".into()))?;
            self.position += 1;
            return Ok(Some(event));
        }

        if closed {
            return Err(Error::Closed);
        }
        Ok(None)
    }

    /// Wait for the next event
    ///
    /// Never times out on its own; wrap in `tokio::time::timeout` or
    /// `select!` to impose a deadline.
    pub async fn next(&mut self) -> Result<ChangeEvent> {
        loop {
            if let Some(event) = self.try_next()? {
                return Ok(event);
            }
            // An error here means the writer is gone; the next try_next drains
            // what is left and then reports Closed.
            let _ = self.tail.changed().await;
        }
    }

    /// Adapt this cursor into a stream that ends when the log closes
    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> {
        stream::unfold(self, |mut cursor| async move {
            cursor.next().await.ok().map(|event| (event, cursor))
        })
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position)
            .finish()
    }
}
