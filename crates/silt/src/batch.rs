//! Deferred write batches flushed inside one SQL transaction.
//!
//! Writes are composed eagerly (same upsert as `save`) but executed only on
//! [`Batcher::execute`]. A failed flush rolls the transaction back and leaves
//! the queue intact for the caller to inspect.

use crate::collection::{compose_upsert, Collection, ComposedWrite};
use crate::gateway::Gateway;
use futures::{Stream, StreamExt};
use rusqlite::params_from_iter;
use silt_core::{Document, Result, SiltError};

pub struct Batcher {
    gateway: Gateway,
    queued: Vec<QueuedWrite>,
}

#[derive(Clone)]
struct QueuedWrite {
    sql: String,
    args: Vec<rusqlite::types::Value>,
}

impl From<ComposedWrite> for QueuedWrite {
    fn from(write: ComposedWrite) -> Self {
        Self {
            sql: write.sql,
            args: write.args,
        }
    }
}

impl Batcher {
    pub(crate) fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            queued: Vec::new(),
        }
    }

    /// Queue an upsert of `doc` into `collection`.
    pub fn add(&mut self, collection: &Collection, doc: Document) -> Result<()> {
        let write = compose_upsert(collection.name(), collection.indexes(), doc)?;
        self.queued.push(write.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Flush the queue inside one engine transaction.
    ///
    /// On commit the queue is cleared and the number of committed writes is
    /// returned; on error the transaction is rolled back and the queue kept.
    pub async fn execute(&mut self) -> Result<usize> {
        if self.queued.is_empty() {
            return Ok(0);
        }

        let writes = self.queued.clone();
        let count = writes.len();
        self.gateway
            .transaction(move |tx| {
                for write in &writes {
                    tx.execute(&write.sql, params_from_iter(write.args.clone()))
                        .map_err(|e| SiltError::Sql(e.to_string()))?;
                }
                Ok(())
            })
            .await?;

        self.queued.clear();
        Ok(count)
    }

    /// Drive `f` over `items`, flushing whenever the queue reaches
    /// `batch_size`, with a final flush after the iterator is exhausted.
    /// Returns the total number of committed writes.
    pub async fn fill<I, T, F>(&mut self, items: I, mut f: F, batch_size: usize) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&mut Batcher, T) -> Result<()>,
    {
        let mut total = 0;
        for item in items {
            f(self, item)?;
            if self.queued.len() >= batch_size {
                total += self.execute().await?;
            }
        }
        total += self.execute().await?;
        Ok(total)
    }

    /// [`fill`](Self::fill) over an async stream.
    pub async fn fill_stream<S, T, F>(
        &mut self,
        mut items: S,
        mut f: F,
        batch_size: usize,
    ) -> Result<usize>
    where
        S: Stream<Item = T> + Unpin,
        F: FnMut(&mut Batcher, T) -> Result<()>,
    {
        let mut total = 0;
        while let Some(item) = items.next().await {
            f(self, item)?;
            if self.queued.len() >= batch_size {
                total += self.execute().await?;
            }
        }
        total += self.execute().await?;
        Ok(total)
    }
}
