use super::{Hit, StoreClient, StoreResult};
use serde_json::Value;

/// Pulls every hit of a query batch by batch through a scroll context.
///
/// The scroll context is released on the store as soon as an empty batch is
/// seen or [`Scroller::close`] is called.
pub struct Scroller<'a> {
    store: &'a dyn StoreClient,
    index: String,
    body: Value,
    keep_alive: String,
    scroll_id: Option<String>,
    started: bool,
    exhausted: bool,
    total: u64,
}

impl<'a> Scroller<'a> {
    pub fn new(
        store: &'a dyn StoreClient,
        index: impl Into<String>,
        body: Value,
        keep_alive: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index: index.into(),
            body,
            keep_alive: keep_alive.into(),
            scroll_id: None,
            started: false,
            exhausted: false,
            total: 0,
        }
    }

    /// Total hit count reported by the first page.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns the next non-empty batch, or `None` once the query is drained.
    pub async fn next_batch(&mut self) -> StoreResult<Option<Vec<Hit>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = if !self.started {
            self.started = true;
            let page = self
                .store
                .scroll_start(&self.index, &self.body, &self.keep_alive)
                .await?;
            self.total = page.total;
            page
        } else {
            match self.scroll_id.clone() {
                Some(scroll_id) => self.store.scroll_next(&scroll_id, &self.keep_alive).await?,
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            }
        };

        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id;
        }

        if page.hits.is_empty() {
            self.close().await?;
            return Ok(None);
        }

        Ok(Some(page.hits))
    }

    pub async fn close(&mut self) -> StoreResult<()> {
        self.exhausted = true;
        if let Some(scroll_id) = self.scroll_id.take() {
            self.store.clear_scroll(&scroll_id).await?;
        }
        Ok(())
    }
}

/// Runs `on_batch` over every batch of hits matching `body`, returning how
/// many hits were seen. An error from the callback stops the scroll and
/// releases the context before being returned.
pub async fn scroll_each<F>(
    store: &dyn StoreClient,
    index: &str,
    body: Value,
    keep_alive: &str,
    mut on_batch: F,
) -> StoreResult<u64>
where
    F: FnMut(Vec<Hit>) -> StoreResult<()>,
{
    let mut scroller = Scroller::new(store, index, body, keep_alive);
    let mut seen = 0;
    while let Some(batch) = scroller.next_batch().await? {
        seen += batch.len() as u64;
        if let Err(err) = on_batch(batch) {
            scroller.close().await?;
            return Err(err);
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use serde_json::json;

    #[tokio::test]
    async fn test_scroller_drains_all_batches_and_clears_context() {
        let store = MemoryStore::new().with_scroll_batch_size(2);
        store.seed_index("context-session", json!({}));
        for i in 0..5 {
            store.seed_document("context-session", &format!("s{i}"), json!({"n": i}));
        }

        let mut scroller = Scroller::new(
            &store,
            "context-session",
            json!({"query": {"match_all": {}}}),
            "1m",
        );

        let mut seen = Vec::new();
        while let Some(batch) = scroller.next_batch().await.unwrap() {
            assert!(batch.len() <= 2);
            seen.extend(batch.into_iter().map(|hit| hit.id));
        }

        assert_eq!(scroller.total(), 5);
        assert_eq!(seen, vec!["s0", "s1", "s2", "s3", "s4"]);
        assert_eq!(store.open_scrolls(), 0);
        assert!(scroller.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scroll_each_stops_on_callback_error() {
        let store = MemoryStore::new().with_scroll_batch_size(2);
        store.seed_index("context-event", json!({}));
        for i in 0..6 {
            store.seed_document("context-event", &format!("e{i}"), json!({"n": i}));
        }

        let mut batches = 0;
        let result = scroll_each(&store, "context-event", json!({}), "1m", |_| {
            batches += 1;
            if batches == 2 {
                Err(StoreError::Unavailable("bulk rejected".to_string()))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(batches, 2);
        assert_eq!(store.open_scrolls(), 0);

        let seen = scroll_each(&store, "context-event", json!({}), "1m", |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(seen, 6);
    }
}
