// Schema Publication Cache
//
// Tracks the schema-mapping statements the backing store has been told about.
// Entries are keyed by exact statement text. Registration is insert-if-absent and
// each entry owns a OnceCell, so concurrent executions referencing the same
// mapping run the publish call at most once. A failed publish leaves the cell
// empty and the next command retries.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, Default)]
pub struct SchemaPublicationCache {
    entries: DashMap<String, Arc<OnceCell<()>>>,
}

impl SchemaPublicationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publication statement, returning its (possibly existing) entry
    pub fn register(&self, statement: &str) -> Arc<OnceCell<()>> {
        self.entries
            .entry(statement.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone()
    }

    pub fn is_registered(&self, statement: &str) -> bool {
        self.entries.contains_key(statement)
    }

    pub fn is_published(&self, statement: &str) -> bool {
        self.entries
            .get(statement)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Registered statements the store has not acknowledged yet
    pub fn pending(&self) -> Vec<String> {
        let mut pending: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().initialized())
            .map(|e| e.key().clone())
            .collect();
        pending.sort();
        pending
    }

    pub fn published_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `publish` for `statement` unless it already succeeded
    ///
    /// Returns `Ok(true)` when this call performed the publication and
    /// `Ok(false)` when another caller had already done so. Concurrent callers
    /// wait for the in-flight publication instead of issuing their own.
    pub async fn ensure_published<F, Fut, E>(&self, statement: &str, publish: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let cell = self.register(statement);
        if cell.initialized() {
            tracing::debug!("Schema mapping already published: {}", statement);
            return Ok(false);
        }

        let published_here = AtomicBool::new(false);
        let flag = &published_here;
        cell.get_or_try_init(move || async move {
            publish().await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await?;

        let published = published_here.load(Ordering::SeqCst);
        if published {
            tracing::info!("Published schema mapping: {}", statement);
        }
        Ok(published)
    }

    /// Forget every entry so mappings are republished on next use
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        tracing::info!("Cleared {} schema publication entries", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const DDL: &str = r#"CREATE TABLE IF NOT EXISTS "T" ("id" VARCHAR PRIMARY KEY)"#;

    #[test]
    fn test_register_is_insert_if_absent() {
        let cache = SchemaPublicationCache::new();
        let first = cache.register(DDL);
        let second = cache.register(DDL);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending(), vec![DDL.to_string()]);
        assert!(!cache.is_published(DDL));
    }

    #[tokio::test]
    async fn test_publish_runs_once() {
        let cache = SchemaPublicationCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        for _ in 0..3 {
            cache
                .ensure_published(DDL, move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_published(DDL));
        assert_eq!(cache.published_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_publication_issues_one_call() {
        let cache = Arc::new(SchemaPublicationCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .ensure_published(DDL, move || async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<(), String>(())
                        })
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let performed = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(|published| *published)
            .count();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(performed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publication_is_retried() {
        let cache = SchemaPublicationCache::new();

        let failed = cache
            .ensure_published(DDL, || async { Err::<(), _>("store unavailable".to_string()) })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_registered(DDL));
        assert!(!cache.is_published(DDL));

        let retried = cache
            .ensure_published(DDL, || async { Ok::<(), String>(()) })
            .await
            .unwrap();
        assert!(retried);
        assert!(cache.is_published(DDL));
    }

    #[tokio::test]
    async fn test_clear_forgets_publications() {
        let cache = SchemaPublicationCache::new();
        cache
            .ensure_published(DDL, || async { Ok::<(), String>(()) })
            .await
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.is_published(DDL));
    }
}
