use async_trait::async_trait;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{EngineError, EngineResult};
use crate::services::native::{NativeConnection, NativeResult, SharedConnection};

/// Opens native connections on behalf of a user
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, user: &str) -> NativeResult<SharedConnection>;
}

type Slot = Arc<Mutex<Option<SharedConnection>>>;

/// Connection pool manager that keeps one native connection per user
/// A user's connection is handed to at most one execution at a time; further
/// checkouts for the same user wait until it is checked back in
pub struct ConnectionPoolManager {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    factory: Arc<dyn ConnectionFactory>,
    checkout_timeout: Option<Duration>,
}

impl ConnectionPoolManager {
    /// Create a connection pool manager that waits indefinitely for checkouts
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            factory,
            checkout_timeout: None,
        }
    }

    /// Create a connection pool manager that gives up waiting after `checkout_timeout`
    pub fn with_timeout(factory: Arc<dyn ConnectionFactory>, checkout_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            factory,
            checkout_timeout: Some(checkout_timeout),
        }
    }

    /// Get or create the slot for the given user
    /// This method is safe to call concurrently from multiple tasks
    async fn get_or_create_slot(&self, user: &str) -> Slot {
        // Fast path: slot already exists (read lock)
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(user) {
                return slot.clone();
            }
        }

        // Slow path: create the slot (write lock)
        let mut slots = self.slots.write().await;

        // Double-check in case another task created the slot while we were waiting
        if let Some(slot) = slots.get(user) {
            tracing::debug!("Connection slot created by another task for user: {}", user);
            return slot.clone();
        }

        tracing::info!("Creating connection slot for user: {}", user);
        let slot: Slot = Arc::new(Mutex::new(None));
        slots.insert(user.to_string(), slot.clone());
        slot
    }

    /// Check out the user's connection, opening or replacing it when needed
    pub async fn checkout(&self, user: &str) -> EngineResult<PooledConnection> {
        let slot = self.get_or_create_slot(user).await;

        let mut guard = match self.checkout_timeout {
            Some(timeout) => tokio::time::timeout(timeout, slot.lock_owned())
                .await
                .map_err(|_| {
                    EngineError::Connection(format!(
                        "Timed out after {:?} waiting for the connection of user {}",
                        timeout, user
                    ))
                })?,
            None => slot.lock_owned().await,
        };

        let current: Option<SharedConnection> = (*guard).clone();
        let connection = match current {
            Some(connection) if connection.is_valid().await => connection,
            stale => {
                if stale.is_some() {
                    tracing::info!("Discarding invalid connection for user: {}", user);
                }
                let connection = self.factory.connect(user).await.map_err(|e| {
                    tracing::error!("Failed to open connection for user {}: {}", user, e);
                    EngineError::Connection(format!("Failed to open connection: {}", e))
                })?;
                *guard = Some(connection.clone());
                connection
            }
        };

        tracing::debug!("Checked out connection for user: {}", user);
        Ok(PooledConnection {
            user: user.to_string(),
            connection,
            _slot: guard,
        })
    }

    /// Remove a user's slot (the connection closes once checked back in)
    pub async fn remove_pool(&self, user: &str) -> bool {
        let mut slots = self.slots.write().await;
        let removed = slots.remove(user).is_some();

        if removed {
            tracing::info!("Removed connection slot for user: {}", user);
        }

        removed
    }

    /// Get the number of users with a slot
    pub async fn pool_count(&self) -> usize {
        let slots = self.slots.read().await;
        slots.len()
    }

    /// Get slot status for a given user
    pub async fn get_pool_status(&self, user: &str) -> Option<PoolStatus> {
        let slots = self.slots.read().await;
        slots.get(user).map(|slot| match slot.try_lock() {
            Ok(connection) => PoolStatus {
                connected: connection.is_some(),
                checked_out: false,
            },
            Err(_) => PoolStatus {
                connected: true,
                checked_out: true,
            },
        })
    }
}

/// Connection slot status information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub connected: bool,
    pub checked_out: bool,
}

/// A checked-out connection; dropping it checks the connection back in
pub struct PooledConnection {
    user: String,
    connection: SharedConnection,
    _slot: OwnedMutexGuard<Option<SharedConnection>>,
}

impl PooledConnection {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn shared(&self) -> SharedConnection {
        self.connection.clone()
    }
}

impl Deref for PooledConnection {
    type Target = dyn NativeConnection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        tracing::debug!("Checked in connection for user: {}", self.user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::native::mock::MockConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        async fn connect(&self, _user: &str) -> NativeResult<SharedConnection> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockConnection::new()))
        }
    }

    #[tokio::test]
    async fn test_pool_manager_creation() {
        let manager = ConnectionPoolManager::new(Arc::new(CountingFactory::default()));
        assert_eq!(manager.pool_count().await, 0);
        assert!(manager.get_pool_status("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_connection_reused_after_checkin() {
        let factory = Arc::new(CountingFactory::default());
        let manager = ConnectionPoolManager::new(factory.clone());

        let first = manager.checkout("alice").await.unwrap();
        assert_eq!(first.user(), "alice");
        assert_eq!(
            manager.get_pool_status("alice").await,
            Some(PoolStatus {
                connected: true,
                checked_out: true
            })
        );
        drop(first);

        let _second = manager.checkout("alice").await.unwrap();
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert_eq!(manager.pool_count().await, 1);
    }

    #[tokio::test]
    async fn test_at_most_one_checkout_per_user() {
        let factory = Arc::new(CountingFactory::default());
        let manager = ConnectionPoolManager::with_timeout(factory.clone(), Duration::from_millis(50));

        let held = manager.checkout("alice").await.unwrap();
        let blocked = manager.checkout("alice").await;
        assert!(matches!(blocked, Err(EngineError::Connection(_))));

        // Other users are unaffected
        let _bob = manager.checkout("bob").await.unwrap();

        drop(held);
        assert!(manager.checkout("alice").await.is_ok());
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiting_checkout_proceeds_after_checkin() {
        let manager = Arc::new(ConnectionPoolManager::new(Arc::new(CountingFactory::default())));
        let held = manager.checkout("alice").await.unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.checkout("alice").await.map(|c| c.user().to_string()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_remove_pool() {
        let manager = ConnectionPoolManager::new(Arc::new(CountingFactory::default()));
        // Removing non-existent slot should return false
        assert!(!manager.remove_pool("nobody").await);

        drop(manager.checkout("alice").await.unwrap());
        assert!(manager.remove_pool("alice").await);
        assert_eq!(manager.pool_count().await, 0);
    }
}
