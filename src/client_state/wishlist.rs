use std::future::Future;

use chrono::Utc;
use uuid::Uuid;

use super::{
    ClientStateError, RetryPolicy, Session, SyncQueue, SyncStatus,
    local::{LocalStore, load_json, save_json},
};
use crate::{
    db::DbPool,
    dto::wishlist::WishlistLine,
    error::AppError,
    middleware::auth::AuthUser,
    services::wishlist_service,
};

pub const WISHLIST_KEY: &str = "guest_wishlist";

pub trait WishlistRemote: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<WishlistLine>, AppError>> + Send;

    fn add(&self, product_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn remove(&self, product_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn merge(
        &self,
        lines: Vec<WishlistLine>,
    ) -> impl Future<Output = Result<Vec<WishlistLine>, AppError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WishlistOp {
    Add(Uuid),
    Remove(Uuid),
    Clear,
}

/// Same session and sync rules as the cart, without quantities.
pub struct WishlistManager<S: LocalStore, R: WishlistRemote> {
    store: S,
    remote: Option<R>,
    session: Session,
    items: Vec<WishlistLine>,
    queue: SyncQueue<WishlistOp>,
}

impl<S: LocalStore, R: WishlistRemote> WishlistManager<S, R> {
    pub fn new(store: S, policy: RetryPolicy) -> Result<Self, ClientStateError> {
        let items: Vec<WishlistLine> = load_json(&store, WISHLIST_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            remote: None,
            session: Session::Guest,
            items,
            queue: SyncQueue::new(policy),
        })
    }

    pub fn items(&self) -> &[WishlistLine] {
        &self.items
    }

    pub fn contains(&self, product_id: Uuid) -> bool {
        self.items.iter().any(|l| l.product_id == product_id)
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.queue.status()
    }

    pub async fn observe_session(
        &mut self,
        subject: Option<(Uuid, R)>,
    ) -> Result<bool, ClientStateError> {
        let Some((user_id, remote)) = subject else {
            if matches!(self.session, Session::Authenticated(_)) {
                self.sign_out()?;
            }
            return Ok(false);
        };
        if self.session == Session::Authenticated(user_id) {
            return Ok(false);
        }

        let guest_items = if self.session == Session::Guest {
            self.items.clone()
        } else {
            Vec::new()
        };
        let merged = remote.merge(guest_items).await?;

        self.store.remove(WISHLIST_KEY)?;
        self.items = merged;
        self.remote = Some(remote);
        self.session = Session::Authenticated(user_id);
        self.queue.reset();
        tracing::debug!(user_id = %user_id, lines = self.items.len(), "guest wishlist merged into account");
        Ok(true)
    }

    pub fn sign_out(&mut self) -> Result<(), ClientStateError> {
        self.session = Session::Guest;
        self.remote = None;
        self.items.clear();
        self.queue.reset();
        self.store.remove(WISHLIST_KEY)?;
        Ok(())
    }

    pub async fn add_item(&mut self, product_id: Uuid) -> Result<(), ClientStateError> {
        if self.contains(product_id) {
            return Ok(());
        }
        self.items.push(WishlistLine {
            product_id,
            added_at: Utc::now(),
        });
        self.commit(WishlistOp::Add(product_id)).await
    }

    pub async fn remove_item(&mut self, product_id: Uuid) -> Result<(), ClientStateError> {
        if !self.contains(product_id) {
            return Ok(());
        }
        self.items.retain(|l| l.product_id != product_id);
        self.commit(WishlistOp::Remove(product_id)).await
    }

    /// Add if absent, remove if present. Returns whether the product is now
    /// in the wishlist.
    pub async fn toggle_item(&mut self, product_id: Uuid) -> Result<bool, ClientStateError> {
        if self.contains(product_id) {
            self.remove_item(product_id).await?;
            Ok(false)
        } else {
            self.add_item(product_id).await?;
            Ok(true)
        }
    }

    pub async fn clear(&mut self) -> Result<(), ClientStateError> {
        self.items.clear();
        self.commit(WishlistOp::Clear).await
    }

    async fn commit(&mut self, op: WishlistOp) -> Result<(), ClientStateError> {
        match self.session {
            Session::Guest => save_json(&self.store, WISHLIST_KEY, &self.items)?,
            Session::Authenticated(_) => {
                self.queue.push(op);
                self.drain().await;
            }
        }
        Ok(())
    }

    async fn drain(&mut self) -> bool {
        let Some(remote) = self.remote.as_ref() else {
            return self.queue.is_empty();
        };
        while let Some(op) = self.queue.front() {
            let result = match op {
                WishlistOp::Add(product_id) => remote.add(product_id).await,
                WishlistOp::Remove(product_id) => remote.remove(product_id).await,
                WishlistOp::Clear => remote.clear().await,
            };
            match result {
                Ok(()) => self.queue.succeeded(),
                Err(err) => {
                    tracing::warn!(error = %err, pending = self.queue.len(), "wishlist sync failed");
                    self.queue.failed(err.to_string());
                    return false;
                }
            }
        }
        true
    }

    pub async fn flush(&mut self) -> SyncStatus {
        while !self.queue.is_empty() && !self.queue.exhausted() {
            if self.drain().await || self.queue.exhausted() {
                break;
            }
            tokio::time::sleep(self.queue.next_delay()).await;
        }
        self.sync_status()
    }

    pub async fn resync(&mut self) -> Result<SyncStatus, ClientStateError> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(SyncStatus::Synced);
        };
        self.items = remote.fetch().await?;
        self.queue.reset();
        Ok(SyncStatus::Synced)
    }
}

#[derive(Clone)]
pub struct ServerWishlist {
    pool: DbPool,
    user: AuthUser,
}

impl ServerWishlist {
    pub fn new(pool: DbPool, user: AuthUser) -> Self {
        Self { pool, user }
    }
}

impl WishlistRemote for ServerWishlist {
    async fn fetch(&self) -> Result<Vec<WishlistLine>, AppError> {
        Ok(wishlist_service::load_wishlist(&self.pool, self.user.user_id)
            .await?
            .lines())
    }

    async fn add(&self, product_id: Uuid) -> Result<(), AppError> {
        wishlist_service::add_item(&self.pool, &self.user, product_id).await?;
        Ok(())
    }

    async fn remove(&self, product_id: Uuid) -> Result<(), AppError> {
        match wishlist_service::remove_item(&self.pool, &self.user, product_id).await {
            Ok(_) | Err(AppError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn clear(&self) -> Result<(), AppError> {
        wishlist_service::clear_wishlist(&self.pool, &self.user).await?;
        Ok(())
    }

    async fn merge(&self, lines: Vec<WishlistLine>) -> Result<Vec<WishlistLine>, AppError> {
        let merged = wishlist_service::merge_wishlist(&self.pool, &self.user, lines).await?;
        Ok(merged.data.map(|list| list.lines()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;
    use crate::client_state::MemoryStore;
    use crate::services::wishlist_service::merge_wishlists;

    #[derive(Clone, Default)]
    struct FakeRemote {
        lines: Arc<Mutex<Vec<WishlistLine>>>,
        offline: Arc<Mutex<bool>>,
    }

    impl FakeRemote {
        fn guard(&self) -> Result<(), AppError> {
            if *self.offline.lock().expect("lock") {
                return Err(AppError::ExternalService("offline".into()));
            }
            Ok(())
        }

        fn ids(&self) -> Vec<Uuid> {
            self.lines
                .lock()
                .expect("lock")
                .iter()
                .map(|l| l.product_id)
                .collect()
        }
    }

    impl WishlistRemote for FakeRemote {
        async fn fetch(&self) -> Result<Vec<WishlistLine>, AppError> {
            self.guard()?;
            Ok(self.lines.lock().expect("lock").clone())
        }

        async fn add(&self, product_id: Uuid) -> Result<(), AppError> {
            self.guard()?;
            let mut lines = self.lines.lock().expect("lock");
            if !lines.iter().any(|l| l.product_id == product_id) {
                lines.push(WishlistLine {
                    product_id,
                    added_at: Utc::now(),
                });
            }
            Ok(())
        }

        async fn remove(&self, product_id: Uuid) -> Result<(), AppError> {
            self.guard()?;
            self.lines
                .lock()
                .expect("lock")
                .retain(|l| l.product_id != product_id);
            Ok(())
        }

        async fn clear(&self) -> Result<(), AppError> {
            self.guard()?;
            self.lines.lock().expect("lock").clear();
            Ok(())
        }

        async fn merge(&self, guest: Vec<WishlistLine>) -> Result<Vec<WishlistLine>, AppError> {
            self.guard()?;
            let mut lines = self.lines.lock().expect("lock");
            let merged = merge_wishlists(&lines, &guest);
            *lines = merged;
            Ok(lines.clone())
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 2,
        }
    }

    #[tokio::test]
    async fn toggle_adds_then_removes() {
        let a = Uuid::new_v4();
        let mut wishlist: WishlistManager<_, FakeRemote> =
            WishlistManager::new(MemoryStore::new(), fast()).expect("wishlist");
        assert!(wishlist.toggle_item(a).await.expect("toggle"));
        assert!(wishlist.contains(a));
        assert!(!wishlist.toggle_item(a).await.expect("toggle"));
        assert!(wishlist.items().is_empty());
    }

    #[tokio::test]
    async fn sign_in_unions_with_server() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let remote = FakeRemote::default();
        remote.lines.lock().expect("lock").push(WishlistLine {
            product_id: b,
            added_at: Utc::now(),
        });

        let store = Arc::new(MemoryStore::new());
        let mut wishlist = WishlistManager::new(store.clone(), fast()).expect("wishlist");
        wishlist.add_item(a).await.expect("add");
        wishlist.add_item(b).await.expect("add");

        assert!(wishlist
            .observe_session(Some((Uuid::new_v4(), remote.clone())))
            .await
            .expect("merge"));
        assert_eq!(wishlist.items().len(), 2);
        assert_eq!(remote.ids().len(), 2);
        assert_eq!(store.get(WISHLIST_KEY).expect("get"), None);
    }

    #[tokio::test]
    async fn offline_toggle_diverges_until_resync() {
        let a = Uuid::new_v4();
        let remote = FakeRemote::default();
        let mut wishlist = WishlistManager::new(MemoryStore::new(), fast()).expect("wishlist");
        wishlist
            .observe_session(Some((Uuid::new_v4(), remote.clone())))
            .await
            .expect("sign in");

        *remote.offline.lock().expect("lock") = true;
        assert!(wishlist.toggle_item(a).await.expect("optimistic"));
        assert!(matches!(wishlist.flush().await, SyncStatus::Diverged { failed_ops: 1, .. }));

        *remote.offline.lock().expect("lock") = false;
        wishlist.resync().await.expect("resync");
        assert!(!wishlist.contains(a));
        assert_eq!(wishlist.sync_status(), SyncStatus::Synced);
    }
}
