use std::future::Future;

use uuid::Uuid;

use super::{
    ClientStateError, RetryPolicy, Session, SyncQueue, SyncStatus,
    local::{LocalStore, load_json, save_json},
};
use crate::{
    db::DbPool,
    dto::cart::CartLine,
    error::AppError,
    middleware::auth::AuthUser,
    services::cart_service,
};

pub const CART_KEY: &str = "guest_cart";

/// The account's server-side cart.
pub trait CartRemote: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<CartLine>, AppError>> + Send;

    /// Set the line to `quantity`; zero or less removes it.
    fn set_quantity(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Fold `lines` into the server cart and return the merged result.
    fn merge(
        &self,
        lines: Vec<CartLine>,
    ) -> impl Future<Output = Result<Vec<CartLine>, AppError>> + Send;
}

/// Replayed against the server. Every op is absolute so a retry after a lost
/// response cannot double-count.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CartOp {
    Set { product_id: Uuid, quantity: i32 },
    Clear,
}

pub struct CartManager<S: LocalStore, R: CartRemote> {
    store: S,
    remote: Option<R>,
    session: Session,
    items: Vec<CartLine>,
    queue: SyncQueue<CartOp>,
}

impl<S: LocalStore, R: CartRemote> CartManager<S, R> {
    /// Start as a guest with whatever the device already holds.
    pub fn new(store: S, policy: RetryPolicy) -> Result<Self, ClientStateError> {
        let items: Vec<CartLine> = load_json(&store, CART_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            remote: None,
            session: Session::Guest,
            items,
            queue: SyncQueue::new(policy),
        })
    }

    pub fn items(&self) -> &[CartLine] {
        &self.items
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn item_count(&self) -> i32 {
        self.items.iter().map(|l| l.quantity).sum()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.queue.status()
    }

    /// React to the current auth subject. A new signed-in subject moves the
    /// guest cart to the server once; seeing the same subject again does
    /// nothing. Returns whether a merge happened.
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
            std::mem::take(&mut self.items)
        } else {
            Vec::new()
        };
        let merged = match remote.merge(guest_items.clone()).await {
            Ok(merged) => merged,
            Err(err) => {
                // Still a guest; the next observation retries the merge.
                self.items = guest_items;
                return Err(err.into());
            }
        };

        self.store.remove(CART_KEY)?;
        self.items = merged;
        self.remote = Some(remote);
        self.session = Session::Authenticated(user_id);
        self.queue.reset();
        tracing::debug!(user_id = %user_id, lines = self.items.len(), "guest cart merged into account");
        Ok(true)
    }

    /// Leave the server cart alone and start an empty guest cart.
    pub fn sign_out(&mut self) -> Result<(), ClientStateError> {
        self.session = Session::Guest;
        self.remote = None;
        self.items.clear();
        self.queue.reset();
        self.store.remove(CART_KEY)?;
        Ok(())
    }

    pub async fn add_item(&mut self, product_id: Uuid, quantity: i32) -> Result<(), ClientStateError> {
        if quantity <= 0 {
            return Ok(());
        }
        let quantity = match self.items.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = line.quantity.saturating_add(quantity);
                line.quantity
            }
            None => {
                self.items.push(CartLine {
                    product_id,
                    quantity,
                });
                quantity
            }
        };
        self.commit(CartOp::Set {
            product_id,
            quantity,
        })
        .await
    }

    pub async fn update_quantity(
        &mut self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ClientStateError> {
        if quantity <= 0 {
            return self.remove_item(product_id).await;
        }
        match self.items.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity = quantity,
            None => self.items.push(CartLine {
                product_id,
                quantity,
            }),
        }
        self.commit(CartOp::Set {
            product_id,
            quantity,
        })
        .await
    }

    pub async fn remove_item(&mut self, product_id: Uuid) -> Result<(), ClientStateError> {
        let before = self.items.len();
        self.items.retain(|l| l.product_id != product_id);
        if self.items.len() == before {
            return Ok(());
        }
        self.commit(CartOp::Set {
            product_id,
            quantity: 0,
        })
        .await
    }

    pub async fn clear(&mut self) -> Result<(), ClientStateError> {
        self.items.clear();
        self.commit(CartOp::Clear).await
    }

    async fn commit(&mut self, op: CartOp) -> Result<(), ClientStateError> {
        match self.session {
            Session::Guest => save_json(&self.store, CART_KEY, &self.items)?,
            Session::Authenticated(_) => {
                self.queue.push(op);
                self.drain().await;
            }
        }
        Ok(())
    }

    /// One pass over the queue. Stops at the first failure.
    async fn drain(&mut self) -> bool {
        let Some(remote) = self.remote.as_ref() else {
            return self.queue.is_empty();
        };
        while let Some(op) = self.queue.front() {
            let result = match op {
                CartOp::Set {
                    product_id,
                    quantity,
                } => remote.set_quantity(product_id, quantity).await,
                CartOp::Clear => remote.clear().await,
            };
            match result {
                Ok(()) => self.queue.succeeded(),
                Err(err) => {
                    tracing::warn!(error = %err, pending = self.queue.len(), "cart sync failed");
                    self.queue.failed(err.to_string());
                    return false;
                }
            }
        }
        true
    }

    /// Retry queued operations with exponential backoff until the queue is
    /// empty or the retry budget is spent.
    pub async fn flush(&mut self) -> SyncStatus {
        while !self.queue.is_empty() && !self.queue.exhausted() {
            if self.drain().await {
                break;
            }
            if self.queue.exhausted() {
                break;
            }
            tokio::time::sleep(self.queue.next_delay()).await;
        }
        self.sync_status()
    }

    /// Replace local state with the server copy and drop unsent operations.
    pub async fn resync(&mut self) -> Result<SyncStatus, ClientStateError> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(SyncStatus::Synced);
        };
        self.items = remote.fetch().await?;
        self.queue.reset();
        Ok(SyncStatus::Synced)
    }
}

/// [`CartRemote`] backed directly by the cart service.
#[derive(Clone)]
pub struct ServerCart {
    pool: DbPool,
    user: AuthUser,
}

impl ServerCart {
    pub fn new(pool: DbPool, user: AuthUser) -> Self {
        Self { pool, user }
    }
}

impl CartRemote for ServerCart {
    async fn fetch(&self) -> Result<Vec<CartLine>, AppError> {
        Ok(cart_service::load_cart(&self.pool, self.user.user_id)
            .await?
            .lines())
    }

    async fn set_quantity(&self, product_id: Uuid, quantity: i32) -> Result<(), AppError> {
        match cart_service::set_quantity(&self.pool, &self.user, product_id, quantity).await {
            Ok(_) | Err(AppError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn clear(&self) -> Result<(), AppError> {
        cart_service::clear_user_cart(&self.pool, self.user.user_id).await?;
        Ok(())
    }

    async fn merge(&self, lines: Vec<CartLine>) -> Result<Vec<CartLine>, AppError> {
        let merged = cart_service::merge_cart(&self.pool, &self.user, lines).await?;
        Ok(merged.data.map(|cart| cart.lines()).unwrap_or_default())
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
    use crate::services::cart_service::merge_lines;

    #[derive(Default)]
    struct FakeState {
        lines: Vec<CartLine>,
        failures_left: u32,
        merges: u32,
        calls: u32,
    }

    #[derive(Clone, Default)]
    struct FakeRemote(Arc<Mutex<FakeState>>);

    impl FakeRemote {
        fn with_lines(lines: Vec<CartLine>) -> Self {
            let fake = Self::default();
            fake.0.lock().expect("lock").lines = lines;
            fake
        }

        fn fail_next(&self, n: u32) {
            self.0.lock().expect("lock").failures_left = n;
        }

        fn lines(&self) -> Vec<CartLine> {
            self.0.lock().expect("lock").lines.clone()
        }

        fn check(&self) -> Result<(), AppError> {
            let mut state = self.0.lock().expect("lock");
            state.calls += 1;
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(AppError::ExternalService("offline".into()));
            }
            Ok(())
        }
    }

    impl CartRemote for FakeRemote {
        async fn fetch(&self) -> Result<Vec<CartLine>, AppError> {
            self.check()?;
            Ok(self.lines())
        }

        async fn set_quantity(&self, product_id: Uuid, quantity: i32) -> Result<(), AppError> {
            self.check()?;
            let mut state = self.0.lock().expect("lock");
            state.lines.retain(|l| l.product_id != product_id);
            if quantity > 0 {
                state.lines.push(CartLine {
                    product_id,
                    quantity,
                });
            }
            Ok(())
        }

        async fn clear(&self) -> Result<(), AppError> {
            self.check()?;
            self.0.lock().expect("lock").lines.clear();
            Ok(())
        }

        async fn merge(&self, lines: Vec<CartLine>) -> Result<Vec<CartLine>, AppError> {
            self.check()?;
            let mut state = self.0.lock().expect("lock");
            state.merges += 1;
            let merged = merge_lines(&state.lines, &lines);
            state.lines = merged;
            Ok(state.lines.clone())
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts: 3,
        }
    }

    fn quantity_of(lines: &[CartLine], product_id: Uuid) -> Option<i32> {
        lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
    }

    #[tokio::test]
    async fn guest_cart_is_persisted_locally() {
        let store = Arc::new(MemoryStore::new());
        let a = Uuid::new_v4();
        {
            let mut cart: CartManager<_, FakeRemote> =
                CartManager::new(store.clone(), fast()).expect("cart");
            cart.add_item(a, 2).await.expect("add");
            cart.add_item(a, 1).await.expect("add");
        }
        let cart: CartManager<_, FakeRemote> = CartManager::new(store, fast()).expect("cart");
        assert_eq!(quantity_of(cart.items(), a), Some(3));
    }

    #[tokio::test]
    async fn sign_in_merges_once_and_clears_device() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let remote = FakeRemote::with_lines(vec![CartLine {
            product_id: b,
            quantity: 3,
        }]);

        let mut cart = CartManager::new(store.clone(), fast()).expect("cart");
        cart.add_item(a, 2).await.expect("add");
        cart.add_item(b, 1).await.expect("add");

        let user = Uuid::new_v4();
        assert!(cart.observe_session(Some((user, remote.clone()))).await.expect("merge"));
        assert_eq!(quantity_of(cart.items(), a), Some(2));
        assert_eq!(quantity_of(cart.items(), b), Some(4));
        assert_eq!(cart.items().len(), 2);
        assert_eq!(store.get(CART_KEY).expect("get"), None);

        assert!(!cart.observe_session(Some((user, remote.clone()))).await.expect("noop"));
        assert_eq!(remote.0.lock().expect("lock").merges, 1);
    }

    #[tokio::test]
    async fn failed_merge_keeps_guest_items() {
        let store = Arc::new(MemoryStore::new());
        let a = Uuid::new_v4();
        let remote = FakeRemote::default();
        remote.fail_next(1);

        let mut cart = CartManager::new(store, fast()).expect("cart");
        cart.add_item(a, 1).await.expect("add");
        assert!(cart.observe_session(Some((Uuid::new_v4(), remote))).await.is_err());
        assert_eq!(cart.session(), Session::Guest);
        assert_eq!(quantity_of(cart.items(), a), Some(1));
    }

    #[tokio::test]
    async fn sign_out_starts_fresh_and_leaves_server_alone() {
        let a = Uuid::new_v4();
        let remote = FakeRemote::with_lines(vec![CartLine {
            product_id: a,
            quantity: 1,
        }]);
        let mut cart = CartManager::new(MemoryStore::new(), fast()).expect("cart");
        cart.observe_session(Some((Uuid::new_v4(), remote.clone())))
            .await
            .expect("sign in");

        cart.observe_session(None).await.expect("sign out");
        assert_eq!(cart.session(), Session::Guest);
        assert!(cart.items().is_empty());
        assert_eq!(remote.lines().len(), 1);
    }

    #[tokio::test]
    async fn zero_quantity_removes() {
        let a = Uuid::new_v4();
        let remote = FakeRemote::default();
        let mut cart = CartManager::new(MemoryStore::new(), fast()).expect("cart");
        cart.observe_session(Some((Uuid::new_v4(), remote.clone())))
            .await
            .expect("sign in");

        cart.add_item(a, 4).await.expect("add");
        cart.update_quantity(a, 0).await.expect("update");
        assert!(cart.items().is_empty());
        assert!(remote.lines().is_empty());
        assert_eq!(cart.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn failed_sync_is_retried_by_flush() {
        let a = Uuid::new_v4();
        let remote = FakeRemote::default();
        let mut cart = CartManager::new(MemoryStore::new(), fast()).expect("cart");
        cart.observe_session(Some((Uuid::new_v4(), remote.clone())))
            .await
            .expect("sign in");

        remote.fail_next(2);
        cart.add_item(a, 2).await.expect("optimistic add");
        assert_eq!(quantity_of(cart.items(), a), Some(2));
        assert_eq!(cart.sync_status(), SyncStatus::Pending { queued_ops: 1 });

        assert_eq!(cart.flush().await, SyncStatus::Synced);
        assert_eq!(quantity_of(&remote.lines(), a), Some(2));
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_divergence() {
        let a = Uuid::new_v4();
        let remote = FakeRemote::default();
        let mut cart = CartManager::new(MemoryStore::new(), fast()).expect("cart");
        cart.observe_session(Some((Uuid::new_v4(), remote.clone())))
            .await
            .expect("sign in");

        remote.fail_next(u32::MAX);
        cart.add_item(a, 1).await.expect("optimistic add");
        let status = cart.flush().await;
        assert_eq!(
            status,
            SyncStatus::Diverged {
                failed_ops: 1,
                last_error: AppError::ExternalService("offline".into()).to_string(),
            }
        );

        remote.fail_next(0);
        assert_eq!(cart.resync().await.expect("resync"), SyncStatus::Synced);
        assert!(cart.items().is_empty());
    }
}
