//! The abstract key-value client the engine is written against, plus the
//! concrete backends that satisfy it: an etcd v2 backend for production use,
//! and an in-memory mock for tests.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

mod backoff;
mod error;
mod etcd;
mod mock;
mod tree;

pub use self::backoff::{cancellable_sleep, Backoff};
pub use self::error::{Error, ETCD_CODE_EVENT_INDEX_CLEARED, ETCD_CODE_KEY_NOT_FOUND};
pub use self::etcd::{EtcdClient, EtcdClientOptions};
pub use self::mock::MockClient;
pub use self::tree::{deep_merge, Tree};

/// A single shared shutdown flag. The sender lives with the supervisor;
/// every suspension point that should be interruptible holds a clone of the
/// receiver and races it against whatever it's waiting for.
pub fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// The abstraction every reactor and the dispatcher depend on. Concrete
/// variants (an etcd backend, a mock, future backends) satisfy this trait;
/// nothing above this layer knows which one it's talking to.
#[async_trait]
pub trait Client: Send + Sync {
    /// Blocks until the backing store is reachable, or `stop` fires.
    /// Returns `false` if `stop` fired before the store became reachable.
    async fn wait(&self, stop: &mut watch::Receiver<bool>) -> bool;

    /// Fetches and deep-merges the subtrees rooted at each of `keys`, in
    /// order, later keys overwriting earlier ones at conflicting paths.
    async fn get(&self, keys: &[String]) -> Result<Tree, Error>;

    /// Subscribes to changes under each of `prefixes` independently; each
    /// observed change sends that prefix on `changes`. Runs until `stop`
    /// fires. Never returns an error: connection trouble is retried
    /// internally with backoff, per prefix, forever.
    async fn watch(&self, prefixes: &[String], changes: mpsc::Sender<String>, stop: watch::Receiver<bool>);
}
