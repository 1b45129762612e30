//! An in-memory `Client` used by the engine's own test suite, mirroring the
//! `MockClient` of the original implementation's test suite: a canned tree
//! for `get`, an optional canned error, a configurable delay for `wait`, and
//! a channel a test can push prefixes through to drive `watch`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::{deep_merge, Client, Error, Tree};

#[derive(Debug, Default)]
struct Inner {
    tree: Tree,
    get_error: Option<String>,
    wait_ready: bool,
}

/// A test double for [`Client`]. Construct with [`MockClient::new`], seed it
/// with [`MockClient::set_tree`]/[`MockClient::fail_get`], then hand a clone
/// to whatever's under test — it's cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct MockClient {
    inner: Arc<Mutex<Inner>>,
    watch_events: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    watch_tx: mpsc::UnboundedSender<String>,
}

impl MockClient {
    pub fn new() -> Self {
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                wait_ready: true,
                ..Default::default()
            })),
            watch_events: Arc::new(Mutex::new(watch_rx)),
            watch_tx,
        }
    }

    pub async fn set_tree(&self, tree: Tree) {
        self.inner.lock().await.tree = tree;
    }

    pub async fn fail_get(&self, message: impl Into<String>) {
        self.inner.lock().await.get_error = Some(message.into());
    }

    pub async fn set_wait_ready(&self, ready: bool) {
        self.inner.lock().await.wait_ready = ready;
    }

    /// Pushes a change notification that a concurrent `watch` call will
    /// deliver on its `changes` channel.
    pub fn push_change(&self, prefix: impl Into<String>) {
        let _ = self.watch_tx.send(prefix.into());
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Client for MockClient {
    async fn wait(&self, stop: &mut watch::Receiver<bool>) -> bool {
        loop {
            if self.inner.lock().await.wait_ready {
                return true;
            }
            if *stop.borrow() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
                _ = stop.changed() => return false,
            }
        }
    }

    async fn get(&self, keys: &[String]) -> Result<Tree, Error> {
        let inner = self.inner.lock().await;
        if let Some(message) = &inner.get_error {
            return Err(Error::Api {
                code: 500,
                message: message.clone(),
            });
        }

        let mut merged = Tree::empty_dir();
        for key in keys {
            let segments: Vec<String> = key
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            merged = deep_merge(merged, inner.tree.descend(&segments));
        }
        Ok(merged)
    }

    async fn watch(
        &self,
        _prefixes: &[String],
        changes: mpsc::Sender<String>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut rx = self.watch_events.lock().await;
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                event = rx.recv() => match event {
                    Some(prefix) => {
                        if changes.send(prefix).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_true_when_ready() {
        let client = MockClient::new();
        let (_tx, mut stop) = crate::stop_channel();
        assert!(client.wait(&mut stop).await);
    }

    #[tokio::test]
    async fn wait_returns_false_when_stopped_first() {
        let client = MockClient::new();
        client.set_wait_ready(false).await;
        let (tx, mut stop) = crate::stop_channel();
        tx.send(true).unwrap();
        assert!(!client.wait(&mut stop).await);
    }

    #[tokio::test]
    async fn get_merges_all_requested_keys() {
        let client = MockClient::new();
        client
            .set_tree(Tree::Dir(
                vec![
                    (
                        "common".to_string(),
                        Tree::Dir(vec![("x".to_string(), Tree::leaf("1"))].into_iter().collect()),
                    ),
                    (
                        "env".to_string(),
                        Tree::Dir(vec![("y".to_string(), Tree::leaf("2"))].into_iter().collect()),
                    ),
                ]
                .into_iter()
                .collect(),
            ))
            .await;

        let got = client
            .get(&["/common".to_string(), "/env".to_string()])
            .await
            .unwrap();
        assert_eq!(
            got,
            Tree::Dir(
                vec![("x".to_string(), Tree::leaf("1")), ("y".to_string(), Tree::leaf("2"))]
                    .into_iter()
                    .collect()
            )
        );
    }

    #[tokio::test]
    async fn get_propagates_configured_error() {
        let client = MockClient::new();
        client.fail_get("boom").await;
        assert!(client.get(&["/a".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn watch_forwards_pushed_changes() {
        let client = MockClient::new();
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = crate::stop_channel();

        client.push_change("/a");

        let watcher = {
            let client = client.clone();
            tokio::spawn(async move {
                client.watch(&["/a".to_string()], tx, stop_rx).await;
            })
        };

        let mut rx = rx;
        let received = rx.recv().await;
        assert_eq!(received, Some("/a".to_string()));
        watcher.abort();
    }
}
