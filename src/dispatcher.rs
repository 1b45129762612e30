//! Indexes reactors by name and by the prefixes they watch, and routes
//! change notifications from a [`Client`] to the reactors registered for
//! them.

use std::{collections::HashMap, sync::Arc};

use sentinel_client::Client;
use tokio::sync::{mpsc, watch};

use crate::executor::Reactor;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such watcher: {0:?}")]
    UnknownName(String),

    #[error("watcher {name:?} failed: {source}")]
    Execute {
        name: String,
        #[source]
        source: crate::executor::Error,
    },
}

/// Indexes reactors both by their own name (for one-shot execution) and by
/// the prefixes they watch (for change-driven execution). Insertion order is
/// preserved within each prefix's reactor list.
#[derive(Default)]
pub struct Dispatcher {
    by_name: HashMap<String, Arc<dyn Reactor>>,
    by_key: HashMap<String, Vec<Arc<dyn Reactor>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefixes: &[String], reactor: Arc<dyn Reactor>) {
        self.by_name.insert(reactor.name().to_string(), reactor.clone());
        for prefix in prefixes {
            self.by_key.entry(prefix.clone()).or_default().push(reactor.clone());
        }
    }

    /// Every distinct prefix any registered reactor watches; this is the set
    /// handed to `Client::watch`.
    pub fn prefixes(&self) -> Vec<String> {
        self.by_key.keys().cloned().collect()
    }

    /// Runs the named reactors once, in the order given, collecting every
    /// error rather than stopping at the first. Unknown names are validated
    /// up front.
    pub async fn execute(&self, client: &dyn Client, names: &[String]) -> Result<(), Vec<Error>> {
        let mut reactors = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.by_name.get(name) {
                Some(reactor) => reactors.push(reactor.clone()),
                None => errors.push(Error::UnknownName(name.clone())),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        for reactor in reactors {
            if let Err(source) = reactor.execute(client).await {
                errors.push(Error::Execute {
                    name: reactor.name().to_string(),
                    source,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    async fn exec_by_prefix(&self, client: &dyn Client, prefix: &str) {
        if let Some(reactors) = self.by_key.get(prefix) {
            for reactor in reactors {
                if let Err(e) = reactor.execute(client).await {
                    log::warn!("watcher {:?} failed: {}", reactor.name(), e);
                }
            }
        }
    }

    /// Subscribes to every watched prefix and, for as long as `stop` hasn't
    /// fired, reacts to each incoming change by running the reactors
    /// registered for that prefix, in registration order, one prefix's
    /// change at a time.
    pub async fn run(&self, client: Arc<dyn Client>, stop: watch::Receiver<bool>) {
        let prefixes = self.prefixes();
        let (tx, mut rx) = mpsc::channel(64);

        let watch_client = client.clone();
        let watch_stop = stop.clone();
        let watch_task = tokio::spawn(async move {
            watch_client.watch(&prefixes, tx, watch_stop).await;
        });

        let mut stop = stop;
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                change = rx.recv() => match change {
                    Some(prefix) => self.exec_by_prefix(client.as_ref(), &prefix).await,
                    None => break,
                },
            }
        }

        let _ = watch_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Error as ExecutorError;
    use async_trait::async_trait;
    use sentinel_client::MockClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReactor {
        name: String,
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Reactor for CountingReactor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _client: &dyn Client) -> Result<(), ExecutorError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ExecutorError::Command(sentinel_exec::Error::ExitStatus(1)))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn execute_runs_named_reactors_in_order() {
        let mut dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.add(
            &["/a".to_string()],
            Arc::new(CountingReactor {
                name: "a".to_string(),
                count: count.clone(),
                fail: false,
            }),
        );

        let client = MockClient::new();
        dispatcher.execute(&client, &["a".to_string()]).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_reports_unknown_names() {
        let dispatcher = Dispatcher::new();
        let client = MockClient::new();
        let err = dispatcher
            .execute(&client, &["missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[tokio::test]
    async fn execute_collects_errors_without_stopping() {
        let mut dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.add(
            &["/a".to_string()],
            Arc::new(CountingReactor {
                name: "a".to_string(),
                count: count.clone(),
                fail: true,
            }),
        );
        dispatcher.add(
            &["/b".to_string()],
            Arc::new(CountingReactor {
                name: "b".to_string(),
                count: count.clone(),
                fail: false,
            }),
        );

        let client = MockClient::new();
        let err = dispatcher
            .execute(&client, &["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_dispatches_changes_to_registered_prefix() {
        let mut dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.add(
            &["/a".to_string()],
            Arc::new(CountingReactor {
                name: "a".to_string(),
                count: count.clone(),
                fail: false,
            }),
        );

        let mock = MockClient::new();
        mock.push_change("/a");
        let client: Arc<dyn Client> = Arc::new(mock);
        let (stop_tx, stop_rx) = sentinel_client::stop_channel();

        let run = tokio::spawn({
            let client = client.clone();
            async move { dispatcher.run(client, stop_rx).await }
        });

        // Give the dispatch loop a moment to drain the pushed change, then
        // stop it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        run.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
