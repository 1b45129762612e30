//! An etcd v2 backend for [`Client`]: long-polling `Watch` via
//! `wait=true&waitIndex=N`, recursive `Get`, and a `Wait` that treats "key
//! not found" as proof the store is reachable.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::{
    backoff::{cancellable_sleep, Backoff},
    error::{Error, ETCD_CODE_KEY_NOT_FOUND},
    tree::{deep_merge, key_name, Tree},
    Client,
};

/// Construction options for [`EtcdClient`]. TLS client identity and CA
/// material are accepted as raw PEM bytes so that callers never need to
/// depend on `reqwest`'s types directly.
#[derive(Debug, Clone, Default)]
pub struct EtcdClientOptions {
    pub endpoints: Vec<String>,
    pub prefix: String,
    /// Concatenated client certificate + private key PEM, for mutual TLS.
    pub tls_identity_pem: Option<Vec<u8>>,
    /// CA certificate PEM used to verify the server.
    pub tls_ca_pem: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct EtcdClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    /// Index into `endpoints` of the member last reached successfully.
    /// Shared across every clone so that one watcher's discovered failover
    /// benefits every other reactor and watch loop using the same client.
    current: Arc<AtomicUsize>,
    prefix: String,
}

impl EtcdClient {
    pub fn new(opts: EtcdClientOptions) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = &opts.tls_identity_pem {
            builder = builder.identity(
                reqwest::Identity::from_pem(pem)
                    .map_err(|e| Error::Api { code: 0, message: format!("invalid TLS client identity: {}", e) })?,
            );
        }
        if let Some(pem) = &opts.tls_ca_pem {
            builder = builder.add_root_certificate(
                reqwest::Certificate::from_pem(pem)
                    .map_err(|e| Error::Api { code: 0, message: format!("invalid TLS CA certificate: {}", e) })?,
            );
        }
        let http = builder.build()?;
        let endpoints = if opts.endpoints.is_empty() {
            vec!["http://127.0.0.1:4001".to_string()]
        } else {
            opts.endpoints
        };

        Ok(Self {
            http,
            endpoints,
            current: Arc::new(AtomicUsize::new(0)),
            prefix: opts.prefix,
        })
    }

    fn url(&self, endpoint: &str, key: &str) -> String {
        format!(
            "{}/v2/keys{}{}",
            endpoint.trim_end_matches('/'),
            self.prefix,
            key
        )
    }

    /// Issues a request against each configured endpoint in turn, starting
    /// from whichever one last answered successfully, failing over to the
    /// next only on a transport-level error (the endpoint itself couldn't be
    /// reached, as opposed to an application error etcd returned). A config
    /// listing multiple `etcd.uris` gets redundancy across all of them
    /// rather than just the first.
    async fn request(
        &self,
        key: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, Error> {
        let n = self.endpoints.len();
        let start = self.current.load(Ordering::Relaxed) % n;
        let mut last_err = None;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let mut req = self.http.get(self.url(&self.endpoints[idx], key)).query(query);
            if let Some(timeout) = timeout {
                req = req.timeout(timeout);
            }
            match req.send().await {
                Ok(resp) => {
                    self.current.store(idx, Ordering::Relaxed);
                    return Ok(resp);
                }
                Err(e) => {
                    log::warn!("etcd endpoint {} unreachable: {}", self.endpoints[idx], e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("endpoints is never empty").into())
    }

    async fn get_node(&self, key: &str, recursive: bool) -> Result<Option<RawNode>, Error> {
        let resp = self
            .request(key, &[("recursive", recursive.to_string())], Some(Duration::from_secs(10)))
            .await?;

        if resp.status().is_success() {
            let body: RawResponse = resp.json().await?;
            Ok(body.node)
        } else {
            let body = parse_api_error(resp).await?;
            if body.error_code == ETCD_CODE_KEY_NOT_FOUND {
                Ok(None)
            } else {
                Err(Error::Api {
                    code: body.error_code,
                    message: body.message,
                })
            }
        }
    }

    /// Issues one long-poll request for `prefix`, returning the index to
    /// resume from on the next call.
    async fn long_poll(&self, prefix: &str, index: Option<u64>) -> Result<u64, Error> {
        let mut query = vec![("recursive", "true".to_string()), ("wait", "true".to_string())];
        if let Some(idx) = index {
            query.push(("waitIndex", idx.to_string()));
        }

        let resp = self.request(prefix, &query, None).await?;

        if resp.status().is_success() {
            let body: RawResponse = resp.json().await?;
            let node = body.node.ok_or_else(|| Error::Api {
                code: 0,
                message: "watch response had no node".to_string(),
            })?;
            Ok(node.modified_index.unwrap_or(0) + 1)
        } else {
            let body = parse_api_error(resp).await?;
            Err(Error::Api {
                code: body.error_code,
                message: body.message,
            })
        }
    }

    async fn watch_prefix(&self, prefix: &str, changes: &mpsc::Sender<String>, stop: &mut watch::Receiver<bool>) {
        let mut index: Option<u64> = None;
        let mut backoff = Backoff::new();

        loop {
            if *stop.borrow() {
                return;
            }

            match self.long_poll(prefix, index).await {
                Ok(next_index) => {
                    backoff.reset();
                    index = Some(next_index);
                    if changes.send(prefix.to_string()).await.is_err() {
                        return;
                    }
                    // No backoff before the next long-poll: resubscribing
                    // immediately catches any events that landed in the gap
                    // between this response and the next request.
                }
                Err(e) if e.is_index_cleared() => {
                    log::warn!("watch index for {} was cleared; resuming from latest", prefix);
                    index = None;
                }
                Err(e) => {
                    log::warn!("watch error for {}: {}", prefix, e);
                    let delay = backoff.next_delay();
                    if !cancellable_sleep(delay, stop).await {
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Client for EtcdClient {
    async fn wait(&self, stop: &mut watch::Receiver<bool>) -> bool {
        let mut backoff = Backoff::new();
        loop {
            if *stop.borrow() {
                return false;
            }

            match self.get_node("/", false).await {
                Ok(_) => return true,
                Err(_) => {
                    let delay = backoff.next_delay();
                    if !cancellable_sleep(delay, stop).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn get(&self, keys: &[String]) -> Result<Tree, Error> {
        let mut merged = Tree::empty_dir();
        for key in keys {
            let fetched = match self.get_node(key, true).await? {
                Some(node) => node_to_tree(node),
                None => Tree::empty_dir(),
            };
            merged = deep_merge(merged, fetched);
        }
        Ok(merged)
    }

    async fn watch(&self, prefixes: &[String], changes: mpsc::Sender<String>, stop: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for prefix in prefixes {
            let client = self.clone();
            let changes = changes.clone();
            let mut stop = stop.clone();
            let prefix = prefix.clone();
            handles.push(tokio::spawn(async move {
                client.watch_prefix(&prefix, &changes, &mut stop).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    node: Option<RawNode>,
}

#[derive(Debug, Deserialize, Clone)]
struct RawNode {
    key: String,
    dir: Option<bool>,
    value: Option<String>,
    nodes: Option<Vec<RawNode>>,
    #[serde(rename = "modifiedIndex")]
    modified_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "errorCode")]
    error_code: i64,
    message: String,
}

async fn parse_api_error(resp: reqwest::Response) -> Result<ApiErrorBody, Error> {
    let status = resp.status();
    match resp.json::<ApiErrorBody>().await {
        Ok(body) => Ok(body),
        Err(_) => Ok(ApiErrorBody {
            error_code: -1,
            message: format!("unexpected HTTP status {}", status),
        }),
    }
}

fn segment_of(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    key_name(segment)
}

fn node_to_tree(node: RawNode) -> Tree {
    if node.dir.unwrap_or(false) {
        let mut children = std::collections::BTreeMap::new();
        for child in node.nodes.unwrap_or_default() {
            children.insert(segment_of(&child.key), node_to_tree(child));
        }
        Tree::Dir(children)
    } else {
        Tree::Leaf(node.value.unwrap_or_default())
    }
}
