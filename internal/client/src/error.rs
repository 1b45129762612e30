use thiserror::Error;

/// Possible errors from a KV client backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned error code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("response body was not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown backend {0:?}")]
    UnknownBackend(String),
}

/// etcd v2's "key not found" error code.
pub const ETCD_CODE_KEY_NOT_FOUND: i64 = 100;

/// etcd v2's "event index cleared" error code: the watcher asked for an
/// index that has since been compacted out of etcd's event history.
pub const ETCD_CODE_EVENT_INDEX_CLEARED: i64 = 401;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { code, .. } if *code == ETCD_CODE_KEY_NOT_FOUND)
    }

    pub fn is_index_cleared(&self) -> bool {
        matches!(self, Error::Api { code, .. } if *code == ETCD_CODE_EVENT_INDEX_CLEARED)
    }
}
