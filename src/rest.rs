//! Firebase Realtime Database REST adapter.
//!
//! Implements [`UserLocationStore`] and [`EncounterStore`] over the RTDB REST API:
//! every path `p` maps to `{base_url}/{p}.json`, authenticated with `?auth=`.
//!
//! The REST API has no push channel here, so [`subscribe`](UserLocationStore::subscribe)
//! polls `users.json` and only broadcasts when the document actually changed. A
//! failed poll is logged and the last good document is kept.
//!
//! Requests are retried with exponential backoff on 429, 5xx and transport errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::encounter::EncounterRecord;
use crate::store::{encounter_path, user_path, EncounterStore, Subscription, UserLocationStore};
use crate::{PaceMatchError, Result};

/// Connection settings for [`RestStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RestConfig {
    /// Database root, e.g. `https://my-app.firebaseio.com`.
    pub base_url: String,

    /// ID token or database secret sent as `?auth=`.
    pub auth_token: Option<String>,

    /// Interval between `users.json` polls while subscribed.
    /// Default: 5,000 ms
    pub poll_interval_ms: u64,

    /// Retries after the first attempt.
    /// Default: 3
    pub max_retries: u32,

    /// Base of the exponential retry backoff.
    /// Default: 200 ms
    pub retry_backoff_ms: u64,

    /// Per-request timeout.
    /// Default: 30 s
    pub timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            poll_interval_ms: 5_000,
            max_retries: 3,
            retry_backoff_ms: 200,
            timeout_secs: 30,
        }
    }
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// REST-backed store. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    config: Arc<RestConfig>,
}

impl RestStore {
    pub fn new(config: RestConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(PaceMatchError::InvalidConfig("rest.baseUrl must be set".to_string()));
        }
        if config.poll_interval_ms == 0 {
            return Err(PaceMatchError::InvalidConfig(
                "rest.pollIntervalMs must be > 0".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaceMatchError::store(&config.base_url, format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path);
        let mut retries = 0;

        loop {
            let mut builder = self.client.request(method.clone(), &url);
            if let Some(token) = &self.config.auth_token {
                builder = builder.query(&[("auth", token)]);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let failure = match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp
                            .bytes()
                            .await
                            .map_err(|e| PaceMatchError::store(path, format!("body download error: {}", e)))?;
                        if bytes.is_empty() {
                            return Ok(Value::Null);
                        }
                        return Ok(serde_json::from_slice(&bytes)?);
                    }
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(PaceMatchError::store(path, format!("HTTP {}", status)));
                    }
                    format!("HTTP {}", status)
                }
                Err(e) => format!("request error: {}", e),
            };

            retries += 1;
            if retries > self.config.max_retries {
                return Err(PaceMatchError::store(
                    path,
                    format!("{} (after {} retries)", failure, self.config.max_retries),
                ));
            }

            let wait = Duration::from_millis(self.config.retry_backoff_ms * (1 << retries.min(5)));
            warn!("[RestStore] {} {}: {}, retry {} after {:?}", method, path, failure, retries, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Read the whole `users` document.
    pub async fn fetch_users(&self) -> Result<Map<String, Value>> {
        match self.request(Method::GET, "users", None).await? {
            Value::Null => Ok(Map::new()),
            Value::Object(users) => Ok(users),
            other => Err(PaceMatchError::store(
                "users",
                format!("expected an object, got {}", other),
            )),
        }
    }
}

#[async_trait]
impl UserLocationStore for RestStore {
    async fn get(&self, user_id: &str) -> Result<Option<Value>> {
        match self.request(Method::GET, &user_path(user_id), None).await? {
            Value::Null => Ok(None),
            doc => Ok(Some(doc)),
        }
    }

    async fn set(&self, user_id: &str, document: Value) -> Result<()> {
        self.request(Method::PUT, &user_path(user_id), Some(&document))
            .await
            .map(|_| ())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let initial = self.fetch_users().await?;
        let (tx, rx) = watch::channel(Arc::new(initial));
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let store = self.clone();
        let period = Duration::from_millis(self.config.poll_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if tx.is_closed() {
                    break;
                }
                match store.fetch_users().await {
                    Ok(users) => {
                        let changed = tx.send_if_modified(|current| {
                            if **current == users {
                                return false;
                            }
                            *current = Arc::new(users);
                            true
                        });
                        if changed {
                            debug!("[RestStore] users changed");
                        }
                    }
                    Err(e) => warn!("[RestStore] Poll failed, keeping last snapshot: {}", e),
                }
            }
            debug!("[RestStore] Poller stopped");
        });

        info!("[RestStore] Subscribed to users (poll every {:?})", period);
        Ok(Subscription::with_producer(rx, cancel))
    }
}

#[async_trait]
impl EncounterStore for RestStore {
    async fn get(&self, observer_id: &str, candidate_id: &str) -> Result<Option<EncounterRecord>> {
        match self
            .request(Method::GET, &encounter_path(observer_id, candidate_id), None)
            .await?
        {
            Value::Null => Ok(None),
            doc => Ok(Some(serde_json::from_value(doc)?)),
        }
    }

    async fn set(&self, observer_id: &str, candidate_id: &str, record: &EncounterRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        self.request(Method::PUT, &encounter_path(observer_id, candidate_id), Some(&body))
            .await
            .map(|_| ())
    }

    async fn remove(&self, observer_id: &str, candidate_id: &str) -> Result<()> {
        self.request(Method::DELETE, &encounter_path(observer_id, candidate_id), None)
            .await
            .map(|_| ())
    }

    async fn list(&self, observer_id: &str) -> Result<Vec<(String, EncounterRecord)>> {
        let path = format!("encounteredUsers/{}", observer_id);
        let records = match self.request(Method::GET, &path, None).await? {
            Value::Object(map) => map,
            _ => return Ok(Vec::new()),
        };

        Ok(records
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(record) => Some((id, record)),
                Err(e) => {
                    debug!("[RestStore] Skipping malformed encounter {}: {}", id, e);
                    None
                }
            })
            .collect())
    }
}
