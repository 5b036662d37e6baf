//! API client for the hosted backend's PostgREST interface.
//!
//! Profiles live in `profiles` (one row per user, keyed by `id`), notification
//! settings in `notification_preferences` (keyed by `user_id`). SRS settings
//! have no table of their own: they are stored under `srs` inside the
//! profile's `preferences` JSON column.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{ApiError, SettingsRemote};
use crate::models::{ChangeType, NotificationPreferences, ProfileRow};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const PROFILES_TABLE: &str = "profiles";
const NOTIFICATION_PREFERENCES_TABLE: &str = "notification_preferences";

/// Key of the SRS object inside `profiles.preferences`
const SRS_PREFERENCES_KEY: &str = "srs";

/// API client for the hosted backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    anon_key: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            token: None,
        })
    }

    /// Create a client carrying the user's access token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            anon_key: self.anon_key.clone(),
            token: Some(token),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let bearer = self.token.as_deref().unwrap_or(&self.anon_key);
        let value = |v: &str| {
            header::HeaderValue::from_str(v)
                .map_err(|e| ApiError::Config(format!("invalid header value: {}", e)))
        };

        let mut headers = header::HeaderMap::new();
        headers.insert("apikey", value(&self.anon_key)?);
        headers.insert(header::AUTHORIZATION, value(&format!("Bearer {}", bearer))?);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send a request, backing off and rebuilding it while the server answers 429.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().headers(self.auth_headers()?).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }
            if status.as_u16() != 429 {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body));
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        filter: (&str, String),
    ) -> Result<Vec<T>, ApiError> {
        let url = self.table_url(table);
        let response = self
            .send(|| {
                self.client
                    .get(&url)
                    .query(&[(filter.0, filter.1.as_str()), ("select", "*")])
            })
            .await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", table, e)))
    }

    async fn patch_row(
        &self,
        table: &str,
        filter: (&str, String),
        body: &Map<String, Value>,
    ) -> Result<(), ApiError> {
        let url = self.table_url(table);
        self.send(|| {
            self.client
                .patch(&url)
                .query(&[(filter.0, filter.1.as_str())])
                .header("Prefer", "return=minimal")
                .json(body)
        })
        .await?;
        Ok(())
    }

    async fn upsert_row(
        &self,
        table: &str,
        conflict_column: &str,
        body: &Map<String, Value>,
    ) -> Result<(), ApiError> {
        let url = self.table_url(table);
        self.send(|| {
            self.client
                .post(&url)
                .query(&[("on_conflict", conflict_column)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(body)
        })
        .await?;
        Ok(())
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// Merge changed SRS fields into the profile's `preferences` document,
/// leaving every other key of the document alone.
fn merge_srs_fields(preferences: Option<Value>, fields: Map<String, Value>) -> Value {
    let mut document = match preferences {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let srs = document
        .entry(SRS_PREFERENCES_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !srs.is_object() {
        *srs = Value::Object(Map::new());
    }
    if let Value::Object(srs) = srs {
        srs.extend(fields);
    }

    Value::Object(document)
}

#[async_trait]
impl SettingsRemote for ApiClient {
    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileRow, ApiError> {
        let rows: Vec<ProfileRow> = self.get_rows(PROFILES_TABLE, ("id", eq(user_id))).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("profile {}", user_id)))
    }

    async fn fetch_notification_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreferences>, ApiError> {
        let rows: Vec<NotificationPreferences> = self
            .get_rows(NOTIFICATION_PREFERENCES_TABLE, ("user_id", eq(user_id)))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_fields(
        &self,
        user_id: &str,
        change_type: ChangeType,
        fields: Map<String, Value>,
    ) -> Result<(), ApiError> {
        debug!(user_id = user_id, change_type = %change_type, fields = fields.len(), "Submitting field batch");

        match change_type {
            ChangeType::Profile => {
                self.patch_row(PROFILES_TABLE, ("id", eq(user_id)), &fields).await
            }
            ChangeType::NotificationPreferences => {
                let mut body = fields;
                body.insert("user_id".to_string(), Value::String(user_id.to_string()));
                self.upsert_row(NOTIFICATION_PREFERENCES_TABLE, "user_id", &body).await
            }
            ChangeType::SrsPreferences => {
                // Read-merge-write: the column holds more than the SRS object
                let current = self.fetch_profile(user_id).await?;
                let merged = merge_srs_fields(current.preferences, fields);
                let mut body = Map::new();
                body.insert("preferences".to_string(), merged);
                self.patch_row(PROFILES_TABLE, ("id", eq(user_id)), &body).await
            }
        }
    }
}
