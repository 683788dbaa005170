//! Content backend used by the station site's public pages and back-office.
//!
//! The site keeps news, the programme schedule and advertisements in a hosted
//! backend that also handles sign-in and image storage.  This module is the
//! contract the site consumes: `ContentStore`, plus `RestContentStore` which
//! speaks the backend's REST dialect (`/rest/v1`, `/auth/v1`, `/storage/v1`).
//! The stream player never touches it.

use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::BackendConfig;

pub type RecordId = i64;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("content backend is not configured")]
    NotConfigured,

    #[error("not signed in")]
    Unauthorized,

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ContentError>;

/// Named record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    News,
    Programs,
    Advertisements,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Collection::News => "news",
            Collection::Programs => "programs",
            Collection::Advertisements => "advertisements",
        }
    }
}

/// A row in one of the collections.  `id` is assigned by the backend, so it
/// is absent on records that have not been created yet.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> Option<RecordId>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NewsItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Program {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub description: String,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    /// `HH:MM`, station local time
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Advertisement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Record for NewsItem {
    const COLLECTION: Collection = Collection::News;
    fn id(&self) -> Option<RecordId> {
        self.id
    }
}

impl Record for Program {
    const COLLECTION: Collection = Collection::Programs;
    fn id(&self) -> Option<RecordId> {
        self.id
    }
}

impl Record for Advertisement {
    const COLLECTION: Collection = Collection::Advertisements;
    fn id(&self) -> Option<RecordId> {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: User,
}

/// Request/response contract over the hosted backend.
#[allow(async_fn_in_trait)]
pub trait ContentStore {
    async fn list<R: Record>(&self) -> Result<Vec<R>>;
    async fn get<R: Record>(&self, id: RecordId) -> Result<Option<R>>;
    async fn create<R: Record>(&self, record: &R) -> Result<R>;
    async fn update<R: Record>(&self, id: RecordId, record: &R) -> Result<R>;
    async fn delete(&self, collection: Collection, id: RecordId) -> Result<()>;

    /// Store `bytes` at `path` in the image bucket and return its public URL.
    async fn upload_file(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
    fn public_url(&self, path: &str) -> String;
    async fn delete_file(&self, path: &str) -> Result<()>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;
    async fn sign_out(&self) -> Result<()>;
    async fn current_user(&self) -> Result<Option<User>>;
}

pub struct RestContentStore {
    client: reqwest::Client,
    base: String,
    anon_key: String,
    bucket: String,
    session: Mutex<Option<AuthSession>>,
}

impl RestContentStore {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: config.project_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            bucket: config.bucket.clone(),
            session: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base.is_empty() && !self.anon_key.is_empty()
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ContentError::NotConfigured)
        }
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base, collection.table())
    }

    fn row_filter(id: RecordId) -> String {
        format!("id=eq.{}", id)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.access_token.clone()))
    }

    /// Signed-in requests carry the user's token; anonymous ones the anon key.
    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        req.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self.authed(req).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ContentError::Unauthorized);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ContentError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn first_row<R: Record>(response: reqwest::Response) -> Result<Option<R>> {
        let bytes = response.bytes().await?;
        let mut rows: Vec<R> = serde_json::from_slice(&bytes)?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    fn missing_row(collection: Collection) -> ContentError {
        ContentError::Status {
            status: 404,
            message: format!("no row returned from {}", collection.table()),
        }
    }
}

impl ContentStore for RestContentStore {
    async fn list<R: Record>(&self) -> Result<Vec<R>> {
        self.ensure_configured()?;
        let url = self.table_url(R::COLLECTION);
        let req = self
            .client
            .get(&url)
            .query(&[("select", "*"), ("order", "id.desc")]);
        let bytes = self.send(req).await?.bytes().await?;
        let rows: Vec<R> = serde_json::from_slice(&bytes)?;
        debug!("content: listed {} rows from {}", rows.len(), R::COLLECTION.table());
        Ok(rows)
    }

    async fn get<R: Record>(&self, id: RecordId) -> Result<Option<R>> {
        self.ensure_configured()?;
        let url = format!("{}?select=*&{}", self.table_url(R::COLLECTION), Self::row_filter(id));
        let response = self.send(self.client.get(&url)).await?;
        Self::first_row(response).await
    }

    async fn create<R: Record>(&self, record: &R) -> Result<R> {
        self.ensure_configured()?;
        let req = self
            .client
            .post(self.table_url(R::COLLECTION))
            .header("Prefer", "return=representation")
            .json(record);
        let response = self.send(req).await?;
        Self::first_row(response)
            .await?
            .ok_or_else(|| Self::missing_row(R::COLLECTION))
    }

    async fn update<R: Record>(&self, id: RecordId, record: &R) -> Result<R> {
        self.ensure_configured()?;
        let url = format!("{}?{}", self.table_url(R::COLLECTION), Self::row_filter(id));
        let req = self
            .client
            .patch(&url)
            .header("Prefer", "return=representation")
            .json(record);
        let response = self.send(req).await?;
        Self::first_row(response)
            .await?
            .ok_or_else(|| Self::missing_row(R::COLLECTION))
    }

    async fn delete(&self, collection: Collection, id: RecordId) -> Result<()> {
        self.ensure_configured()?;
        let url = format!("{}?{}", self.table_url(collection), Self::row_filter(id));
        self.send(self.client.delete(&url)).await?;
        info!("content: deleted {} #{}", collection.table(), id);
        Ok(())
    }

    async fn upload_file(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.ensure_configured()?;
        let req = self
            .client
            .post(self.object_url(path))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        self.send(req).await?;
        Ok(self.public_url(path))
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.ensure_configured()?;
        self.send(self.client.delete(self.object_url(path))).await?;
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.ensure_configured()?;
        let url = format!("{}/auth/v1/token?grant_type=password", self.base);
        let req = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let bytes = self.send(req).await?.bytes().await?;
        let session: AuthSession = serde_json::from_slice(&bytes)?;
        info!("content: signed in as {:?}", session.user.email);
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session.clone());
        }
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        if self.access_token().is_none() {
            return Ok(());
        }
        self.ensure_configured()?;
        let url = format!("{}/auth/v1/logout", self.base);
        let result = self.send(self.client.post(&url)).await;
        // The local session is dropped even when the backend call fails.
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
        result.map(|_| ())
    }

    async fn current_user(&self) -> Result<Option<User>> {
        if self.access_token().is_none() {
            return Ok(None);
        }
        self.ensure_configured()?;
        let url = format!("{}/auth/v1/user", self.base);
        match self.send(self.client.get(&url)).await {
            Ok(response) => {
                let bytes = response.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(ContentError::Unauthorized) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
