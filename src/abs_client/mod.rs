use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, SyncError};
use crate::sync::{BookmarkApi, ProgressApi};

/// REST client for one Audiobookshelf-family server.
///
/// One instance per connection; bearer token and custom headers are applied
/// to every request.
#[derive(Clone, Debug)]
pub struct AbsClient {
    base_url: String,
    token: Option<String>,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl AbsClient {
    /// Create a new client with the given base URL (e.g. "http://localhost:8080/audiobookshelf").
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let base_url_str = base_url.into();
        tracing::debug!(base_url = %base_url_str, "creating AbsClient");
        Ok(AbsClient {
            base_url: base_url_str.trim_end_matches('/').to_string(),
            token: None,
            headers: Vec::new(),
            client,
        })
    }

    /// Return a client with the provided access token set (Bearer)
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Return a client that sends the given custom headers with every request.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }
        req
    }

    async fn read_body(resp: reqwest::Response) -> Result<String> {
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Unauthorized);
        }
        let resp = resp.error_for_status()?;
        Ok(resp.text().await?)
    }

    /// GET /status (no auth required)
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_status(&self) -> Result<StatusResponse> {
        let resp = self.request(Method::GET, "/status").send().await?;
        let body = Self::read_body(resp).await?;
        let parsed: StatusResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// POST /login (username/password token exchange)
    #[tracing::instrument(level = "debug", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<UserDto> {
        let resp = self
            .request(Method::POST, "/login")
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let body = Self::read_body(resp).await?;
        let parsed: LoginResponse = serde_json::from_str(&body)?;
        Ok(parsed.user)
    }

    /// POST /auth/openid/callback (authorization-code exchange, PKCE S256)
    #[tracing::instrument(level = "debug", skip(self, code, verifier))]
    pub async fn exchange_openid_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<UserDto> {
        let resp = self
            .request(Method::POST, "/auth/openid/callback")
            .json(&json!({
                "code": code,
                "codeVerifier": verifier,
                "redirectUri": redirect_uri,
            }))
            .send()
            .await?;
        let body = Self::read_body(resp).await?;
        let parsed: LoginResponse = serde_json::from_str(&body)?;
        Ok(parsed.user)
    }

    /// GET /api/me, the authoritative server-side progress and bookmarks.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_me(&self) -> Result<UserDto> {
        let resp = self.request(Method::GET, "/api/me").send().await?;
        let body = Self::read_body(resp).await?;
        match serde_json::from_str::<UserDto>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                let snippet_len = body.len().min(2000);
                let snippet = &body[..snippet_len];
                tracing::error!(error = %e, body_snippet = %snippet, "failed to parse user payload");
                Err(e.into())
            }
        }
    }

    /// PATCH /api/me/progress/batch/update
    #[tracing::instrument(level = "debug", skip(self, updates), fields(count = updates.len()))]
    pub async fn batch_update_progress(&self, updates: &[ProgressUpdateDto]) -> Result<()> {
        let resp = self
            .request(Method::PATCH, "/api/me/progress/batch/update")
            .json(updates)
            .send()
            .await?;
        Self::read_body(resp).await?;
        Ok(())
    }

    /// DELETE /api/me/progress/{id}
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_progress(&self, id: &str) -> Result<()> {
        let resp = self
            .request(Method::DELETE, &format!("/api/me/progress/{}", id))
            .send()
            .await?;
        Self::read_body(resp).await?;
        Ok(())
    }

    /// POST /api/me/item/{id}/bookmark
    #[tracing::instrument(level = "debug", skip(self, note))]
    pub async fn create_bookmark(
        &self,
        library_item_id: &str,
        time: i64,
        note: &str,
    ) -> Result<AudioBookmarkDto> {
        let resp = self
            .request(
                Method::POST,
                &format!("/api/me/item/{}/bookmark", library_item_id),
            )
            .json(&json!({ "time": time, "title": note }))
            .send()
            .await?;
        let body = Self::read_body(resp).await?;
        let parsed: AudioBookmarkDto = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// PATCH /api/me/item/{id}/bookmark
    #[tracing::instrument(level = "debug", skip(self, note))]
    pub async fn update_bookmark(
        &self,
        library_item_id: &str,
        time: i64,
        note: &str,
    ) -> Result<AudioBookmarkDto> {
        let resp = self
            .request(
                Method::PATCH,
                &format!("/api/me/item/{}/bookmark", library_item_id),
            )
            .json(&json!({ "time": time, "title": note }))
            .send()
            .await?;
        let body = Self::read_body(resp).await?;
        let parsed: AudioBookmarkDto = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// DELETE /api/me/item/{id}/bookmark/{time}
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_bookmark(&self, library_item_id: &str, time: i64) -> Result<()> {
        let resp = self
            .request(
                Method::DELETE,
                &format!("/api/me/item/{}/bookmark/{}", library_item_id, time),
            )
            .send()
            .await?;
        Self::read_body(resp).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProgressApi for AbsClient {
    async fn batch_update_progress(&self, updates: &[ProgressUpdateDto]) -> Result<()> {
        AbsClient::batch_update_progress(self, updates).await
    }

    async fn delete_progress(&self, id: &str) -> Result<()> {
        AbsClient::delete_progress(self, id).await
    }
}

#[async_trait::async_trait]
impl BookmarkApi for AbsClient {
    async fn create_bookmark(
        &self,
        library_item_id: &str,
        time: i64,
        note: &str,
    ) -> Result<AudioBookmarkDto> {
        AbsClient::create_bookmark(self, library_item_id, time, note).await
    }

    async fn update_bookmark(
        &self,
        library_item_id: &str,
        time: i64,
        note: &str,
    ) -> Result<AudioBookmarkDto> {
        AbsClient::update_bookmark(self, library_item_id, time, note).await
    }

    async fn delete_bookmark(&self, library_item_id: &str, time: i64) -> Result<()> {
        AbsClient::delete_bookmark(self, library_item_id, time).await
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub app: Option<String>,
    #[serde(rename = "serverVersion")]
    pub server_version: Option<String>,
    #[serde(rename = "isInit")]
    pub is_init: Option<bool>,
    #[serde(rename = "authMethods", default)]
    pub auth_methods: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoginResponse {
    pub user: UserDto,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub media_progress: Vec<MediaProgressDto>,
    #[serde(default)]
    pub bookmarks: Vec<AudioBookmarkDto>,
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

/// One server-side progress session. Timestamps are epoch milliseconds,
/// durations and positions are seconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaProgressDto {
    pub id: String,
    pub library_item_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    pub progress: f64,
    pub current_time: f64,
    #[serde(default)]
    pub is_finished: bool,
    pub last_update: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateDto {
    pub library_item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub progress: f64,
    pub current_time: f64,
    pub is_finished: bool,
    pub last_update: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioBookmarkDto {
    pub library_item_id: String,
    pub title: String,
    /// Whole seconds into the track.
    pub time: i64,
    /// Epoch milliseconds.
    pub created_at: i64,
}
