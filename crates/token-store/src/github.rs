//! GitHub contents API backend
//!
//! Stores each key as a file in a repository. The blob SHA returned by the
//! contents API is the version tag: `PUT` with a `sha` updates, `PUT`
//! without one creates, and GitHub rejects a stale or missing `sha` with
//! 409/422, which maps to `Conflict`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::{StoreFuture, StoredObject, VersionTag, VersionedStore, validate_key};

/// Public GitHub API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "token-relay";
const API_VERSION: &str = "2022-11-28";

/// Connection settings for `GithubStore`.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    /// `owner/name`
    pub repository: String,
    /// Branch to read and commit to; the repository default when `None`.
    pub branch: Option<String>,
    pub token: Secret<String>,
}

pub struct GithubStore {
    client: reqwest::Client,
    config: GithubConfig,
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

impl GithubStore {
    pub fn new(client: reqwest::Client, config: GithubConfig) -> Self {
        Self { client, config }
    }

    fn contents_url(&self, key: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repository,
            key
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(self.config.token.expose())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn put(
        &self,
        key: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> Result<VersionTag> {
        validate_key(key)?;
        let body = PutRequest {
            message,
            content: STANDARD.encode(content),
            sha,
            branch: self.config.branch.as_deref(),
        };

        let response = self
            .authorized(self.client.put(self.contents_url(key)))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("PUT {key}: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CREATED => {
                let parsed: PutResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::Decode(format!("PUT {key} response: {e}")))?;
                debug!(key, sha = %parsed.content.sha, "committed");
                Ok(VersionTag::new(parsed.content.sha))
            }
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::Conflict(format!("{key}: {status}: {text}")))
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(key.to_string())),
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::Http(format!("PUT {key} returned {status}: {text}")))
            }
        }
    }
}

impl VersionedStore for GithubStore {
    fn id(&self) -> &str {
        "github"
    }

    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<StoredObject>> {
        Box::pin(async move {
            validate_key(key)?;
            let mut request = self.authorized(self.client.get(self.contents_url(key)));
            if let Some(branch) = &self.config.branch {
                request = request.query(&[("ref", branch.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Http(format!("GET {key}: {e}")))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Http(format!("GET {key} returned {status}: {text}")));
            }

            let parsed: ContentsResponse = response
                .json()
                .await
                .map_err(|e| Error::Decode(format!("GET {key} response: {e}")))?;
            if parsed.encoding != "base64" {
                return Err(Error::Decode(format!(
                    "{key}: unsupported encoding {:?}",
                    parsed.encoding
                )));
            }

            // GitHub wraps base64 content at 60 columns
            let compact: String = parsed
                .content
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            let content = STANDARD
                .decode(compact)
                .map_err(|e| Error::Decode(format!("{key}: invalid base64 content: {e}")))?;

            Ok(Some(StoredObject {
                content,
                version: VersionTag::new(parsed.sha),
            }))
        })
    }

    fn create<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        message: &'a str,
    ) -> StoreFuture<'a, VersionTag> {
        Box::pin(async move { self.put(key, &content, None, message).await })
    }

    fn update<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        version: &'a VersionTag,
        message: &'a str,
    ) -> StoreFuture<'a, VersionTag> {
        Box::pin(async move {
            self.put(key, &content, Some(version.as_str()), message)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeRepo {
        files: Arc<Mutex<HashMap<String, (Vec<u8>, u64)>>>,
        next_sha: Arc<Mutex<u64>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer ghp_test")
    }

    /// Minimal stand-in for the contents API: GET and PUT with sha checks.
    async fn start_fake_github() -> (String, FakeRepo) {
        let repo = FakeRepo::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new()
            .route(
                "/repos/{owner}/{name}/contents/{*path}",
                axum::routing::get(
                    |State(repo): State<FakeRepo>,
                     headers: HeaderMap,
                     Path((_owner, _name, path)): Path<(String, String, String)>| async move {
                        if !authorized(&headers) {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        let files = repo.files.lock().await;
                        match files.get(&path) {
                            Some((content, sha)) => {
                                let mut encoded = STANDARD.encode(content);
                                // Mimic GitHub's line wrapping
                                if encoded.len() > 4 {
                                    encoded.insert(4, '\n');
                                }
                                axum::Json(serde_json::json!({
                                    "sha": format!("sha{sha}"),
                                    "content": encoded,
                                    "encoding": "base64",
                                }))
                                .into_response()
                            }
                            None => StatusCode::NOT_FOUND.into_response(),
                        }
                    },
                )
                .put(
                    |State(repo): State<FakeRepo>,
                     headers: HeaderMap,
                     Path((_owner, _name, path)): Path<(String, String, String)>,
                     axum::Json(body): axum::Json<serde_json::Value>| async move {
                        if !authorized(&headers) {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        let mut files = repo.files.lock().await;
                        let current = files.get(&path).map(|(_, sha)| format!("sha{sha}"));
                        let supplied = body["sha"].as_str().map(str::to_owned);
                        match (&current, &supplied) {
                            (Some(_), None) => {
                                return StatusCode::UNPROCESSABLE_ENTITY.into_response();
                            }
                            (Some(cur), Some(sup)) if cur != sup => {
                                return StatusCode::CONFLICT.into_response();
                            }
                            (None, Some(_)) => return StatusCode::NOT_FOUND.into_response(),
                            _ => {}
                        }
                        let content = STANDARD
                            .decode(body["content"].as_str().unwrap_or_default())
                            .unwrap();
                        let mut next = repo.next_sha.lock().await;
                        *next += 1;
                        files.insert(path, (content, *next));
                        let status = if current.is_some() {
                            StatusCode::OK
                        } else {
                            StatusCode::CREATED
                        };
                        (
                            status,
                            axum::Json(serde_json::json!({"content": {"sha": format!("sha{}", *next)}})),
                        )
                            .into_response()
                    },
                ),
            )
            .with_state(repo.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), repo)
    }

    fn store(api_url: String) -> GithubStore {
        GithubStore::new(
            reqwest::Client::new(),
            GithubConfig {
                api_url,
                repository: "acme/tokens".into(),
                branch: None,
                token: Secret::new("ghp_test".into()),
            },
        )
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let (url, _repo) = start_fake_github().await;
        let store = store(url);
        assert!(store.read("token_bd.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_read_update_cycle() {
        let (url, _repo) = start_fake_github().await;
        let store = store(url);

        let v1 = store
            .create("token_bd.json", br#"[{"uid":"1","token":"a"}]"#.to_vec(), "Create tokens for bd")
            .await
            .unwrap();

        let obj = store.read("token_bd.json").await.unwrap().unwrap();
        assert_eq!(obj.content, br#"[{"uid":"1","token":"a"}]"#);
        assert_eq!(obj.version, v1);

        let v2 = store
            .update("token_bd.json", b"[]".to_vec(), &v1, "Update tokens for bd")
            .await
            .unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.read("token_bd.json").await.unwrap().unwrap().content, b"[]");
    }

    #[tokio::test]
    async fn stale_sha_is_conflict() {
        let (url, _repo) = start_fake_github().await;
        let store = store(url);
        let v1 = store.create("k.json", b"1".to_vec(), "").await.unwrap();
        store.update("k.json", b"2".to_vec(), &v1, "").await.unwrap();

        let err = store
            .update("k.json", b"3".to_vec(), &v1, "")
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
    }

    #[tokio::test]
    async fn create_existing_is_conflict() {
        let (url, _repo) = start_fake_github().await;
        let store = store(url);
        store.create("k.json", b"1".to_vec(), "").await.unwrap();

        let err = store.create("k.json", b"2".to_vec(), "").await.unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
    }

    #[tokio::test]
    async fn bad_token_surfaces_http_error() {
        let (url, _repo) = start_fake_github().await;
        let store = GithubStore::new(
            reqwest::Client::new(),
            GithubConfig {
                api_url: url,
                repository: "acme/tokens".into(),
                branch: None,
                token: Secret::new("wrong".into()),
            },
        );
        let err = store.read("k.json").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err}");
    }
}
