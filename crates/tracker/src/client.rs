//! Redmine-style REST client
//!
//! Issues are created per support thread, notes are journal entries and status
//! changes use numeric status ids that are configured per deployment.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info};
use url::Url;

use crate::error::{TrackerError, TrackerResult};
use crate::models::*;
use crate::Tracker;

/// Timeout for tracker requests (30 seconds)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retry attempts for transient failures
const MAX_RETRIES: usize = 3;

/// Maximum backoff duration for retries (5 seconds)
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

const API_KEY_HEADER: &str = "X-Redmine-API-Key";

const DEFAULT_STATUS_IDS: &str = "new=1,in_progress=2,resolved=3,closed=5";
const DEFAULT_CLOSED_STATUS_IDS: &str = "3,5";

/// Configuration for the tracker integration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub api_key: String,
    pub project_id: String,
    /// Logical status name -> tracker status id
    pub status_ids: HashMap<String, u32>,
    /// Status ids that count as terminal
    pub closed_status_ids: Vec<u32>,
}

impl TrackerConfig {
    /// Create config from environment variables
    pub fn from_env() -> TrackerResult<Self> {
        Ok(Self {
            base_url: std::env::var("TRACKER_URL")
                .map_err(|_| TrackerError::Config("TRACKER_URL not set".to_string()))?,
            api_key: std::env::var("TRACKER_API_KEY")
                .map_err(|_| TrackerError::Config("TRACKER_API_KEY not set".to_string()))?,
            project_id: std::env::var("TRACKER_PROJECT_ID")
                .map_err(|_| TrackerError::Config("TRACKER_PROJECT_ID not set".to_string()))?,
            status_ids: parse_status_ids(
                &std::env::var("TRACKER_STATUS_IDS")
                    .unwrap_or_else(|_| DEFAULT_STATUS_IDS.to_string()),
            )?,
            closed_status_ids: parse_id_list(
                &std::env::var("TRACKER_CLOSED_STATUS_IDS")
                    .unwrap_or_else(|_| DEFAULT_CLOSED_STATUS_IDS.to_string()),
            )?,
        })
    }
}

/// Parse `name=id,name=id` pairs
pub fn parse_status_ids(raw: &str) -> TrackerResult<HashMap<String, u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, id) = pair
                .split_once('=')
                .ok_or_else(|| TrackerError::Config(format!("invalid status mapping: {pair}")))?;
            let id = id
                .trim()
                .parse()
                .map_err(|_| TrackerError::Config(format!("invalid status id: {pair}")))?;
            Ok((name.trim().to_string(), id))
        })
        .collect()
}

/// Parse a comma separated list of status ids
pub fn parse_id_list(raw: &str) -> TrackerResult<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse()
                .map_err(|_| TrackerError::Config(format!("invalid status id: {id}")))
        })
        .collect()
}

/// Tracker REST client
pub struct RedmineClient {
    client: Client,
    base_url: Url,
    config: TrackerConfig,
    current_user: OnceCell<u64>,
}

impl RedmineClient {
    /// Create a new tracker client from config
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| TrackerError::Config(format!("invalid TRACKER_URL: {e}")))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            config,
            current_user: OnceCell::new(),
        })
    }

    /// Create a new tracker client from environment variables
    pub fn from_env() -> TrackerResult<Self> {
        Self::new(TrackerConfig::from_env()?)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn url(&self, path: &str) -> TrackerResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| TrackerError::Config(format!("invalid tracker path {path}: {e}")))
    }

    async fn fetch_issue(&self, id: u64, include: &str) -> TrackerResult<IssueWithJournals> {
        let mut url = self.url(&format!("issues/{id}.json"))?;
        url.query_pairs_mut().append_pair("include", include);

        let response: IssueResponse = self
            .retrying("fetch issue", || async {
                let response = self
                    .client
                    .get(url.clone())
                    .header(API_KEY_HEADER, &self.config.api_key)
                    .send()
                    .await?;
                decode(check(response).await?).await
            })
            .await?;
        Ok(response.issue)
    }

    async fn upload(&self, file: &FileUpload) -> TrackerResult<String> {
        let mut url = self.url("uploads.json")?;
        url.query_pairs_mut().append_pair("filename", &file.filename);

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(file.bytes.clone())
            .send()
            .await?;
        let uploaded: UploadResponse = decode(check(response).await?).await?;
        Ok(uploaded.upload.token)
    }

    /// Run an idempotent request with exponential backoff on transient errors
    async fn retrying<T, F, Fut>(&self, operation: &str, action: F) -> TrackerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TrackerResult<T>>,
    {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        RetryIf::spawn(strategy, action, |e: &TrackerError| {
            let transient = e.is_transient();
            if transient {
                debug!(operation, error = %e, "Transient tracker error - will retry");
            }
            transient
        })
        .await
    }
}

async fn check(response: Response) -> TrackerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TrackerError::Api {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> TrackerResult<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl Tracker for RedmineClient {
    async fn create_issue(&self, issue: NewIssue) -> TrackerResult<u64> {
        let body = IssueEnvelope {
            issue: CreateIssueBody {
                project_id: &self.config.project_id,
                subject: &issue.title,
                description: format!(
                    "Reporter: {}\nOrigin: {}\n\n{}",
                    issue.reporter, issue.origin, issue.body
                ),
            },
        };

        let response = self
            .client
            .post(self.url("issues.json")?)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let created: CreatedIssueResponse = decode(check(response).await?).await?;

        info!(issue_id = created.issue.id, "Created tracker issue");
        Ok(created.issue.id)
    }

    async fn update_issue(&self, id: u64, update: IssueUpdate) -> TrackerResult<()> {
        let status_id = match update.status.as_deref() {
            Some(name) => Some(
                self.status_id(name)
                    .ok_or_else(|| TrackerError::UnknownStatus(name.to_string()))?,
            ),
            None => None,
        };

        let mut uploads = Vec::new();
        if let Some(file) = &update.file {
            uploads.push(UploadRef {
                token: self.upload(file).await?,
                filename: file.filename.clone(),
                content_type: file.content_type.clone(),
            });
        }

        let body = IssueEnvelope {
            issue: UpdateIssueBody {
                status_id,
                notes: update.note,
                private_notes: update.private,
                uploads,
            },
        };

        let response = self
            .client
            .put(self.url(&format!("issues/{id}.json"))?)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        check(response).await?;

        debug!(issue_id = id, status_id = ?status_id, "Updated tracker issue");
        Ok(())
    }

    async fn get_issue(&self, id: u64, include_attachments: bool) -> TrackerResult<Issue> {
        let include = if include_attachments { "attachments" } else { "" };
        Ok(self.fetch_issue(id, include).await?.into())
    }

    async fn get_notes(&self, id: u64) -> TrackerResult<Vec<Note>> {
        let issue = self.fetch_issue(id, "journals").await?;
        Ok(issue
            .journals
            .into_iter()
            .filter_map(Journal::into_note)
            .collect())
    }

    async fn delete_attachment(&self, id: u64) -> TrackerResult<()> {
        let url = self.url(&format!("attachments/{id}.json"))?;
        self.retrying("delete attachment", || async {
            let response = self
                .client
                .delete(url.clone())
                .header(API_KEY_HEADER, &self.config.api_key)
                .send()
                .await?;
            match check(response).await {
                Ok(_) => Ok(()),
                // Already gone
                Err(TrackerError::Api { status: 404, .. }) => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn current_user_id(&self) -> TrackerResult<u64> {
        let id = self
            .current_user
            .get_or_try_init(|| async {
                let url = self.url("users/current.json")?;
                let response: CurrentUserResponse = self
                    .retrying("current user", || async {
                        let response = self
                            .client
                            .get(url.clone())
                            .header(API_KEY_HEADER, &self.config.api_key)
                            .send()
                            .await?;
                        decode(check(response).await?).await
                    })
                    .await?;
                Ok::<u64, TrackerError>(response.user.id)
            })
            .await?;
        Ok(*id)
    }

    fn status_id(&self, name: &str) -> Option<u32> {
        self.config.status_ids.get(name).copied()
    }

    fn is_terminal(&self, issue: &Issue) -> bool {
        issue.status.is_closed == Some(true)
            || self.config.closed_status_ids.contains(&issue.status.id)
    }
}
