//! Client for the challenge-solving service (submit, then poll).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use snag::capabilities::{ChallengeContext, ChallengeSolver};
use snag::error::SnagError;

use super::{check_status, http_client, transport_error};

/// Give up polling after this many rounds; the dedicated solver circuit
/// already bounds wall-clock time, this just caps the request count.
const MAX_POLLS: usize = 90;

pub struct HttpSolver {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    poll: Duration,
}

impl HttpSolver {
    pub fn new(endpoint: &str, api_key: Option<String>, poll: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client().context("solver client")?,
            base: Url::parse(endpoint).context("invalid solver endpoint")?,
            api_key,
            poll,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedTask {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskState {
    status: String,
    #[serde(default)]
    token: Option<String>,
}

#[async_trait]
impl ChallengeSolver for HttpSolver {
    async fn solve(&self, site: &ChallengeContext) -> snag::Result<String> {
        let submit_url = self
            .base
            .join("tasks")
            .map_err(|e| SnagError::Permanent(format!("bad solver url: {e}")))?;
        let body = serde_json::json!({
            "siteKey": site.site_key,
            "pageUrl": site.page_url,
            "apiKey": self.api_key,
        });
        let response = self
            .client
            .post(submit_url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let submitted: SubmittedTask = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SnagError::Permanent(format!("malformed solver response: {e}")))?;

        debug!(target = "snag.solver", task_id = %submitted.task_id, "challenge submitted");

        let poll_url = self
            .base
            .join(&format!("tasks/{}", submitted.task_id))
            .map_err(|e| SnagError::Permanent(format!("bad solver url: {e}")))?;

        for _ in 0..MAX_POLLS {
            tokio::time::sleep(self.poll).await;

            let response = self
                .client
                .get(poll_url.clone())
                .send()
                .await
                .map_err(transport_error)?;
            let state: TaskState = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| SnagError::Permanent(format!("malformed solver response: {e}")))?;

            match state.status.as_str() {
                "ready" => {
                    return state.token.ok_or_else(|| {
                        SnagError::Permanent("solver reported ready without a token".into())
                    });
                }
                "failed" => {
                    return Err(SnagError::Permanent("solver could not crack the challenge".into()));
                }
                _ => {}
            }
        }

        Err(SnagError::transient("solver did not finish in time"))
    }
}
