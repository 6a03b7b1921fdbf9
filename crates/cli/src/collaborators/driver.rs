//! Client for the browser-driver sidecar service.
//!
//! The driver owns the interactive page work (navigation, form filling);
//! this client only walks its login state machine and relays the challenge
//! and one-time-code steps back to the core's collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use snag::capabilities::{
    AutomationContext, BrowserGateway, ChallengeContext, ChallengeSolver, Credentials,
    OneTimeCodeSource, SessionProbe,
};
use snag::error::SnagError;
use snag::session::{Identity, SessionArtifacts, SessionRecord, TokenSet};
use snag_protocol::Cookie;

use super::{check_status, http_client, transport_error};

/// How many login steps the driver may hand back before the flow is
/// considered stuck.
const MAX_LOGIN_STEPS: usize = 6;

/// Opens driver-hosted automation contexts.
pub struct DriverGateway {
    client: reqwest::Client,
    base: Url,
    code_window: Duration,
}

impl DriverGateway {
    pub fn new(endpoint: &str, code_window: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client().context("driver client")?,
            base: Url::parse(endpoint).context("invalid driver endpoint")?,
            code_window,
        })
    }

    fn url(&self, path: &str) -> snag::Result<Url> {
        self.base
            .join(path)
            .map_err(|e| SnagError::Permanent(format!("bad driver url '{path}': {e}")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenedContext {
    context_id: String,
}

#[async_trait]
impl BrowserGateway for DriverGateway {
    async fn open(&self, identity: &Identity) -> snag::Result<Arc<dyn AutomationContext>> {
        let response = self
            .client
            .post(self.url("contexts")?)
            .json(identity)
            .send()
            .await
            .map_err(transport_error)?;
        let opened: OpenedContext = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SnagError::Permanent(format!("malformed driver response: {e}")))?;

        debug!(target = "snag.driver", context_id = %opened.context_id, "opened context");
        Ok(Arc::new(DriverContext {
            client: self.client.clone(),
            base: self.base.clone(),
            context_id: opened.context_id,
            code_window: self.code_window,
        }))
    }
}

/// One driver-hosted context, addressed by id.
pub struct DriverContext {
    client: reqwest::Client,
    base: Url,
    context_id: String,
    code_window: Duration,
}

impl DriverContext {
    fn url(&self, suffix: &str) -> snag::Result<Url> {
        let path = format!("contexts/{}/{suffix}", self.context_id);
        self.base
            .join(&path)
            .map_err(|e| SnagError::Permanent(format!("bad driver url '{path}': {e}")))
    }

    /// Submits a claim for `posting` through this context. Used by the
    /// claim-action collaborator, which downcasts to reach it.
    pub(crate) async fn submit_claim(&self, posting: &snag_protocol::Posting) -> snag::Result<()> {
        let _: serde_json::Value = self.post_json("claim", posting).await?;
        Ok(())
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        suffix: &str,
        body: &B,
    ) -> snag::Result<T> {
        let response = self
            .client
            .post(self.url(suffix)?)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SnagError::Permanent(format!("malformed driver response: {e}")))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProbeBody {
    status: String,
}

/// One step of the driver's login state machine.
#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "camelCase")]
enum LoginStep {
    /// The page presented a challenge the solver must answer.
    #[serde(rename_all = "camelCase")]
    Challenge { page_url: String, site_key: String },
    /// The flow sent a one-time code to the operator's mailbox.
    CodeRequired,
    /// Login finished; tokens and cookies captured.
    #[serde(rename_all = "camelCase")]
    Complete {
        tokens: TokenSet,
        #[serde(default)]
        cookies: Vec<Cookie>,
    },
}

#[async_trait]
impl AutomationContext for DriverContext {
    async fn apply_session(&self, record: &SessionRecord) -> snag::Result<()> {
        let _: serde_json::Value = self.post_json("session", record).await?;
        Ok(())
    }

    async fn probe(&self) -> snag::Result<SessionProbe> {
        let response = self
            .client
            .get(self.url("probe")?)
            .send()
            .await
            .map_err(transport_error)?;
        let body: ProbeBody = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SnagError::Permanent(format!("malformed probe response: {e}")))?;

        match body.status.as_str() {
            "active" => Ok(SessionProbe::Active),
            "login_redirect" => Ok(SessionProbe::LoginRedirect),
            "unauthorized" => Ok(SessionProbe::Unauthorized),
            other => Err(SnagError::Permanent(format!("unknown probe status '{other}'"))),
        }
    }

    async fn refresh(&self, record: &SessionRecord) -> snag::Result<TokenSet> {
        self.post_json("refresh", record).await
    }

    async fn login(
        &self,
        credentials: &Credentials,
        challenge: &dyn ChallengeSolver,
        one_time_code: &dyn OneTimeCodeSource,
    ) -> snag::Result<SessionArtifacts> {
        let mut step: LoginStep = self.post_json("login", credentials).await?;

        for _ in 0..MAX_LOGIN_STEPS {
            step = match step {
                LoginStep::Challenge { page_url, site_key } => {
                    let token = challenge
                        .solve(&ChallengeContext { page_url, site_key })
                        .await?;
                    self.post_json("login/challenge", &serde_json::json!({ "token": token }))
                        .await?
                }
                LoginStep::CodeRequired => {
                    let code = one_time_code
                        .retrieve(self.code_window)
                        .await?
                        .ok_or_else(|| {
                            SnagError::Session("one-time code did not arrive".into())
                        })?;
                    self.post_json("login/code", &serde_json::json!({ "code": code }))
                        .await?
                }
                LoginStep::Complete { tokens, cookies } => {
                    return Ok(SessionArtifacts { tokens, cookies });
                }
            };
        }

        Err(SnagError::Permanent("login flow did not converge".into()))
    }

    async fn close(&self) -> snag::Result<()> {
        let response = self
            .client
            .delete(self.base.join(&format!("contexts/{}", self.context_id)).map_err(
                |e| SnagError::Permanent(format!("bad driver url: {e}")),
            )?)
            .send()
            .await
            .map_err(transport_error)?;

        // Closing an already-gone context is fine.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await.map(|_| ())
    }
}
