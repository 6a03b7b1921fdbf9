//! Capability traits for external collaborators.
//!
//! The pipeline consumes every external dependency through one of these
//! narrow interfaces without owning its implementation. Concrete clients
//! (HTTP, browser driver, mailbox, key service) live outside this crate and
//! are injected at construction time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use downcast_rs::{DowncastSync, impl_downcast};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use snag_protocol::{CatalogQuery, CatalogResponse, Posting};

use crate::claim::{ClaimTask, TaskStatus};
use crate::error::Result;
use crate::session::{Identity, SessionArtifacts, SessionRecord, TokenSet};

/// Paginated access to the external catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetches one page; `query.offset`/`query.limit` select it.
    async fn fetch_page(&self, query: &CatalogQuery) -> Result<CatalogResponse>;
}

/// Site context handed to the challenge-solving collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub page_url: String,
    pub site_key: String,
}

/// CAPTCHA-class challenge solving.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Returns a solution token for the given site context.
    async fn solve(&self, site: &ChallengeContext) -> Result<String>;
}

/// Mailbox-polling retrieval of a one-time login code.
#[async_trait]
pub trait OneTimeCodeSource: Send + Sync {
    /// Polls for a code issued within `window`; `None` when none arrived.
    async fn retrieve(&self, window: Duration) -> Result<Option<String>>;
}

/// Submits a claim for a discovered item through the authenticated context.
#[async_trait]
pub trait ClaimAction: Send + Sync {
    async fn perform(&self, task: &ClaimTask, context: &dyn AutomationContext) -> Result<()>;
}

/// Persistence collaborator for discovered items and task transitions.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn persist_posting(&self, posting: &Posting) -> Result<()>;
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        detail: serde_json::Value,
    ) -> Result<()>;
}

/// Notification side-channel for newly discovered items.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, posting: &Posting) -> Result<()>;
}

/// A data key issued by the external key service: plaintext for immediate
/// use, wrapped form for storage.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub wrapped: Vec<u8>,
}

/// External key-management dependency (envelope-encryption shape).
#[async_trait]
pub trait KeyService: Send + Sync {
    async fn generate_data_key(&self) -> Result<DataKey>;
    async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Operator credentials used to drive the external login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Outcome of exercising the authenticated context against a protected
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProbe {
    /// The context reached the protected endpoint while signed in.
    Active,
    /// The endpoint redirected to the login page.
    LoginRedirect,
    /// The endpoint answered with an unauthorized status.
    Unauthorized,
}

/// Opens fresh automation contexts with a pinned identity fingerprint.
#[async_trait]
pub trait BrowserGateway: Send + Sync {
    async fn open(&self, identity: &Identity) -> Result<Arc<dyn AutomationContext>>;
}

/// Read access to the current authenticated context. Implemented by the
/// session authority; claim workers consume this seam so they share the
/// single live handle without owning its lifecycle.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context(&self) -> Result<Arc<dyn AutomationContext>>;
}

/// A live automation context. Exactly one is owned by the session authority
/// at any time; callers borrow it, they never open their own.
///
/// Downcast-capable so collaborator implementations that share a concrete
/// context type (e.g. a driver-hosted one) can reach their own surface.
#[async_trait]
pub trait AutomationContext: DowncastSync {
    /// Restores cookies and tokens from a persisted record.
    async fn apply_session(&self, record: &SessionRecord) -> Result<()>;

    /// Exercises a protected endpoint to check the session is usable.
    async fn probe(&self) -> Result<SessionProbe>;

    /// Exchanges the record's refresh token for a fresh token set.
    async fn refresh(&self, record: &SessionRecord) -> Result<TokenSet>;

    /// Drives the external login flow, delegating challenge solving and
    /// one-time-code retrieval to the provided collaborators. Returns the
    /// captured tokens and cookies; the caller pins the identity.
    async fn login(
        &self,
        credentials: &Credentials,
        challenge: &dyn ChallengeSolver,
        one_time_code: &dyn OneTimeCodeSource,
    ) -> Result<SessionArtifacts>;

    /// Tears the context down. Idempotent.
    async fn close(&self) -> Result<()>;
}

impl_downcast!(sync AutomationContext);
