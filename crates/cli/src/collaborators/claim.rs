//! Claim submission through the driver-hosted context.

use async_trait::async_trait;

use snag::capabilities::{AutomationContext, ClaimAction};
use snag::claim::ClaimTask;
use snag::error::SnagError;

use super::driver::DriverContext;

/// Submits the claim via the same driver context the session authority
/// owns, so the claim rides the authenticated cookies and fingerprint.
pub struct DriverClaimAction;

impl DriverClaimAction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DriverClaimAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaimAction for DriverClaimAction {
    async fn perform(&self, task: &ClaimTask, context: &dyn AutomationContext) -> snag::Result<()> {
        let driver = context.downcast_ref::<DriverContext>().ok_or_else(|| {
            SnagError::Permanent("claim action requires a driver-hosted context".into())
        })?;
        driver.submit_claim(&task.posting).await
    }
}
