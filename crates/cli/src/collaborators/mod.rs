//! HTTP-backed implementations of the core's capability traits.
//!
//! Everything here is mechanical client plumbing; resilience (retries,
//! circuits, timeouts) lives in the core's protection layer, so these
//! clients just translate transport and status failures into the error
//! taxonomy.

pub mod catalog;
pub mod claim;
pub mod driver;
pub mod keys;
pub mod mailbox;
pub mod notify;
pub mod records;
pub mod solver;

pub use catalog::HttpCatalog;
pub use claim::DriverClaimAction;
pub use driver::DriverGateway;
pub use keys::LocalKeyService;
pub use mailbox::HttpMailbox;
pub use notify::{LogNotifier, WebhookNotifier};
pub use records::JsonlSink;
pub use solver::HttpSolver;

use std::time::Duration;

use snag::error::SnagError;

/// Maps a non-success response into the error taxonomy, carrying any
/// Retry-After hint.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SnagError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs);
    let message = response.text().await.unwrap_or_default();

    Err(SnagError::Upstream {
        status: status.as_u16(),
        message: truncate(&message, 200),
        retry_after,
    })
}

/// Transport failures (DNS, connect, timeout) are always transient.
pub(crate) fn transport_error(err: reqwest::Error) -> SnagError {
    SnagError::transient(format!("request failed: {err}"))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

/// Shared client defaults: bounded connect/request timeouts so no
/// collaborator call can hang a worker.
pub(crate) fn http_client() -> Result<reqwest::Client, SnagError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| SnagError::Permanent(format!("cannot build http client: {e}")))
}
