//! Pagination sweep over the external catalog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use snag_protocol::{CatalogFilter, CatalogQuery, Posting};

use crate::capabilities::CatalogSource;
use crate::claim::ClaimTask;
use crate::error::{Result, SnagError};
use crate::protect::{self, BreakerRegistry, RetryPolicy, TracingObserver};

use super::seen::SeenSet;

const CATALOG_BREAKER: &str = "catalog-api";

/// Sweep parameters for one catalog.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub location: String,
    pub radius: u32,
    pub sort: String,
    pub filters: Vec<CatalogFilter>,
    /// Page size requested per fetch; a shorter page ends the sweep.
    pub page_size: u64,
    /// Fixed delay between successive page fetches, for rate limiting.
    pub page_delay: Duration,
    /// Upper bound on pages per sweep, against runaway pagination.
    pub max_pages: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            radius: 40,
            sort: "postedDate".into(),
            filters: Vec::new(),
            page_size: 100,
            page_delay: Duration::from_millis(750),
            max_pages: 50,
        }
    }
}

/// Outcome of one discovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Items returned by the sweep before dedup.
    pub candidates: usize,
    /// Items enqueued this cycle.
    pub new_items: usize,
    /// Pages fetched.
    pub pages: u32,
    /// Items skipped because their payload no longer parses.
    pub drift: usize,
}

/// Paginates the catalog, dedups against the seen-set, and enqueues new
/// items for claiming and notification.
pub struct ResourceDiscoverer {
    catalog: Arc<dyn CatalogSource>,
    seen: Arc<SeenSet>,
    registry: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    config: DiscoveryConfig,
    claim_tx: mpsc::Sender<ClaimTask>,
    notify_tx: mpsc::Sender<Posting>,
}

impl ResourceDiscoverer {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        seen: Arc<SeenSet>,
        registry: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        config: DiscoveryConfig,
        claim_tx: mpsc::Sender<ClaimTask>,
        notify_tx: mpsc::Sender<Posting>,
    ) -> Self {
        Self {
            catalog,
            seen,
            registry,
            retry,
            config,
            claim_tx,
            notify_tx,
        }
    }

    /// Runs one full sweep: fetch every page, then decide newness in one
    /// atomic batch and enqueue each genuinely new item.
    ///
    /// Auth-invalid failures are never retried here; they propagate so the
    /// caller can re-authenticate before the next cycle.
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let (candidates, pages, drift) = self.sweep().await?;
        let report = self.enqueue_new(candidates, pages, drift).await?;
        info!(
            target = "snag.discovery",
            candidates = report.candidates,
            new_items = report.new_items,
            pages = report.pages,
            drift = report.drift,
            "discovery cycle complete"
        );
        Ok(report)
    }

    async fn sweep(&self) -> Result<(Vec<Posting>, u32, usize)> {
        let breaker = self.registry.breaker(CATALOG_BREAKER);
        let mut candidates = Vec::new();
        let mut offset = 0u64;
        let mut pages = 0u32;
        let mut drift = 0usize;

        loop {
            let query = CatalogQuery {
                location: self.config.location.clone(),
                radius: self.config.radius,
                sort: self.config.sort.clone(),
                filters: self.config.filters.clone(),
                offset,
                limit: self.config.page_size,
            };

            let page = protect::guarded(
                &breaker,
                &self.retry,
                &TracingObserver,
                "fetch-catalog-page",
                || self.catalog.fetch_page(&query),
            )
            .await
            .map_err(|err| {
                if err.is_auth_invalid() {
                    SnagError::Session(format!("catalog rejected credentials: {err}"))
                } else {
                    err
                }
            })?;

            pages += 1;
            let fetched = page.jobs.len() as u64;
            for job in page.jobs {
                match serde_json::from_value::<Posting>(job) {
                    Ok(posting) => candidates.push(posting),
                    Err(err) => {
                        drift += 1;
                        warn!(
                            target = "snag.discovery",
                            error = %err,
                            "catalog item no longer matches the expected shape"
                        );
                    }
                }
            }
            debug!(
                target = "snag.discovery",
                offset,
                fetched,
                total = page.total_count,
                "fetched catalog page"
            );

            let Some(next_offset) = page.next_offset else {
                break;
            };
            if fetched < self.config.page_size {
                break;
            }
            if pages >= self.config.max_pages {
                warn!(
                    target = "snag.discovery",
                    pages, "page cap reached; ending sweep early"
                );
                break;
            }

            offset = next_offset;
            tokio::time::sleep(self.config.page_delay).await;
        }

        Ok((candidates, pages, drift))
    }

    async fn enqueue_new(
        &self,
        candidates: Vec<Posting>,
        pages: u32,
        drift: usize,
    ) -> Result<DiscoveryReport> {
        let ids: Vec<String> = candidates.iter().map(|p| p.id.clone()).collect();
        // One pipelined batch decides newness for the whole sweep; a crash
        // between this insert and the sends below is the accepted unsafe
        // window.
        let fresh = self.seen.check_and_insert(&ids);
        let fresh_set: std::collections::HashSet<&str> =
            fresh.iter().map(String::as_str).collect();

        let mut new_items = 0usize;
        for posting in candidates.iter().filter(|p| fresh_set.contains(p.id.as_str())) {
            self.claim_tx
                .send(ClaimTask::new(posting.clone()))
                .await
                .map_err(|_| SnagError::transient("claim queue closed"))?;
            self.notify_tx
                .send(posting.clone())
                .await
                .map_err(|_| SnagError::transient("notification queue closed"))?;
            new_items += 1;
        }

        self.seen.flush()?;

        Ok(DiscoveryReport {
            candidates: candidates.len(),
            new_items,
            pages,
            drift,
        })
    }
}
