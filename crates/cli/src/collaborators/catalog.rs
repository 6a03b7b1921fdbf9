//! HTTP client for the external catalog search contract.

use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

use snag::capabilities::CatalogSource;
use snag::error::SnagError;
use snag_protocol::{CatalogQuery, CatalogResponse};

use super::{check_status, http_client, transport_error};

/// Posts search queries to the catalog endpoint and returns raw pages.
pub struct HttpCatalog {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpCatalog {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: http_client().context("catalog client")?,
            endpoint: Url::parse(endpoint).context("invalid catalog endpoint")?,
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_page(&self, query: &CatalogQuery) -> snag::Result<CatalogResponse> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(query)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        // A page that does not parse at the top level is contract breakage,
        // not a blip; per-item drift is handled by the discoverer.
        response
            .json::<CatalogResponse>()
            .await
            .map_err(|e| SnagError::Permanent(format!("malformed catalog page: {e}")))
    }
}
