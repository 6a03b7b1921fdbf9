//! Catalog query contract: paginated search request and response shapes.

use serde::{Deserialize, Serialize};

/// Search request sent to the external catalog.
///
/// Offset/limit pagination; `next_offset` in the response (or a short page)
/// signals the end of the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogQuery {
    pub location: String,
    /// Search radius in kilometres around `location`.
    pub radius: u32,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<CatalogFilter>,
    pub offset: u64,
    pub limit: u64,
}

fn default_sort() -> String {
    "postedDate".to_string()
}

/// A single key/values filter clause in a catalog query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFilter {
    pub key: String,
    pub values: Vec<String>,
}

/// One page of catalog results.
///
/// `jobs` is kept as raw JSON values on purpose: the upstream schema drifts,
/// and per-item parse failures are a counted condition rather than a page
/// failure. `snag-core` maps each value to a [`Posting`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub total_count: u64,
    #[serde(default)]
    pub next_offset: Option<u64>,
    #[serde(default)]
    pub jobs: Vec<serde_json::Value>,
}

/// A discovered catalog item. Read-only once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Posting {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub closing_date: Option<String>,
    /// Claim target: where a claim for this posting is submitted.
    pub application_url: String,
    #[serde(default)]
    pub requisition_id: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub compensation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_tolerates_missing_next_offset() {
        let page: CatalogResponse =
            serde_json::from_value(json!({ "totalCount": 3, "jobs": [] })).unwrap();
        assert_eq!(page.total_count, 3);
        assert!(page.next_offset.is_none());
    }

    #[test]
    fn posting_parses_with_optional_fields_absent() {
        let posting: Posting = serde_json::from_value(json!({
            "id": "JOB-001",
            "title": "Sorter",
            "applicationUrl": "https://catalog.example/apply/JOB-001",
        }))
        .unwrap();
        assert_eq!(posting.id, "JOB-001");
        assert!(posting.requisition_id.is_none());
    }

    #[test]
    fn posting_rejects_payload_without_id() {
        let err = serde_json::from_value::<Posting>(json!({
            "title": "Sorter",
            "applicationUrl": "https://catalog.example/apply",
        }));
        assert!(err.is_err());
    }
}
