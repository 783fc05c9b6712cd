//! Enterprise-data connector
//!
//! Read-only OData extraction scoped by company code and fiscal period,
//! in the shape SAP gateways expose (ACDOCA, MBEW, CKML and friends).
//! Pagination follows the backend's next-link until it signals the end;
//! the cursor is a plain URL so an interrupted extraction can resume
//! from the last completed page.

use crate::error::{from_transport, kind_for_status, ConnectorError, Result};
use crate::{optional_str, require_str, Connector, ConnectorKind, ConnectorRequest, CredentialSet};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Hard ceiling on pages fetched per extraction, independent of row limits
const MAX_PAGES: usize = 1_000;

/// Configuration for the enterprise-data connector
#[derive(Debug, Clone, Deserialize)]
pub struct EnterpriseDataConfig {
    /// OData service root URL
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Entity sets tenants are allowed to extract from
    #[serde(default = "default_entity_sets")]
    pub allowed_entity_sets: BTreeSet<String>,
    /// Rows requested per page via `$top`
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    1_000
}

fn default_entity_sets() -> BTreeSet<String> {
    ["ACDOCA", "MBEW", "CKML", "BKPF", "BSEG"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for EnterpriseDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://erp.example.com/sap/opu/odata/sap/EXTRACT_SRV".to_string(),
            timeout_ms: default_timeout_ms(),
            allowed_entity_sets: default_entity_sets(),
            page_size: default_page_size(),
        }
    }
}

/// One page of extracted records
#[derive(Debug, Clone)]
pub struct RecordBatch {
    /// Records in this page
    pub records: Vec<serde_json::Value>,
    /// Whether the backend reported another page after this one
    pub has_more: bool,
}

/// Restartable pagination cursor.
///
/// Holds the URL of the next page to fetch; `None` means the sequence
/// is exhausted. The cursor survives being handed across await points
/// and can be rebuilt from a persisted URL.
#[derive(Debug, Clone)]
pub struct PageCursor {
    next_url: Option<String>,
}

impl PageCursor {
    /// Cursor positioned at the first page of a query
    #[must_use]
    pub fn start(url: String) -> Self {
        Self {
            next_url: Some(url),
        }
    }

    /// Resume a cursor from a previously returned next-page URL
    #[must_use]
    pub fn resume(next_url: String) -> Self {
        Self {
            next_url: Some(next_url),
        }
    }

    /// URL the next call will fetch, if any
    #[must_use]
    pub fn next_url(&self) -> Option<&str> {
        self.next_url.as_deref()
    }

    /// Whether the sequence is exhausted
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.next_url.is_none()
    }

    /// Fetch the next page, advancing the cursor.
    ///
    /// Returns `None` once the backend has signalled the final page.
    pub async fn next_page(
        &mut self,
        client: &reqwest::Client,
        token: &str,
    ) -> Result<Option<RecordBatch>> {
        let Some(url) = self.next_url.take() else {
            return Ok(None);
        };

        let response = client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConnectorError {
                kind: kind_for_status(status),
                detail: format!("odata http {status}: {detail}"),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::permanent(format!("invalid odata response: {e}")))?;

        let (records, next) = parse_page(&body)?;
        self.next_url = next;
        Ok(Some(RecordBatch {
            records,
            has_more: self.next_url.is_some(),
        }))
    }
}

/// Extract records and the next-link from an OData payload.
///
/// Accepts both the V2 shape (`d.results` / `d.__next`) and the V4
/// shape (`value` / `@odata.nextLink`).
fn parse_page(body: &serde_json::Value) -> Result<(Vec<serde_json::Value>, Option<String>)> {
    if let Some(d) = body.get("d") {
        let records = d
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| ConnectorError::permanent("odata v2 payload missing d.results"))?;
        let next = d.get("__next").and_then(|v| v.as_str()).map(String::from);
        return Ok((records, next));
    }
    if let Some(value) = body.get("value").and_then(|v| v.as_array()) {
        let next = body
            .get("@odata.nextLink")
            .and_then(|v| v.as_str())
            .map(String::from);
        return Ok((value.clone(), next));
    }
    Err(ConnectorError::permanent(
        "unrecognized odata payload shape",
    ))
}

/// Build the `$filter` expression for a company-code/fiscal-period scope
fn build_filter(company_code: &str, fiscal_year: &str, fiscal_period: Option<&str>) -> String {
    let mut filter = format!(
        "CompanyCode eq '{}' and FiscalYear eq '{}'",
        escape_odata_literal(company_code),
        escape_odata_literal(fiscal_year)
    );
    if let Some(period) = fiscal_period {
        filter.push_str(&format!(
            " and FiscalPeriod eq '{}'",
            escape_odata_literal(period)
        ));
    }
    filter
}

/// Escape single quotes per OData literal rules
fn escape_odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Connector for enterprise OData extraction
pub struct EnterpriseDataConnector {
    config: EnterpriseDataConfig,
    client: reqwest::Client,
}

impl EnterpriseDataConnector {
    /// Create a new connector
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: EnterpriseDataConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ConnectorError::permanent(format!("http client build failed: {e}")))?;
        Ok(Self { config, client })
    }

    /// Build the first-page URL for an extraction query
    fn query_url(
        &self,
        entity_set: &str,
        company_code: &str,
        fiscal_year: &str,
        fiscal_period: Option<&str>,
    ) -> String {
        let filter = build_filter(company_code, fiscal_year, fiscal_period);
        format!(
            "{}/{}?$format=json&$top={}&$filter={}",
            self.config.base_url.trim_end_matches('/'),
            entity_set,
            self.config.page_size,
            urlencoding::encode(&filter)
        )
    }

    fn check_entity_set(&self, entity_set: &str) -> Result<()> {
        if self.config.allowed_entity_sets.contains(entity_set) {
            Ok(())
        } else {
            Err(ConnectorError::permanent(format!(
                "entity set not allowed: {entity_set}"
            )))
        }
    }
}

#[async_trait::async_trait]
impl Connector for EnterpriseDataConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::EnterpriseData
    }

    // Extraction is read-only; every operation may be repeated.
    fn is_idempotent(&self, _operation: &str) -> bool {
        true
    }

    async fn invoke(
        &self,
        request: &ConnectorRequest,
        credentials: &CredentialSet,
    ) -> Result<serde_json::Value> {
        if request.operation != "extract_entity_records" {
            return Err(ConnectorError::permanent(format!(
                "unsupported enterprise-data operation: {}",
                request.operation
            )));
        }

        let token = credentials
            .enterprise_data_token
            .as_deref()
            .ok_or_else(|| ConnectorError::auth("no enterprise-data token configured for tenant"))?;

        let params = &request.params;
        let entity_set = require_str(params, "entity_set")?;
        self.check_entity_set(entity_set)?;
        let company_code = require_str(params, "company_code")?;
        let fiscal_year = require_str(params, "fiscal_year")?;
        let fiscal_period = optional_str(params, "fiscal_period");
        let max_rows = params
            .get("max_rows")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);

        let url = self.query_url(entity_set, company_code, fiscal_year, fiscal_period);
        debug!(entity_set = %entity_set, company_code = %company_code, "Starting extraction");

        let mut cursor = PageCursor::start(url);
        let mut records: Vec<serde_json::Value> = Vec::new();
        let mut truncated = false;
        let mut pages = 0usize;

        while let Some(batch) = cursor.next_page(&self.client, token).await? {
            records.extend(batch.records);
            pages += 1;

            if let Some(limit) = max_rows {
                if records.len() >= limit {
                    truncated = records.len() > limit || batch.has_more;
                    records.truncate(limit);
                    break;
                }
            }
            if pages >= MAX_PAGES {
                warn!(entity_set = %entity_set, pages = pages, "Extraction hit page ceiling");
                truncated = true;
                break;
            }
        }

        debug!(
            entity_set = %entity_set,
            record_count = records.len(),
            pages = pages,
            "Extraction complete"
        );

        Ok(serde_json::json!({
            "entity_set": entity_set,
            "company_code": company_code,
            "record_count": records.len(),
            "truncated": truncated,
            "records": records,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_build_filter() {
        let filter = build_filter("1000", "2025", Some("003"));
        assert_eq!(
            filter,
            "CompanyCode eq '1000' and FiscalYear eq '2025' and FiscalPeriod eq '003'"
        );
        let filter = build_filter("1000", "2025", None);
        assert!(!filter.contains("FiscalPeriod"));
    }

    #[test]
    fn test_filter_escapes_quotes() {
        let filter = build_filter("o'brien", "2025", None);
        assert!(filter.contains("o''brien"));
    }

    #[test]
    fn test_parse_page_v2() {
        let body = serde_json::json!({
            "d": {
                "results": [{"id": 1}, {"id": 2}],
                "__next": "https://erp.example.com/page2"
            }
        });
        let (records, next) = parse_page(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(next.as_deref(), Some("https://erp.example.com/page2"));
    }

    #[test]
    fn test_parse_page_v4_final() {
        let body = serde_json::json!({ "value": [{"id": 1}] });
        let (records, next) = parse_page(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert!(next.is_none());
    }

    #[test]
    fn test_parse_page_unknown_shape() {
        let body = serde_json::json!({"rows": []});
        let err = parse_page(&body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn test_query_url() {
        let connector = EnterpriseDataConnector::new(EnterpriseDataConfig {
            base_url: "https://erp.example.com/odata/".to_string(),
            page_size: 500,
            ..Default::default()
        })
        .unwrap();
        let url = connector.query_url("ACDOCA", "1000", "2025", Some("003"));
        assert!(url.starts_with("https://erp.example.com/odata/ACDOCA?"));
        assert!(url.contains("%24top=500") || url.contains("$top=500"));
        assert!(url.contains(&urlencoding::encode(
            "CompanyCode eq '1000' and FiscalYear eq '2025' and FiscalPeriod eq '003'"
        ).into_owned()));
    }

    #[test]
    fn test_entity_set_allowlist() {
        let connector = EnterpriseDataConnector::new(EnterpriseDataConfig::default()).unwrap();
        assert!(connector.check_entity_set("ACDOCA").is_ok());
        let err = connector.check_entity_set("USR02").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn test_cursor_states() {
        let cursor = PageCursor::start("https://erp.example.com/q".to_string());
        assert!(!cursor.is_done());
        assert_eq!(cursor.next_url(), Some("https://erp.example.com/q"));

        let resumed = PageCursor::resume("https://erp.example.com/page7".to_string());
        assert_eq!(resumed.next_url(), Some("https://erp.example.com/page7"));
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_failure() {
        let connector = EnterpriseDataConnector::new(EnterpriseDataConfig::default()).unwrap();
        let request = ConnectorRequest::new(
            "extract_entity_records",
            serde_json::json!({
                "entity_set": "ACDOCA",
                "company_code": "1000",
                "fiscal_year": "2025"
            }),
        );
        let err = connector
            .invoke(&request, &CredentialSet::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailure);
    }
}
