//! Azure Table Storage reader
//!
//! Lists the deployment table over the Table service REST API, signing each
//! request with the account key (SharedKeyLite). Paging follows the
//! `x-ms-continuation-*` headers until the service stops returning them.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::{DeploymentStore, StorageRecord, StorageResult};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2019-02-02";
const NEXT_PARTITION_HEADER: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_HEADER: &str = "x-ms-continuation-NextRowKey";

/// Connection settings for a storage account table.
#[derive(Debug, Clone)]
pub struct AzureTableConfig {
    pub account_name: String,
    /// Base64 account key, as shown in the portal.
    pub account_key: String,
    pub table_name: String,
    /// Override for the table endpoint (e.g. a local emulator).
    pub endpoint: Option<String>,
}

impl AzureTableConfig {
    pub fn new(account_name: &str, account_key: &str, table_name: &str) -> Self {
        AzureTableConfig {
            account_name: account_name.to_string(),
            account_key: account_key.to_string(),
            table_name: table_name.to_string(),
            endpoint: None,
        }
    }

    /// Point the store at a different endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.table.core.windows.net", self.account_name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntityPage {
    #[serde(default)]
    value: Vec<StorageRecord>,
}

/// Read-only client for the deployment table.
pub struct AzureTableStore {
    config: AzureTableConfig,
    key: Vec<u8>,
    http_client: reqwest::Client,
}

impl AzureTableStore {
    /// Create a store, decoding the account key up front.
    pub fn new(config: AzureTableConfig) -> StorageResult<Self> {
        if config.account_name.is_empty() || config.table_name.is_empty() {
            return Err(StorageError::Config(
                "account name and table name are required".to_string(),
            ));
        }

        let key = STANDARD
            .decode(config.account_key.trim())
            .map_err(|e| StorageError::Auth(format!("account key is not base64: {e}")))?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("spektate-state/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(AzureTableStore {
            config,
            key,
            http_client,
        })
    }

    /// SharedKeyLite signature for a request issued at `date`.
    fn authorization(&self, date: &str) -> StorageResult<String> {
        let payload = string_to_sign(&self.config.account_name, &self.config.table_name, date);
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| StorageError::Auth(e.to_string()))?;
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!(
            "SharedKeyLite {}:{}",
            self.config.account_name, signature
        ))
    }

    async fn fetch_page(
        &self,
        filter: &str,
        continuation: Option<&(String, String)>,
    ) -> StorageResult<(Vec<StorageRecord>, Option<(String, String)>)> {
        let url = format!("{}/{}()", self.config.base_url(), self.config.table_name);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut query = vec![("$filter", filter.to_string())];
        if let Some((pk, rk)) = continuation {
            query.push(("NextPartitionKey", pk.clone()));
            query.push(("NextRowKey", rk.clone()));
        }

        let response = self
            .http_client
            .get(&url)
            .query(&query)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("Accept", "application/json;odata=nometadata")
            .header("Authorization", self.authorization(&date)?)
            .send()
            .await
            .map_err(|e| StorageError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StorageError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let next = match (header(NEXT_PARTITION_HEADER), header(NEXT_ROW_HEADER)) {
            (Some(pk), Some(rk)) => Some((pk, rk)),
            _ => None,
        };

        let page: EntityPage = response
            .json()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))?;

        Ok((page.value, next))
    }
}

#[async_trait]
impl DeploymentStore for AzureTableStore {
    async fn list_records(&self, partition_key: &str) -> StorageResult<Vec<StorageRecord>> {
        let filter = partition_filter(partition_key);
        let mut records = Vec::new();
        let mut continuation: Option<(String, String)> = None;

        loop {
            let (page, next) = self.fetch_page(&filter, continuation.as_ref()).await?;
            debug!(
                table = %self.config.table_name,
                page_size = page.len(),
                "Fetched deployment table page"
            );
            records.extend(page);
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        info!(
            table = %self.config.table_name,
            partition_key = %partition_key,
            count = records.len(),
            "Listed deployment records"
        );
        Ok(records)
    }
}

/// Canonical string for SharedKeyLite on the Table service.
fn string_to_sign(account: &str, table: &str, date: &str) -> String {
    format!("{date}\n/{account}/{table}()")
}

/// OData filter selecting one partition. Single quotes are doubled.
fn partition_filter(partition_key: &str) -> String {
    format!("PartitionKey eq '{}'", partition_key.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AzureTableStore {
        AzureTableStore::new(AzureTableConfig::new(
            "myaccount",
            "c3Bla3RhdGUtdGVzdC1rZXk=",
            "deployments",
        ))
        .unwrap()
    }

    #[test]
    fn test_string_to_sign_layout() {
        assert_eq!(
            string_to_sign("acct", "tbl", "Tue, 17 Mar 2020 18:21:00 GMT"),
            "Tue, 17 Mar 2020 18:21:00 GMT\n/acct/tbl()"
        );
    }

    #[test]
    fn test_authorization_header_matches_known_signature() {
        let header = store()
            .authorization("Tue, 17 Mar 2020 18:21:00 GMT")
            .unwrap();
        assert_eq!(
            header,
            "SharedKeyLite myaccount:GIPFxJx2STLAK9V+Vhjv/XJ6np1QR2Gstk092okghVk="
        );
    }

    #[test]
    fn test_invalid_key_is_auth_error() {
        let result = AzureTableStore::new(AzureTableConfig::new("a", "not base64!!", "t"));
        assert!(matches!(result, Err(StorageError::Auth(_))));
    }

    #[test]
    fn test_missing_table_is_config_error() {
        let result = AzureTableStore::new(AzureTableConfig::new("a", "c3Bla3RhdGU=", ""));
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_partition_filter_escapes_quotes() {
        assert_eq!(partition_filter("org.proj"), "PartitionKey eq 'org.proj'");
        assert_eq!(partition_filter("it's"), "PartitionKey eq 'it''s'");
    }

    #[test]
    fn test_endpoint_override() {
        let config =
            AzureTableConfig::new("a", "k", "t").with_endpoint("http://127.0.0.1:10002/devstore/");
        assert_eq!(config.base_url(), "http://127.0.0.1:10002/devstore");
        assert_eq!(
            AzureTableConfig::new("acct", "k", "t").base_url(),
            "https://acct.table.core.windows.net"
        );
    }
}
