//! Environment-driven configuration.
//!
//! Variable names match the deployment dashboard's `.env` file so an
//! existing setup works unchanged.

use crate::error::ConfigError;
use crate::repository::azure_devops::DEFAULT_SYNC_TAG;
use crate::repository::RepoRef;

pub const AZURE_ORG: &str = "AZURE_ORG";
pub const AZURE_PROJECT: &str = "AZURE_PROJECT";
pub const AZURE_PIPELINE_ACCESS_TOKEN: &str = "AZURE_PIPELINE_ACCESS_TOKEN";
pub const SOURCE_REPO_ACCESS_TOKEN: &str = "SOURCE_REPO_ACCESS_TOKEN";
pub const MANIFEST: &str = "MANIFEST";
pub const MANIFEST_ACCESS_TOKEN: &str = "MANIFEST_ACCESS_TOKEN";
pub const HLD_REPO: &str = "HLD_REPO";
pub const HLD_IS_RELEASE: &str = "HLD_IS_RELEASE";
pub const SYNC_TAG: &str = "SYNC_TAG";
pub const STORAGE_ACCOUNT_NAME: &str = "STORAGE_ACCOUNT_NAME";
pub const STORAGE_ACCOUNT_KEY: &str = "STORAGE_ACCOUNT_KEY";
pub const STORAGE_TABLE_NAME: &str = "STORAGE_TABLE_NAME";
pub const STORAGE_PARTITION_KEY: &str = "STORAGE_PARTITION_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpektateConfig {
    pub org: String,
    pub project: String,
    pub pipeline_access_token: String,
    /// Falls back to the pipeline token.
    pub source_repo_access_token: Option<String>,
    /// Manifest repository name, in the same org/project.
    pub manifest_repo: Option<String>,
    /// Falls back to the pipeline token.
    pub manifest_access_token: Option<String>,
    /// HLD repository name for pull requests the record does not locate.
    pub hld_repo: Option<String>,
    /// HLD stage runs as a classic release rather than a build.
    pub hld_is_release: bool,
    pub sync_tag: String,
    pub storage_account_name: String,
    pub storage_account_key: String,
    pub storage_table_name: String,
    pub storage_partition_key: String,
}

impl SpektateConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).unwrap_or_default();

        SpektateConfig {
            org: required(AZURE_ORG),
            project: required(AZURE_PROJECT),
            pipeline_access_token: required(AZURE_PIPELINE_ACCESS_TOKEN),
            source_repo_access_token: get(SOURCE_REPO_ACCESS_TOKEN),
            manifest_repo: get(MANIFEST),
            manifest_access_token: get(MANIFEST_ACCESS_TOKEN),
            hld_repo: get(HLD_REPO),
            hld_is_release: get(HLD_IS_RELEASE)
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            sync_tag: get(SYNC_TAG).unwrap_or_else(|| DEFAULT_SYNC_TAG.to_string()),
            storage_account_name: required(STORAGE_ACCOUNT_NAME),
            storage_account_key: required(STORAGE_ACCOUNT_KEY),
            storage_table_name: required(STORAGE_TABLE_NAME),
            storage_partition_key: required(STORAGE_PARTITION_KEY),
        }
    }

    /// Check every required value, reporting all missing keys at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&[
            (AZURE_ORG, &self.org),
            (AZURE_PROJECT, &self.project),
            (STORAGE_ACCOUNT_NAME, &self.storage_account_name),
            (STORAGE_ACCOUNT_KEY, &self.storage_account_key),
            (STORAGE_TABLE_NAME, &self.storage_table_name),
            (STORAGE_PARTITION_KEY, &self.storage_partition_key),
        ])?;
        self.validate_sync_tag()
    }

    /// Check only what Azure DevOps calls need; storage may be unset.
    pub fn validate_devops(&self) -> Result<(), ConfigError> {
        require(&[(AZURE_ORG, &self.org), (AZURE_PROJECT, &self.project)])?;
        self.validate_sync_tag()
    }

    fn validate_sync_tag(&self) -> Result<(), ConfigError> {
        if self.sync_tag.contains('/') {
            return Err(ConfigError::Invalid {
                key: SYNC_TAG,
                message: "tag name must not contain '/'".to_string(),
            });
        }
        Ok(())
    }

    pub fn source_token(&self) -> &str {
        self.source_repo_access_token
            .as_deref()
            .unwrap_or(&self.pipeline_access_token)
    }

    pub fn manifest_token(&self) -> &str {
        self.manifest_access_token
            .as_deref()
            .unwrap_or(&self.pipeline_access_token)
    }

    pub fn repo(&self, name: &str) -> RepoRef {
        RepoRef::new(&self.org, &self.project, name)
    }

    pub fn manifest_repo_ref(&self) -> Option<RepoRef> {
        self.manifest_repo.as_deref().map(|r| self.repo(r))
    }

    pub fn hld_repo_ref(&self) -> Option<RepoRef> {
        self.hld_repo.as_deref().map(|r| self.repo(r))
    }
}

fn require(values: &[(&'static str, &String)]) -> Result<(), ConfigError> {
    let missing: Vec<&'static str> = values
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| *key)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Missing(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            (AZURE_ORG, "org"),
            (AZURE_PROJECT, "project"),
            (AZURE_PIPELINE_ACCESS_TOKEN, "pat"),
            (STORAGE_ACCOUNT_NAME, "acct"),
            (STORAGE_ACCOUNT_KEY, "a2V5"),
            (STORAGE_TABLE_NAME, "deployments"),
            (STORAGE_PARTITION_KEY, "org.project"),
        ]
    }

    #[test]
    fn test_complete_config_validates() {
        let config = SpektateConfig::from_lookup(lookup(&complete()));
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.sync_tag, "SYNC");
        assert!(config.hld_is_release);
    }

    #[test]
    fn test_missing_keys_all_reported() {
        let config = SpektateConfig::from_lookup(lookup(&[(AZURE_ORG, "org"), (STORAGE_TABLE_NAME, "  ")]));
        let Err(ConfigError::Missing(missing)) = config.validate() else {
            panic!("expected missing keys");
        };
        assert!(missing.contains(&AZURE_PROJECT));
        assert!(missing.contains(&STORAGE_TABLE_NAME));
        assert!(!missing.contains(&AZURE_ORG));
    }

    #[test]
    fn test_devops_validation_ignores_storage() {
        let config = SpektateConfig::from_lookup(lookup(&[(AZURE_ORG, "org"), (AZURE_PROJECT, "p")]));
        assert_eq!(config.validate_devops(), Ok(()));
        assert!(config.validate().is_err());

        let config = SpektateConfig::from_lookup(lookup(&[(AZURE_ORG, "org")]));
        assert_eq!(
            config.validate_devops(),
            Err(ConfigError::Missing(vec![AZURE_PROJECT]))
        );
    }

    #[test]
    fn test_tokens_fall_back_to_pipeline_token() {
        let config = SpektateConfig::from_lookup(lookup(&complete()));
        assert_eq!(config.source_token(), "pat");
        assert_eq!(config.manifest_token(), "pat");

        let mut pairs = complete();
        pairs.push((SOURCE_REPO_ACCESS_TOKEN, "src-pat"));
        pairs.push((MANIFEST_ACCESS_TOKEN, "manifest-pat"));
        let config = SpektateConfig::from_lookup(lookup(&pairs));
        assert_eq!(config.source_token(), "src-pat");
        assert_eq!(config.manifest_token(), "manifest-pat");
    }

    #[test]
    fn test_repo_refs_use_org_and_project() {
        let mut pairs = complete();
        pairs.push((MANIFEST, "manifest"));
        pairs.push((HLD_IS_RELEASE, "false"));
        let config = SpektateConfig::from_lookup(lookup(&pairs));
        assert_eq!(
            config.manifest_repo_ref(),
            Some(RepoRef::new("org", "project", "manifest"))
        );
        assert_eq!(config.hld_repo_ref(), None);
        assert!(!config.hld_is_release);
    }

    #[test]
    fn test_sync_tag_with_slash_is_invalid() {
        let mut pairs = complete();
        pairs.push((SYNC_TAG, "flux/sync"));
        let config = SpektateConfig::from_lookup(lookup(&pairs));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: SYNC_TAG, .. })
        ));
    }
}
