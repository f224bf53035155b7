//! Typed accessors for well-known metadata keys.

use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::client::MetadataClient;
use crate::error::MetadataError;

static DEFAULT_CLIENT: OnceLock<MetadataClient> = OnceLock::new();

/// The process-wide client.
///
/// Its cache of project and instance ids lives as long as the process.
pub fn default_client() -> &'static MetadataClient {
    DEFAULT_CLIENT.get_or_init(MetadataClient::default)
}

impl MetadataClient {
    /// Fetch a value from the metadata server.
    ///
    /// The key is appended to `http://${GCE_METADATA_HOST}/computeMetadata/v1/`.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::NotDefined` if the key does not exist.
    pub async fn get(&self, cancel: &CancellationToken, key: &str) -> Result<String, MetadataError> {
        let (value, _etag) = self.fetch_with_etag(cancel, key).await?;
        Ok(value)
    }

    /// Fetch a value with surrounding whitespace removed.
    pub async fn get_trimmed(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<String, MetadataError> {
        Ok(self.get(cancel, key).await?.trim().to_string())
    }

    /// Fetch a directory key as a list of trimmed lines.
    pub async fn get_lines(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<Vec<String>, MetadataError> {
        let value = self.get(cancel, key).await?;
        Ok(split_lines(&value))
    }

    /// Fetch a value and deserialize it as JSON.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Json` if deserialization fails.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<T, MetadataError> {
        let value = self.get(cancel, key).await?;
        serde_json::from_str(&value).map_err(MetadataError::from)
    }

    /// The current instance's project ID string. Cached after the first success.
    pub async fn project_id(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        self.cache.project_id.get(self, cancel).await
    }

    /// The current instance's numeric project ID. Cached after the first success.
    pub async fn numeric_project_id(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, MetadataError> {
        self.cache.numeric_project_id.get(self, cancel).await
    }

    /// The current VM's numeric instance ID. Cached after the first success.
    pub async fn instance_id(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        self.cache.instance_id.get(self, cancel).await
    }

    /// The instance's primary internal IP address.
    pub async fn internal_ip(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        self.get_trimmed(cancel, "instance/network-interfaces/0/ip")
            .await
    }

    /// The instance's primary external (public) IP address.
    pub async fn external_ip(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        self.get_trimmed(cancel, "instance/network-interfaces/0/access-configs/0/external-ip")
            .await
    }

    /// The email of a service account; empty selects the instance's default.
    pub async fn email(
        &self,
        cancel: &CancellationToken,
        service_account: &str,
    ) -> Result<String, MetadataError> {
        let key = format!(
            "instance/service-accounts/{}/email",
            service_account_or_default(service_account)
        );
        self.get_trimmed(cancel, &key).await
    }

    /// The instance's hostname, of the form `<instance>.c.<project>.internal`.
    pub async fn hostname(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        self.get_trimmed(cancel, "instance/hostname").await
    }

    /// User-defined instance tags.
    pub async fn instance_tags(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, MetadataError> {
        self.get_json(cancel, "instance/tags").await
    }

    /// The current VM's instance name.
    pub async fn instance_name(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        self.get_trimmed(cancel, "instance/name").await
    }

    /// The current VM's zone, such as `us-central1-b`.
    pub async fn zone(&self, cancel: &CancellationToken) -> Result<String, MetadataError> {
        // projects/<number>/zones/<zone>
        let zone = self.get_trimmed(cancel, "instance/zone").await?;
        Ok(last_segment(&zone).to_string())
    }

    /// Names of user-defined instance attributes.
    pub async fn instance_attributes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, MetadataError> {
        self.get_lines(cancel, "instance/attributes/").await
    }

    /// Names of user-defined project attributes.
    pub async fn project_attributes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, MetadataError> {
        self.get_lines(cancel, "project/attributes/").await
    }

    /// Value of an instance attribute. May be empty if defined as empty.
    pub async fn instance_attribute_value(
        &self,
        cancel: &CancellationToken,
        attr: &str,
    ) -> Result<String, MetadataError> {
        self.get(cancel, &format!("instance/attributes/{attr}")).await
    }

    /// Value of a project attribute. May be empty if defined as empty.
    pub async fn project_attribute_value(
        &self,
        cancel: &CancellationToken,
        attr: &str,
    ) -> Result<String, MetadataError> {
        self.get(cancel, &format!("project/attributes/{attr}")).await
    }

    /// OAuth scopes of a service account; empty selects the instance's default.
    pub async fn scopes(
        &self,
        cancel: &CancellationToken,
        service_account: &str,
    ) -> Result<Vec<String>, MetadataError> {
        let key = format!(
            "instance/service-accounts/{}/scopes",
            service_account_or_default(service_account)
        );
        self.get_lines(cancel, &key).await
    }
}

fn split_lines(value: &str) -> Vec<String> {
    value
        .trim()
        .split('\n')
        .map(|line| line.trim().to_string())
        .collect()
}

fn service_account_or_default(service_account: &str) -> &str {
    if service_account.is_empty() {
        "default"
    } else {
        service_account
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\nb\n"), vec!["a", "b"]);
        assert_eq!(split_lines("  a  \r\n\n b\n"), vec!["a", "", "b"]);
        assert_eq!(split_lines("single"), vec!["single"]);
    }

    #[test]
    fn test_service_account_default() {
        assert_eq!(service_account_or_default(""), "default");
        assert_eq!(service_account_or_default("sa@p.iam"), "sa@p.iam");
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("projects/123/zones/us-central1-b"), "us-central1-b");
        assert_eq!(last_segment("us-east1-c"), "us-east1-c");
    }

    #[test]
    fn test_default_client_is_shared() {
        assert!(std::ptr::eq(default_client(), default_client()));
    }
}
