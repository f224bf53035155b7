//! Cache for values that never change during the life of an instance.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::MetadataClient;
use crate::error::MetadataError;

pub(crate) const PROJECT_ID_KEY: &str = "project/project-id";
pub(crate) const NUMERIC_PROJECT_ID_KEY: &str = "project/numeric-project-id";
pub(crate) const INSTANCE_ID_KEY: &str = "instance/id";

/// A trimmed value that is fetched once and then kept.
///
/// Each entry has its own lock so lookups of unrelated keys never wait on
/// each other. Errors are never stored.
#[derive(Debug)]
pub(crate) struct CachedValue {
    key: &'static str,
    value: Mutex<String>,
}

impl CachedValue {
    fn new(key: &'static str) -> Self {
        Self {
            key,
            value: Mutex::new(String::new()),
        }
    }

    pub(crate) async fn get(
        &self,
        client: &MetadataClient,
        cancel: &CancellationToken,
    ) -> Result<String, MetadataError> {
        let mut value = self.value.lock().await;
        if !value.is_empty() {
            return Ok(value.clone());
        }
        let fetched = client.get_trimmed(cancel, self.key).await?;
        *value = fetched.clone();
        Ok(fetched)
    }
}

/// The allow-list of cacheable keys.
#[derive(Debug)]
pub(crate) struct ValueCache {
    pub(crate) project_id: CachedValue,
    pub(crate) numeric_project_id: CachedValue,
    pub(crate) instance_id: CachedValue,
}

impl Default for ValueCache {
    fn default() -> Self {
        Self {
            project_id: CachedValue::new(PROJECT_ID_KEY),
            numeric_project_id: CachedValue::new(NUMERIC_PROJECT_ID_KEY),
            instance_id: CachedValue::new(INSTANCE_ID_KEY),
        }
    }
}
