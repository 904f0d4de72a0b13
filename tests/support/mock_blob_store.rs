use kirin::blob_store::{BlobStore, BlobStoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock blob storage for testing
///
/// Keeps objects in memory. Uploads whose key contains a registered marker
/// can be made to fail or to stall for a while.
#[derive(Default)]
pub struct MockBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    attempts: AtomicUsize,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upload whose key contains `marker`
    pub fn fail_uploads_containing(&self, marker: &str) {
        self.failing.lock().unwrap().push(marker.to_string());
    }

    /// Sleep before storing any upload whose key contains `marker`
    pub fn delay_uploads_containing(&self, marker: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(marker.to_string(), delay);
    }

    /// Store an object directly, as if uploaded by another tool
    pub fn seed(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Number of upload calls, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), BlobStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| key.contains(marker.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fails = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|marker| key.contains(marker.as_str()));
        if fails {
            return Err(BlobStoreError::SdkError(format!(
                "Put object failed: {}",
                key
            )));
        }

        self.seed(key, data);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}
