//! Environment-driven detection. Kept in its own test binary so the
//! process-wide detection result starts out unset.

use std::time::{Duration, Instant};

use gce_metadata::{
    default_client, on_gce, CancellationToken, MetadataClient, METADATA_HOST_ENV,
};

#[tokio::test]
async fn test_host_override_from_env() {
    // Nothing listens here; any probe or fetch would fail.
    std::env::set_var(METADATA_HOST_ENV, "127.0.0.1:1");

    let start = Instant::now();
    let cancel = CancellationToken::new();
    let (a, b, c) = tokio::join!(on_gce(&cancel), on_gce(&cancel), on_gce(&cancel));
    assert!(a && b && c);
    assert!(start.elapsed() < Duration::from_millis(500));

    // Later calls return the first answer even with a cancelled token.
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(on_gce(&cancelled).await);

    let client = MetadataClient::from_env().unwrap();
    assert_eq!(client.base_url(), "http://127.0.0.1:1");
    assert_eq!(default_client().base_url(), "http://127.0.0.1:1");
}
