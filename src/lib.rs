//! Async client for the Google Compute Engine metadata server.
//!
//! # Features
//!
//! - Detect whether the process runs on GCE (memoized, never hangs)
//! - Fetch values as text, trimmed text, lines, or JSON
//! - Bounded retries with jittered exponential backoff
//! - Per-instance caching of project and instance ids
//! - Change subscriptions built on `wait_for_change` and ETags
//!
//! Every network operation takes a [`CancellationToken`]; cancelling it
//! aborts in-flight requests and backoff sleeps with
//! [`MetadataError::Cancelled`].
//!
//! # Example
//!
//! ```ignore
//! use gce_metadata::{default_client, on_gce, CancellationToken, MetadataError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MetadataError> {
//!     let cancel = CancellationToken::new();
//!     if !on_gce(&cancel).await {
//!         return Ok(());
//!     }
//!
//!     let client = default_client();
//!     let project = client.project_id(&cancel).await?;
//!     let zone = client.zone(&cancel).await?;
//!     println!("{project} in {zone}");
//!
//!     client
//!         .subscribe(&cancel, "instance/attributes/config", |_, value, exists| {
//!             println!("config = {value:?} (exists: {exists})");
//!             Ok(())
//!         })
//!         .await
//! }
//! ```
//!
//! # Configuration
//!
//! Set `GCE_METADATA_HOST` to send requests to another host (for example a
//! local emulator). Setting it also makes [`on_gce`] return `true` without
//! probing.

mod cache;
mod client;
mod detect;
mod error;
mod metadata;
mod retry;
mod subscribe;

pub use client::{MetadataClient, METADATA_HOST_ENV, METADATA_IP};
pub use detect::{on_gce, Detector};
pub use error::MetadataError;
pub use metadata::default_client;
pub use retry::RetryConfig;
pub use tokio_util::sync::CancellationToken;
