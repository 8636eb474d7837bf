//! # imagevol-image
//!
//! Image materialization for the imagevol driver.
//!
//! Handles:
//! - **Layers**: unpacking gzip-compressed tar layers into a directory tree.
//! - **Manifests**: reading the ordered layer list of a fetched image.
//! - **Hashing**: SHA-256 verification of layer blobs.
//! - **Fetching**: the `skopeo` copy tool behind the [`ImageFetcher`](fetch::ImageFetcher) trait.
//! - **Store**: the on-disk marker layout shared by all requests.
//! - **Coordinator**: the request/lock/cache state machine driving materialization.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod coordinator;
pub mod fetch;
pub mod hash;
pub mod layer;
pub mod manifest;
pub mod store;
