//! # imagevol-node
//!
//! Node-side volume publication for imagevol.
//!
//! Provides two entry points:
//! - [`PublishVolumeRequest`](request::PublishVolumeRequest): fluent request builder mirroring the
//!   node agent's publish call.
//! - [`NodeServer`](server::NodeServer): validates requests, asks the materialization coordinator
//!   for readiness, and bind-mounts ready images.
//!
//! # Example
//!
//! ```rust,no_run
//! use imagevol_node::request::PublishVolumeRequest;
//!
//! let request = PublishVolumeRequest::new("vol-1", "/var/lib/kubelet/pods/p/volumes/v")
//!     .image("registry.local/repo/app:v1")
//!     .readonly(true);
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod request;
pub mod server;
