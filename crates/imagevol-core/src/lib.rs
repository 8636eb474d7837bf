//! # imagevol-core
//!
//! Host filesystem primitives used to expose a materialized image:
//! - **Bind mounts**: attaching an extracted tree at a volume target path.
//! - **Read-only remounts**: enforcing `ro` and other per-mount flags.
//! - **Mount-point detection**: keeping publish and unpublish idempotent.
//!
//! All mount system calls go through `nix` and are wrapped behind the
//! [`Mounter`](filesystem::mount::Mounter) trait so callers can substitute
//! a fake in tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
