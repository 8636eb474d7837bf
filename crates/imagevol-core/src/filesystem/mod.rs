//! Filesystem management for volume publication.

pub mod mount;
