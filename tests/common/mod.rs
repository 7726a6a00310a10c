//! Shared helpers for the integration tests

#![allow(dead_code)]

use ladder_storage::{Migrator, Version};

pub fn v(major: u32, minor: u32) -> Version {
    Version::new(major, minor)
}

/// Versions the history currently marks as applied, ascending
pub async fn applied_versions(migrator: &Migrator) -> Vec<Version> {
    migrator
        .status()
        .await
        .unwrap()
        .units
        .into_iter()
        .filter(|unit| unit.applied)
        .map(|unit| unit.version)
        .collect()
}
