//! Naming grammar for datasets, volumes and snapshots.
//!
//! Dataset and volume names are `/`-separated paths whose first component
//! is the pool. Snapshot names are `<dataset>@<snapshot>`. All names are at
//! most [`MAX_NAME_LEN`] bytes.

use crate::error::{CoreError, CoreResult};
use crate::types::ObjectKind;

/// Longest permitted fully-qualified name.
pub const MAX_NAME_LEN: usize = 255;

/// Separator between path components.
pub const PATH_SEPARATOR: char = '/';

/// Separator between a dataset name and a snapshot name.
pub const SNAPSHOT_SEPARATOR: char = '@';

fn is_component_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | ' ')
}

fn check_component(name: &str, component: &str) -> CoreResult<()> {
    if component.is_empty() {
        return Err(invalid(name, "empty path component"));
    }
    if !component.chars().all(is_component_char) {
        return Err(invalid(name, "illegal character"));
    }
    Ok(())
}

fn invalid(name: &str, reason: &'static str) -> CoreError {
    CoreError::InvalidName {
        name: name.to_string(),
        reason,
    }
}

fn check_dataset_path(full: &str, path: &str) -> CoreResult<()> {
    let mut components = path.split(PATH_SEPARATOR);
    let pool = components.next().unwrap_or_default();
    check_component(full, pool)?;
    if !pool.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(invalid(full, "pool name must begin with a letter"));
    }
    for component in components {
        check_component(full, component)?;
    }
    Ok(())
}

/// Validates `name` against the grammar for `kind`.
pub fn validate_name(name: &str, kind: ObjectKind) -> CoreResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(name, "name longer than 255 bytes"));
    }

    match kind {
        ObjectKind::Dataset | ObjectKind::Volume => {
            if name.contains(SNAPSHOT_SEPARATOR) {
                return Err(invalid(name, "'@' is only valid in snapshot names"));
            }
            check_dataset_path(name, name)
        }
        ObjectKind::Snapshot => {
            let (dataset, snapshot) = name
                .split_once(SNAPSHOT_SEPARATOR)
                .ok_or_else(|| invalid(name, "snapshot name lacks '@'"))?;
            if snapshot.contains(SNAPSHOT_SEPARATOR) {
                return Err(invalid(name, "more than one '@'"));
            }
            if snapshot.contains(PATH_SEPARATOR) {
                return Err(invalid(name, "'/' after '@'"));
            }
            check_dataset_path(name, dataset)?;
            check_component(name, snapshot)
        }
    }
}

/// Name of the parent object, or `None` for a pool root.
///
/// For snapshots this is everything before `@`; for datasets and volumes the
/// last `/`-segment is stripped.
pub fn parent_name(name: &str, kind: ObjectKind) -> Option<&str> {
    match kind {
        ObjectKind::Snapshot => name.split_once(SNAPSHOT_SEPARATOR).map(|(ds, _)| ds),
        ObjectKind::Dataset | ObjectKind::Volume => {
            name.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent)
        }
    }
}

/// The part of a snapshot name after `@`.
pub fn snapshot_short_name(name: &str) -> Option<&str> {
    name.split_once(SNAPSHOT_SEPARATOR).map(|(_, snap)| snap)
}

/// Number of `/`-separated components before any `@`.
pub fn depth(name: &str) -> usize {
    let path = name
        .split_once(SNAPSHOT_SEPARATOR)
        .map(|(ds, _)| ds)
        .unwrap_or(name);
    path.split(PATH_SEPARATOR).count()
}

/// Name of the pool an object belongs to.
pub fn pool_name(name: &str) -> &str {
    let path = name
        .split_once(SNAPSHOT_SEPARATOR)
        .map(|(ds, _)| ds)
        .unwrap_or(name);
    path.split(PATH_SEPARATOR).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dataset_names() {
        assert!(validate_name("tank", ObjectKind::Dataset).is_ok());
        assert!(validate_name("tank/home/alice", ObjectKind::Dataset).is_ok());
        assert!(validate_name("tank/vm-disk_0.img", ObjectKind::Volume).is_ok());
        assert!(validate_name("tank/with space:colon", ObjectKind::Dataset).is_ok());
    }

    #[test]
    fn test_invalid_dataset_names() {
        assert!(validate_name("", ObjectKind::Dataset).is_err());
        assert!(validate_name("tank//home", ObjectKind::Dataset).is_err());
        assert!(validate_name("tank/home/", ObjectKind::Dataset).is_err());
        assert!(validate_name("/tank", ObjectKind::Dataset).is_err());
        assert!(validate_name("tank@snap", ObjectKind::Dataset).is_err());
        assert!(validate_name("1tank", ObjectKind::Dataset).is_err());
        assert!(validate_name("tank/h*me", ObjectKind::Dataset).is_err());
    }

    #[test]
    fn test_snapshot_names() {
        assert!(validate_name("tank/a@autosnap_2024-01-01_00:00:00_daily", ObjectKind::Snapshot).is_ok());
        assert!(validate_name("tank/a", ObjectKind::Snapshot).is_err());
        assert!(validate_name("tank/a@", ObjectKind::Snapshot).is_err());
        assert!(validate_name("tank/a@b@c", ObjectKind::Snapshot).is_err());
        assert!(validate_name("tank/a@b/c", ObjectKind::Snapshot).is_err());
        assert!(validate_name("@snap", ObjectKind::Snapshot).is_err());
    }

    #[test]
    fn test_length_limit() {
        let long = format!("tank/{}", "a".repeat(MAX_NAME_LEN));
        assert!(validate_name(&long, ObjectKind::Dataset).is_err());
        let exact = format!("tank/{}", "a".repeat(MAX_NAME_LEN - 5));
        assert_eq!(exact.len(), MAX_NAME_LEN);
        assert!(validate_name(&exact, ObjectKind::Dataset).is_ok());
    }

    #[test]
    fn test_parent_name() {
        assert_eq!(parent_name("tank", ObjectKind::Dataset), None);
        assert_eq!(parent_name("tank/a/b", ObjectKind::Dataset), Some("tank/a"));
        assert_eq!(parent_name("tank/a@s1", ObjectKind::Snapshot), Some("tank/a"));
        assert_eq!(parent_name("tank@s1", ObjectKind::Snapshot), Some("tank"));
    }

    #[test]
    fn test_depth_and_pool() {
        assert_eq!(depth("tank"), 1);
        assert_eq!(depth("tank/a/b"), 3);
        assert_eq!(depth("tank/a@x/y"), 2);
        assert_eq!(pool_name("tank/a/b@s"), "tank");
        assert_eq!(snapshot_short_name("tank/a@s"), Some("s"));
    }
}
