//! Property schema helpers for querying and initialising pools.

use std::collections::BTreeMap;

use crate::ingest::{SchemaDefect, AVAILABLE_PROPERTY, TYPE_PROPERTY, USED_PROPERTY};
use crate::instructions::PropertySetRequest;
use crate::property::PropertyName;

/// Every property name the agent asks the storage system for.
pub fn query_property_names() -> Vec<&'static str> {
    let mut names = vec![TYPE_PROPERTY, AVAILABLE_PROPERTY, USED_PROPERTY];
    names.extend(PropertyName::ALL.iter().map(PropertyName::as_str));
    names
}

/// Default-valued set requests fixing every reported defect, one per root.
pub fn initialization_requests(defects: &[SchemaDefect]) -> Vec<PropertySetRequest> {
    let mut by_object: BTreeMap<&str, PropertySetRequest> = BTreeMap::new();
    for defect in defects {
        by_object
            .entry(defect.object.as_str())
            .or_insert_with(|| PropertySetRequest::new(defect.object.as_str()))
            .push(defect.property.default_value());
    }
    by_object.into_values().collect()
}

/// Set request giving a new pool root every inheritable and last-snapshot default.
pub fn root_initialization(root: &str) -> PropertySetRequest {
    let mut request = PropertySetRequest::new(root);
    for name in PropertyName::ALL {
        if name.is_inheritable() || name.is_last_snapshot() {
            request.push(name.default_value());
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_names_include_pseudo_properties() {
        let names = query_property_names();
        assert_eq!(&names[..3], &["type", "available", "used"]);
        assert!(names.contains(&"snapkeep:retention:prunedeferral"));
        assert_eq!(names.len(), 3 + PropertyName::ALL.len());
    }

    #[test]
    fn test_initialization_groups_by_root() {
        let defects = vec![
            SchemaDefect {
                object: "tank".into(),
                property: PropertyName::Enabled,
            },
            SchemaDefect {
                object: "backup".into(),
                property: PropertyName::Template,
            },
            SchemaDefect {
                object: "tank".into(),
                property: PropertyName::RetentionDaily,
            },
        ];
        let requests = initialization_requests(&defects);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].to_arg_string(), "snapkeep:template=default");
        assert_eq!(
            requests[1].to_arg_string(),
            "snapkeep:enabled=false snapkeep:retention:daily=90"
        );
    }

    #[test]
    fn test_root_initialization_skips_snapshot_only() {
        let request = root_initialization("tank");
        assert_eq!(request.properties().len(), 18);
        assert!(!request
            .tokens()
            .iter()
            .any(|t| t.starts_with("snapkeep:snapshotperiod")));
    }
}
