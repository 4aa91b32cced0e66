//! Parent-chain resolution for hierarchical records.
//!
//! A record names an optional parent; resolution walks that chain and merges
//! every ancestor into one flattened record.
//!
//! # Merge rules
//!
//! - Classes accumulate nearest-first, duplicates dropped.
//! - The nearest record that defines a parameter wins.
//! - Environment comes from the nearest record that sets one.
//! - Stacked `name=value` entries are collected nearest-first and applied
//!   last, only to parameter names no record in the chain set explicitly.
//!
//! The walk is iterative and tracks every visited name, so a cycle is
//! reported as [`IndirectError::Cycle`] instead of recursing forever.
//!
//! # Example
//!
//! ```ignore
//! let flattened = hierarchy::resolve("web1", |name: &str| directory.lookup(name))?;
//! assert!(flattened.classes.contains(&"base".to_string()));
//! ```

use crate::record::parse_stacked;
use crate::{ArtifactKind, HierarchicalRecord, IndirectError, IndirectResult};
use std::collections::HashSet;

/// Resolve `name` and its ancestors into a single flattened record.
///
/// The result carries no parent pointer. Its `stacked_attributes` hold the
/// collected entries of the whole chain, nearest first.
pub fn resolve<F>(name: &str, mut lookup: F) -> IndirectResult<HierarchicalRecord>
where
    F: FnMut(&str) -> IndirectResult<Option<HierarchicalRecord>>,
{
    let mut acc = lookup(name)?.ok_or_else(|| IndirectError::NotFound {
        kind: ArtifactKind::Node,
        key: name.to_string(),
    })?;

    let mut chain = vec![name.to_string()];
    let mut visited: HashSet<String> = HashSet::from([name.to_string()]);
    let mut stacked = std::mem::take(&mut acc.stacked_attributes);
    let mut child = name.to_string();
    let mut cursor = acc.parent_name.take();

    while let Some(parent_name) = cursor {
        chain.push(parent_name.clone());
        if !visited.insert(parent_name.clone()) {
            tracing::warn!(chain = %chain.join(" -> "), "Parent cycle detected");
            return Err(IndirectError::Cycle { chain });
        }

        let parent = lookup(&parent_name)?.ok_or_else(|| IndirectError::ParentNotFound {
            name: parent_name.clone(),
            child: child.clone(),
        })?;
        tracing::debug!(child = %child, parent = %parent_name, "Merging parent record");

        for class in parent.classes {
            acc.add_class(class);
        }
        for (key, value) in parent.parameters {
            acc.parameters.entry(key).or_insert(value);
        }
        if acc.environment.is_none() {
            acc.environment = parent.environment;
        }
        stacked.extend(parent.stacked_attributes);

        child = parent_name;
        cursor = parent.parent_name;
    }

    apply_stacked(&mut acc, &stacked);
    acc.stacked_attributes = stacked;
    Ok(acc)
}

/// Fill unset parameters from stacked entries, earliest entry first.
pub fn apply_stacked(record: &mut HierarchicalRecord, stacked: &[String]) {
    for (key, value) in stacked.iter().filter_map(|entry| parse_stacked(entry)) {
        record.parameters.entry(key).or_insert(value);
    }
}

// =============================================================================
// TESTS
// =============================================================================
