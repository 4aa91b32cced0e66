//! Hierarchical records (node classification data)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter value: text, number, boolean, null, or an array of those.
pub type ParamValue = serde_json::Value;

/// A named record that may inherit classes and parameters from a parent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HierarchicalRecord {
    pub name: String,
    #[serde(default)]
    pub parent_name: Option<String>,
    /// Ordered, duplicates removed keeping the first occurrence
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    /// Raw `name=value` entries, applied only to unset parameters
    #[serde(default)]
    pub stacked_attributes: Vec<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

impl HierarchicalRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_name = Some(parent.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.add_class(class);
        self
    }

    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for class in classes {
            self.add_class(class);
        }
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_stacked(mut self, entry: impl Into<String>) -> Self {
        self.stacked_attributes.push(entry.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Append a class unless it is already present.
    pub fn add_class(&mut self, class: impl Into<String>) {
        let class = class.into();
        if !self.classes.contains(&class) {
            self.classes.push(class);
        }
    }
}

/// Parse one stacked entry. `a=b` yields `("a", "b")`, a bare `a` yields
/// `("a", null)`, and blank entries yield nothing.
pub fn parse_stacked(entry: &str) -> Option<(String, ParamValue)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    match entry.split_once('=') {
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), ParamValue::String(value.trim().to_string())))
        }
        None => Some((entry.to_string(), ParamValue::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes_keep_first_occurrence() {
        let record = HierarchicalRecord::new("web1").with_classes(["ntp", "ssh", "ntp", "base"]);
        assert_eq!(record.classes, vec!["ntp", "ssh", "base"]);
    }

    #[test]
    fn test_parse_stacked() {
        assert_eq!(
            parse_stacked("one=two"),
            Some(("one".to_string(), ParamValue::String("two".to_string())))
        );
        assert_eq!(
            parse_stacked(" three "),
            Some(("three".to_string(), ParamValue::Null))
        );
        assert_eq!(parse_stacked("   "), None);
        assert_eq!(parse_stacked("=orphan"), None);
        assert_eq!(
            parse_stacked("url=http://x/?a=b"),
            Some((
                "url".to_string(),
                ParamValue::String("http://x/?a=b".to_string())
            ))
        );
    }

    #[test]
    fn test_record_json_defaults() {
        let record: HierarchicalRecord = serde_json::from_str(r#"{"name":"base"}"#).unwrap();
        assert_eq!(record, HierarchicalRecord::new("base"));
    }
}
