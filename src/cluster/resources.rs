//! Shared resource types for clusterlet

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a typed resource id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("expected prefix '{expected}' in id '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("invalid sequence number in id '{0}'")]
    InvalidSequence(String),
}

/// Define a typed, sequence-numbered resource id such as `node-3`.
///
/// Ids order by sequence number, which is also creation order.
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            /// The prefix for this id type.
            pub const PREFIX: &'static str = $prefix;

            pub const fn from_sequence(seq: u64) -> Self {
                Self(seq)
            }

            pub const fn sequence(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::cluster::resources::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let seq = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .ok_or_else(|| $crate::cluster::resources::IdError::InvalidPrefix {
                        expected: Self::PREFIX,
                        actual: s.to_string(),
                    })?;
                seq.parse::<u64>()
                    .map(Self)
                    .map_err(|_| {
                        $crate::cluster::resources::IdError::InvalidSequence(s.to_string())
                    })
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use define_id;

/// Response for listing resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind (e.g., "PodList", "NodeList")
    pub kind: String,

    /// List of items
    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    /// Create a new resource list
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            api_version: super::API_VERSION.to_string(),
            kind: kind.into(),
            items,
        }
    }
}

/// Status of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Success or failure
    pub success: bool,

    /// Status message
    pub message: String,

    /// Details (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OperationStatus {
    /// Create success status
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: None,
        }
    }

    /// Create failure status
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }

    /// Add details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    define_id!(WidgetId, "widget");

    #[test]
    fn test_id_display_and_parse() {
        let id = WidgetId::from_sequence(7);
        assert_eq!(id.to_string(), "widget-7");
        assert_eq!("widget-7".parse::<WidgetId>().unwrap(), id);
    }

    #[test]
    fn test_id_parse_errors() {
        assert!(matches!(
            "gadget-1".parse::<WidgetId>(),
            Err(IdError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            "widget-x".parse::<WidgetId>(),
            Err(IdError::InvalidSequence(_))
        ));
        assert!("widget7".parse::<WidgetId>().is_err());
    }

    #[test]
    fn test_id_orders_by_sequence() {
        assert!(WidgetId::from_sequence(2) < WidgetId::from_sequence(10));
    }

    #[test]
    fn test_id_serde_as_string() {
        let json = serde_json::to_string(&WidgetId::from_sequence(3)).unwrap();
        assert_eq!(json, "\"widget-3\"");
        let back: WidgetId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence(), 3);
    }

    #[test]
    fn test_resource_list() {
        let list: ResourceList<String> =
            ResourceList::new("StringList", vec!["a".into(), "b".into()]);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.kind, "StringList");
    }

    #[test]
    fn test_operation_status() {
        let success = OperationStatus::success("Node added");
        assert!(success.success);

        let failure = OperationStatus::failure("Node not found")
            .with_details(serde_json::json!({"node": "node-9"}));
        assert!(!failure.success);
        assert!(failure.details.is_some());
    }
}
