//! Traffic-split policy value
//!
//! A [`Policy`] maps variant names to non-negative integer weights and keeps
//! the order in which the variants were declared in the source document.
//! Selection walks variants in that order, so the order is part of the value.
//!
//! The remote document looks like:
//!
//! ```json
//! { "weights": { "control": 50, "experiment": 50 } }
//! ```

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::errors::PolicyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantWeight {
    pub name: String,
    pub weight: u64,
}

/// Immutable variant -> weight mapping in declared order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Policy {
    variants: Vec<VariantWeight>,
    total_weight: u64,
}

impl Policy {
    /// Build a policy, rejecting empty or duplicate names and weight overflow.
    pub fn new<I, S>(entries: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut variants = Vec::new();
        let mut total_weight: u64 = 0;

        for (name, weight) in entries {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(PolicyError::malformed("variant name must not be empty"));
            }
            if !seen.insert(name.clone()) {
                return Err(PolicyError::malformed(format!(
                    "duplicate variant '{name}'"
                )));
            }
            total_weight = total_weight
                .checked_add(weight)
                .ok_or_else(|| PolicyError::malformed("total weight overflows u64"))?;
            variants.push(VariantWeight { name, weight });
        }

        Ok(Self {
            variants,
            total_weight,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a raw policy document
    pub fn from_json(raw: &[u8]) -> Result<Self, PolicyError> {
        let doc: PolicyDocument = serde_json::from_slice(raw)
            .map_err(|e| PolicyError::malformed(e.to_string()))?;
        Self::new(doc.weights.unwrap_or_default().0)
    }

    pub fn variants(&self) -> &[VariantWeight] {
        &self.variants
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.variants.iter().map(|v| (v.name.as_str(), v.weight))
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn weight_of(&self, name: &str) -> Option<u64> {
        self.variants
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.weight)
    }
}

impl Serialize for Policy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.variants.len()))?;
        for v in &self.variants {
            map.serialize_entry(&v.name, &v.weight)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct PolicyDocument {
    // Absent and `null` both mean no variants.
    #[serde(default)]
    weights: Option<OrderedWeights>,
}

/// `weights` object read in document order, duplicates included so that
/// `Policy::new` can reject them.
#[derive(Default)]
struct OrderedWeights(Vec<(String, u64)>);

impl<'de> Deserialize<'de> for OrderedWeights {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WeightsVisitor;

        impl<'de> Visitor<'de> for WeightsVisitor {
            type Value = OrderedWeights;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of variant name to non-negative integer weight")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, weight)) = access.next_entry::<String, u64>()? {
                    entries.push((name, weight));
                }
                Ok(OrderedWeights(entries))
            }
        }

        deserializer.deserialize_map(WeightsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_weights_in_document_order() {
        let raw = br#"{"weights": {"zeta": 1, "alpha": 3, "mid": 0}}"#;
        let policy = Policy::from_json(raw).unwrap();

        let names: Vec<&str> = policy.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(policy.total_weight(), 4);
        assert_eq!(policy.weight_of("alpha"), Some(3));
    }

    #[test]
    fn missing_weights_is_an_empty_policy() {
        let policy = Policy::from_json(br#"{}"#).unwrap();
        assert!(policy.is_empty());
        assert_eq!(policy.total_weight(), 0);
    }

    #[test]
    fn null_weights_is_an_empty_policy() {
        let policy = Policy::from_json(br#"{"weights": null}"#).unwrap();
        assert!(policy.is_empty());
        assert_eq!(policy.total_weight(), 0);
    }

    #[test]
    fn rejects_negative_and_fractional_weights() {
        assert!(matches!(
            Policy::from_json(br#"{"weights": {"a": -1}}"#),
            Err(PolicyError::Malformed { .. })
        ));
        assert!(matches!(
            Policy::from_json(br#"{"weights": {"a": 1.5}}"#),
            Err(PolicyError::Malformed { .. })
        ));
        assert!(matches!(
            Policy::from_json(br#"{"weights": {"a": "10"}}"#),
            Err(PolicyError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_and_empty_names() {
        let dup = Policy::from_json(br#"{"weights": {"a": 1, "a": 2}}"#).unwrap_err();
        assert!(dup.to_string().contains("duplicate variant 'a'"));

        let empty = Policy::from_json(br#"{"weights": {"": 1}}"#).unwrap_err();
        assert!(empty.to_string().contains("must not be empty"));
    }

    #[test]
    fn rejects_total_weight_overflow() {
        let err = Policy::new([("a", u64::MAX), ("b", 1)]).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(Policy::from_json(b"weights: a=1").is_err());
    }

    #[test]
    fn serializes_back_to_an_ordered_map() {
        let policy = Policy::new([("b", 2), ("a", 1)]).unwrap();
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"b":2,"a":1}"#);
    }
}
