//! Predicate-based partitioning of polygons into landscape unit categories.
//!
//! Categories are independent: every category is evaluated against every
//! polygon and a polygon can land in several exported sets.

use crate::types::{CmpOp, SclError, SclResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const LANDSCAPE_SIZE: &str = "landscape_size";
pub const CURRENT_RANGE: &str = "current_range";
pub const LANDSCAPE_PROBABILITY: &str = "landscape_probability";
pub const LANDSCAPE_SURVEY_EFFORT: &str = "landscape_survey_effort";

/// Anything exposing numeric attributes by name
pub trait Attributes {
    fn attribute(&self, name: &str) -> Option<f64>;
}

impl Attributes for BTreeMap<String, f64> {
    fn attribute(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(f64),
    Threshold(String),
}

impl Operand {
    fn resolve(&self, thresholds: &BTreeMap<String, f64>) -> Option<f64> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Threshold(name) => thresholds.get(name).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        attribute: String,
        op: CmpOp,
        rhs: Operand,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn cmp(attribute: &str, op: CmpOp, rhs: Operand) -> Self {
        Predicate::Compare {
            attribute: attribute.to_string(),
            op,
            rhs,
        }
    }

    pub fn against(attribute: &str, op: CmpOp, threshold: &str) -> Self {
        Self::cmp(attribute, op, Operand::Threshold(threshold.to_string()))
    }

    /// Missing attributes and unknown thresholds make a comparison false
    pub fn evaluate<A: Attributes + ?Sized>(&self, item: &A, thresholds: &BTreeMap<String, f64>) -> bool {
        match self {
            Predicate::Compare { attribute, op, rhs } => match (item.attribute(attribute), rhs.resolve(thresholds)) {
                (Some(lhs), Some(rhs)) => op.apply(lhs, rhs),
                _ => false,
            },
            Predicate::All(parts) => parts.iter().all(|p| p.evaluate(item, thresholds)),
            Predicate::Any(parts) => parts.iter().any(|p| p.evaluate(item, thresholds)),
        }
    }

    fn collect_thresholds<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Compare { rhs: Operand::Threshold(name), .. } => {
                out.insert(name.as_str());
            }
            Predicate::Compare { .. } => {}
            Predicate::All(parts) | Predicate::Any(parts) => parts.iter().for_each(|p| p.collect_thresholds(out)),
        }
    }

    fn collect_attributes<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Compare { attribute, .. } => {
                out.insert(attribute.as_str());
            }
            Predicate::All(parts) | Predicate::Any(parts) => parts.iter().for_each(|p| p.collect_attributes(out)),
        }
    }

    fn has_empty_group(&self) -> bool {
        match self {
            Predicate::Compare { .. } => false,
            Predicate::All(parts) | Predicate::Any(parts) => parts.is_empty() || parts.iter().any(|p| p.has_empty_group()),
        }
    }
}

/// A named landscape unit category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub predicate: Predicate,
}

/// Category definitions plus the thresholds they refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub thresholds: BTreeMap<String, f64>,
    pub categories: Vec<Category>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleSet {
    /// species / survey / restoration / fragment over the size, range,
    /// probability and effort attributes
    pub fn standard() -> Self {
        let large = || Predicate::against("size", CmpOp::Ge, LANDSCAPE_SIZE);
        let current = || Predicate::against("range", CmpOp::Eq, CURRENT_RANGE);
        let likely = || Predicate::against("probability", CmpOp::Ge, LANDSCAPE_PROBABILITY);
        let surveyed = || Predicate::against("effort", CmpOp::Ge, LANDSCAPE_SURVEY_EFFORT);

        let categories = vec![
            Category {
                name: "species".to_string(),
                predicate: Predicate::All(vec![large(), current(), likely(), surveyed()]),
            },
            Category {
                name: "survey".to_string(),
                predicate: Predicate::All(vec![
                    large(),
                    current(),
                    likely(),
                    Predicate::against("effort", CmpOp::Lt, LANDSCAPE_SURVEY_EFFORT),
                ]),
            },
            Category {
                name: "restoration".to_string(),
                predicate: Predicate::Any(vec![
                    Predicate::All(vec![
                        large(),
                        current(),
                        Predicate::against("probability", CmpOp::Lt, LANDSCAPE_PROBABILITY),
                        surveyed(),
                    ]),
                    Predicate::All(vec![large(), Predicate::against("range", CmpOp::Lt, CURRENT_RANGE)]),
                ]),
            },
            Category {
                name: "fragment".to_string(),
                predicate: Predicate::All(vec![
                    Predicate::against("size", CmpOp::Lt, LANDSCAPE_SIZE),
                    current(),
                    likely(),
                    surveyed(),
                ]),
            },
        ];

        let thresholds = [
            (LANDSCAPE_SIZE, 3.0),
            (CURRENT_RANGE, 2.0),
            (LANDSCAPE_PROBABILITY, 1.0),
            (LANDSCAPE_SURVEY_EFFORT, 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { thresholds, categories }
    }

    pub fn validate(&self) -> SclResult<()> {
        let mut names = BTreeSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(SclError::Config("category name must not be empty".to_string()));
            }
            if !names.insert(category.name.as_str()) {
                return Err(SclError::Config(format!("duplicate category '{}'", category.name)));
            }
            if category.predicate.has_empty_group() {
                return Err(SclError::Config(format!(
                    "category '{}' has an empty all/any group",
                    category.name
                )));
            }
            let mut referenced = BTreeSet::new();
            category.predicate.collect_thresholds(&mut referenced);
            if let Some(unknown) = referenced.iter().find(|n| !self.thresholds.contains_key(**n)) {
                return Err(SclError::Config(format!(
                    "category '{}' refers to unknown threshold '{}'",
                    category.name, unknown
                )));
            }
        }
        if let Some((name, value)) = self.thresholds.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SclError::Config(format!("threshold '{}' is not finite: {}", name, value)));
        }
        Ok(())
    }

    /// Attributes each category reads, in rule order
    pub fn attributes_by_category(&self) -> Vec<(&str, BTreeSet<&str>)> {
        self.categories
            .iter()
            .map(|c| {
                let mut attributes = BTreeSet::new();
                c.predicate.collect_attributes(&mut attributes);
                (c.name.as_str(), attributes)
            })
            .collect()
    }

    /// Names of every category the item satisfies, in rule order
    pub fn categories_of<A: Attributes + ?Sized>(&self, item: &A) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|c| c.predicate.evaluate(item, &self.thresholds))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Members of each category, item order preserved
    pub fn partition<'a, A: Attributes>(&self, items: &'a [A]) -> Vec<(&str, Vec<&'a A>)> {
        self.categories
            .iter()
            .map(|c| {
                let members = items
                    .iter()
                    .filter(|item| c.predicate.evaluate(*item, &self.thresholds))
                    .collect();
                (c.name.as_str(), members)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(size: f64, range: f64, probability: f64, effort: f64) -> BTreeMap<String, f64> {
        [("size", size), ("range", range), ("probability", probability), ("effort", effort)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_core_polygon_is_species_only() {
        let rules = RuleSet::standard();
        assert_eq!(rules.categories_of(&attrs(5.0, 2.0, 1.0, 1.0)), vec!["species"]);
    }

    #[test]
    fn test_other_categories() {
        let rules = RuleSet::standard();
        assert_eq!(rules.categories_of(&attrs(5.0, 2.0, 1.0, 0.0)), vec!["survey"]);
        assert_eq!(rules.categories_of(&attrs(5.0, 2.0, 0.0, 1.0)), vec!["restoration"]);
        assert_eq!(rules.categories_of(&attrs(5.0, 1.0, 0.0, 0.0)), vec!["restoration"]);
        assert_eq!(rules.categories_of(&attrs(1.0, 2.0, 1.0, 1.0)), vec!["fragment"]);
    }

    #[test]
    fn test_categories_are_not_exclusive() {
        let mut rules = RuleSet::standard();
        rules.categories.push(Category {
            name: "large".to_string(),
            predicate: Predicate::against("size", CmpOp::Ge, LANDSCAPE_SIZE),
        });
        assert_eq!(rules.categories_of(&attrs(5.0, 2.0, 1.0, 1.0)), vec!["species", "large"]);
    }

    #[test]
    fn test_missing_attribute_is_not_admitted() {
        let rules = RuleSet::standard();
        let mut a = attrs(5.0, 2.0, 1.0, 1.0);
        a.remove("effort");
        assert!(rules.categories_of(&a).is_empty());
    }

    #[test]
    fn test_validation_rejects_unknown_threshold() {
        let mut rules = RuleSet::standard();
        assert!(rules.validate().is_ok());
        rules.thresholds.remove(LANDSCAPE_PROBABILITY);
        assert!(matches!(rules.validate(), Err(SclError::Config(_))));
    }

    #[test]
    fn test_rules_load_from_json() {
        let json = r#"{
            "thresholds": {"min_area": 10.0},
            "categories": [{
                "name": "big",
                "predicate": {"all": [
                    {"compare": {"attribute": "polygon_area", "op": ">", "rhs": {"threshold": "min_area"}}},
                    {"compare": {"attribute": "range", "op": "!=", "rhs": {"value": 0.0}}}
                ]}
            }]
        }"#;
        let rules: RuleSet = serde_json::from_str(json).unwrap();
        rules.validate().unwrap();
        let items = vec![
            [("polygon_area".to_string(), 12.0), ("range".to_string(), 2.0)].into_iter().collect::<BTreeMap<_, _>>(),
            [("polygon_area".to_string(), 8.0), ("range".to_string(), 2.0)].into_iter().collect(),
        ];
        let parts = rules.partition(&items);
        assert_eq!(parts[0].0, "big");
        assert_eq!(parts[0].1.len(), 1);
    }

    #[test]
    fn test_attributes_by_category() {
        let rules = RuleSet::standard();
        let read = rules.attributes_by_category();
        assert_eq!(read.len(), 4);
        let (name, species) = &read[0];
        assert_eq!(*name, "species");
        assert_eq!(species.iter().copied().collect::<Vec<_>>(), vec!["effort", "probability", "range", "size"]);
    }
}
