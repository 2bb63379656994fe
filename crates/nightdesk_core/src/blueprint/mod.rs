//! Static description of the provisioned resource set.
//!
//! # Responsibility
//! - Declare databases (with schema), pages and inter-database relations.
//! - Check the declaration is self-consistent before any store call.
//!
//! # Invariants
//! - Every database declares exactly one title property.
//! - Property names are unique per database, relation ends included.
//! - Rollups and formulas only reference properties that will exist.

use crate::model::resource::ResourceKind;
use crate::model::schema::{PropertySpec, SchemaError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

pub mod night_desk;

pub use night_desk::night_desk;

static FORMULA_PROP_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"prop\("([^"]+)"\)"#).expect("valid formula regex"));

/// One database and its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseBlueprint {
    /// Canonical title; also the logical name in state.
    pub name: String,
    /// Properties sent on creation.
    pub properties: Vec<(String, PropertySpec)>,
    /// Properties that depend on relations; applied after relations bind.
    pub derived: Vec<(String, PropertySpec)>,
}

impl DatabaseBlueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            derived: Vec::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.push((name.into(), spec));
        self
    }

    pub fn derived(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.derived.push((name.into(), spec));
        self
    }
}

/// One scaffold page directly under the parent page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBlueprint {
    pub name: String,
}

/// Relation between two blueprint databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationBlueprint {
    pub owner: String,
    pub owner_property: String,
    pub target: String,
    /// Synced property on the target. `None` declares a one-way relation.
    pub target_property: Option<String>,
}

impl RelationBlueprint {
    pub fn dual(
        owner: impl Into<String>,
        owner_property: impl Into<String>,
        target: impl Into<String>,
        target_property: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            owner_property: owner_property.into(),
            target: target.into(),
            target_property: Some(target_property.into()),
        }
    }

    pub fn single(
        owner: impl Into<String>,
        owner_property: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            owner_property: owner_property.into(),
            target: target.into(),
            target_property: None,
        }
    }

    /// Relation property names this relation adds to `database`.
    fn properties_on<'a>(&'a self, database: &str) -> Vec<(&'a str, &'a str)> {
        let mut found = Vec::new();
        if self.owner == database {
            found.push((self.owner_property.as_str(), self.target.as_str()));
        }
        if self.target == database {
            if let Some(target_property) = &self.target_property {
                found.push((target_property.as_str(), self.owner.as_str()));
            }
        }
        found
    }
}

/// Complete resource set.
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub databases: Vec<DatabaseBlueprint>,
    pub pages: Vec<PageBlueprint>,
    pub relations: Vec<RelationBlueprint>,
}

impl Blueprint {
    pub fn database(&self, name: &str) -> Option<&DatabaseBlueprint> {
        self.databases.iter().find(|database| database.name == name)
    }

    /// Canonical names of `kind`, in declaration order.
    pub fn names(&self, kind: ResourceKind) -> Vec<&str> {
        match kind {
            ResourceKind::Database => self.databases.iter().map(|db| db.name.as_str()).collect(),
            ResourceKind::Page => self.pages.iter().map(|page| page.name.as_str()).collect(),
        }
    }

    /// Every canonical name with its kind, databases first.
    pub fn targets(&self) -> Vec<(ResourceKind, &str)> {
        self.names(ResourceKind::Database)
            .into_iter()
            .map(|name| (ResourceKind::Database, name))
            .chain(
                self.names(ResourceKind::Page)
                    .into_iter()
                    .map(|name| (ResourceKind::Page, name)),
            )
            .collect()
    }

    /// Property names a provisioned database is expected to expose.
    pub fn expected_properties(&self, database: &str) -> Vec<String> {
        let Some(blueprint) = self.database(database) else {
            return Vec::new();
        };
        let mut names: Vec<String> = blueprint
            .properties
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        for relation in &self.relations {
            for (name, _) in relation.properties_on(database) {
                names.push(name.to_string());
            }
        }
        names.extend(blueprint.derived.iter().map(|(name, _)| name.clone()));
        names
    }

    /// Checks the blueprint is self-consistent.
    ///
    /// # Errors
    /// - `DuplicateProperty` when one database declares a name twice.
    /// - `TitleCount` when a database does not declare exactly one title.
    /// - `UnknownPropertyReference` when a relation, rollup or formula points
    ///   at a database or property the blueprint does not declare.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for relation in &self.relations {
            for end in [&relation.owner, &relation.target] {
                if self.database(end).is_none() {
                    return Err(SchemaError::UnknownPropertyReference {
                        database: end.clone(),
                        property: relation.owner_property.clone(),
                    });
                }
            }
        }

        for database in &self.databases {
            let mut seen = BTreeSet::new();
            for name in self.expected_properties(&database.name) {
                if !seen.insert(name.clone()) {
                    return Err(SchemaError::DuplicateProperty {
                        database: database.name.clone(),
                        property: name,
                    });
                }
            }

            let titles = database
                .properties
                .iter()
                .filter(|(_, spec)| matches!(spec, PropertySpec::Title))
                .count();
            if titles != 1 {
                return Err(SchemaError::TitleCount {
                    database: database.name.clone(),
                    count: titles,
                });
            }

            for (_, spec) in database.properties.iter().chain(database.derived.iter()) {
                spec.validate()?;
                self.check_references(database, spec, &seen)?;
            }
        }
        Ok(())
    }

    fn check_references(
        &self,
        database: &DatabaseBlueprint,
        spec: &PropertySpec,
        available: &BTreeSet<String>,
    ) -> Result<(), SchemaError> {
        let unknown = |property: &str| SchemaError::UnknownPropertyReference {
            database: database.name.clone(),
            property: property.to_string(),
        };

        match spec {
            PropertySpec::Rollup {
                relation_property,
                rollup_property,
                ..
            } => {
                let target = self
                    .relations
                    .iter()
                    .flat_map(|relation| relation.properties_on(&database.name))
                    .find(|(name, _)| *name == relation_property.as_str())
                    .map(|(_, target)| target)
                    .ok_or_else(|| unknown(relation_property))?;
                if !self
                    .expected_properties(target)
                    .iter()
                    .any(|name| name == rollup_property)
                {
                    return Err(SchemaError::UnknownPropertyReference {
                        database: target.to_string(),
                        property: rollup_property.clone(),
                    });
                }
                Ok(())
            }
            PropertySpec::Formula { expression } => {
                for captures in FORMULA_PROP_REF.captures_iter(expression) {
                    let referenced = &captures[1];
                    if !available.contains(referenced) {
                        return Err(unknown(referenced));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Blueprint, DatabaseBlueprint, RelationBlueprint};
    use crate::model::schema::{PropertySpec, RollupFunction, SchemaError};

    fn two_databases() -> Blueprint {
        Blueprint {
            databases: vec![
                DatabaseBlueprint::new("Projects").property("Name", PropertySpec::Title),
                DatabaseBlueprint::new("Tasks")
                    .property("Name", PropertySpec::Title)
                    .property("Completed On", PropertySpec::Date),
            ],
            pages: Vec::new(),
            relations: vec![RelationBlueprint::dual("Tasks", "Project", "Projects", "Tasks")],
        }
    }

    #[test]
    fn relation_ends_count_as_expected_properties() {
        let blueprint = two_databases();
        assert_eq!(blueprint.expected_properties("Projects"), vec!["Name", "Tasks"]);
        assert_eq!(
            blueprint.expected_properties("Tasks"),
            vec!["Name", "Completed On", "Project"]
        );
        blueprint.validate().unwrap();
    }

    #[test]
    fn rollup_must_follow_declared_relation() {
        let mut blueprint = two_databases();
        blueprint.databases[0] = blueprint.databases[0].clone().derived(
            "Progress %",
            PropertySpec::rollup("Tasks", "Completed On", RollupFunction::PercentNotEmpty)
                .unwrap(),
        );
        blueprint.validate().unwrap();

        blueprint.databases[0].derived[0].1 =
            PropertySpec::rollup("Tasks", "Missing", RollupFunction::Count).unwrap();
        assert_eq!(
            blueprint.validate(),
            Err(SchemaError::UnknownPropertyReference {
                database: "Tasks".to_string(),
                property: "Missing".to_string(),
            })
        );
    }

    #[test]
    fn formula_references_are_checked() {
        let mut blueprint = two_databases();
        blueprint.databases[1] = blueprint.databases[1]
            .clone()
            .derived("Label", PropertySpec::formula(r#"prop("Nope")"#).unwrap());
        assert!(matches!(
            blueprint.validate(),
            Err(SchemaError::UnknownPropertyReference { property, .. }) if property == "Nope"
        ));
    }

    #[test]
    fn duplicate_names_across_relation_ends_are_rejected() {
        let mut blueprint = two_databases();
        blueprint.databases[0] = blueprint.databases[0]
            .clone()
            .property("Tasks", PropertySpec::Number);
        assert!(matches!(
            blueprint.validate(),
            Err(SchemaError::DuplicateProperty { property, .. }) if property == "Tasks"
        ));
    }
}
