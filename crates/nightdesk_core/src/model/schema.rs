//! Typed database property schema.
//!
//! # Responsibility
//! - Describe each database property kind as one tagged variant.
//! - Validate variant fields before any store write sees them.
//!
//! # Invariants
//! - `Select` options are non-empty after trim and unique.
//! - `Rollup` and `Formula` references are non-empty.
//! - `Dual` relations always carry the synced property id and name.

use crate::model::resource::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rollup aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupFunction {
    Count,
    CountValues,
    Sum,
    Average,
    Min,
    Max,
    PercentChecked,
    PercentNotEmpty,
    ShowOriginal,
}

impl RollupFunction {
    /// Wire name used by the remote store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountValues => "count_values",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::PercentChecked => "percent_checked",
            Self::PercentNotEmpty => "percent_not_empty",
            Self::ShowOriginal => "show_original",
        }
    }

    /// Parses a wire name back into a function.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "count" => Some(Self::Count),
            "count_values" => Some(Self::CountValues),
            "sum" => Some(Self::Sum),
            "average" => Some(Self::Average),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "percent_checked" => Some(Self::PercentChecked),
            "percent_not_empty" => Some(Self::PercentNotEmpty),
            "show_original" => Some(Self::ShowOriginal),
            _ => None,
        }
    }
}

/// Direction of a relation property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationMode {
    /// One-directional link; the target database has no synced property.
    Single,
    /// Bidirectional link synced with a property on the target database.
    Dual {
        synced_property_id: String,
        synced_property_name: String,
    },
}

impl RelationMode {
    pub fn is_dual(&self) -> bool {
        matches!(self, Self::Dual { .. })
    }
}

/// One database property kind with only the fields valid for that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertySpec {
    Title,
    RichText,
    Number,
    Date,
    Checkbox,
    Url,
    Email,
    Files,
    Select {
        options: Vec<String>,
    },
    Relation {
        database_id: ResourceId,
        mode: RelationMode,
    },
    Rollup {
        relation_property: String,
        rollup_property: String,
        function: RollupFunction,
    },
    Formula {
        expression: String,
    },
    CreatedTime,
    LastEditedTime,
}

impl PropertySpec {
    /// Creates a select property from option names.
    ///
    /// # Errors
    /// - Returns `SchemaError::EmptySelectOption` for blank names.
    /// - Returns `SchemaError::DuplicateSelectOption` for repeated names.
    pub fn select<I, S>(options: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = Self::Select {
            options: options
                .into_iter()
                .map(|value| value.into().trim().to_string())
                .collect(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Creates a single-direction relation pointing at `database_id`.
    pub fn relation(database_id: ResourceId) -> Self {
        Self::Relation {
            database_id,
            mode: RelationMode::Single,
        }
    }

    /// Creates a dual relation synced with the given target property.
    pub fn dual_relation(
        database_id: ResourceId,
        synced_property_id: impl Into<String>,
        synced_property_name: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        let spec = Self::Relation {
            database_id,
            mode: RelationMode::Dual {
                synced_property_id: synced_property_id.into(),
                synced_property_name: synced_property_name.into(),
            },
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Creates a rollup over a relation property of the same database.
    pub fn rollup(
        relation_property: impl Into<String>,
        rollup_property: impl Into<String>,
        function: RollupFunction,
    ) -> Result<Self, SchemaError> {
        let spec = Self::Rollup {
            relation_property: relation_property.into(),
            rollup_property: rollup_property.into(),
            function,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Creates a formula property.
    pub fn formula(expression: impl Into<String>) -> Result<Self, SchemaError> {
        let spec = Self::Formula {
            expression: expression.into(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Stable kind name, matching the remote store's property type names.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::RichText => "rich_text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Checkbox => "checkbox",
            Self::Url => "url",
            Self::Email => "email",
            Self::Files => "files",
            Self::Select { .. } => "select",
            Self::Relation { .. } => "relation",
            Self::Rollup { .. } => "rollup",
            Self::Formula { .. } => "formula",
            Self::CreatedTime => "created_time",
            Self::LastEditedTime => "last_edited_time",
        }
    }

    /// Validates variant fields.
    ///
    /// Store implementations call this before persisting a schema change.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self {
            Self::Select { options } => {
                let mut seen = BTreeSet::new();
                for option in options {
                    if option.trim().is_empty() {
                        return Err(SchemaError::EmptySelectOption);
                    }
                    if !seen.insert(option.as_str()) {
                        return Err(SchemaError::DuplicateSelectOption(option.clone()));
                    }
                }
                Ok(())
            }
            Self::Relation {
                mode:
                    RelationMode::Dual {
                        synced_property_id,
                        synced_property_name,
                    },
                ..
            } => {
                if synced_property_id.trim().is_empty() || synced_property_name.trim().is_empty() {
                    return Err(SchemaError::MissingSyncedProperty);
                }
                Ok(())
            }
            Self::Rollup {
                relation_property,
                rollup_property,
                ..
            } => {
                if relation_property.trim().is_empty() || rollup_property.trim().is_empty() {
                    return Err(SchemaError::EmptyRollupReference);
                }
                Ok(())
            }
            Self::Formula { expression } => {
                if expression.trim().is_empty() {
                    return Err(SchemaError::EmptyFormula);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Property schema as reported by the store: assigned id plus spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Store-assigned identifier. Dual relations reference properties by it.
    pub id: String,
    pub spec: PropertySpec,
}

/// Schema construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    EmptySelectOption,
    DuplicateSelectOption(String),
    EmptyRollupReference,
    EmptyFormula,
    MissingSyncedProperty,
    /// A rollup or formula references a property the database does not define.
    UnknownPropertyReference {
        database: String,
        property: String,
    },
    /// A property name was declared twice on one database.
    DuplicateProperty {
        database: String,
        property: String,
    },
    /// A database must declare exactly one title property.
    TitleCount { database: String, count: usize },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySelectOption => write!(f, "select option name must not be blank"),
            Self::DuplicateSelectOption(name) => {
                write!(f, "select option declared more than once: `{name}`")
            }
            Self::EmptyRollupReference => {
                write!(f, "rollup relation and target property must not be blank")
            }
            Self::EmptyFormula => write!(f, "formula expression must not be blank"),
            Self::MissingSyncedProperty => {
                write!(f, "dual relation requires synced property id and name")
            }
            Self::UnknownPropertyReference { database, property } => write!(
                f,
                "database `{database}` references unknown property `{property}`"
            ),
            Self::DuplicateProperty { database, property } => write!(
                f,
                "database `{database}` declares property `{property}` more than once"
            ),
            Self::TitleCount { database, count } => write!(
                f,
                "database `{database}` declares {count} title properties; expected exactly one"
            ),
        }
    }
}

impl Error for SchemaError {}
