//! Load mapping: which job-database table goes to which org object, in load order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::tasks::recipe::{FieldValue, Recipe, field_value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingStep {
    pub sobject: String,
    pub table: String,
    /// Plain fields, copied as-is.
    pub fields: Vec<String>,
    /// Lookup field -> target object. Values are local ids resolved through `<target>_sf_ids`.
    #[serde(default)]
    pub lookups: BTreeMap<String, String>,
}

impl MappingStep {
    pub fn name(&self) -> String {
        format!("Insert {}", self.sobject)
    }

    /// Every column of the step: fields then lookups.
    pub fn columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .chain(self.lookups.keys())
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub steps: Vec<MappingStep>,
}

impl Mapping {
    /// One step per object, in recipe order. Fields of repeated object entries are merged.
    pub fn from_recipe(recipe: &Recipe) -> Self {
        let mut steps: Vec<MappingStep> = Vec::new();
        for name in recipe.object_names() {
            let mut step = MappingStep {
                sobject: name.to_string(),
                table: name.to_string(),
                fields: Vec::new(),
                lookups: BTreeMap::new(),
            };
            for obj in recipe.objects.iter().filter(|o| o.name == name) {
                for (field, raw) in &obj.fields {
                    match field_value(raw) {
                        FieldValue::Reference(target) => {
                            step.lookups.insert(field.clone(), target.to_string());
                        }
                        FieldValue::Template(_) => {
                            if !step.fields.contains(field) {
                                step.fields.push(field.clone());
                            }
                        }
                    }
                }
            }
            steps.push(step);
        }
        Self { steps }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read mapping {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse mapping {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("write mapping {}", path.display()))
    }
}
