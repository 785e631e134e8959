//! Recipes: what one iteration of data generation produces.
//!
//! ```toml
//! [vars]
//! industry = "Retail"
//!
//! [[object]]
//! name = "Account"
//! count = 1
//! [object.fields]
//! Name = "Account {n}"
//! Industry = "{var.industry}"
//!
//! [[object]]
//! name = "Contact"
//! count = 2
//! [object.fields]
//! LastName = "Contact {n} of iteration {i}"
//! AccountId = "ref:Account"
//! ```
//!
//! `{n}` is the row's local id, `{i}` the iteration number, `{var.X}` a recipe variable.
//! `ref:<Object>` is the local id of the most recent row of that object. Objects with
//! `just_once = true` are generated in the first batch only; later batches refer to them through
//! the continuation file.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::engine::db_ops::validate_ident;
use crate::org::ORG_ID_FIELD;

const REF_PREFIX: &str = "ref:";

#[derive(Clone, Debug, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    vars: BTreeMap<String, toml::Value>,
    #[serde(default, rename = "object")]
    pub objects: Vec<ObjectTemplate>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObjectTemplate {
    pub name: String,
    /// Rows per iteration.
    #[serde(default = "default_count")]
    pub count: u64,
    #[serde(default)]
    pub just_once: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_count() -> u64 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Template(&'a str),
    Reference(&'a str),
}

pub fn field_value(raw: &str) -> FieldValue<'_> {
    match raw.strip_prefix(REF_PREFIX) {
        Some(target) => FieldValue::Reference(target.trim()),
        None => FieldValue::Template(raw),
    }
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read recipe `{}`", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid recipe `{}`", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let recipe: Recipe = toml::from_str(text)?;
        recipe.validate()?;
        Ok(recipe)
    }

    fn validate(&self) -> Result<()> {
        if self.objects.is_empty() {
            bail!("Recipe has no objects");
        }
        let mut seen: Vec<&str> = Vec::new();
        for obj in &self.objects {
            validate_ident(&obj.name)?;
            for (field, raw) in &obj.fields {
                validate_ident(field)?;
                if field.eq_ignore_ascii_case(ORG_ID_FIELD) {
                    bail!("{}.{field}: `{ORG_ID_FIELD}` is assigned by the org", obj.name);
                }
                if let FieldValue::Reference(target) = field_value(raw)
                    && !seen.contains(&target)
                    && target != obj.name
                {
                    bail!(
                        "{}.{field} refers to `{target}`, which must be declared earlier",
                        obj.name
                    );
                }
            }
            if !seen.contains(&obj.name.as_str()) {
                seen.push(&obj.name);
            }
        }
        Ok(())
    }

    /// Distinct object names in declaration order (also the load order).
    pub fn object_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for obj in &self.objects {
            if !names.contains(&obj.name.as_str()) {
                names.push(&obj.name);
            }
        }
        names
    }

    /// Recipe variables rendered as strings, with `overrides` applied. Unknown overrides are
    /// rejected so a typo does not silently fall back to the default.
    pub fn resolve_vars(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut vars: BTreeMap<String, String> = self
            .vars
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();
        for (k, v) in overrides {
            if !vars.contains_key(k) {
                bail!("Unknown recipe option `{k}`");
            }
            vars.insert(k.clone(), v.clone());
        }
        Ok(vars)
    }
}

/// Expand `{n}`, `{i}` and `{var.X}` in `template`.
pub fn render(
    template: &str,
    n: u64,
    iteration: u64,
    vars: &BTreeMap<String, String>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            bail!("Unclosed `{{` in `{template}`");
        };
        let key = &after[..end];
        match key {
            "n" => out.push_str(&n.to_string()),
            "i" => out.push_str(&iteration.to_string()),
            _ => match key.strip_prefix("var.") {
                Some(var) => {
                    let value = vars
                        .get(var)
                        .with_context(|| format!("Unknown variable `{var}` in `{template}`"))?;
                    out.push_str(value);
                }
                None => bail!("Unknown placeholder `{{{key}}}` in `{template}`"),
            },
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
