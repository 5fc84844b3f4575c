//! Variant specification files and their expansion into run plans.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use epcal_core::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};
use crate::idf;

/// One field edit. `field_index` 0 is the Name field, the first field after
/// the object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldChange {
    pub object_type: String,
    pub object_name: String,
    pub field_index: usize,
    pub new_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
}

/// Contents of a variants JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    #[serde(default = "default_parameter_name")]
    pub parameter_name: String,
    pub variants: Vec<VariantDef>,
}

fn default_parameter_name() -> String {
    "Parameter".to_string()
}

impl VariantSpec {
    pub fn load(path: &Path) -> BatchResult<Self> {
        let bytes = fs::read(path).map_err(|e| BatchError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| BatchError::json(path, e))
    }

    /// Starter spec for the first object matching `object_type` (and
    /// `object_name`): a `baseline` variant holding the current values and a
    /// `variant_1` with placeholders.
    pub fn template(
        model_text: &str,
        object_type: &str,
        object_name: Option<&str>,
        fields: &[usize],
    ) -> BatchResult<(Self, Vec<(usize, String)>)> {
        let objects = idf::parse_objects(model_text);
        let obj = idf::find_object(&objects, object_type, object_name).ok_or_else(|| {
            BatchError::InvalidSpec(match object_name {
                Some(name) => format!("no object of type '{object_type}' named '{name}'"),
                None => format!("no object of type '{object_type}'"),
            })
        })?;
        if fields.is_empty() {
            return Err(BatchError::InvalidSpec("no field indices given".into()));
        }

        let current: Vec<(usize, String)> = fields
            .iter()
            .map(|&i| (i, obj.fields.get(i).cloned().unwrap_or_default()))
            .collect();
        let name = obj.name().unwrap_or_default().to_string();
        let changes = |value: &dyn Fn(usize, &str) -> String| -> Vec<FieldChange> {
            current
                .iter()
                .map(|(i, v)| FieldChange {
                    object_type: obj.object_type.clone(),
                    object_name: name.clone(),
                    field_index: *i,
                    new_value: value(*i, v),
                })
                .collect()
        };

        let spec = VariantSpec {
            parameter_name: format!("{} variations", obj.object_type),
            variants: vec![
                VariantDef {
                    name: "baseline".into(),
                    changes: changes(&|_, v| v.to_string()),
                },
                VariantDef {
                    name: "variant_1".into(),
                    changes: changes(&|i, _| format!("<CHANGE_{i}>")),
                },
            ],
        };
        Ok((spec, current))
    }
}

/// One variant ready to run. Immutable once expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPlan {
    pub variant_name: String,
    pub base_model: PathBuf,
    pub parameter_changes: Vec<FieldChange>,
    /// Relative to the batch results directory.
    pub output_subdirectory: PathBuf,
    /// Identity of the inputs: name, changes and base model content.
    pub fingerprint: ContentDigest,
}

/// Directory name for a variant: ASCII alphanumerics plus `-`, `_` and
/// `.`; anything else becomes `_`. Leading dots are dropped.
pub fn variant_dir_name(name: &str) -> String {
    let mapped: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_start_matches('.').to_string()
}

/// Validate `spec` and build one plan per variant, in file order.
///
/// Names must be non-empty and stay distinct after mapping to directory
/// names (compared case-insensitively).
pub fn expand(base_model: &Path, spec: &VariantSpec) -> BatchResult<Vec<VariantPlan>> {
    if spec.variants.is_empty() {
        return Err(BatchError::InvalidSpec("no variants defined".into()));
    }
    let base_bytes = fs::read(base_model).map_err(|e| BatchError::io(base_model, e))?;
    let base_digest = ContentDigest::from_bytes(&base_bytes);

    let mut seen = HashSet::new();
    let mut plans = Vec::with_capacity(spec.variants.len());
    for (idx, variant) in spec.variants.iter().enumerate() {
        let name = variant.name.trim();
        if name.is_empty() {
            return Err(BatchError::InvalidSpec(format!("variant #{} has an empty name", idx + 1)));
        }
        let dir = variant_dir_name(name);
        if dir.is_empty() || dir.chars().all(|c| c == '_') {
            return Err(BatchError::InvalidSpec(format!(
                "variant name '{name}' has no filesystem-safe characters"
            )));
        }
        if !seen.insert(dir.to_ascii_lowercase()) {
            return Err(BatchError::InvalidSpec(format!(
                "variant name '{name}' collides with an earlier variant (directory '{dir}')"
            )));
        }
        for change in &variant.changes {
            if change.object_type.trim().is_empty() {
                return Err(BatchError::InvalidSpec(format!(
                    "variant '{name}': change has an empty object_type"
                )));
            }
        }

        let fingerprint = ContentDigest::of_json(&(name, &variant.changes, base_digest.as_str()))
            .map_err(|e| BatchError::json(base_model, e))?;
        plans.push(VariantPlan {
            variant_name: name.to_string(),
            base_model: base_model.to_path_buf(),
            parameter_changes: variant.changes.clone(),
            output_subdirectory: PathBuf::from(dir),
            fingerprint,
        });
    }
    Ok(plans)
}
