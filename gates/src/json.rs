//! JSON gate-tree codec.
//!
//! Gates are written as nested objects with their children inline; transforms are
//! listed once at the top level and referenced by id from dimensions.

use crate::error::{GateError, Result};
use crate::trees::GateTrees;
use crate::types::{Gate, GateDimension, GateId, GateShape, GatingMethod};
use flow_events::{Transform, TransformParameters, TransformType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct GateTreesDocument {
    #[serde(default)]
    transforms: Vec<TransformDocument>,
    #[serde(default)]
    gates: Vec<GateDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransformDocument {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    parameters: TransformParameters,
}

#[derive(Debug, Serialize, Deserialize)]
struct DimensionDocument {
    parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    notes: String,
    shape: GateShape,
    #[serde(default)]
    dimensions: Vec<DimensionDocument>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    clustering_parameters: Vec<DimensionDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<GateDocument>,
}

fn default_method() -> String {
    GatingMethod::EventValue.to_string()
}

/// Serialize gate trees to pretty-printed JSON
/// # Errors
/// Returns an error if serialization fails
pub fn gate_trees_to_json(trees: &GateTrees) -> Result<String> {
    let dimension = |d: &GateDimension| DimensionDocument {
        parameter: d.parameter.to_string(),
        transform: d
            .transform
            .and_then(|t| trees.transform(t))
            .map(|t| t.id.to_string()),
    };

    fn gate_document(
        trees: &GateTrees,
        id: GateId,
        dimension: &dyn Fn(&GateDimension) -> DimensionDocument,
    ) -> Result<GateDocument> {
        let gate = trees.require_gate(id)?;
        Ok(GateDocument {
            id: gate.original_id.clone(),
            name: gate.name.clone(),
            description: gate.description.clone(),
            notes: gate.notes.clone(),
            shape: gate.shape.clone(),
            dimensions: gate.dimensions.iter().map(dimension).collect(),
            method: gate.method.to_string(),
            clustering_parameters: gate.clustering_parameters.iter().map(dimension).collect(),
            children: trees
                .children(id)
                .iter()
                .map(|&child| gate_document(trees, child, dimension))
                .collect::<Result<_>>()?,
        })
    }

    let document = GateTreesDocument {
        transforms: trees
            .transforms()
            .iter()
            .map(|t| TransformDocument {
                id: t.id.to_string(),
                kind: t.transform_type.keyword().to_string(),
                parameters: t.transform_type.parameters(),
            })
            .collect(),
        gates: trees
            .roots()
            .iter()
            .map(|&root| gate_document(trees, root, &dimension))
            .collect::<Result<_>>()?,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Parse gate trees from JSON
/// # Errors
/// Returns an error for malformed JSON, unknown gating methods or transform references,
/// invalid transforms, or gates that violate their structural rules
pub fn gate_trees_from_json(json: &str) -> Result<GateTrees> {
    let document: GateTreesDocument = serde_json::from_str(json)?;
    let mut trees = GateTrees::new();

    let mut seen = HashSet::new();
    for transform in document.transforms {
        if !seen.insert(transform.id.clone()) {
            return Err(GateError::invalid_argument(format!(
                "duplicate transform id '{}'",
                transform.id
            )));
        }
        let transform_type = TransformType::from_parameters(&transform.kind, &transform.parameters)?;
        trees.add_transform(Transform::new(transform.id, transform_type));
    }

    for gate in document.gates {
        insert_gate(&mut trees, None, gate)?;
    }
    debug!("Read {} gates from JSON", trees.number_of_gates());
    Ok(trees)
}

fn resolve_dimensions(trees: &GateTrees, documents: Vec<DimensionDocument>) -> Result<Vec<GateDimension>> {
    documents
        .into_iter()
        .map(|d| {
            let mut dimension = GateDimension::new(d.parameter);
            if let Some(reference) = d.transform {
                let transform = trees
                    .find_transform(&reference)
                    .ok_or(GateError::UnknownTransform(reference))?;
                dimension = dimension.with_transform(transform);
            }
            Ok(dimension)
        })
        .collect()
}

fn insert_gate(trees: &mut GateTrees, parent: Option<GateId>, document: GateDocument) -> Result<()> {
    let method: GatingMethod = document.method.parse()?;
    let mut gate = Gate::new(document.shape, resolve_dimensions(trees, document.dimensions)?)
        .with_name(document.name)
        .with_description(document.description)
        .with_notes(document.notes)
        .with_method(method)
        .with_clustering_parameters(resolve_dimensions(trees, document.clustering_parameters)?);
    gate.original_id = document.id;

    let id = match parent {
        Some(parent) => trees.add_child_gate(parent, gate)?,
        None => trees.add_root_gate(gate)?,
    };
    for child in document.children {
        insert_gate(trees, Some(id), child)?;
    }
    Ok(())
}
