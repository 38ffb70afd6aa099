//! One generation run: build the requested roots, then flatten them.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::builder::SchemaBuilder;
use crate::error::{Diagnostic, GenerateError};
use crate::flatten::Flattener;
use crate::registry::Registry;
use crate::schema::SchemaNode;
use crate::types::{Declarations, GenerateOptions, TypeIdent};

/// Flattened schemas of the requested roots plus every problem found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    #[serde(serialize_with = "serialize_schemas")]
    pub schemas: BTreeMap<TypeIdent, SchemaNode>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Manifest {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

fn serialize_schemas<S: Serializer>(
    schemas: &BTreeMap<TypeIdent, SchemaNode>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(schemas.iter().map(|(ident, node)| (ident.to_string(), node)))
}

/// Build and flatten `roots`.
///
/// Annotation, build and merge problems are collected into the manifest's
/// diagnostics; a root whose flattening fails is left out of `schemas`.
///
/// # Errors
///
/// Returns `GenerateError::UnknownRoot` if a root isn't declared, and
/// `GenerateError::Gate` for an invalid feature-gate expression.
pub fn generate(
    decls: &Declarations,
    registry: &Registry,
    roots: &[TypeIdent],
    options: &GenerateOptions,
) -> Result<Manifest, GenerateError> {
    if let Some(root) = roots.iter().find(|r| decls.lookup(r).is_none()) {
        return Err(GenerateError::UnknownRoot {
            ident: root.clone(),
        });
    }

    let mut builder = SchemaBuilder::new(registry, decls, options);
    for root in roots {
        builder.request(root);
    }
    builder.build_all()?;
    let (built, mut diagnostics) = builder.into_parts();
    debug!(built = built.len(), "built declarations");

    let mut flattener = Flattener::new(&built);
    let mut schemas = BTreeMap::new();
    for root in roots {
        match flattener.flatten(root) {
            Ok(node) => {
                schemas.insert(root.clone(), node);
            }
            Err(err) => {
                warn!(%root, error = %err, "flattening failed");
                diagnostics.push(Diagnostic::new(err.kind(), root, None, err.to_string()));
            }
        }
    }

    Ok(Manifest {
        schemas,
        diagnostics,
    })
}
