//! Schema Synthesis & Flattening
//!
//! Turns annotated declarations into self-contained validation schemas.
//!
//! Annotations are structured comment lines such as `+validation:MaxLength=63`
//! attached to packages, declarations and fields. A [`Registry`] of marker
//! [`Definition`]s says how each one is parsed. The [`SchemaBuilder`] converts
//! declaration shapes into [`SchemaNode`] trees, applying markers in order and
//! pruning fields whose feature gate is off. The [`Flattener`] then inlines
//! references and collapses `allOf` branches.
//!
//! # Example
//!
//! ```
//! use schema_synth::{
//!     builtin_registry, generate, load_declarations_str, FeatureGateMap, GenerateOptions,
//!     TypeIdent,
//! };
//!
//! let decls = load_declarations_str(r#"{
//!     "packages": [{
//!         "module": "api",
//!         "types": [{
//!             "name": "Widget",
//!             "shape": {"composite": [
//!                 {"name": "Name", "json_name": "name",
//!                  "comments": ["// +validation:MaxLength=63"],
//!                  "shape": {"primitive": "string"}},
//!                 {"name": "Preview", "json_name": "preview",
//!                  "comments": ["// +featureGate=preview"],
//!                  "shape": {"primitive": "bool"}}
//!             ]}
//!         }]
//!     }]
//! }"#).unwrap();
//!
//! let registry = builtin_registry().unwrap();
//! let options = GenerateOptions::new(FeatureGateMap::new().with("preview", false));
//! let widget = TypeIdent::new("api", "Widget");
//! let manifest = generate(&decls, &registry, &[widget.clone()], &options).unwrap();
//!
//! let schema = &manifest.schemas[&widget];
//! assert_eq!(schema.properties["name"].max_length, Some(63));
//! assert!(!schema.properties.contains_key("preview"));
//! ```
//!
//! # Required Fields
//!
//! | Annotation | Effect |
//! |------------|--------|
//! | `+optional` on the field | Never required |
//! | `+required` on the field | Required (error inside a one-of group) |
//! | member of a one-of group | Optional |
//! | `+optional` on the package | Fields default to optional |
//! | (none) | Required, unless inline or omit-empty |

mod argument;
mod builder;
mod error;
mod flatten;
mod gates;
mod generate;
mod loader;
mod markers;
mod registry;
mod scanner;
mod schema;
mod types;

pub use argument::{ArgKind, ArgValue, ArgumentSpec};
pub use builder::SchemaBuilder;
pub use error::{
    BuildError, Diagnostic, ErrorKind, FlattenError, GateError, GenerateError, LoadError,
    MarkerError, MarkerErrors, RegistryError,
};
pub use flatten::{collapse, Flattener};
pub use gates::{evaluate, gate_names, validate as validate_gate_expr, FeatureGateMap};
pub use generate::{generate, Manifest};
pub use loader::{load_declarations, load_declarations_str};
pub use markers::{
    apply_markers, builtin_registry, order_markers, PlannedMarker, SchemaMarker,
    AT_MOST_ONE_OF, EXACTLY_ONE_OF, FEATURE_GATE, OPTIONAL, REQUIRED,
};
pub use registry::{
    is_annotation, split_marker, Annotations, ApplyOrder, Definition, DefinitionShape,
    MarkerArgs, MarkerParts, MarkerSet, MarkerValue, Registry, DEFAULT_PRIORITY,
};
pub use schema::{AdditionalProperties, ExternalDocs, NodeKind, SchemaNode, ValidationRule};
pub use types::{
    Declarations, FieldInfo, GenerateOptions, PackageInfo, Primitive, Shape, TargetKind,
    TypeIdent, TypeInfo,
};
