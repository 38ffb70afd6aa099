//! Declaration model loading.
//!
//! The model is produced by an external source loader and handed over as JSON.

use std::path::Path;

use crate::error::LoadError;
use crate::types::Declarations;

/// Load a declaration model from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't a valid model.
pub fn load_declarations(path: &Path) -> Result<Declarations, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_declarations_str(&content)
}

/// Load a declaration model from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't a valid model.
pub fn load_declarations_str(content: &str) -> Result<Declarations, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Primitive, Shape, TypeIdent};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODEL: &str = r#"{
        "packages": [{
            "module": "api",
            "comments": ["// +optional"],
            "types": [{
                "name": "Widget",
                "comments": ["// A widget."],
                "shape": {"composite": [
                    {"name": "Name", "json_name": "name", "shape": {"primitive": "string"}},
                    {"name": "Parts", "json_name": "parts", "omit_empty": true,
                     "shape": {"array": {"reference": {"name": "Part", "module": "api"}}}}
                ]}
            }]
        }]
    }"#;

    #[test]
    fn load_declarations_valid() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", MODEL).unwrap();

        let decls = load_declarations(file.path()).unwrap();
        let (package, widget) = decls.lookup(&TypeIdent::new("api", "Widget")).unwrap();
        assert_eq!(package.comments, vec!["// +optional"]);
        let Shape::Composite(fields) = &widget.shape else {
            panic!("expected composite, got {:?}", widget.shape);
        };
        assert_eq!(fields[0].shape, Shape::Primitive(Primitive::String));
        assert!(fields[1].omit_empty);
        assert!(!fields[1].inline);
        assert_eq!(
            fields[1].shape,
            Shape::Array(Box::new(Shape::Reference(TypeIdent::new("api", "Part"))))
        );
    }

    #[test]
    fn load_declarations_not_found() {
        let result = load_declarations(Path::new("/nonexistent/decls.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_declarations_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        let result = load_declarations(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_declarations_str_rejects_unknown_shapes() {
        let result = load_declarations_str(
            r#"{"packages":[{"module":"m","types":[{"name":"T","shape":{"tuple":[]}}]}]}"#,
        );
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_declarations_str_empty_model() {
        let decls = load_declarations_str("{}").unwrap();
        assert!(decls.packages.is_empty());
    }
}
