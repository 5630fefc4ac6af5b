//! Fail-fast validation of a component sequence

use std::collections::HashSet;

use crate::domain::descriptor::BuildDescriptor;
use crate::error::ValidationError;

/// Checks a pipeline's components before anything is built
///
/// Rejects an empty sequence, empty names and duplicate names.
pub fn validate_components(components: &[BuildDescriptor]) -> Result<(), ValidationError> {
    if components.is_empty() {
        return Err(ValidationError::NoComponents);
    }

    let mut seen = HashSet::with_capacity(components.len());
    for component in components {
        if component.name().trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !seen.insert(component.name()) {
            return Err(ValidationError::DuplicateName(component.name().to_string()));
        }
    }

    Ok(())
}

/// Keeps only the named components, in declaration order
///
/// An empty filter keeps everything. Every name in the filter must exist.
pub fn filter_components(
    components: Vec<BuildDescriptor>,
    only: &[String],
) -> Result<Vec<BuildDescriptor>, ValidationError> {
    if only.is_empty() {
        return Ok(components);
    }

    for name in only {
        if !components.iter().any(|c| c.name() == name) {
            return Err(ValidationError::UnknownComponent(name.clone()));
        }
    }

    Ok(components
        .into_iter()
        .filter(|c| only.iter().any(|n| n == c.name()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str) -> BuildDescriptor {
        BuildDescriptor::builder(name, "alpine:latest").build().unwrap()
    }

    #[test]
    fn test_valid_components() {
        let components = vec![component("a"), component("b")];
        assert!(validate_components(&components).is_ok());
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert_eq!(
            validate_components(&[]).unwrap_err(),
            ValidationError::NoComponents
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let components = vec![component("a"), component("b"), component("a")];
        assert_eq!(
            validate_components(&components).unwrap_err(),
            ValidationError::DuplicateName("a".to_string())
        );
    }

    #[test]
    fn test_filter_preserves_declaration_order() {
        let components = vec![component("a"), component("b"), component("c")];
        let only = vec!["c".to_string(), "a".to_string()];
        let filtered = filter_components(components, &only).unwrap();
        let names: Vec<_> = filtered.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_filter_unknown_component() {
        let components = vec![component("a")];
        let only = vec!["zzz".to_string()];
        assert_eq!(
            filter_components(components, &only).unwrap_err(),
            ValidationError::UnknownComponent("zzz".to_string())
        );
    }

    #[test]
    fn test_empty_filter_keeps_all() {
        let components = vec![component("a"), component("b")];
        assert_eq!(filter_components(components, &[]).unwrap().len(), 2);
    }
}
