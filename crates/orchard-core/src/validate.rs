//! Declared-field value validation for write paths.
//!
//! Bulk update and insert run these checks before issuing SQL: nullability,
//! bounded string length, and regex pattern constraints declared on scalar
//! fields. Patterns are compiled once and cached.

use crate::error::{Error, ValidationError};
use crate::field::{FieldDescriptor, StorageType};
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            // Recover from a poisoned lock (another thread panicked)
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a pattern, using the compiled-pattern cache.
///
/// An invalid pattern fails the check rather than panicking.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid validation pattern");
            false
        }
    }
}

/// Validate one value against a scalar field's declared constraints.
pub fn check_value(field: &FieldDescriptor, value: &Value, errors: &mut ValidationError) {
    if value.is_null() {
        if !field.nullable {
            errors.add_required(field.name);
        }
        return;
    }
    let Some(scalar) = field.as_scalar() else {
        return;
    };
    if let StorageType::Text { max_length: Some(max) } = scalar.storage {
        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if len > max as usize {
                errors.add_max_length(field.name, max, len);
            }
        }
    }
    if let Some(pattern) = scalar.pattern {
        if let Some(s) = value.as_str() {
            if !matches_pattern(s, pattern) {
                errors.add_pattern(field.name, pattern);
            }
        }
    }
}

/// Validate a set of named values against a model's declared fields.
///
/// Unknown names fail with [`Error::UnknownFields`] naming every miss, known
/// names are checked against their field's constraints.
pub fn validate_values(
    model: &str,
    fields: &[FieldDescriptor],
    values: &[(&str, Value)],
) -> Result<(), Error> {
    let mut missing = Vec::new();
    let mut errors = ValidationError::new();
    for (name, value) in values {
        match fields.iter().find(|f| f.name == *name) {
            Some(field) => check_value(field, value, &mut errors),
            None => missing.push((*name).to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(Error::UnknownFields {
            model: model.to_string(),
            fields: missing,
        });
    }
    errors.into_result().map_err(Error::Validation)
}
