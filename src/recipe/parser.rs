// src/recipe/parser.rs

//! Recipe parsing and validation
//!
//! The engine consumes typed `Recipe` values; these helpers produce them
//! from TOML text or files and check the structural invariants the
//! evaluator relies on.

use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use std::path::Path;

/// Parse a recipe from TOML text
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    let recipe: Recipe =
        toml::from_str(content).map_err(|e| Error::Parse(format!("invalid recipe: {}", e)))?;
    validate_recipe(&recipe)?;
    Ok(recipe)
}

/// Parse a recipe from a TOML file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("failed to read {}: {}", path.display(), e)))?;
    parse_recipe(&content)
}

/// Validate structural invariants of a parsed recipe
///
/// - the name is a safe identifier (it becomes a directory name)
/// - every step names an action in lowercase snake case
pub fn validate_recipe(recipe: &Recipe) -> Result<()> {
    validate_name(recipe.name())?;

    for (index, step) in recipe.steps.iter().enumerate() {
        if step.action.is_empty() {
            return Err(Error::Parse(format!("step {} has an empty action", index)));
        }
        if !step
            .action
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::Parse(format!(
                "step {} action {:?} is not lowercase snake case",
                index, step.action
            )));
        }
    }

    Ok(())
}

/// Check a recipe name is usable as a directory stem
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Parse("recipe name is empty".to_string()));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if !ok || name.starts_with('.') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
