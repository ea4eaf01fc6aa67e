//! Provider configuration via `geostrata.toml`
//!
//! A provider reads its settings from one small TOML file. Every setting
//! has a default, so an empty or partial file is valid.

use geostrata_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "geostrata.toml";

/// How store-side default clauses are handled on the client
///
/// Passed explicitly to every introspection and mutation call that depends
/// on it; the config only supplies the initial value a layer starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultsMode {
    /// Expose the clause text; the store evaluates it at commit
    #[default]
    Defer,
    /// Evaluate the clause on the client as soon as a value is needed
    Evaluate,
}

/// Provider configuration loaded from `geostrata.toml`.
///
/// # Example
///
/// ```toml
/// compile_expressions = true
/// default_values = "defer"
/// fetch_size = 2000
/// style_table = "public.layer_styles"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Translate filter expressions into store predicates when possible
    #[serde(default = "default_compile")]
    pub compile_expressions: bool,
    /// `"defer"` or `"evaluate"`
    #[serde(default = "default_values_str")]
    pub default_values: String,
    /// Rows decoded per cursor batch
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Schema-qualified table holding saved styles
    #[serde(default = "default_style_table")]
    pub style_table: String,
}

fn default_compile() -> bool {
    true
}

fn default_values_str() -> String {
    "defer".to_string()
}

fn default_fetch_size() -> usize {
    2000
}

fn default_style_table() -> String {
    "public.layer_styles".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            compile_expressions: default_compile(),
            default_values: default_values_str(),
            fetch_size: default_fetch_size(),
            style_table: default_style_table(),
        }
    }
}

impl ProviderConfig {
    /// Parse the `default_values` string into a `DefaultsMode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"defer"` or `"evaluate"`.
    pub fn defaults_mode(&self) -> Result<DefaultsMode> {
        match self.default_values.as_str() {
            "defer" => Ok(DefaultsMode::Defer),
            "evaluate" => Ok(DefaultsMode::Evaluate),
            other => Err(Error::invalid_operation(format!(
                "Invalid default_values '{}' in {}. Expected \"defer\" or \"evaluate\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// Style table split into `(schema, name)`
    pub fn style_table_ref(&self) -> (String, String) {
        match self.style_table.split_once('.') {
            Some((schema, name)) => (schema.to_string(), name.to_string()),
            None => ("public".to_string(), self.style_table.clone()),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# geostrata provider configuration
#
# Translate filter expressions into store predicates (default: true).
# When false, every filter is evaluated feature by feature on the client.
compile_expressions = true

# Store default clauses: "defer" (default) or "evaluate"
#   "defer"    = expose the clause text, the store fills the value at commit
#   "evaluate" = evaluate the clause on the client (consumes sequence values)
default_values = "defer"

# Rows decoded per cursor batch
fetch_size = 2000

# Table used to save and load layer styles
style_table = "public.layer_styles"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProviderConfig = toml::from_str(&content).map_err(|e| {
            Error::parse(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.defaults_mode()?;
        if config.fetch_size == 0 {
            return Err(Error::invalid_operation(format!(
                "fetch_size in '{}' must be at least 1",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::storage(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
