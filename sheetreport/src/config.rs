//! Configuration system for the report formatter

use crate::error::{ReportError, Result};
use crate::placeholder::FieldFormats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Text written into a cell whose formula points at a band that never rendered
pub const DEFAULT_ERROR_MARKER: &str = "ERROR: Formula references to empty range";

/// Main formatter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatterConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    /// Field formats: `"Band.param" = "%d.%m.%Y"`, `"price" = "#,##0.00"`
    #[serde(default)]
    pub formats: HashMap<String, String>,
}

impl FormatterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: FormatterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        let delimiter = &self.global.csv_delimiter;
        if delimiter.chars().count() != 1 || !delimiter.is_ascii() {
            return Err(ReportError::InvalidConfig(format!(
                "csv_delimiter must be a single ASCII character, got '{}'",
                delimiter
            )));
        }
        if matches!(delimiter.as_str(), "\"" | "\n" | "\r") {
            return Err(ReportError::InvalidConfig(format!(
                "csv_delimiter cannot be {:?}",
                delimiter
            )));
        }
        Ok(())
    }

    /// Delimiter byte for CSV output
    pub fn csv_delimiter(&self) -> u8 {
        self.global.csv_delimiter.bytes().next().unwrap_or(b';')
    }

    pub fn field_formats(&self) -> FieldFormats {
        self.formats
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Field separator of CSV output
    pub csv_delimiter: String,
    /// Leave rows without any value out of CSV output
    pub skip_empty_rows: bool,
    /// Cell text replacing formulas that reference an empty band range
    pub error_marker: String,
    /// Ask the spreadsheet application to refresh pivot caches when opening
    pub refresh_pivots_on_load: bool,
    /// Ask the spreadsheet application to recalculate every formula when opening
    pub full_calc_on_load: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: ";".to_string(),
            skip_empty_rows: true,
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            refresh_pivots_on_load: true,
            full_calc_on_load: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FormatterConfig::default();
        assert_eq!(config.csv_delimiter(), b';');
        assert!(config.global.skip_empty_rows);
        assert_eq!(config.global.error_marker, DEFAULT_ERROR_MARKER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = FormatterConfig::from_toml(
            r#"
            [global]
            csv_delimiter = ","
            full_calc_on_load = false

            [formats]
            "Items.shipped" = "%d/%m/%Y"
            price = "0.00"
            "#,
        )
        .unwrap();

        assert_eq!(config.csv_delimiter(), b',');
        assert!(!config.global.full_calc_on_load);
        assert!(config.global.refresh_pivots_on_load);
        let formats = config.field_formats();
        assert_eq!(formats.get("Items", "shipped"), Some("%d/%m/%Y"));
        assert_eq!(formats.get("Orders", "price"), Some("0.00"));
    }

    #[test]
    fn test_validation() {
        let err = FormatterConfig::from_toml("[global]\ncsv_delimiter = \"::\"").unwrap_err();
        assert!(err.is_configuration());

        let err = FormatterConfig::from_toml("[global]\nskip_empty_rows = \"yes\"").unwrap_err();
        assert!(matches!(err, ReportError::ConfigSyntax(_)));
    }
}
