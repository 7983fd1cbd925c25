/*!
 * Configuration support for BPA generation
 *
 * Persisted defaults for a generation run: the header block, the layout,
 * consolidation and header-row switches, per-field fallback values and
 * explicit column indices. Values are layered as built-in defaults, then a
 * TOML file, then `BPA_*` environment variables.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data_types::{BpaMode, HeaderConfig},
    schema::{ColumnMapping, Field, FieldDefaults},
    BpaError, Result,
};

/// Environment variable prefix (`BPA_MODE`, `BPA_HEADER__COMPETENCY`, ...)
pub const ENV_PREFIX: &str = "BPA";

/// Configuration of a generation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpaConfig {
    /// Header (record 01) values
    #[serde(default)]
    pub header: HeaderConfig,

    /// Output layout
    #[serde(default)]
    pub mode: BpaMode,

    /// Merge duplicate consolidated records
    #[serde(default = "default_true")]
    pub consolidate: bool,

    /// Whether the input starts with a row of column names
    #[serde(default = "default_true")]
    pub has_header_row: bool,

    /// Fallback values for unmapped fields and empty cells
    #[serde(default)]
    pub defaults: FieldDefaults,

    /// Explicit column indices; empty means detect them from the header row
    #[serde(default)]
    pub columns: BTreeMap<Field, usize>,

    /// Directory generated files go to when no output path is given
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for BpaConfig {
    fn default() -> Self {
        Self {
            header: HeaderConfig::default(),
            mode: BpaMode::Consolidated,
            consolidate: true,
            has_header_row: true,
            defaults: FieldDefaults::default(),
            columns: BTreeMap::new(),
            output_dir: None,
        }
    }
}

impl BpaConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| BpaError::io_at(e, path))?;
        let config: Self = toml::from_str(&contents).map_err(|e| BpaError::Configuration {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
            suggestion: Some("Check that the file is valid TOML format".to_string()),
        })?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating its directory
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = self.to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BpaError::io_at(e, parent))?;
        }
        std::fs::write(path, contents).map_err(|e| BpaError::io_at(e, path))?;
        debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// TOML text of this configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BpaError::Configuration {
            message: format!("Failed to serialize config: {}", e),
            suggestion: None,
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/bpa/config.toml` on Unix-like systems
    /// or `%APPDATA%\bpa\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "bpa").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load layered configuration
    ///
    /// Priority order, lowest first:
    /// 1. Built-in defaults
    /// 2. `path`, or the default config file when `path` is `None` (optional)
    /// 3. Environment variables, `BPA_` prefix and `__` between nested keys
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(Path::to_path_buf).or_else(Self::default_config_path);

        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(file) = &file {
            debug!(path = %file.display(), exists = file.exists(), "configuration file");
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(path.is_some()),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Column mapping for an input with these column labels
    ///
    /// Explicit indices win; without any, the mapping is detected from the
    /// labels.
    pub fn column_mapping(&self, headers: &[String]) -> ColumnMapping {
        if self.columns.is_empty() {
            ColumnMapping::auto_detect(headers, &self.defaults)
        } else {
            ColumnMapping::new(&self.columns, &self.defaults)
        }
    }

    /// Whether consolidation applies to the configured layout
    pub fn consolidates(&self) -> bool {
        self.consolidate && self.mode == BpaMode::Consolidated
    }
}

/// Builder for customizing configuration
pub struct ConfigBuilder {
    config: BpaConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: BpaConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: BpaConfig) -> Self {
        Self { config }
    }

    pub fn header(mut self, header: HeaderConfig) -> Self {
        self.config.header = header;
        self
    }

    /// Set the header competency
    pub fn competency(mut self, competency: impl Into<String>) -> Self {
        self.config.header.competency = competency.into();
        self
    }

    pub fn mode(mut self, mode: BpaMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn consolidate(mut self, consolidate: bool) -> Self {
        self.config.consolidate = consolidate;
        self
    }

    pub fn has_header_row(mut self, has_header_row: bool) -> Self {
        self.config.has_header_row = has_header_row;
        self
    }

    /// Set the fallback value of one field
    pub fn default_value(mut self, field: Field, value: impl Into<String>) -> Self {
        self.config.defaults.set(field, value);
        self
    }

    /// Map one field to a column index
    pub fn column(mut self, field: Field, index: usize) -> Self {
        self.config.columns.insert(field, index);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> BpaConfig {
        self.config
    }
}
