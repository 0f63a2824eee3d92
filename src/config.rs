use std::path::Path;

use facet::Facet;

use crate::error::QvmError;
use crate::paths;
use crate::transport::TransportChoice;

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub qubesd: QubesdConfig,
    #[facet(default)]
    pub run: RunConfig,
    #[facet(default)]
    pub create: CreateConfig,
}

/// Missing keys take their values from `Default`.
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct QubesdConfig {
    pub socket: String,
    /// `auto`, `socket` or `qrexec`.
    pub transport: String,
}

impl Default for QubesdConfig {
    fn default() -> Self {
        Self {
            socket: paths::DEFAULT_QUBESD_SOCKET.into(),
            transport: "auto".into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct RunConfig {
    /// Empty means the target VM's default user.
    #[facet(default)]
    pub default_user: String,
    #[facet(default = true)]
    pub autostart: bool,
    /// Unset means "filter when stdout is a terminal".
    pub filter_escape_chars: Option<bool>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_user: String::new(),
            autostart: true,
            filter_escape_chars: None,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct CreateConfig {
    #[facet(default)]
    pub default_label: String,
    #[facet(default = "AppVM")]
    pub default_class: String,
}

impl Default for CreateConfig {
    fn default() -> Self {
        Self {
            default_label: String::new(),
            default_class: "AppVM".into(),
        }
    }
}

impl Config {
    pub fn transport(&self) -> Result<TransportChoice, QvmError> {
        self.qubesd.transport.parse()
    }
}

fn validate_config(config: &Config) -> Result<(), QvmError> {
    if config.qubesd.socket.trim().is_empty() {
        return Err(QvmError::validation("qubesd.socket must not be empty"));
    }
    config.transport()?;
    if config.create.default_class.is_empty() {
        return Err(QvmError::validation("create.default_class must not be empty"));
    }
    Ok(())
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, QvmError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| QvmError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config file.
///
/// An explicit path must exist. Without one, the per-user default is read
/// when present and built-in defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config, QvmError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (paths::default_config_path(), false),
    };

    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|source| QvmError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&contents, &path)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}
