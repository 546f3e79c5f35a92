//! Configuration for tripwire.
//!
//! Looks for `.config/tripwire.styx` in the current directory or any parent
//! directory. Every key is optional:
//!
//! ```styx
//! option-name constraints
//! extra-options (check_triggers)
//! error-message "Invariant broken"
//! deferrable true
//! name-prefix tw
//! detect-renames false
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use facet::Facet;

/// Default model-options key holding constraint declarations.
pub const DEFAULT_OPTION_NAME: &str = "constraints";

/// Option key used by older projects.
pub const LEGACY_OPTION_NAME: &str = "constraint_triggers";

/// Default message raised by a violated trigger.
pub const DEFAULT_ERROR_MESSAGE: &str = "Invariant broken";

/// Default prefix for generated function and trigger names.
pub const DEFAULT_NAME_PREFIX: &str = "tw";

const CONFIG_FILE: &str = ".config/tripwire.styx";

/// Schema-level configuration, passed explicitly to the snapshot, the
/// autodetector and the installer.
#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(rename_all = "kebab-case")]
pub struct Config {
    /// Model-options key holding constraint declarations.
    pub option_name: Option<String>,

    /// Additional option keys accepted in model snapshots.
    #[facet(default)]
    pub extra_options: Vec<String>,

    /// Message raised when a trigger finds a violating row.
    pub error_message: Option<String>,

    /// Whether triggers are created `DEFERRABLE INITIALLY DEFERRED`.
    pub deferrable: Option<bool>,

    /// Prefix for generated function and trigger names.
    pub name_prefix: Option<String>,

    /// Pair deleted and created models as renames when diffing.
    pub detect_renames: Option<bool>,
}

impl Config {
    pub fn option_name(&self) -> &str {
        self.option_name.as_deref().unwrap_or(DEFAULT_OPTION_NAME)
    }

    pub fn error_message(&self) -> &str {
        self.error_message
            .as_deref()
            .unwrap_or(DEFAULT_ERROR_MESSAGE)
    }

    pub fn deferrable(&self) -> bool {
        self.deferrable.unwrap_or(true)
    }

    pub fn name_prefix(&self) -> &str {
        self.name_prefix.as_deref().unwrap_or(DEFAULT_NAME_PREFIX)
    }

    pub fn detect_renames(&self) -> bool {
        self.detect_renames.unwrap_or(false)
    }

    /// Whether `key` may hold constraint declarations in a model's options.
    pub fn accepts_option(&self, key: &str) -> bool {
        key == self.option_name() || self.extra_options.iter().any(|k| k == key)
    }
}

/// Load configuration from `.config/tripwire.styx`, searching up the directory tree.
pub fn load() -> Result<(Config, Utf8PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| ConfigError::Io(format!("non UTF-8 working directory: {}", p.display())))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Utf8Path) -> Result<(Config, Utf8PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;

    let config = parse(&content)?;
    Ok((config, config_path))
}

/// Parse configuration from Styx source.
pub fn parse(source: &str) -> Result<Config, ConfigError> {
    facet_styx::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Find `.config/tripwire.styx` by searching up the directory tree.
fn find_config_file(start: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// No `.config/tripwire.styx` found in any parent directory
    NotFound,
    /// I/O error reading the file
    Io(String),
    /// Parse error in the Styx file
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound => {
                write!(
                    f,
                    "No {CONFIG_FILE} found in current directory or any parent"
                )
            }
            ConfigError::Io(e) => write!(f, "Failed to read {CONFIG_FILE}: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse {CONFIG_FILE}: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.option_name(), "constraints");
        assert_eq!(config.error_message(), "Invariant broken");
        assert!(config.deferrable());
        assert_eq!(config.name_prefix(), "tw");
        assert!(!config.detect_renames());
    }

    #[test]
    fn accepts_option() {
        let config = Config {
            option_name: Some(LEGACY_OPTION_NAME.to_string()),
            extra_options: vec!["audit".to_string()],
            ..Default::default()
        };
        assert!(config.accepts_option("constraint_triggers"));
        assert!(config.accepts_option("audit"));
        assert!(!config.accepts_option("constraints"));
        assert!(!config.accepts_option("ordering"));
    }

    #[test]
    fn parse_strings() {
        let config = parse(r#"{option-name constraint_triggers, error-message "No way"}"#)
            .expect("config should parse");
        assert_eq!(config.option_name(), "constraint_triggers");
        assert_eq!(config.error_message(), "No way");
        assert_eq!(config.name_prefix(), "tw");
    }

    #[test]
    fn walks_up_to_config_dir() {
        let root = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .expect("temp dir is UTF-8")
            .join(format!("tripwire-config-{}", std::process::id()));
        let nested = root.join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(".config")).unwrap();
        std::fs::write(root.join(CONFIG_FILE), "{name-prefix acme}").unwrap();

        let (config, path) = load_from(&nested).unwrap();
        assert_eq!(config.name_prefix(), "acme");
        assert_eq!(path, root.join(CONFIG_FILE));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
