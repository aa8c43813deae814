use crate::errors::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXECUTE_MACHINES_PATTERN: &str = ".*worker.*";
pub const DEFAULT_SUB_DIR_TEMPLATE: &str = "{label}";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[allow(clippy::unwrap_used)]
static TEMPLATE_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    pub memory_limit: Option<i64>,
    pub execute_machines_pattern: Option<String>,
    pub accounting_group: Option<String>,
    pub accounting_user: Option<String>,
    /// Pass-through submit commands. Keys starting with `+` become job
    /// attributes instead.
    pub profile: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub enabled: bool,
    pub script: Option<String>,
    pub script_config: Option<String>,
    pub script_config_path: Option<String>,
}

impl ProvisioningConfig {
    /// The script config template with environment variables expanded.
    pub fn expanded_script_config(&self) -> Result<Option<String>, ConfigError> {
        self.script_config.as_deref().map(expand).transpose()
    }

    pub fn expanded_script_config_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        Ok(self
            .script_config_path
            .as_deref()
            .map(expand)
            .transpose()?
            .map(PathBuf::from))
    }
}

fn expand(value: &str) -> Result<String, ConfigError> {
    shellexpand::full(value)
        .map(|v| v.into_owned())
        .map_err(|e| ConfigError::Expansion {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Directory layout for job files below `jobs/`, either one template for
/// every label or a per-label table with an optional `default` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SubDirTemplate {
    Single(String),
    PerLabel(BTreeMap<String, String>),
}

impl Default for SubDirTemplate {
    fn default() -> Self {
        SubDirTemplate::Single(DEFAULT_SUB_DIR_TEMPLATE.to_string())
    }
}

impl SubDirTemplate {
    pub fn template_for(&self, label: &str) -> &str {
        match self {
            SubDirTemplate::Single(t) => t,
            SubDirTemplate::PerLabel(map) => map
                .get(label)
                .or_else(|| map.get("default"))
                .map(String::as_str)
                .unwrap_or(DEFAULT_SUB_DIR_TEMPLATE),
        }
    }

    /// Renders the template for a job. `{label}` and the job's tags are
    /// substituted, unknown keys become empty and the resulting empty path
    /// components are dropped.
    pub fn render(&self, label: &str, tags: &BTreeMap<String, String>) -> String {
        let template = self.template_for(label);
        let filled = TEMPLATE_KEY_RE.replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            if key == "label" {
                label.to_string()
            } else {
                tags.get(key).cloned().unwrap_or_default()
            }
        });
        filled
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Jobs can see the submit-side filesystem.
    pub use_shared: bool,
    pub sub_dir_template: SubDirTemplate,
    pub execute_machines_pattern: Option<String>,
    pub memory_limit: Option<i64>,
    pub accounting_group: Option<String>,
    pub accounting_user: Option<String>,
    pub sites: BTreeMap<String, SiteConfig>,
    pub provisioning: ProvisioningConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs_err::read_to_string(path).map_err(|source| ConfigError::PathIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!("Loaded configuration from '{}'", path.display());
        Ok(config)
    }

    /// Reads `path` if given, else the user configuration file if one
    /// exists, else the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let default_path = default_config_path()?;
        if default_path.is_file() {
            Self::from_file(&default_path)
        } else {
            tracing::debug!(
                "No configuration at '{}', using defaults",
                default_path.display()
            );
            Ok(Self::default())
        }
    }

    pub fn site(&self, name: Option<&str>) -> Option<&SiteConfig> {
        name.and_then(|n| self.sites.get(n))
    }

    pub fn memory_limit(&self, site: Option<&str>) -> Option<i64> {
        self.site(site)
            .and_then(|s| s.memory_limit)
            .or(self.memory_limit)
    }

    pub fn execute_machines_pattern(&self, site: Option<&str>) -> &str {
        self.site(site)
            .and_then(|s| s.execute_machines_pattern.as_deref())
            .or(self.execute_machines_pattern.as_deref())
            .unwrap_or(DEFAULT_EXECUTE_MACHINES_PATTERN)
    }

    pub fn accounting_group(&self, site: Option<&str>) -> Option<&str> {
        self.site(site)
            .and_then(|s| s.accounting_group.as_deref())
            .or(self.accounting_group.as_deref())
    }

    pub fn accounting_user(&self, site: Option<&str>) -> Option<&str> {
        self.site(site)
            .and_then(|s| s.accounting_user.as_deref())
            .or(self.accounting_user.as_deref())
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("htcflow");
    let config_home = xdg_dirs
        .get_config_home()
        .ok_or(ConfigError::HomeDirectoryNotFound)?;
    Ok(config_home.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
use_shared = true
accounting_group = "group_global"

[sub_dir_template]
default = "{label}/{tract}/{patch}"
pipetaskInit = "init"

[sites.s3df]
memory_limit = 16384
execute_machines_pattern = "sdfmilan.*"
accounting_user = "user_y"

[sites.s3df.profile]
"+JobPrio" = "5"
requirements = '(OpSys == "LINUX")'

[provisioning]
enabled = true
script_config = "pool = $HTCFLOW_TEST_POOL"

[logging]
max_files = 3
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.use_shared);
        assert_eq!(config.execute_machines_pattern(None), ".*worker.*");
        assert_eq!(config.memory_limit(Some("nowhere")), None);
        assert_eq!(config.logging.max_files, 20);
        assert_eq!(config.sub_dir_template.render("calibrate", &BTreeMap::new()), "calibrate");
    }

    #[test]
    fn test_site_values_fall_back_to_global() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert!(config.use_shared);
        assert_eq!(config.memory_limit(Some("s3df")), Some(16384));
        assert_eq!(config.memory_limit(None), None);
        assert_eq!(config.execute_machines_pattern(Some("s3df")), "sdfmilan.*");
        assert_eq!(config.accounting_group(Some("s3df")), Some("group_global"));
        assert_eq!(config.accounting_user(Some("s3df")), Some("user_y"));
        assert_eq!(config.accounting_user(None), None);
        let site = config.site(Some("s3df")).unwrap();
        assert_eq!(site.profile.get("+JobPrio"), Some(&json!("5")));
        assert_eq!(config.logging.max_age_days, 7);
    }

    #[test]
    fn test_sub_dir_template_rendering() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let mut tags = BTreeMap::new();
        tags.insert("tract".to_string(), "9813".to_string());
        assert_eq!(config.sub_dir_template.render("calibrate", &tags), "calibrate/9813");
        assert_eq!(config.sub_dir_template.render("pipetaskInit", &tags), "init");
    }

    #[test]
    fn test_provisioning_config_expands_environment() {
        std::env::set_var("HTCFLOW_TEST_POOL", "pool.example.org");
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(
            config.provisioning.expanded_script_config().unwrap().as_deref(),
            Some("pool = pool.example.org")
        );
        assert_eq!(config.provisioning.expanded_script_config_path().unwrap(), None);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::PathIo { .. }));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(matches!(
            Config::from_toml("use_shared = \"maybe\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
