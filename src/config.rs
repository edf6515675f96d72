use std::{collections::BTreeSet, fs, path::PathBuf, time::Duration};

use color_eyre::{
    Result,
    eyre::{Context, ContextCompat, eyre},
};
use directories::ProjectDirs;
use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;

use crate::harvest::{HarvestOptions, PageSizes};

/// Main configuration struct for the application
#[derive(Clone, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct Config {
    /// Directory where the data must be stored
    pub data_dir: PathBuf,
    /// Configuration settings for application logging
    pub logs: LogsConfig,
    /// Configuration for the retrieval of the project history
    pub fetch: FetchConfig,
    /// Configuration for the items to be left out of the changelog
    pub filter: FilterConfig,
    /// Configuration for the GitHub provider
    pub github: GithubConfig,
    /// Configuration for the GitLab provider
    pub gitlab: GitlabConfig,
    /// Configuration for the generated changelog
    pub output: OutputConfig,
}

/// Configuration settings for application logging
#[derive(Clone, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct LogsConfig {
    /// Whether application logging is enabled
    pub enabled: bool,
    /// The log filter to apply, controlling which logs are recorded.
    ///
    /// This string supports the `tracing-subscriber`'s environment filter syntax.
    pub filter: String,
}

/// Configuration for the retrieval of the project history
#[derive(Clone, Copy, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct FetchConfig {
    /// Number of concurrent workers per entity type, both for fetching pages and processing them
    pub workers: usize,
    /// Maximum amount of seconds the whole retrieval can take
    pub timeout: u64,
    /// Number of items requested per page
    pub page_size: PageSizeConfig,
}

/// Number of items requested per page, for each entity type
#[derive(Clone, Copy, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct PageSizeConfig {
    pub tags: u32,
    pub issues: u32,
    pub merge_requests: u32,
}

/// Configuration for the items to be left out of the changelog
#[derive(Clone, Default, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct FilterConfig {
    /// Issues and merge requests with any of these labels are excluded
    pub exclude_labels: Vec<String>,
    /// If set, only tags matching this regular expression are considered releases
    pub tags: Option<String>,
}

/// Configuration for the GitHub provider
#[derive(Clone, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct GithubConfig {
    /// Base url of the REST API
    pub url: String,
    /// Base url of the web interface
    pub web_url: String,
    /// The name of the environment variable holding the api token
    pub token_env: String,
}

/// Configuration for the GitLab provider
#[derive(Clone, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct GitlabConfig {
    /// Base url of the REST API (v4)
    pub url: String,
    /// Base url of the web interface
    pub web_url: String,
    /// The name of the environment variable holding the api token
    pub token_env: String,
}

/// Configuration for the generated changelog
#[derive(Clone, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[cfg_attr(not(test), serde(default))]
pub struct OutputConfig {
    /// Default file the changelog is written to
    pub path: PathBuf,
}

impl Config {
    /// Initializes the application configuration.
    ///
    /// Attempts to load the configuration from the user's config directory (`config.toml`). If the file does not exist
    /// or has missing fields, it falls back to default values.
    pub fn init(config_file: Option<PathBuf>) -> Result<Self> {
        // Initialize directories
        let proj_dirs = ProjectDirs::from("org", "ReleaseLedger", "release-ledger")
            .wrap_err("Couldn't initialize project directory")?;
        let config_dir = proj_dirs.config_dir().to_path_buf();

        // Initialize the config
        let config_path = config_file.unwrap_or_else(|| config_dir.join("config.toml"));
        let mut config = if config_path.exists() {
            // Read from the config file, if found
            let config_str = fs::read_to_string(&config_path)
                .wrap_err_with(|| format!("Couldn't read config file {}", config_path.display()))?;
            toml::from_str(&config_str)
                .wrap_err_with(|| format!("Couldn't parse config file {}", config_path.display()))?
        } else {
            // Use default values if not found
            Config::default()
        };
        // If no data dir is provided, use the default
        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = proj_dirs.data_dir().to_path_buf();
        }

        // Validate the values
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(eyre!(
                "Couldn't parse config file {}\n\nThere are some invalid values:\n{}",
                config_path.display(),
                errors.into_iter().map(|e| format!("- {e}")).join("\n")
            ));
        }

        // Create the data directory if not found
        fs::create_dir_all(&config.data_dir)
            .wrap_err_with(|| format!("Couldn't create data dir {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Builds the options for a harvest of the project history.
    ///
    /// A `new_release` name can be provided to collect the not-yet-tagged activity under a synthetic release.
    pub fn harvest_options(&self, new_release: Option<String>, show_progress: bool) -> Result<HarvestOptions> {
        let tag_filter = self
            .filter
            .tags
            .as_deref()
            .map(Regex::new)
            .transpose()
            .wrap_err("Invalid tags filter")?;
        Ok(HarvestOptions {
            page_sizes: PageSizes {
                tags: self.fetch.page_size.tags,
                issues: self.fetch.page_size.issues,
                merge_requests: self.fetch.page_size.merge_requests,
            },
            workers: self.fetch.workers,
            deadline: Duration::from_secs(self.fetch.timeout),
            exclude_labels: self.filter.exclude_labels.iter().cloned().collect::<BTreeSet<_>>(),
            tag_filter,
            new_release: new_release.filter(|n| !n.trim().is_empty()),
            show_progress,
        })
    }

    /// Validates the config values, returning the list of issues found
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.fetch.workers == 0 {
            errors.push(String::from("fetch.workers must be at least 1"));
        }
        if self.fetch.timeout == 0 {
            errors.push(String::from("fetch.timeout must be at least 1 second"));
        }
        let PageSizeConfig {
            tags,
            issues,
            merge_requests,
        } = self.fetch.page_size;
        for (name, size) in [("tags", tags), ("issues", issues), ("merge_requests", merge_requests)] {
            if size == 0 {
                errors.push(format!("fetch.page_size.{name} must be at least 1"));
            }
        }
        if let Some(tags) = &self.filter.tags
            && let Err(err) = Regex::new(tags)
        {
            errors.push(format!("filter.tags is not a valid regex: {err}"));
        }
        errors
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            logs: LogsConfig::default(),
            fetch: FetchConfig::default(),
            filter: FilterConfig::default(),
            github: GithubConfig::default(),
            gitlab: GitlabConfig::default(),
            output: OutputConfig::default(),
        }
    }
}
impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filter: String::from("info"),
        }
    }
}
impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout: 60,
            page_size: PageSizeConfig::default(),
        }
    }
}
impl Default for PageSizeConfig {
    fn default() -> Self {
        Self {
            tags: 100,
            issues: 100,
            merge_requests: 100,
        }
    }
}
impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            url: String::from("https://api.github.com"),
            web_url: String::from("https://github.com"),
            token_env: String::from("GITHUB_TOKEN"),
        }
    }
}
impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            url: String::from("https://gitlab.com/api/v4"),
            web_url: String::from("https://gitlab.com"),
            token_env: String::from("GITLAB_TOKEN"),
        }
    }
}
impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("CHANGELOG.md"),
        }
    }
}
