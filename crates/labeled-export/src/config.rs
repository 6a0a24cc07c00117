// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Run configuration.
//!
//! Values come from the process environment, optionally layered over a
//! configuration file. For local runs (no `TASK_ID` in the environment) the
//! `local.env` file of the working directory and `~/supervisely.env` are
//! loaded first; variables already set are never overridden.
//!
//! | Key                     | Meaning                                  | Default          |
//! |-------------------------|------------------------------------------|------------------|
//! | `SERVER_ADDRESS`        | platform base URL                        | required         |
//! | `API_TOKEN`             | API token                                | required         |
//! | `PROJECT_ID`            | project to export                        | required         |
//! | `TEAM_ID`               | team owning the output files             | required for upload |
//! | `WORKSPACE_ID`          | workspace of the project                 |                  |
//! | `TASK_ID`               | task to register the output with         |                  |
//! | `modal.state.items`     | download media (strtobool)               | true, with warning |
//! | `EXPORT_DATA_DIR`       | local working directory                  | `./data`         |
//! | `EXPORT_FETCH_STRATEGY` | `bulk` or `batched`                      | `bulk`           |
//! | `EXPORT_SPLIT_SIZE_MB`  | archive part size                        | 500              |

use crate::{Error, FetchStrategy, ProjectID, TaskID, TeamID, WorkspaceID};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;
const COMMUNITY_HOSTS: [&str; 2] = ["app.supervise.ly", "app.supervisely.com"];

/// Name of the directory below the data dir holding the exported project.
pub const RESULT_DIR_NAME: &str = "export_only_labeled_items";

/// Team files directory below which exports are uploaded.
pub const REMOTE_EXPORT_ROOT: &str = "/tmp/supervisely/export/export-only-labeled-items";

/// Parses a boolean the way `distutils.util.strtobool` does.
///
/// ```rust
/// use labeled_export::config::strtobool;
///
/// assert_eq!(strtobool("Yes").unwrap(), true);
/// assert_eq!(strtobool("0").unwrap(), false);
/// assert!(strtobool("maybe").is_err());
/// ```
pub fn strtobool(value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => Err(Error::InvalidParameters(format!(
            "invalid truth value {:?}",
            other
        ))),
    }
}

/// Archive threshold for a server: 10 GiB on community servers, 100 GiB
/// elsewhere.
pub fn size_limit_for(server_address: &str) -> u64 {
    let host = url::Url::parse(server_address)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default();
    if COMMUNITY_HOSTS.contains(&host.as_str()) {
        10 * GIB
    } else {
        100 * GIB
    }
}

/// Loads `local.env` and `~/supervisely.env` unless running inside a task.
pub fn load_env_files() {
    if std::env::var("TASK_ID").is_ok() {
        return;
    }

    let mut files = vec![PathBuf::from("local.env")];
    if let Some(dirs) = directories::BaseDirs::new() {
        files.push(dirs.home_dir().join("supervisely.env"));
    }
    for file in files {
        match dotenvy::from_path(&file) {
            Ok(()) => log::debug!("loaded environment from {:?}", file),
            Err(err) => log::debug!("skipping {:?}: {}", file, err),
        }
    }
}

/// Values explicitly given on the command line; they take precedence over
/// the environment and the configuration file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub project_id: Option<ProjectID>,
    pub task_id: Option<TaskID>,
    pub download_items: Option<bool>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    server_address: Option<String>,
    api_token: Option<String>,
    team_id: Option<String>,
    workspace_id: Option<String>,
    project_id: Option<String>,
    task_id: Option<String>,
    export_data_dir: Option<String>,
    export_fetch_strategy: Option<String>,
    export_split_size_mb: Option<String>,
}

fn parse_opt<T: FromStr<Err = Error>>(value: Option<String>) -> Result<Option<T>, Error> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| T::from_str(&v))
        .transpose()
}

/// Immutable configuration of one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    server_address: String,
    api_token: String,
    team_id: Option<TeamID>,
    workspace_id: Option<WorkspaceID>,
    project_id: ProjectID,
    task_id: Option<TaskID>,
    download_items: bool,
    data_dir: PathBuf,
    fetch_strategy: FetchStrategy,
    split_size: u64,
    size_limit: u64,
}

impl ExportConfig {
    /// Configuration with defaults for everything but the connection and
    /// the project.
    pub fn new(server_address: &str, api_token: &str, project_id: ProjectID) -> Self {
        ExportConfig {
            server_address: server_address.trim_end_matches('/').to_owned(),
            api_token: api_token.to_owned(),
            team_id: None,
            workspace_id: None,
            project_id,
            task_id: None,
            download_items: true,
            data_dir: PathBuf::from("data"),
            fetch_strategy: FetchStrategy::default(),
            split_size: 500 * MIB,
            size_limit: size_limit_for(server_address),
        }
    }

    /// Loads the configuration from the environment layered over the
    /// optional `file`, then applies `overrides`.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file));
        }
        let settings = builder
            .add_source(config::Environment::default().try_parsing(false))
            .build()?;

        let items = match settings.get_string("modal.state.items") {
            Ok(value) => Some(strtobool(&value)?),
            Err(config::ConfigError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        let raw: RawConfig = settings.try_deserialize()?;
        Self::from_raw(raw, items, overrides)
    }

    fn from_raw(
        raw: RawConfig,
        items: Option<bool>,
        overrides: &Overrides,
    ) -> Result<Self, Error> {
        let server_address = raw
            .server_address
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::MissingConfig("SERVER_ADDRESS".to_string()))?;
        let api_token = raw.api_token.unwrap_or_default();
        if api_token.trim().is_empty() {
            return Err(Error::EmptyToken);
        }
        let project_id = match overrides.project_id {
            Some(id) => id,
            None => parse_opt(raw.project_id)?
                .ok_or_else(|| Error::MissingConfig("PROJECT_ID".to_string()))?,
        };

        let mut config = ExportConfig::new(&server_address, api_token.trim(), project_id);
        config.team_id = parse_opt(raw.team_id)?;
        config.workspace_id = parse_opt(raw.workspace_id)?;
        config.task_id = match overrides.task_id {
            Some(id) => Some(id),
            None => parse_opt(raw.task_id)?,
        };

        config.download_items = match (overrides.download_items, items) {
            (Some(flag), _) => flag,
            (None, Some(flag)) => flag,
            (None, None) => {
                log::warn!(
                    "The option to download items is not selected, project will be downloaded with items"
                );
                true
            }
        };

        if let Some(dir) = overrides.data_dir.clone() {
            config.data_dir = dir;
        } else if let Some(dir) = raw.export_data_dir.filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(strategy) = parse_opt::<FetchStrategy>(raw.export_fetch_strategy)? {
            config.fetch_strategy = strategy;
        }
        if let Some(size) = raw.export_split_size_mb.filter(|s| !s.trim().is_empty()) {
            let mb: u64 = size.trim().parse()?;
            if mb == 0 {
                return Err(Error::InvalidParameters(
                    "EXPORT_SPLIT_SIZE_MB must be positive".to_string(),
                ));
            }
            config.split_size = mb * MIB;
        }

        Ok(config)
    }

    pub fn with_team_id(mut self, team_id: TeamID) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn with_task_id(mut self, task_id: TaskID) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_download_items(mut self, download_items: bool) -> Self {
        self.download_items = download_items;
        self
    }

    pub fn with_data_dir(mut self, data_dir: &Path) -> Self {
        self.data_dir = data_dir.to_path_buf();
        self
    }

    pub fn with_fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.fetch_strategy = strategy;
        self
    }

    pub fn with_split_size(mut self, bytes: u64) -> Self {
        self.split_size = bytes.max(1);
        self
    }

    pub fn with_size_limit(mut self, bytes: u64) -> Self {
        self.size_limit = bytes;
        self
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn team_id(&self) -> Option<TeamID> {
        self.team_id
    }

    pub fn workspace_id(&self) -> Option<WorkspaceID> {
        self.workspace_id
    }

    pub fn project_id(&self) -> ProjectID {
        self.project_id
    }

    pub fn task_id(&self) -> Option<TaskID> {
        self.task_id
    }

    pub fn download_items(&self) -> bool {
        self.download_items
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn fetch_strategy(&self) -> FetchStrategy {
        self.fetch_strategy
    }

    pub fn split_size(&self) -> u64 {
        self.split_size
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Directory measured and uploaded by the packager.
    pub fn result_dir(&self) -> PathBuf {
        self.data_dir.join(RESULT_DIR_NAME)
    }

    /// Local directory of the exported project.
    pub fn project_dir(&self, project_name: &str) -> PathBuf {
        self.result_dir()
            .join(crate::writer::sanitize_path_component(project_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            server_address: Some("https://app.supervisely.com/".to_string()),
            api_token: Some("secret".to_string()),
            project_id: Some("12".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_strtobool() {
        for value in ["y", "YES", "t", "True", "on", "1"] {
            assert!(strtobool(value).unwrap(), "{}", value);
        }
        for value in ["n", "No", "f", "false", "OFF", "0"] {
            assert!(!strtobool(value).unwrap(), "{}", value);
        }
        assert!(strtobool("2").is_err());
    }

    #[test]
    fn test_size_limit_for() {
        assert_eq!(size_limit_for("https://app.supervisely.com"), 10 * GIB);
        assert_eq!(size_limit_for("https://app.supervise.ly/"), 10 * GIB);
        assert_eq!(size_limit_for("https://sly.example.com"), 100 * GIB);
        assert_eq!(size_limit_for("not a url"), 100 * GIB);
    }

    #[test]
    fn test_from_raw_defaults() {
        let config = ExportConfig::from_raw(raw(), None, &Overrides::default()).unwrap();
        assert_eq!(config.server_address(), "https://app.supervisely.com");
        assert_eq!(config.project_id(), ProjectID::from(12));
        assert!(config.download_items());
        assert_eq!(config.split_size(), 500 * MIB);
        assert_eq!(config.size_limit(), 10 * GIB);
        assert_eq!(config.task_id(), None);
        assert_eq!(
            config.project_dir("cars/v1"),
            PathBuf::from("data/export_only_labeled_items/cars_v1")
        );
    }

    #[test]
    fn test_from_raw_values_and_overrides() {
        let raw = RawConfig {
            task_id: Some("7".to_string()),
            team_id: Some("3".to_string()),
            export_data_dir: Some("/work".to_string()),
            export_fetch_strategy: Some("batched".to_string()),
            export_split_size_mb: Some("2".to_string()),
            ..raw()
        };
        let overrides = Overrides {
            project_id: Some(99.into()),
            download_items: Some(true),
            ..Default::default()
        };
        let config = ExportConfig::from_raw(raw, Some(false), &overrides).unwrap();
        assert_eq!(config.project_id().value(), 99);
        assert_eq!(config.task_id(), Some(TaskID::from(7)));
        assert_eq!(config.team_id(), Some(TeamID::from(3)));
        assert!(config.download_items());
        assert_eq!(config.data_dir(), Path::new("/work"));
        assert_eq!(config.fetch_strategy(), FetchStrategy::Batched);
        assert_eq!(config.split_size(), 2 * MIB);
    }

    #[test]
    fn test_from_raw_errors() {
        let missing_token = RawConfig {
            api_token: Some(" ".to_string()),
            ..raw()
        };
        assert!(matches!(
            ExportConfig::from_raw(missing_token, None, &Overrides::default()),
            Err(Error::EmptyToken)
        ));

        let missing_project = RawConfig {
            project_id: None,
            ..raw()
        };
        assert!(matches!(
            ExportConfig::from_raw(missing_project, None, &Overrides::default()),
            Err(Error::MissingConfig(key)) if key == "PROJECT_ID"
        ));

        let bad_split = RawConfig {
            export_split_size_mb: Some("0".to_string()),
            ..raw()
        };
        assert!(ExportConfig::from_raw(bad_split, None, &Overrides::default()).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_load_from_file_and_env() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("export.toml");
        std::fs::write(
            &file,
            "server_address = \"https://sly.example.com\"\napi_token = \"abc\"\nproject_id = \"5\"\n",
        )
        .unwrap();

        unsafe {
            std::env::set_var("EXPORT_FETCH_STRATEGY", "batched");
        }
        let config = ExportConfig::load(
            Some(&file),
            &Overrides {
                download_items: Some(false),
                ..Default::default()
            },
        );
        unsafe {
            std::env::remove_var("EXPORT_FETCH_STRATEGY");
        }

        let config = config.unwrap();
        assert_eq!(config.server_address(), "https://sly.example.com");
        assert_eq!(config.project_id().value(), 5);
        assert_eq!(config.fetch_strategy(), FetchStrategy::Batched);
        assert!(!config.download_items());
        assert_eq!(config.size_limit(), 100 * GIB);
    }
}
