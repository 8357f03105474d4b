use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "FREENOTE_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Path,
    Bool,
    Integer,
    Seconds,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub key: &'static str,
    pub env: &'static str,
    pub kind: SettingKind,
    pub default: &'static str,
    pub description: &'static str,
    validate: fn(&str) -> Result<(), String>,
}

impl SettingSpec {
    pub fn validate(&self, raw: &str) -> Result<(), String> {
        (self.validate)(raw)
    }
}

pub const SETTINGS_SCHEMA: &[SettingSpec] = &[
    SettingSpec {
        key: "workspaceDir",
        env: "FREENOTE_WORKSPACE_DIR",
        kind: SettingKind::Path,
        default: "",
        description: "Directory notebooks are loaded from and saved to",
        validate: validate_any,
    },
    SettingSpec {
        key: "assetDir",
        env: "FREENOTE_ASSET_DIR",
        kind: SettingKind::Path,
        default: "",
        description: "Directory for image asset files; defaults to the workspace directory",
        validate: validate_any,
    },
    SettingSpec {
        key: "logDir",
        env: "FREENOTE_LOG_DIR",
        kind: SettingKind::Path,
        default: "",
        description: "Directory for rolling log files; defaults to <workspaceDir>/logs",
        validate: validate_any,
    },
    SettingSpec {
        key: "autoSave",
        env: "FREENOTE_AUTO_SAVE",
        kind: SettingKind::Bool,
        default: "true",
        description: "Turn the autosave functionality on or off",
        validate: validate_bool,
    },
    SettingSpec {
        key: "autoSaveIntervalSeconds",
        env: "FREENOTE_AUTO_SAVE_INTERVAL",
        kind: SettingKind::Seconds,
        default: "3",
        description: "Quiet period after the last change before the workspace is saved",
        validate: validate_seconds,
    },
    SettingSpec {
        key: "pageResizeIntervalSeconds",
        env: "FREENOTE_PAGE_RESIZE_INTERVAL",
        kind: SettingKind::Seconds,
        default: "0.5",
        description: "Quiet period before a page shrinks back around its items",
        validate: validate_seconds,
    },
    SettingSpec {
        key: "imageResizeIntervalSeconds",
        env: "FREENOTE_IMAGE_RESIZE_INTERVAL",
        kind: SettingKind::Seconds,
        default: "0.05",
        description: "Respite during resizing before images are rescaled",
        validate: validate_seconds,
    },
    SettingSpec {
        key: "tabTextMaxLength",
        env: "FREENOTE_TAB_TEXT_MAX_LENGTH",
        kind: SettingKind::Integer,
        default: "16",
        description: "Maximum characters shown in a notebook, section or page tab",
        validate: validate_positive_integer,
    },
    SettingSpec {
        key: "codeTabStop",
        env: "FREENOTE_CODE_TAB_STOP",
        kind: SettingKind::Integer,
        default: "4",
        description: "Spaces a tab character is displayed as inside code items",
        validate: validate_positive_integer,
    },
    SettingSpec {
        key: "codeFont",
        env: "FREENOTE_CODE_FONT",
        kind: SettingKind::Text,
        default: "DejaVu Sans Mono",
        description: "Font family used to display code items",
        validate: validate_non_empty,
    },
    SettingSpec {
        key: "gitEnabled",
        env: "FREENOTE_GIT_ENABLED",
        kind: SettingKind::Bool,
        default: "false",
        description: "Commit workspace changes to git",
        validate: validate_bool,
    },
    SettingSpec {
        key: "gitCommitFrequency",
        env: "FREENOTE_GIT_COMMIT_FREQUENCY",
        kind: SettingKind::Integer,
        default: "5",
        description: "When git is enabled, commit every N saves",
        validate: validate_positive_integer,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub workspace_dir: Option<PathBuf>,
    pub asset_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub auto_save: bool,
    pub auto_save_interval_seconds: f64,
    pub page_resize_interval_seconds: f64,
    pub image_resize_interval_seconds: f64,
    pub tab_text_max_length: usize,
    pub code_tab_stop: u32,
    pub code_font: String,
    pub git_enabled: bool,
    pub git_commit_frequency: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            asset_dir: None,
            log_dir: None,
            auto_save: true,
            auto_save_interval_seconds: 3.0,
            page_resize_interval_seconds: 0.5,
            image_resize_interval_seconds: 0.05,
            tab_text_max_length: 16,
            code_tab_stop: 4,
            code_font: "DejaVu Sans Mono".to_string(),
            git_enabled: false,
            git_commit_frequency: 5,
        }
    }
}

impl AppSettings {
    /// Reads the optional JSON settings file, then applies `FREENOTE_*`
    /// environment overrides, then validates the result.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let bytes = fs::read(path)?;
                serde_json::from_slice::<Self>(&bytes).map_err(|error| {
                    AppError::Config(format!("{}: {}", path.to_string_lossy(), error))
                })?
            }
            Some(path) => {
                tracing::info!(path = %path.to_string_lossy(), "settings file missing; using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for spec in SETTINGS_SCHEMA {
            if let Some(raw) = lookup(spec.env) {
                self.set(spec.key, &raw)?;
            }
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, raw: &str) -> AppResult<()> {
        let spec = SETTINGS_SCHEMA
            .iter()
            .find(|spec| spec.key == key)
            .ok_or_else(|| AppError::Config(format!("unknown setting '{key}'")))?;
        spec.validate(raw)
            .map_err(|reason| AppError::Config(format!("{key}: {reason}")))?;

        let raw = raw.trim();
        match key {
            "workspaceDir" => self.workspace_dir = optional_path(raw),
            "assetDir" => self.asset_dir = optional_path(raw),
            "logDir" => self.log_dir = optional_path(raw),
            "autoSave" => self.auto_save = parse_bool(raw)?,
            "autoSaveIntervalSeconds" => self.auto_save_interval_seconds = parse_seconds(raw)?,
            "pageResizeIntervalSeconds" => self.page_resize_interval_seconds = parse_seconds(raw)?,
            "imageResizeIntervalSeconds" => {
                self.image_resize_interval_seconds = parse_seconds(raw)?
            }
            "tabTextMaxLength" => self.tab_text_max_length = parse_integer(raw)? as usize,
            "codeTabStop" => self.code_tab_stop = parse_integer(raw)?,
            "codeFont" => self.code_font = raw.to_string(),
            "gitEnabled" => self.git_enabled = parse_bool(raw)?,
            "gitCommitFrequency" => self.git_commit_frequency = parse_integer(raw)?,
            other => return Err(AppError::Internal(format!("setting '{other}' has no field"))),
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        for (key, value) in [
            ("autoSaveIntervalSeconds", self.auto_save_interval_seconds),
            ("pageResizeIntervalSeconds", self.page_resize_interval_seconds),
            ("imageResizeIntervalSeconds", self.image_resize_interval_seconds),
        ] {
            validate_seconds(&value.to_string())
                .map_err(|reason| AppError::Config(format!("{key}: {reason}")))?;
        }
        if self.tab_text_max_length == 0 {
            return Err(AppError::Config("tabTextMaxLength: must be at least 1".to_string()));
        }
        if self.git_commit_frequency == 0 {
            return Err(AppError::Config("gitCommitFrequency: must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn require_workspace_dir(&self) -> AppResult<PathBuf> {
        let Some(dir) = self.workspace_dir.clone() else {
            return Err(AppError::WorkspaceNotFound(
                "no workspace directory configured (set workspaceDir or FREENOTE_WORKSPACE_DIR)"
                    .to_string(),
            ));
        };
        if !dir.is_dir() {
            return Err(AppError::WorkspaceNotFound(format!(
                "workspace directory does not exist: {}",
                dir.to_string_lossy()
            )));
        }
        Ok(dir)
    }

    pub fn resolved_asset_dir(&self, workspace_dir: &Path) -> PathBuf {
        self.asset_dir
            .clone()
            .unwrap_or_else(|| workspace_dir.to_path_buf())
    }

    pub fn resolved_log_dir(&self, workspace_dir: &Path) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| workspace_dir.join("logs"))
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs_f64(self.auto_save_interval_seconds)
    }

    pub fn page_resize_interval(&self) -> Duration {
        Duration::from_secs_f64(self.page_resize_interval_seconds)
    }

    pub fn image_resize_interval(&self) -> Duration {
        Duration::from_secs_f64(self.image_resize_interval_seconds)
    }
}

fn optional_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

fn parse_bool(raw: &str) -> AppResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!("expected a boolean, got '{other}'"))),
    }
}

fn parse_seconds(raw: &str) -> AppResult<f64> {
    raw.parse::<f64>()
        .map_err(|error| AppError::Config(format!("expected seconds, got '{raw}': {error}")))
}

fn parse_integer(raw: &str) -> AppResult<u32> {
    raw.parse::<u32>()
        .map_err(|error| AppError::Config(format!("expected an integer, got '{raw}': {error}")))
}

fn validate_any(_raw: &str) -> Result<(), String> {
    Ok(())
}

fn validate_non_empty(raw: &str) -> Result<(), String> {
    if raw.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(())
}

fn validate_bool(raw: &str) -> Result<(), String> {
    parse_bool(raw.trim()).map(|_| ()).map_err(|error| error.to_string())
}

fn validate_seconds(raw: &str) -> Result<(), String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("'{raw}' is not a number: {error}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("'{raw}' must be a non-negative number of seconds"));
    }
    if value > 3_600.0 {
        return Err(format!("'{raw}' exceeds one hour"));
    }
    Ok(())
}

fn validate_positive_integer(raw: &str) -> Result<(), String> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(_) => Ok(()),
        Err(error) => Err(format!("'{raw}' is not a positive integer: {error}")),
    }
}
