use crate::errors::{AppError, AppResult};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const ASSET_EXTENSION: &str = "fna";
const FILE_URL_PREFIX: &str = "file:";

/// Image side-files, one per image item, named `<asset_name>.fna`.
///
/// Content is immutable once a name is assigned: `save` never overwrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(asset_name: &str) -> String {
        format!("{asset_name}.{ASSET_EXTENSION}")
    }

    pub fn resolve(&self, asset_name: &str) -> PathBuf {
        self.dir.join(Self::file_name(asset_name))
    }

    pub fn exists(&self, asset_name: &str) -> bool {
        self.resolve(asset_name).is_file()
    }

    /// Writes the asset unless it already exists. Returns whether bytes were written.
    pub fn save(&self, asset_name: &str, bytes: &[u8]) -> AppResult<bool> {
        validate_asset_name(asset_name)?;
        fs::create_dir_all(&self.dir).map_err(|error| AppError::Persistence(error.to_string()))?;

        let path = self.resolve(asset_name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(error) => {
                return Err(AppError::Persistence(format!(
                    "failed to create asset {}: {}",
                    path.to_string_lossy(),
                    error
                )))
            }
        };
        if let Err(error) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(AppError::Persistence(format!(
                "failed to write asset {}: {}",
                path.to_string_lossy(),
                error
            )));
        }
        tracing::debug!(asset = asset_name, bytes = bytes.len(), "asset written");
        Ok(true)
    }

    /// Removes the asset file. A missing file is not an error.
    pub fn delete(&self, asset_name: &str) -> AppResult<bool> {
        validate_asset_name(asset_name)?;
        let path = self.resolve(asset_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(asset = asset_name, "asset deleted");
                Ok(true)
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(AppError::Io(format!(
                "failed to delete asset {}: {}",
                path.to_string_lossy(),
                error
            ))),
        }
    }

    pub fn load(&self, asset_name: &str) -> AppResult<Vec<u8>> {
        validate_asset_name(asset_name)?;
        let path = self.resolve(asset_name);
        fs::read(&path).map_err(|error| {
            AppError::AssetLoad(format!("{}: {}", path.to_string_lossy(), error))
        })
    }

    /// Portable reference written into notebook files. Never absolute.
    pub fn relative_url(asset_name: &str) -> String {
        format!("{FILE_URL_PREFIX}{}", Self::file_name(asset_name))
    }

    /// Relative references resolve against the asset directory; absolute
    /// `file:///` URLs are honoured so imported notebooks still open.
    pub fn resolve_url(&self, url: &str) -> AppResult<PathBuf> {
        let raw = url.trim();
        if let Some(absolute) = raw.strip_prefix("file://") {
            if !absolute.starts_with('/') {
                return Err(AppError::AssetLoad(format!(
                    "file url with a host is not supported: {raw}"
                )));
            }
            return Ok(PathBuf::from(absolute));
        }
        let relative = raw.strip_prefix(FILE_URL_PREFIX).unwrap_or(raw);
        if relative.is_empty() || relative.contains("://") {
            return Err(AppError::AssetLoad(format!("unsupported asset url: {raw}")));
        }
        let relative_path = Path::new(relative);
        if relative_path.is_absolute() {
            return Ok(relative_path.to_path_buf());
        }
        if relative_path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            return Err(AppError::AssetLoad(format!(
                "asset url escapes the asset directory: {raw}"
            )));
        }
        Ok(self.dir.join(relative_path))
    }
}

fn validate_asset_name(asset_name: &str) -> AppResult<()> {
    let valid = !asset_name.is_empty()
        && asset_name != "."
        && asset_name != ".."
        && !asset_name.contains(['/', '\\']);
    if !valid {
        return Err(AppError::AssetLoad(format!("invalid asset name '{asset_name}'")));
    }
    Ok(())
}
