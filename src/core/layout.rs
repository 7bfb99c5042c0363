use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::Error;

pub const CATALOG_SUFFIX: &str = ".Catalog";
pub const DATA_SUFFIX: &str = ".Data";
const VERSION_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    EmptyComponent { field: &'static str },
    InvalidComponent { field: &'static str, value: String },
    VersionsExhausted { name: String },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::EmptyComponent { field } => {
                write!(f, "empty path component: {field}")
            }
            LayoutError::InvalidComponent { field, value } => {
                write!(f, "invalid path component for {field}: {value}")
            }
            LayoutError::VersionsExhausted { name } => {
                write!(f, "no free version directory left for store {name}")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

impl From<LayoutError> for Error {
    fn from(value: LayoutError) -> Self {
        Error::InvalidArgument(value.to_string())
    }
}

/// File locations of one concrete store version.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    dir: PathBuf,
    name: String,
    extension: String,
}

impl StoreLayout {
    pub fn new(
        dir: impl Into<PathBuf>,
        name: &str,
        extension: &str,
    ) -> Result<Self, LayoutError> {
        validate_component("store name", name)?;
        Ok(Self {
            dir: dir.into(),
            name: name.to_string(),
            extension: extension.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}", catalog_file_name(&self.name), self.extension))
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}", data_file_name(&self.name), self.extension))
    }
}

pub fn catalog_file_name(name: &str) -> String {
    format!("{name}{CATALOG_SUFFIX}")
}

pub fn data_file_name(name: &str) -> String {
    format!("{name}{DATA_SUFFIX}")
}

/// Directory a new store is written into: the next `{name}.NNNN` version
/// under `base`, or `base` itself.
pub fn create_store_dir(
    name: &str,
    base: impl AsRef<Path>,
    create_subdirectory: bool,
) -> crate::core::Result<PathBuf> {
    validate_component("store name", name)?;
    let base = base.as_ref();
    std::fs::create_dir_all(base)?;
    if !create_subdirectory {
        return Ok(base.to_path_buf());
    }

    let next = match list_versions(name, base)?.into_iter().max() {
        Some(latest) => latest
            .checked_add(1)
            .filter(|v| *v < 10u32.pow(VERSION_WIDTH as u32))
            .ok_or_else(|| LayoutError::VersionsExhausted {
                name: name.to_string(),
            })?,
        None => 0,
    };
    let dir = base.join(version_dir_name(name, next));
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

/// Highest-numbered `{name}.NNNN` directory under `base`, or `base` if the
/// store was written without a version subdirectory.
pub fn resolve_latest_version(name: &str, base: impl AsRef<Path>) -> crate::core::Result<PathBuf> {
    validate_component("store name", name)?;
    let base = base.as_ref();
    match list_versions(name, base)?.into_iter().max() {
        Some(latest) => Ok(base.join(version_dir_name(name, latest))),
        None => Ok(base.to_path_buf()),
    }
}

fn version_dir_name(name: &str, version: u32) -> String {
    format!("{name}.{:0width$}", version, width = VERSION_WIDTH)
}

fn list_versions(name: &str, base: &Path) -> crate::core::Result<Vec<u32>> {
    let prefix = format!("{name}.");
    let mut versions = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(suffix) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        if suffix.len() == VERSION_WIDTH && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(version) = suffix.parse::<u32>() {
                versions.push(version);
            }
        }
    }
    Ok(versions)
}

fn validate_component(field: &'static str, value: &str) -> Result<(), LayoutError> {
    if value.trim().is_empty() {
        return Err(LayoutError::EmptyComponent { field });
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(LayoutError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    if value.contains('\0') {
        return Err(LayoutError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
