use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};

/// Extension of bundled schema resources: `<name>.schema.toml`.
pub const SCHEMA_EXTENSION: &str = "schema.toml";

/// Extension of backing files: `<name>.sqlite`.
pub const STORE_EXTENSION: &str = "sqlite";

/// Configuration for a [`SchemaCatalog`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory holding the bundled schema resources.
    pub bundle_dir: PathBuf,
    /// Writable directory for backing files. When `None`, the platform's
    /// per-user data directory joined with `app_dir` is used.
    pub data_dir: Option<PathBuf>,
    /// Subdirectory of the platform data directory owned by this
    /// application.
    pub app_dir: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("schemas"),
            data_dir: None,
            app_dir: "keep".into(),
        }
    }
}

/// A named schema resource that was found in the bundle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaDescriptor {
    name: String,
    location: PathBuf,
}

impl SchemaDescriptor {
    /// Describe a schema resource at an explicit location.
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// Path of the backing file for a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreLocation {
    path: PathBuf,
}

impl StoreLocation {
    /// Use an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<name>.sqlite`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.{STORE_EXTENSION}")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves schema names to bundled resources and store locations.
///
/// Descriptors are cached by name. The cache only ever grows and its
/// entries never change, so one catalog can be shared by reference across
/// every store the process opens.
#[derive(Debug)]
pub struct SchemaCatalog {
    config: CatalogConfig,
    cache: RwLock<HashMap<String, SchemaDescriptor>>,
}

impl SchemaCatalog {
    /// Catalog over the resources in `bundle_dir`, storing backing files in
    /// the platform data directory.
    pub fn new(bundle_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(CatalogConfig {
            bundle_dir: bundle_dir.into(),
            ..Default::default()
        })
    }

    pub fn with_config(config: CatalogConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Look up the bundled resource `<name>.schema.toml`.
    pub fn load(&self, name: &str) -> SchemaResult<SchemaDescriptor> {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(hit.clone());
        }

        let path = self
            .config
            .bundle_dir
            .join(format!("{name}.{SCHEMA_EXTENSION}"));
        if !is_resource_name(name) || !path.is_file() {
            return Err(SchemaError::NotFound {
                name: name.to_string(),
                path,
            });
        }

        let descriptor = SchemaDescriptor::new(name, path);
        debug!(schema = name, path = %descriptor.location.display(), "schema resource located");
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| descriptor.clone());
        Ok(descriptor)
    }

    /// Names of every schema resource in the bundle, sorted.
    pub fn available(&self) -> SchemaResult<Vec<String>> {
        let suffix = format!(".{SCHEMA_EXTENSION}");
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.bundle_dir)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(&suffix)) {
                if is_resource_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve `<data dir>/<name>.sqlite`, creating the directory if needed.
    pub fn resolve_store_location(&self, name: &str) -> SchemaResult<StoreLocation> {
        let dir = self.data_dir()?;
        fs::create_dir_all(&dir).map_err(|e| SchemaError::DirectoryUnavailable {
            path: Some(dir.clone()),
            reason: format!("cannot create {}: {e}", dir.display()),
        })?;
        let location = StoreLocation::in_dir(&dir, name);
        debug!(store = name, path = %location.path.display(), "store location resolved");
        Ok(location)
    }

    fn data_dir(&self) -> SchemaResult<PathBuf> {
        match &self.config.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|base| base.join(&self.config.app_dir))
                .ok_or_else(|| SchemaError::DirectoryUnavailable {
                    path: None,
                    reason: "no per-user data directory on this platform".into(),
                }),
        }
    }
}

/// A resource name must be a single plain path component.
fn is_resource_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(
                dir.path().join(format!("{name}.{SCHEMA_EXTENSION}")),
                "[entities.Note.attributes]\ntext = { type = \"string\" }\n",
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn load_finds_bundled_resource() {
        let bundle = bundle_with(&["MyModel"]);
        let catalog = SchemaCatalog::new(bundle.path());
        let desc = catalog.load("MyModel").unwrap();
        assert_eq!(desc.name(), "MyModel");
        assert_eq!(
            desc.location(),
            bundle.path().join("MyModel.schema.toml").as_path()
        );
    }

    #[test]
    fn load_missing_is_not_found() {
        let bundle = bundle_with(&[]);
        let catalog = SchemaCatalog::new(bundle.path());
        let err = catalog.load("Missing").unwrap_err();
        assert!(matches!(err, SchemaError::NotFound { ref name, .. } if name == "Missing"));
    }

    #[test]
    fn load_rejects_path_traversal() {
        let bundle = bundle_with(&["MyModel"]);
        let catalog = SchemaCatalog::new(bundle.path().join("sub"));
        assert!(catalog.load("../MyModel").is_err());
    }

    #[test]
    fn load_is_cached() {
        let bundle = bundle_with(&["MyModel"]);
        let catalog = SchemaCatalog::new(bundle.path());
        let first = catalog.load("MyModel").unwrap();
        fs::remove_file(first.location()).unwrap();
        // The descriptor stays valid for the life of the catalog.
        assert_eq!(catalog.load("MyModel").unwrap(), first);
    }

    #[test]
    fn available_lists_sorted_names() {
        let bundle = bundle_with(&["Zoo", "Alpha"]);
        fs::write(bundle.path().join("notes.txt"), "ignored").unwrap();
        let catalog = SchemaCatalog::new(bundle.path());
        assert_eq!(catalog.available().unwrap(), vec!["Alpha", "Zoo"]);
    }

    #[test]
    fn resolve_store_location_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("nested").join("data");
        let catalog = SchemaCatalog::with_config(CatalogConfig {
            data_dir: Some(data_dir.clone()),
            ..Default::default()
        });
        let location = catalog.resolve_store_location("MyModel").unwrap();
        assert!(data_dir.is_dir());
        assert_eq!(location.path(), data_dir.join("MyModel.sqlite").as_path());
    }

    #[test]
    fn resolve_store_location_is_deterministic() {
        let root = tempfile::tempdir().unwrap();
        let catalog = SchemaCatalog::with_config(CatalogConfig {
            data_dir: Some(root.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(
            catalog.resolve_store_location("A").unwrap(),
            catalog.resolve_store_location("A").unwrap()
        );
    }

    #[test]
    fn resolve_store_location_reports_unwritable_directory() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();
        let catalog = SchemaCatalog::with_config(CatalogConfig {
            data_dir: Some(blocker.join("data")),
            ..Default::default()
        });
        let err = catalog.resolve_store_location("MyModel").unwrap_err();
        assert!(matches!(err, SchemaError::DirectoryUnavailable { .. }));
    }
}
