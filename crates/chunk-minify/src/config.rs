//! Configuration file discovery and parsing
//!
//! Plugin options can live in `.config/minify.yaml`. The project root is the
//! parent of `.config/`, and relative paths in the file are resolved against it.

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result, eyre};
use std::env;
use std::fs;

use crate::options::PluginOptions;

const CONFIG_DIR: &str = ".config";
const CONFIG_FILE_YAML: &str = "minify.yaml";

impl PluginOptions {
    /// Parse options from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        facet_yaml::from_str(yaml).map_err(|e| eyre!("Failed to parse minify options: {}", e))
    }

    /// Load options from a YAML file. Relative paths stay as written.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read {}: {}", path, e))?;
        facet_yaml::from_str(&content).map_err(|e| eyre!("Failed to parse {}: {}", path, e))
    }

    /// Look for `.config/minify.yaml` walking up from the current directory
    pub fn discover() -> Result<Option<Self>> {
        let cwd = env::current_dir()?;
        let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| {
            eyre!(
                "Current directory is not valid UTF-8: {}",
                e.as_path().display()
            )
        })?;

        let mut current = cwd.as_path();
        loop {
            if let Some(options) = Self::discover_from(current)? {
                return Ok(Some(options));
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Load `.config/minify.yaml` under a specific project path, if present
    pub fn discover_from(project_path: &Utf8Path) -> Result<Option<Self>> {
        let yaml_file = project_path.join(CONFIG_DIR).join(CONFIG_FILE_YAML);
        if !yaml_file.exists() {
            return Ok(None);
        }

        let mut options = Self::load(&yaml_file)?;
        options.worker_path = options
            .worker_path
            .map(|p| resolve(project_path, &p));
        options.name_cache_file = options
            .name_cache_file
            .map(|p| resolve(project_path, &p));
        Ok(Some(options))
    }
}

fn resolve(root: &Utf8Path, path: &str) -> String {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_string()
    } else {
        root.join(path).to_string()
    }
}
