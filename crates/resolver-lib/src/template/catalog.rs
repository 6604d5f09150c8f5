//! Template catalogs
//!
//! The resolver only reads templates; catalogs are loaded once and then
//! shared without locking.

use super::WorkloadTemplate;
use crate::error::CatalogError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source of parsed workload templates
pub trait TemplateCatalog: Send + Sync {
    fn get(&self, name: &str) -> Result<WorkloadTemplate, CatalogError>;

    /// Template names, sorted
    fn names(&self) -> Vec<String>;
}

/// Catalog backed by a map, used for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    templates: BTreeMap<String, WorkloadTemplate>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = WorkloadTemplate>) -> Self {
        let mut catalog = Self::new();
        for template in templates {
            catalog.insert(template);
        }
        catalog
    }

    pub fn insert(&mut self, template: WorkloadTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateCatalog for InMemoryCatalog {
    fn get(&self, name: &str) -> Result<WorkloadTemplate, CatalogError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }
}

/// Catalog loaded from `*.yml`, `*.yaml` and `*.json` files in a directory
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
    inner: InMemoryCatalog,
}

impl DirectoryCatalog {
    /// Load every template file in `root` (non-recursive)
    pub fn load(root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let root = root.as_ref().to_path_buf();
        let mut inner = InMemoryCatalog::new();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let Some(format) = TemplateFormat::from_path(&path) else {
                debug!(path = %path.display(), "Skipping non-template file");
                continue;
            };

            let mut template = parse_template_file(&path, format)?;
            if template.name.is_empty() {
                template.name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }
            debug!(template = %template.name, path = %path.display(), "Loaded template");
            inner.insert(template);
        }

        info!(
            root = %root.display(),
            templates = inner.len(),
            "Template catalog loaded"
        );

        Ok(Self { root, inner })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateCatalog for DirectoryCatalog {
    fn get(&self, name: &str) -> Result<WorkloadTemplate, CatalogError> {
        self.inner.get(name)
    }

    fn names(&self) -> Vec<String> {
        self.inner.names()
    }
}

#[derive(Debug, Clone, Copy)]
enum TemplateFormat {
    Yaml,
    Json,
}

impl TemplateFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yml" | "yaml" => Some(TemplateFormat::Yaml),
            "json" => Some(TemplateFormat::Json),
            _ => None,
        }
    }
}

fn parse_template_file(path: &Path, format: TemplateFormat) -> Result<WorkloadTemplate, CatalogError> {
    let content = std::fs::read_to_string(path)?;
    let parse_error = |message: String| CatalogError::Parse {
        path: path.display().to_string(),
        message,
    };

    match format {
        TemplateFormat::Yaml => serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        TemplateFormat::Json => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}
