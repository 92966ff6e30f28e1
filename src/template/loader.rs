//! Template store
//!
//! Loads construct and binding templates from registered directory roots
//! and caches parsed results in concurrent maps. Layout convention under a
//! root, with the package dotted path mapped to directories:
//!
//! ```text
//! <pkg>/<Name>/<Name>.yaml                     construct masonry.aws.Bucket
//! <pkg>/<Name>/bindings/<pkg2>.<Name2>.yaml    binding   Bucket -> pkg2.Name2
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::MasonryError;
use crate::model::ConstructType;
use crate::template::{BindingTemplate, ConstructTemplate};

type BindingKey = (ConstructType, ConstructType);

/// Cache of parsed templates, shared across evaluations.
#[derive(Debug, Default)]
pub struct TemplateStore {
    roots: Vec<PathBuf>,
    constructs: DashMap<ConstructType, Arc<ConstructTemplate>>,
    bindings: DashMap<BindingKey, Arc<BindingTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory root searched by `get_construct` / `get_binding`.
    pub fn add_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.roots.push(root.into());
        self
    }

    /// Parses and caches a construct template from YAML text, returning its id.
    pub fn register_construct_yaml(&self, yaml: &str) -> Result<ConstructType, MasonryError> {
        let template: ConstructTemplate = serde_yaml::from_str(yaml)?;
        let id = template.id.clone();
        self.constructs.insert(id.clone(), Arc::new(template));
        Ok(id)
    }

    /// Parses and caches a binding template from YAML text. The text must
    /// carry its own `from` and `to`.
    pub fn register_binding_yaml(&self, yaml: &str) -> Result<BindingKey, MasonryError> {
        let template = BindingTemplate::parse(yaml, None, None)?;
        let key = (template.from.clone(), template.to.clone());
        self.bindings.insert(key.clone(), Arc::new(template));
        Ok(key)
    }

    /// Returns the construct template for `id`, loading it from disk on a
    /// cache miss.
    pub fn get_construct(&self, id: &ConstructType) -> Result<Arc<ConstructTemplate>, MasonryError> {
        if let Some(hit) = self.constructs.get(id) {
            return Ok(hit.clone());
        }
        for root in &self.roots {
            let path = self.construct_path(root, id);
            if path.is_file() {
                let yaml = fs::read_to_string(&path)?;
                let template: ConstructTemplate = serde_yaml::from_str(&yaml)?;
                if template.id != *id {
                    warn!(
                        path = %path.display(),
                        declared = %template.id,
                        requested = %id,
                        "construct template id does not match its path",
                    );
                }
                let arc = Arc::new(template);
                self.constructs.insert(id.clone(), arc.clone());
                return Ok(arc);
            }
        }
        Err(MasonryError::TemplateNotFound(id.to_string()))
    }

    /// Returns the binding template for the pair, or None when no binding
    /// is defined. A file that exists but fails to parse is an error.
    pub fn get_binding(
        &self,
        from: &ConstructType,
        to: &ConstructType,
    ) -> Result<Option<Arc<BindingTemplate>>, MasonryError> {
        let key = (from.clone(), to.clone());
        if let Some(hit) = self.bindings.get(&key) {
            return Ok(Some(hit.clone()));
        }
        for root in &self.roots {
            let path = self.binding_path(root, from, to);
            if path.is_file() {
                let yaml = fs::read_to_string(&path)?;
                let template = BindingTemplate::parse(&yaml, Some(from), Some(to))?;
                let arc = Arc::new(template);
                self.bindings.insert(key, arc.clone());
                return Ok(Some(arc));
            }
        }
        debug!(%from, %to, "no binding template");
        Ok(None)
    }

    /// Walks every root and caches all templates found. Returns the number
    /// of templates loaded.
    pub fn preload(&self) -> Result<usize, MasonryError> {
        let mut loaded = 0;
        for root in &self.roots {
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    MasonryError::Io(e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "walkdir loop")
                    }))
                })?;
                let path = entry.path();
                if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                    continue;
                }
                let yaml = fs::read_to_string(path)?;
                if Self::is_binding_path(path) {
                    let (from, to) = Self::binding_identity(root, path)?;
                    let template = BindingTemplate::parse(&yaml, Some(&from), Some(&to))?;
                    self.bindings
                        .insert((template.from.clone(), template.to.clone()), Arc::new(template));
                } else {
                    let template: ConstructTemplate = serde_yaml::from_str(&yaml)?;
                    self.constructs
                        .insert(template.id.clone(), Arc::new(template));
                }
                loaded += 1;
            }
        }
        debug!(loaded, "preloaded templates");
        Ok(loaded)
    }

    fn construct_path(&self, root: &Path, id: &ConstructType) -> PathBuf {
        let mut path = root.to_path_buf();
        for part in id.package.split('.') {
            path.push(part);
        }
        path.push(&id.name);
        path.push(format!("{}.yaml", id.name));
        path
    }

    fn binding_path(&self, root: &Path, from: &ConstructType, to: &ConstructType) -> PathBuf {
        let mut path = root.to_path_buf();
        for part in from.package.split('.') {
            path.push(part);
        }
        path.push(&from.name);
        path.push("bindings");
        path.push(format!("{to}.yaml"));
        path
    }

    fn is_binding_path(path: &Path) -> bool {
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            == Some("bindings")
    }

    /// Recovers (from, to) for a binding file from its path relative to
    /// `root`: `<pkg dirs>/<Name>/bindings/<to>.yaml`.
    fn binding_identity(
        root: &Path,
        path: &Path,
    ) -> Result<(ConstructType, ConstructType), MasonryError> {
        let bad = || MasonryError::InvalidPath {
            path: path.display().to_string(),
            reason: "binding file must live at <package>/<Name>/bindings/<to>.yaml".to_string(),
        };

        let rel = path.strip_prefix(root).map_err(|_| bad())?;
        let stem = rel.file_stem().and_then(|s| s.to_str()).ok_or_else(bad)?;
        let to: ConstructType = stem.parse()?;

        let mut parts: Vec<&str> = rel
            .parent()
            .map(|p| p.iter().filter_map(|c| c.to_str()).collect())
            .unwrap_or_default();
        // Drop the trailing "bindings" component.
        if parts.pop() != Some("bindings") {
            return Err(bad());
        }
        let name = parts.pop().ok_or_else(bad)?;
        if parts.is_empty() {
            return Err(bad());
        }
        let from = ConstructType::new(parts.join("."), name);
        Ok((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BUCKET: &str = r#"
id: masonry.aws.Bucket
resources:
  bucket:
    type: aws:s3_bucket
"#;

    const BINDING: &str = r#"
from: masonry.aws.Function
to: masonry.aws.Bucket
priority: 2
"#;

    #[test]
    fn register_and_get_construct() {
        let store = TemplateStore::new();
        let id = store.register_construct_yaml(BUCKET).unwrap();
        assert_eq!(id.to_string(), "masonry.aws.Bucket");
        let template = store.get_construct(&id).unwrap();
        assert_eq!(template.resources.len(), 1);
    }

    #[test]
    fn missing_construct_is_an_error() {
        let store = TemplateStore::new();
        let id: ConstructType = "masonry.aws.Missing".parse().unwrap();
        assert!(matches!(
            store.get_construct(&id),
            Err(MasonryError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn missing_binding_is_none() {
        let store = TemplateStore::new();
        let from: ConstructType = "masonry.aws.Function".parse().unwrap();
        let to: ConstructType = "masonry.aws.Bucket".parse().unwrap();
        assert!(store.get_binding(&from, &to).unwrap().is_none());
    }

    #[test]
    fn register_and_get_binding() {
        let store = TemplateStore::new();
        let (from, to) = store.register_binding_yaml(BINDING).unwrap();
        let b = store.get_binding(&from, &to).unwrap().unwrap();
        assert_eq!(b.priority, 2);
    }

    #[test]
    fn preload_discovers_constructs_and_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let bucket_dir = root.join("masonry/aws/Bucket");
        fs::create_dir_all(bucket_dir.join("bindings")).unwrap();
        fs::write(bucket_dir.join("Bucket.yaml"), BUCKET).unwrap();
        fs::write(
            bucket_dir.join("bindings/masonry.aws.Function.yaml"),
            "priority: 7",
        )
        .unwrap();

        let mut store = TemplateStore::new();
        store.add_root(root);
        assert_eq!(store.preload().unwrap(), 2);

        let from: ConstructType = "masonry.aws.Bucket".parse().unwrap();
        let to: ConstructType = "masonry.aws.Function".parse().unwrap();
        let b = store.get_binding(&from, &to).unwrap().unwrap();
        assert_eq!(b.priority, 7);
        assert_eq!(b.from, from);
    }

    #[test]
    fn get_construct_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let bucket_dir = dir.path().join("masonry/aws/Bucket");
        fs::create_dir_all(&bucket_dir).unwrap();
        fs::write(bucket_dir.join("Bucket.yaml"), BUCKET).unwrap();

        let mut store = TemplateStore::new();
        store.add_root(dir.path());
        let id: ConstructType = "masonry.aws.Bucket".parse().unwrap();
        let template = store.get_construct(&id).unwrap();
        assert_eq!(template.id, id);
    }
}
