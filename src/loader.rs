//! Where template sources come from.

use crate::error::{Result, TemplateError};
use rapidhash::fast::RapidHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A template's name and full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub text: Arc<str>,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Content fingerprint over the name and the text.
    ///
    /// Any edit to the text changes the fingerprint, so it is safe to key
    /// compiled artifacts by it.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = RapidHasher::default();
        hasher.write(self.name.as_bytes());
        hasher.write_u8(0);
        hasher.write(self.text.as_bytes());
        hasher.finish()
    }
}

pub trait TemplateLoader: Send + Sync {
    /// Fails with [`TemplateError::NotFound`] when no template has this name.
    fn load(&self, name: &str) -> Result<TemplateSource>;
}

/// Loads templates from files below a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TemplateError::DirectoryMissing {
                path: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a template below the root; names may not escape it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let is_contained = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !is_contained {
            return Err(TemplateError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        let path = self.resolve(name)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(TemplateSource::new(name, text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TemplateError::NotFound {
                name: name.to_string(),
            }),
            Err(source) => Err(TemplateError::Io { path, source }),
        }
    }
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    templates: HashMap<String, Arc<str>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, text: impl Into<Arc<str>>) {
        self.templates.insert(name.into(), text.into());
    }
}

impl TemplateLoader for InMemoryLoader {
    fn load(&self, name: &str) -> Result<TemplateSource> {
        self.templates
            .get(name)
            .map(|text| TemplateSource::new(name, Arc::clone(text)))
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
            })
    }
}
