//! Compiled-artifact store.
//!
//! Programs are written as `<fingerprint>.json` in the artifact directory.
//! The fingerprint covers the template's name and full text, so an edited
//! template never resolves to the artifact of its previous version. Each
//! artifact also records the fingerprints of the templates it extends;
//! if one of those changed, the artifact is stale and gets rebuilt.
//!
//! Writes go to a temporary file in the same directory which is then
//! renamed over the final path, so concurrent readers only ever see a
//! complete artifact. Two first-time compiles of the same template may
//! both write; the last rename wins.

use crate::codegen::Program;
use crate::error::{Result, TemplateError};
use crate::loader::{TemplateLoader, TemplateSource};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub struct ArtifactStore {
    dir: PathBuf,
    /// Latest program per template name. A recompile replaces the entry,
    /// so edits do not accumulate old versions.
    memory: RwLock<HashMap<String, Arc<Program>>>,
}

impl ArtifactStore {
    /// Open the store, creating `dir` if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| TemplateError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            memory: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, fingerprint: u64) -> PathBuf {
        self.dir.join(format!("{fingerprint:016x}.json"))
    }

    /// Return the program for `source`, compiling it when there is no
    /// usable artifact.
    ///
    /// With `caching_enabled` unset, `compile` always runs and its output
    /// replaces any artifact already on disk.
    pub fn get_or_compile<F>(
        &self,
        source: &TemplateSource,
        loader: &dyn TemplateLoader,
        caching_enabled: bool,
        compile: F,
    ) -> Result<Arc<Program>>
    where
        F: FnOnce(&TemplateSource) -> Result<Program>,
    {
        let key = source.fingerprint();
        if caching_enabled {
            if let Some(program) = self.cached(key, source, loader)? {
                return Ok(program);
            }
        }

        let program = compile(source)?;
        let path = self.persist(&program)?;
        debug!(template = %source.name, path = %path.display(), "persisted compiled artifact");

        let program = Arc::new(program);
        if caching_enabled {
            self.remember(source, &program);
        }
        Ok(program)
    }

    fn cached(
        &self,
        key: u64,
        source: &TemplateSource,
        loader: &dyn TemplateLoader,
    ) -> Result<Option<Arc<Program>>> {
        let in_memory = self
            .memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source.name)
            .cloned();
        if let Some(program) = in_memory {
            if program.fingerprint == key && self.is_fresh(&program, loader)? {
                debug!(template = %source.name, "in-memory cache hit");
                return Ok(Some(program));
            }
            self.evict(&source.name);
        }

        let program = match self.load(key)? {
            Some(program) => program,
            None => return Ok(None),
        };
        if program.name != source.name || !self.is_fresh(&program, loader)? {
            warn!(template = %source.name, key = format_args!("{key:016x}"), "stale compiled artifact, recompiling");
            return Ok(None);
        }

        debug!(template = %source.name, "artifact cache hit");
        let program = Arc::new(program);
        self.remember(source, &program);
        Ok(Some(program))
    }

    fn remember(&self, source: &TemplateSource, program: &Arc<Program>) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.name.clone(), Arc::clone(program));
    }

    fn evict(&self, name: &str) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Read the artifact stored under `fingerprint`.
    ///
    /// A missing file is `None`; so is one that does not deserialize,
    /// which is logged and left to be overwritten by the next compile.
    pub fn load(&self, fingerprint: u64) -> Result<Option<Program>> {
        let path = self.artifact_path(fingerprint);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(TemplateError::Io { path, source }),
        };
        match serde_json::from_slice(&bytes) {
            Ok(program) => Ok(Some(program)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable compiled artifact");
                Ok(None)
            }
        }
    }

    /// Whether every template `program` inherits from is unchanged.
    fn is_fresh(&self, program: &Program, loader: &dyn TemplateLoader) -> Result<bool> {
        for dependency in &program.dependencies {
            match loader.load(&dependency.name) {
                Ok(source) if source.fingerprint() == dependency.fingerprint => {}
                Ok(_) | Err(TemplateError::NotFound { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Atomically write `program` to its artifact path.
    pub fn persist(&self, program: &Program) -> Result<PathBuf> {
        let path = self.artifact_path(program.fingerprint);
        let write = || -> io::Result<()> {
            let json = serde_json::to_vec_pretty(program)?;
            let mut tmp = NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|source| TemplateError::ArtifactWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
