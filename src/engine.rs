//! The template engine: resolves a name, compiles it (or reuses the cached
//! program) and executes it against a context.

use crate::codegen::{generate, Program};
use crate::config::EngineConfig;
use crate::error::{Result, TemplateError};
use crate::eval::{Context, Evaluator, ExpressionEvaluator};
use crate::lexer::tokenize;
use crate::loader::{FileSystemLoader, TemplateLoader, TemplateSource};
use crate::parser::parse;
use crate::store::ArtifactStore;
use crate::vm;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct Engine {
    loader: Box<dyn TemplateLoader>,
    store: ArtifactStore,
    cache_enabled: bool,
    evaluator: Arc<dyn ExpressionEvaluator>,
    compilations: AtomicUsize,
}

impl Engine {
    /// Engine over the templates in `template_dir`, with artifacts in
    /// `<template_dir>/compiled`.
    ///
    /// Fails with [`TemplateError::DirectoryMissing`] if `template_dir` is
    /// not a directory.
    pub fn new(template_dir: impl Into<PathBuf>, cache_enabled: bool) -> Result<Self> {
        Self::from_config(&EngineConfig::new(template_dir).with_cache(cache_enabled))
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let loader = FileSystemLoader::new(&config.template_dir)?;
        Self::with_loader(loader, config.resolved_artifact_dir(), config.cache_enabled)
    }

    /// Engine reading templates through a custom loader.
    pub fn with_loader(
        loader: impl TemplateLoader + 'static,
        artifact_dir: impl Into<PathBuf>,
        cache_enabled: bool,
    ) -> Result<Self> {
        let store = ArtifactStore::open(artifact_dir)?;
        debug!(artifacts = %store.dir().display(), cache_enabled, "template engine ready");
        Ok(Self {
            loader: Box::new(loader),
            store,
            cache_enabled,
            evaluator: Arc::new(Evaluator),
            compilations: AtomicUsize::new(0),
        })
    }

    /// Replace the expression evaluator used by [`Engine::render`].
    pub fn with_evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn artifact_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Number of compiles this engine has run. Cache hits do not count.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Render template `name` with `context`.
    ///
    /// Either the whole output is returned or an error; nothing is
    /// rendered partially.
    pub fn render(&self, name: &str, context: &Context) -> Result<String> {
        let source = self.loader.load(name)?;
        let program = self.store.get_or_compile(
            &source,
            self.loader.as_ref(),
            self.cache_enabled,
            |source| self.compile_source(source),
        )?;
        vm::execute(&program, context, self.evaluator.as_ref()).map_err(|source| {
            TemplateError::Eval {
                template: name.to_string(),
                source,
            }
        })
    }

    /// Compile template `name` without touching the artifact store.
    pub fn compile(&self, name: &str) -> Result<Program> {
        let source = self.loader.load(name)?;
        self.compile_source(&source)
    }

    fn compile_source(&self, source: &TemplateSource) -> Result<Program> {
        let root = parse(source, tokenize(&source.text), self.loader.as_ref())?;
        let program = generate(&root);
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(
            template = %source.name,
            instructions = program.instructions.len(),
            parents = program.dependencies.len(),
            "compiled template"
        );
        Ok(program)
    }
}
