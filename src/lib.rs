//! shimmytmpl: a small Jinja-like template compiler with inheritance and an
//! on-disk cache of compiled templates.
//!
//! Templates live in a directory and are referred to by relative name.
//! Rendering a template tokenizes it, parses it into a tree (following
//! `extends` to its parents), flattens the inheritance chain into a
//! serializable instruction [`Program`] and executes that program against a
//! [`Context`]. Compiled programs are written to an artifact directory and
//! reused while neither the template nor any template it extends changes.
//!
//! Supported directives:
//! - `{{ expr }}` output.
//! - `{% if expr %} ... {% else %} ... {% endif %}`.
//! - `{% for x in expr %} ... {% endfor %}`, with `loop.index`,
//!   `loop.index0`, `loop.first`, `loop.last` and `loop.length`.
//! - `{% block name %} ... {% endblock %}`.
//! - `{% extends file %}`: the file's blocks replace the parent's, and
//!   everything outside blocks is ignored.
//!
//! Not supported:
//! - Filters, macros, `include`, `set`, `elif`.
//! - Whitespace control markers (`{%-`, `-%}`).
//! - Autoescaping. Output is emitted as-is.
//!
//! Whitespace-only text between directives is dropped. Any other literal
//! text, newlines included, is emitted exactly as written.
//!
//! ```no_run
//! use shimmytmpl::{Context, Engine};
//!
//! let engine = Engine::new("views", true)?;
//! let mut ctx = Context::new();
//! ctx.insert("name", "World");
//! assert_eq!(engine.render("hello.html", &ctx)?, "Hello World!");
//! # Ok::<(), shimmytmpl::TemplateError>(())
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod expr;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod store;
pub mod vm;

pub use codegen::Program;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Result, TemplateError};
pub use eval::{Context, EvalError, Evaluator, ExpressionEvaluator, Scope, Value};
pub use loader::{FileSystemLoader, InMemoryLoader, TemplateLoader, TemplateSource};
