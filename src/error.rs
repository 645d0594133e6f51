//! Error types for compiling and rendering templates.

use crate::eval::EvalError;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

/// All template errors
#[derive(Error, Debug, Diagnostic)]
pub enum TemplateError {
    #[error("template directory `{}` does not exist", .path.display())]
    #[diagnostic(code(template::directory_missing))]
    DirectoryMissing { path: PathBuf },

    #[error("template `{name}` not found")]
    #[diagnostic(code(template::not_found))]
    NotFound { name: String },

    #[error("invalid template name `{name}`")]
    #[diagnostic(
        code(template::invalid_name),
        help("Template names are relative paths inside the template directory")
    )]
    InvalidName { name: String },

    #[error("unterminated `{keyword}` in template `{template}`")]
    #[diagnostic(
        code(template::syntax::unterminated),
        help("Add `{{% {expected} %}}` to close this {keyword}")
    )]
    UnterminatedBlock {
        template: String,
        keyword: String,
        expected: String,
    },

    #[error("template inheritance cycle: {}", .chain.join(" -> "))]
    #[diagnostic(code(template::extends_cycle))]
    ExtendsCycle { chain: Vec<String> },

    #[error("malformed directive `{directive}` in template `{template}`: {reason}")]
    #[diagnostic(code(template::syntax::malformed))]
    MalformedDirective {
        template: String,
        directive: String,
        reason: String,
    },

    #[error("I/O error on `{}`", .path.display())]
    #[diagnostic(code(template::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write compiled artifact `{}`", .path.display())]
    #[diagnostic(code(template::artifact_write))]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error rendering template `{template}`")]
    #[diagnostic(code(template::eval))]
    Eval {
        template: String,
        #[source]
        source: EvalError,
    },
}

impl TemplateError {
    pub(crate) fn malformed(template: &str, directive: &str, reason: impl Into<String>) -> Self {
        TemplateError::MalformedDirective {
            template: template.to_string(),
            directive: directive.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_template() {
        let err = TemplateError::UnterminatedBlock {
            template: "page.html".into(),
            keyword: "if".into(),
            expected: "endif".into(),
        };
        assert_eq!(err.to_string(), "unterminated `if` in template `page.html`");

        let err = TemplateError::ExtendsCycle {
            chain: vec!["a.html".into(), "b.html".into(), "a.html".into()],
        };
        assert_eq!(err.to_string(), "template inheritance cycle: a.html -> b.html -> a.html");
    }

    #[test]
    fn diagnostic_codes() {
        let err = TemplateError::NotFound { name: "x".into() };
        assert_eq!(err.code().map(|c| c.to_string()).as_deref(), Some("template::not_found"));
    }
}
