use crate::ast::*;
use crate::error::{Result, TemplateError};
use crate::lexer::{tokenize, Token};
use crate::loader::{TemplateLoader, TemplateSource};
use tracing::trace;

/// Token sequence plus a read position that only ever moves forward.
pub struct Cursor<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    /// Consume and return the current token.
    pub fn advance(&mut self) -> Option<Token<'a>> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

/// Parse a token sequence into a template tree; `extends` targets are
/// loaded through `loader`.
pub fn parse(
    source: &TemplateSource,
    tokens: Vec<Token<'_>>,
    loader: &dyn TemplateLoader,
) -> Result<TemplateRoot> {
    let mut parser = Parser::new(loader);
    parser.enter(&source.name)?;
    let root = parser.parse_tokens(source, tokens);
    parser.leave();
    root
}

/// State of the file currently being parsed.
struct File<'a> {
    name: &'a str,
    cursor: Cursor<'a>,
    parent: Option<Box<TemplateRoot>>,
}

pub struct Parser<'l> {
    loader: &'l dyn TemplateLoader,
    /// Templates whose parse is in progress, outermost first.
    chain: Vec<String>,
}

impl<'l> Parser<'l> {
    pub fn new(loader: &'l dyn TemplateLoader) -> Self {
        Self {
            loader,
            chain: Vec::new(),
        }
    }

    pub fn parse_template(&mut self, name: &str) -> Result<TemplateRoot> {
        let source = self.loader.load(name)?;
        self.parse_source(&source)
    }

    pub fn parse_source(&mut self, source: &TemplateSource) -> Result<TemplateRoot> {
        self.enter(&source.name)?;
        let root = self.parse_tokens(source, tokenize(&source.text));
        self.leave();
        root
    }

    fn enter(&mut self, name: &str) -> Result<()> {
        if self.chain.iter().any(|n| n == name) {
            let mut chain = self.chain.clone();
            chain.push(name.to_string());
            return Err(TemplateError::ExtendsCycle { chain });
        }
        self.chain.push(name.to_string());
        Ok(())
    }

    fn leave(&mut self) {
        self.chain.pop();
    }

    fn parse_tokens(&mut self, source: &TemplateSource, tokens: Vec<Token<'_>>) -> Result<TemplateRoot> {
        let mut file = File {
            name: &source.name,
            cursor: Cursor::new(tokens),
            parent: None,
        };

        let (nodes, _) = self.parse_until(&mut file, &[])?;
        debug_assert!(file.cursor.is_exhausted());

        let mut root = TemplateRoot::new(source.name.as_str(), source.fingerprint());
        root.nodes = nodes;
        root.parent = file.parent;
        Ok(root)
    }

    /// Parse nodes until one of `stops` closes the current scope.
    ///
    /// Returns the nodes and the stop keyword that ended them, or `None`
    /// when the input ran out first.
    fn parse_until(
        &mut self,
        file: &mut File<'_>,
        stops: &[&'static str],
    ) -> Result<(Vec<Node>, Option<&'static str>)> {
        let mut nodes = Vec::new();

        while let Some(token) = file.cursor.advance() {
            let body = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text.to_string()));
                    continue;
                }
                Token::Output(_) => {
                    let expr = token.body();
                    if expr.is_empty() {
                        return Err(TemplateError::malformed(file.name, token.raw(), "empty output expression"));
                    }
                    nodes.push(Node::Output(expr.to_string()));
                    continue;
                }
                Token::Statement(_) => token.body(),
            };

            let (keyword, rest) = match body.split_once(char::is_whitespace) {
                Some((keyword, rest)) => (keyword, rest.trim()),
                None => (body, ""),
            };

            if let Some(&stop) = stops.iter().find(|s| **s == keyword) {
                trace!(template = file.name, stop, "closing scope");
                return Ok((nodes, Some(stop)));
            }

            match keyword {
                "extends" => self.parse_extends(file, token, rest)?,
                "block" => nodes.push(self.parse_block(file, token, rest)?),
                "if" => nodes.push(self.parse_if(file, token, rest)?),
                "for" => nodes.push(self.parse_for(file, token, rest)?),
                _ => nodes.push(Node::Text(token.raw().to_string())),
            }
        }

        Ok((nodes, None))
    }

    /// Like `parse_until`, but running out of input is an error.
    fn parse_scope(
        &mut self,
        file: &mut File<'_>,
        keyword: &str,
        stops: &[&'static str],
    ) -> Result<(Vec<Node>, &'static str)> {
        match self.parse_until(file, stops)? {
            (nodes, Some(stop)) => Ok((nodes, stop)),
            (_, None) => Err(TemplateError::UnterminatedBlock {
                template: file.name.to_string(),
                keyword: keyword.to_string(),
                expected: stops.last().copied().unwrap_or_default().to_string(),
            }),
        }
    }

    fn parse_extends(&mut self, file: &mut File<'_>, token: Token<'_>, rest: &str) -> Result<()> {
        let name = unquote(rest);
        if name.is_empty() {
            return Err(TemplateError::malformed(file.name, token.raw(), "missing parent template name"));
        }
        if let Some(parent) = &file.parent {
            return Err(TemplateError::malformed(
                file.name,
                token.raw(),
                format!("template already extends `{}`", parent.name),
            ));
        }

        trace!(template = file.name, parent = name, "resolving parent template");
        let parent = self.parse_template(name)?;
        file.parent = Some(Box::new(parent));
        Ok(())
    }

    fn parse_block(&mut self, file: &mut File<'_>, token: Token<'_>, rest: &str) -> Result<Node> {
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            return Err(TemplateError::malformed(file.name, token.raw(), "expected a single block name"));
        }
        let (body, _) = self.parse_scope(file, "block", &["endblock"])?;
        Ok(Node::Block {
            name: rest.to_string(),
            body,
        })
    }

    fn parse_if(&mut self, file: &mut File<'_>, token: Token<'_>, rest: &str) -> Result<Node> {
        if rest.is_empty() {
            return Err(TemplateError::malformed(file.name, token.raw(), "missing condition"));
        }
        let (then_branch, stop) = self.parse_scope(file, "if", &["else", "endif"])?;
        let else_branch = if stop == "else" {
            Some(self.parse_scope(file, "if", &["endif"])?.0)
        } else {
            None
        };
        Ok(Node::If {
            condition: rest.to_string(),
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self, file: &mut File<'_>, token: Token<'_>, rest: &str) -> Result<Node> {
        let (binding, collection) = split_loop_header(rest).ok_or_else(|| {
            TemplateError::malformed(file.name, token.raw(), "expected `for <name> in <expression>`")
        })?;
        let (body, _) = self.parse_scope(file, "for", &["endfor"])?;
        Ok(Node::For {
            binding: binding.to_string(),
            collection: collection.to_string(),
            body,
        })
    }
}

/// `item in items` -> `("item", "items")`.
fn split_loop_header(header: &str) -> Option<(&str, &str)> {
    let (binding, rest) = header.split_once(char::is_whitespace)?;
    let collection = rest.trim_start().strip_prefix("in")?;
    if !collection.starts_with(char::is_whitespace) {
        return None;
    }
    let collection = collection.trim();
    if !is_identifier(binding) || collection.is_empty() {
        return None;
    }
    Some((binding, collection))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}
