use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    StringLit(String),
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    Var(String),
    Attribute(Box<Expr>, String), // foo.bar
    Index(Box<Expr>, Box<Expr>),  // foo['bar']
    Unary(UnaryOp, Box<Expr>),
    BinOp(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output(String),
    If {
        condition: String,
        then_branch: Vec<Node>,
        else_branch: Option<Vec<Node>>,
    },
    For {
        binding: String,    // e.g., "item"
        collection: String, // e.g., "items"
        body: Vec<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
}

/// One parsed template file.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRoot {
    pub name: String,
    /// Fingerprint of the source this tree was parsed from.
    pub fingerprint: u64,
    pub nodes: Vec<Node>,
    /// Set by `{% extends %}`.
    pub parent: Option<Box<TemplateRoot>>,
}

impl TemplateRoot {
    pub fn new(name: impl Into<String>, fingerprint: u64) -> Self {
        Self {
            name: name.into(),
            fingerprint,
            nodes: Vec::new(),
            parent: None,
        }
    }

    /// Direct `Block` children by name; a later block with the same name wins.
    pub fn blocks(&self) -> HashMap<&str, &[Node]> {
        let mut blocks = HashMap::new();
        for node in &self.nodes {
            if let Node::Block { name, body } = node {
                blocks.insert(name.as_str(), body.as_slice());
            }
        }
        blocks
    }

    /// This template followed by its parent, grandparent and so on.
    pub fn chain(&self) -> impl Iterator<Item = &TemplateRoot> {
        std::iter::successors(Some(self), |root| root.parent.as_deref())
    }
}
