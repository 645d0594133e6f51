//! Turns a parsed template tree into a flat, serializable render program.
//!
//! Inheritance is resolved here: the emitted program is the base template
//! of the `extends` chain with every overridden block replaced by the
//! closest descendant's version.

use crate::ast::{Node, TemplateRoot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    /// Append literal text.
    Text { text: String },
    /// Evaluate and append.
    Emit { expr: String },
    /// Continue if `condition` is truthy, else jump to `otherwise`.
    Branch { condition: String, otherwise: usize },
    Jump { target: usize },
    /// Begin iterating `collection`; jump to `exit` when it is empty.
    LoopStart {
        binding: String,
        collection: String,
        exit: usize,
    },
    /// Next iteration of the loop opened at `start`, or fall through.
    LoopEnd { start: usize },
}

/// A template inherited by the compiled one, with the fingerprint it had
/// at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub fingerprint: u64,
}

/// A compiled render function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub fingerprint: u64,
    /// Parent, grandparent, ...
    pub dependencies: Vec<Dependency>,
    pub instructions: Vec<Instr>,
}

pub fn generate(root: &TemplateRoot) -> Program {
    let chain: Vec<&TemplateRoot> = root.chain().collect();
    let (base, descendants) = match chain.split_last() {
        Some((base, descendants)) => (*base, descendants),
        None => (root, &[][..]),
    };

    // Leaf first, so the closest override wins.
    let mut overrides = HashMap::new();
    for template in descendants {
        for (name, body) in template.blocks() {
            overrides.entry(name).or_insert(body);
        }
    }

    let mut generator = Generator {
        overrides,
        expanding: Vec::new(),
        code: Vec::new(),
    };
    generator.emit_nodes(&base.nodes);

    Program {
        name: root.name.clone(),
        fingerprint: root.fingerprint,
        dependencies: chain[1..]
            .iter()
            .map(|t| Dependency {
                name: t.name.clone(),
                fingerprint: t.fingerprint,
            })
            .collect(),
        instructions: generator.code,
    }
}

struct Generator<'t> {
    overrides: HashMap<&'t str, &'t [Node]>,
    /// Blocks whose bodies are being emitted; they are not substituted again.
    expanding: Vec<&'t str>,
    code: Vec<Instr>,
}

impl<'t> Generator<'t> {
    fn emit_nodes(&mut self, nodes: &'t [Node]) {
        for node in nodes {
            self.emit(node);
        }
    }

    fn emit(&mut self, node: &'t Node) {
        match node {
            Node::Text(text) => self.code.push(Instr::Text { text: text.clone() }),
            Node::Output(expr) => self.code.push(Instr::Emit { expr: expr.clone() }),
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let branch = self.push(Instr::Branch {
                    condition: condition.clone(),
                    otherwise: 0,
                });
                self.emit_nodes(then_branch);
                match else_branch {
                    Some(else_branch) => {
                        let jump = self.push(Instr::Jump { target: 0 });
                        self.patch(branch);
                        self.emit_nodes(else_branch);
                        self.patch(jump);
                    }
                    None => self.patch(branch),
                }
            }
            Node::For {
                binding,
                collection,
                body,
            } => {
                let start = self.push(Instr::LoopStart {
                    binding: binding.clone(),
                    collection: collection.clone(),
                    exit: 0,
                });
                self.emit_nodes(body);
                self.push(Instr::LoopEnd { start });
                self.patch(start);
            }
            Node::Block { name, body } => {
                let name = name.as_str();
                let body = match self.overrides.get(name) {
                    Some(&child) if !self.expanding.contains(&name) => child,
                    _ => body.as_slice(),
                };
                self.expanding.push(name);
                self.emit_nodes(body);
                self.expanding.pop();
            }
        }
    }

    fn push(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    /// Point the jump at `at` to the next instruction to be emitted.
    fn patch(&mut self, at: usize) {
        let here = self.code.len();
        match &mut self.code[at] {
            Instr::Branch { otherwise, .. } => *otherwise = here,
            Instr::Jump { target } => *target = here,
            Instr::LoopStart { exit, .. } => *exit = here,
            other => unreachable!("{other:?} has no jump target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::parser::Parser;

    fn compile(templates: &[(&str, &str)], name: &str) -> Program {
        let mut loader = InMemoryLoader::new();
        for (n, text) in templates {
            loader.add(*n, *text);
        }
        let root = Parser::new(&loader).parse_template(name).unwrap();
        generate(&root)
    }

    fn text(s: &str) -> Instr {
        Instr::Text { text: s.into() }
    }

    /// Concatenation of all literal text, ignoring control flow.
    fn literal(program: &Program) -> String {
        program
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instr::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn if_else_layout() {
        let program = compile(&[("t", "{% if ok %}Yes{% else %}No{% endif %}!")], "t");
        assert_eq!(
            program.instructions,
            vec![
                Instr::Branch {
                    condition: "ok".into(),
                    otherwise: 3
                },
                text("Yes"),
                Instr::Jump { target: 4 },
                text("No"),
                text("!"),
            ]
        );
        assert!(program.dependencies.is_empty());
    }

    #[test]
    fn if_without_else_layout() {
        let program = compile(&[("t", "{% if ok %}Yes{% endif %}")], "t");
        assert_eq!(
            program.instructions,
            vec![
                Instr::Branch {
                    condition: "ok".into(),
                    otherwise: 2
                },
                text("Yes"),
            ]
        );
    }

    #[test]
    fn for_layout() {
        let program = compile(&[("t", "<ul>{% for x in items %}<li>{{ x }}</li>{% endfor %}</ul>")], "t");
        assert_eq!(
            program.instructions,
            vec![
                text("<ul>"),
                Instr::LoopStart {
                    binding: "x".into(),
                    collection: "items".into(),
                    exit: 6
                },
                text("<li>"),
                Instr::Emit { expr: "x".into() },
                text("</li>"),
                Instr::LoopEnd { start: 1 },
                text("</ul>"),
            ]
        );
    }

    #[test]
    fn child_blocks_replace_parent_blocks() {
        let program = compile(
            &[
                ("base", "<title>{% block title %}Default{% endblock %}</title>{% block body %}B{% endblock %}"),
                ("page", "{% extends base %}ignored{% block title %}Home{% endblock %}{% block extra %}X{% endblock %}"),
            ],
            "page",
        );
        assert_eq!(literal(&program), "<title>Home</title>B");
        assert_eq!(program.name, "page");
        assert_eq!(program.dependencies.len(), 1);
        assert_eq!(program.dependencies[0].name, "base");
    }

    #[test]
    fn grandchild_overrides_reach_the_base() {
        let templates = [
            ("base", "[{% block a %}base-a{% endblock %}|{% block b %}base-b{% endblock %}|{% block c %}base-c{% endblock %}]"),
            ("mid", "{% extends base %}{% block a %}mid-a{% endblock %}{% block b %}mid-b{% endblock %}"),
            ("leaf", "{% extends mid %}{% block b %}leaf-b{% endblock %}"),
        ];
        let program = compile(&templates, "leaf");
        assert_eq!(literal(&program), "[mid-a|leaf-b|base-c]");
        let deps: Vec<&str> = program.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(deps, ["mid", "base"]);
    }

    #[test]
    fn nested_blocks_can_be_overridden() {
        let templates = [
            ("base", "{% block content %}<main>{% block inner %}i{% endblock %}</main>{% endblock %}"),
            ("page", "{% extends base %}{% block inner %}I{% endblock %}"),
        ];
        assert_eq!(literal(&compile(&templates, "page")), "<main>I</main>");
    }

    #[test]
    fn override_containing_its_own_name_does_not_recurse() {
        let templates = [
            ("base", "{% block a %}base{% endblock %}"),
            ("page", "{% extends base %}{% block a %}<{% block a %}inner{% endblock %}>{% endblock %}"),
        ];
        assert_eq!(literal(&compile(&templates, "page")), "<inner>");
    }

    #[test]
    fn template_without_parent_keeps_duplicate_blocks_in_place() {
        let program = compile(&[("t", "{% block a %}1{% endblock %}{% block a %}2{% endblock %}")], "t");
        assert_eq!(literal(&program), "12");
    }

    #[test]
    fn generation_is_deterministic() {
        let templates = [
            ("base", "{% block a %}{% if x %}{{ x }}{% endif %}{% endblock %}{% block b %}{% endblock %}"),
            ("page", "{% extends base %}{% block b %}{% for i in xs %}{{ i }}{% endfor %}{% endblock %}"),
        ];
        assert_eq!(compile(&templates, "page"), compile(&templates, "page"));
    }

    #[test]
    fn program_serializes_with_tagged_ops() {
        let program = compile(&[("t", "Hi {{ name }}")], "t");
        let json = serde_json::to_value(&program).unwrap();
        assert_eq!(json["instructions"][1]["op"], "emit");
        assert_eq!(json["instructions"][1]["expr"], "name");
        let back: Program = serde_json::from_value(json).unwrap();
        assert_eq!(back, program);
    }
}
