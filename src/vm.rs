//! Executes a compiled [`Program`] against a render context.

use crate::codegen::{Instr, Program};
use crate::eval::{Context, EvalError, ExpressionEvaluator, Scope, Value};
use std::collections::BTreeMap;

/// An active `for` loop.
struct Frame<'p> {
    binding: &'p str,
    items: Vec<Value>,
    index: usize,
}

impl Frame<'_> {
    fn bind(&self, scope: &mut Scope<'_>) {
        let len = self.items.len();
        scope.set_local(self.binding, self.items[self.index].clone());

        let mut loop_map = BTreeMap::new();
        loop_map.insert("index".to_string(), Value::Int(self.index as i64 + 1));
        loop_map.insert("index0".to_string(), Value::Int(self.index as i64));
        loop_map.insert("first".to_string(), Value::Bool(self.index == 0));
        loop_map.insert("last".to_string(), Value::Bool(self.index + 1 == len));
        loop_map.insert("length".to_string(), Value::Int(len as i64));
        scope.set_local("loop", Value::Map(loop_map));
    }
}

/// Run `program`, returning the whole output or the first error.
pub fn execute(
    program: &Program,
    context: &Context,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<String, EvalError> {
    let code = &program.instructions;
    let mut scope = Scope::new(context);
    let mut loops: Vec<Frame<'_>> = Vec::new();
    let mut output = String::new();
    let mut ip = 0;

    while let Some(instr) = code.get(ip) {
        match instr {
            Instr::Text { text } => {
                output.push_str(text);
                ip += 1;
            }
            Instr::Emit { expr } => {
                let value = evaluator.evaluate(expr, &scope)?;
                output.push_str(&value.render_to_string());
                ip += 1;
            }
            Instr::Branch {
                condition,
                otherwise,
            } => {
                ip = if evaluator.evaluate(condition, &scope)?.is_truthy() {
                    ip + 1
                } else {
                    *otherwise
                };
            }
            Instr::Jump { target } => ip = *target,
            Instr::LoopStart {
                binding,
                collection,
                exit,
            } => {
                let items = iterate(evaluator.evaluate(collection, &scope)?)?;
                if items.is_empty() {
                    ip = *exit;
                    continue;
                }
                let frame = Frame {
                    binding,
                    items,
                    index: 0,
                };
                scope.push_scope();
                frame.bind(&mut scope);
                loops.push(frame);
                ip += 1;
            }
            Instr::LoopEnd { start } => {
                let frame = loops.last_mut().ok_or_else(|| {
                    EvalError::InvalidProgram(format!("loop end at {ip} without a running loop"))
                })?;
                frame.index += 1;
                if frame.index < frame.items.len() {
                    frame.bind(&mut scope);
                    ip = start + 1;
                } else {
                    loops.pop();
                    scope.pop_scope();
                    ip += 1;
                }
            }
        }
    }

    Ok(output)
}

/// Elements visited by `for`: array items, sorted map keys, or characters.
fn iterate(value: Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Map(map) => Ok(map.into_keys().map(Value::String).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(EvalError::Type(format!("cannot iterate over {}", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate;
    use crate::eval::Evaluator;
    use crate::loader::InMemoryLoader;
    use crate::parser::Parser;

    fn render(text: &str, context: &Context) -> Result<String, EvalError> {
        let mut loader = InMemoryLoader::new();
        loader.add("t.html", text);
        let root = Parser::new(&loader).parse_template("t.html").unwrap();
        execute(&generate(&root), context, &Evaluator)
    }

    fn names() -> Context {
        let mut ctx = Context::new();
        ctx.insert("items", vec!["Evan", "John", "Jane"]);
        ctx
    }

    #[test]
    fn hello_world() {
        let mut ctx = Context::new();
        ctx.insert("name", "World");
        assert_eq!(render("Hello {{ name }}!", &ctx).unwrap(), "Hello World!");
    }

    #[test]
    fn if_else_picks_one_branch() {
        let mut ctx = Context::new();
        ctx.insert("ok", false);
        assert_eq!(render("{% if ok %}Yes{% else %}No{% endif %}", &ctx).unwrap(), "No");
        ctx.insert("ok", true);
        assert_eq!(render("{% if ok %}Yes{% else %}No{% endif %}", &ctx).unwrap(), "Yes");
    }

    #[test]
    fn for_loop_renders_once_per_item_in_order() {
        let out = render("{% for x in items %}<li>{{ x }}</li>{% endfor %}", &names()).unwrap();
        assert_eq!(out, "<li>Evan</li><li>John</li><li>Jane</li>");
    }

    #[test]
    fn loop_metadata() {
        let out = render(
            "{% for x in items %}{% if loop.first %}[{% endif %}{{ loop.index }}:{{ x }}{% if loop.last %}]{% else %},{% endif %}{% endfor %}",
            &names(),
        )
        .unwrap();
        assert_eq!(out, "[1:Evan,2:John,3:Jane]");
    }

    #[test]
    fn nested_loops_restore_outer_binding() {
        let mut ctx = Context::new();
        ctx.insert("rows", vec!["a", "b"]);
        ctx.insert("cols", vec![1i64, 2]);
        let out = render(
            "{% for r in rows %}{% for c in cols %}{{ r }}{{ c }}{{ loop.length }}{% endfor %}{{ r }}{{ loop.index0 }};{% endfor %}",
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "a12a22a0;b12b22b1;");
    }

    #[test]
    fn loop_binding_does_not_leak() {
        let out = render("{% for x in items %}{% endfor %}[{{ x }}]", &names()).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn empty_and_missing_collections_skip_the_body() {
        let mut ctx = Context::new();
        ctx.insert("empty", Vec::<Value>::new());
        assert_eq!(render("a{% for x in empty %}X{% endfor %}b", &ctx).unwrap(), "ab");
        assert_eq!(render("a{% for x in missing %}X{% endfor %}b", &ctx).unwrap(), "ab");
    }

    #[test]
    fn maps_iterate_sorted_keys_and_strings_iterate_chars() {
        let ctx = Context::from_serialize(&serde_json::json!({
            "m": {"b": 2, "a": 1},
            "s": "hé"
        }))
        .unwrap();
        assert_eq!(render("{% for k in m %}{{ k }}={{ m[k] }};{% endfor %}", &ctx).unwrap(), "a=1;b=2;");
        assert_eq!(render("{% for c in s %}<{{ c }}>{% endfor %}", &ctx).unwrap(), "<h><é>");
    }

    #[test]
    fn iterating_a_scalar_is_an_error() {
        let mut ctx = Context::new();
        ctx.insert("n", 3i64);
        assert!(matches!(render("{% for x in n %}{% endfor %}", &ctx), Err(EvalError::Type(_))));
    }

    #[test]
    fn expression_errors_abort_the_render() {
        assert!(matches!(render("before {{ 1 + }} after", &Context::new()), Err(EvalError::Syntax { .. })));
    }

    #[test]
    fn corrupt_loop_end_is_reported() {
        let program = Program {
            name: "bad".into(),
            fingerprint: 0,
            dependencies: Vec::new(),
            instructions: vec![Instr::LoopEnd { start: 0 }],
        };
        assert!(matches!(
            execute(&program, &Context::new(), &Evaluator),
            Err(EvalError::InvalidProgram(_))
        ));
    }

    struct Upper;

    impl ExpressionEvaluator for Upper {
        fn evaluate(&self, expression: &str, scope: &Scope<'_>) -> Result<Value, EvalError> {
            Ok(match scope.get(expression) {
                Some(Value::String(s)) => Value::String(s.to_uppercase()),
                Some(v) => v.clone(),
                None => Value::Null,
            })
        }
    }

    #[test]
    fn evaluator_is_pluggable() {
        let mut loader = InMemoryLoader::new();
        loader.add("t", "{% for x in items %}{{ x }},{% endfor %}");
        let root = Parser::new(&loader).parse_template("t").unwrap();
        let out = execute(&generate(&root), &names(), &Upper).unwrap();
        assert_eq!(out, "EVAN,JOHN,JANE,");
    }
}
