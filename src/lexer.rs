use once_cell::sync::Lazy;
use regex::Regex;

/// `{{ ... }}` or `{% ... %}` on a single line, shortest match first.
static DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{.*?\}\}|\{%.*?%\}").expect("directive pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Output(&'a str),    // {{ expr }}
    Statement(&'a str), // {% keyword rest %}
}

impl<'a> Token<'a> {
    /// The token exactly as it appears in the source, delimiters included.
    pub fn raw(&self) -> &'a str {
        match self {
            Token::Text(s) | Token::Output(s) | Token::Statement(s) => s,
        }
    }

    /// Directive body with delimiters stripped and surrounding whitespace trimmed.
    pub fn body(&self) -> &'a str {
        match self {
            Token::Text(s) => s,
            Token::Output(s) => s[2..s.len() - 2].trim(),
            Token::Statement(s) => s[2..s.len() - 2].trim(),
        }
    }
}

/// Splits template source into literal text and directive tokens.
///
/// Whitespace-only fragments are dropped. An unmatched `{{` or `{%` never
/// forms a directive and stays part of the surrounding text.
#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    pending: Option<Token<'a>>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            pending: None,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    pub fn next_token(&mut self) -> Option<Token<'a>> {
        loop {
            if let Some(token) = self.pending.take() {
                return Some(token);
            }

            if self.remaining().is_empty() {
                return None;
            }

            let token = match DIRECTIVE.find_at(self.input, self.cursor) {
                Some(m) => {
                    let directive = m.as_str();
                    let directive = if directive.starts_with("{{") {
                        Token::Output(directive)
                    } else {
                        Token::Statement(directive)
                    };
                    let text = &self.input[self.cursor..m.start()];
                    self.cursor = m.end();
                    if text.is_empty() {
                        directive
                    } else {
                        self.pending = Some(directive);
                        Token::Text(text)
                    }
                }
                None => {
                    let text = self.remaining();
                    self.cursor = self.input.len();
                    Token::Text(text)
                }
            };

            if token.raw().trim().is_empty() {
                continue;
            }
            return Some(token);
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.next_token()
    }
}

pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Tokenizer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_source_has_no_tokens() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn whitespace_between_directives_is_dropped() {
        let tokens = tokenize("{% extends layout.html %} {{ name }}");
        assert_eq!(
            tokens,
            vec![
                Token::Statement("{% extends layout.html %}"),
                Token::Output("{{ name }}"),
            ]
        );
    }

    #[test]
    fn literal_text_keeps_its_spacing() {
        let tokens = tokenize("Hello {{ name }}!");
        assert_eq!(
            tokens,
            vec![Token::Text("Hello "), Token::Output("{{ name }}"), Token::Text("!")]
        );
    }

    #[rstest]
    #[case("a {{ b", vec![Token::Text("a {{ b")])]
    #[case("{% if x", vec![Token::Text("{% if x")])]
    #[case("{{ a\n}}", vec![Token::Text("{{ a\n}}")])]
    #[case("}} {{x}}", vec![Token::Text("}} "), Token::Output("{{x}}")])]
    fn malformed_delimiters_stay_literal(#[case] source: &str, #[case] expected: Vec<Token>) {
        assert_eq!(tokenize(source), expected);
    }

    #[test]
    fn directives_match_shortest_span() {
        let tokens = tokenize("{{ a }}{{ b }}");
        assert_eq!(tokens, vec![Token::Output("{{ a }}"), Token::Output("{{ b }}")]);
    }

    #[test]
    fn body_strips_delimiters() {
        assert_eq!(Token::Statement("{%  if ok %}").body(), "if ok");
        assert_eq!(Token::Output("{{name}}").body(), "name");
        assert_eq!(Token::Text(" x ").body(), " x ");
    }

    #[test]
    fn multiline_source_yields_tokens_in_order() {
        let source = "<ul>\n{% for x in items %}\n<li>{{ x }}</li>\n{% endfor %}\n</ul>";
        let raw: Vec<&str> = tokenize(source).iter().map(Token::raw).collect();
        assert_eq!(
            raw,
            vec![
                "<ul>\n",
                "{% for x in items %}",
                "\n<li>",
                "{{ x }}",
                "</li>\n",
                "{% endfor %}",
                "\n</ul>",
            ]
        );
    }
}
