//! Parsed statement templates.
//!
//! A template is the statement text plus its `$name` placeholders in order of
//! first appearance and any types declared for them with
//! `DECLARE $name AS <Type>;`. Parsing is cached per connection keyed by
//! [`query_hash`], so repeated statements skip the scan.

use crate::types::NativeType;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// One placeholder of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Name including the `$` prefix.
    pub name: String,
    /// Type from a `DECLARE` clause, if any.
    pub declared: Option<NativeType>,
}

#[derive(Debug, Clone)]
pub struct QueryTemplate {
    text: String,
    name: String,
    params: Vec<Param>,
}

impl QueryTemplate {
    pub fn parse(text: &str) -> Self {
        let tokens = scan(text);
        let mut params: Vec<Param> = Vec::new();
        for token in &tokens {
            if let Token::Param(name) = token
                && !params.iter().any(|p| &p.name == name)
            {
                params.push(Param {
                    name: name.clone(),
                    declared: None,
                });
            }
        }

        for (i, token) in tokens.iter().enumerate() {
            let Token::Word(word, _) = token else { continue };
            if !word.eq_ignore_ascii_case("declare") {
                continue;
            }
            let (Some(Token::Param(name)), Some(Token::Word(as_kw, type_start))) =
                (tokens.get(i + 1), tokens.get(i + 2))
            else {
                continue;
            };
            if !as_kw.eq_ignore_ascii_case("as") {
                continue;
            }
            let type_end = tokens[i + 3..]
                .iter()
                .find_map(|t| match t {
                    Token::Semicolon(pos) => Some(*pos),
                    _ => None,
                })
                .unwrap_or(text.len());
            let declared = NativeType::parse(&text[*type_start..type_end]);
            if let Some(param) = params.iter_mut().find(|p| &p.name == name) {
                param.declared = declared;
            }
        }

        Self {
            text: text.to_string(),
            name: template_name(text),
            params,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Stable name derived from the text hash.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Index of a placeholder; accepts the name with or without `$`.
    pub fn position(&self, name: &str) -> Option<usize> {
        let bare = name.strip_prefix('$').unwrap_or(name);
        self.params.iter().position(|p| &p.name[1..] == bare)
    }
}

/// Hash used as the statement cache key.
pub fn query_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.as_bytes().hash(&mut hasher);
    hasher.finish()
}

fn template_name(text: &str) -> String {
    format!("q{:016x}", query_hash(text))
}

#[derive(Debug)]
enum Token {
    /// Identifier and the byte offset just past it.
    Word(String, usize),
    Param(String),
    Semicolon(usize),
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Tokens outside string literals, quoted identifiers and comments.
fn scan(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b';' => {
                tokens.push(Token::Semicolon(i));
                i += 1;
            }
            b'$' if bytes.get(i + 1).is_some_and(|&c| is_ident_start(c)) => {
                let start = i;
                i += 1;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token::Param(text[start..i].to_string()));
            }
            _ if is_ident_start(b) => {
                let start = i;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(text[start..i].to_string(), i));
            }
            _ if b.is_ascii_digit() => {
                // Keep `1abc` from being split into a number and a word.
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    tokens
}

/// Index just past the closing quote. Backslash escapes and doubled quotes
/// stay inside the literal.
fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}
