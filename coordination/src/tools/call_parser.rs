//! Parser for the tool-call mini-language models emit in `tool_calls`.
//!
//! ```text
//! calls   := call ( sep call )*
//! sep     := whitespace | ',' | ';'
//! call    := [mode ws] name '(' [arg (',' arg)*] ')'
//! mode    := "oneshot" | "continuous"            (default: oneshot)
//! name    := [A-Za-z0-9_.\-/]+
//! arg     := key '=' value                      (whitespace allowed around '=')
//! value   := '"' chars '"' | '\'' chars '\'' | bare
//! bare    := any run of chars except ',' ')' whitespace
//! ```
//!
//! Inside quotes a backslash escapes the next character (`\n` is a newline).
//! Text that does not form a call is skipped, so chatter around the calls
//! ("sure, I'll run oneshot search(q=\"x\")") still yields the call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// How the model wants the tool invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    #[default]
    Oneshot,
    Continuous,
}

impl ToolMode {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "oneshot" => Some(Self::Oneshot),
            "continuous" => Some(Self::Continuous),
            _ => None,
        }
    }
}

impl fmt::Display for ToolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oneshot => write!(f, "oneshot"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

/// One parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub mode: ToolMode,
    /// Arguments in the order the model wrote them.
    pub args: Vec<(String, String)>,
    /// Source text of this call.
    pub raw: String,
}

impl ToolCallRequest {
    /// A request without a name or source text cannot be dispatched.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.raw.trim().is_empty()
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Arguments as a JSON object of strings for the gateway.
    pub fn arguments_json(&self) -> Map<String, Value> {
        self.args
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        self.skip_while(char::is_whitespace);
    }

    fn skip_separators(&mut self) {
        self.skip_while(|c| c.is_whitespace() || c == ',' || c == ';');
    }

    fn ident(&mut self) -> &'a str {
        let start = self.pos;
        self.skip_while(is_ident_char);
        &self.src[start..self.pos]
    }

    fn quoted(&mut self, quote: char) -> Option<String> {
        let mut value = String::new();
        loop {
            match self.bump()? {
                '\\' => match self.bump()? {
                    'n' => value.push('\n'),
                    other => value.push(other),
                },
                c if c == quote => return Some(value),
                c => value.push(c),
            }
        }
    }

    fn bare(&mut self) -> &'a str {
        let start = self.pos;
        self.skip_while(|c| c != ',' && c != ')' && !c.is_whitespace());
        &self.src[start..self.pos]
    }
}

fn parse_call(cur: &mut Cursor<'_>) -> Option<(ToolMode, String, Vec<(String, String)>)> {
    let first = cur.ident();
    if first.is_empty() {
        return None;
    }
    cur.skip_ws();

    let (mode, name) = if cur.peek() == Some('(') {
        (ToolMode::Oneshot, first)
    } else {
        let mode = ToolMode::from_word(first)?;
        let name = cur.ident();
        if name.is_empty() {
            return None;
        }
        cur.skip_ws();
        (mode, name)
    };

    if !cur.eat('(') {
        return None;
    }

    let mut args = Vec::new();
    loop {
        cur.skip_ws();
        if cur.eat(')') {
            break;
        }
        let key = cur.ident();
        if key.is_empty() {
            return None;
        }
        cur.skip_ws();
        if !cur.eat('=') {
            return None;
        }
        cur.skip_ws();
        let value = match cur.peek()? {
            q @ ('"' | '\'') => {
                cur.bump();
                cur.quoted(q)?
            }
            _ => cur.bare().to_string(),
        };
        args.push((key.to_string(), value));
        cur.skip_ws();
        if cur.eat(',') {
            continue;
        }
        if cur.eat(')') {
            break;
        }
        return None;
    }
    Some((mode, name.to_string(), args))
}

/// Parse every well-formed call in `text`, in order of appearance.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCallRequest> {
    let mut cur = Cursor { src: text, pos: 0 };
    let mut calls = Vec::new();

    loop {
        cur.skip_separators();
        if cur.peek().is_none() {
            break;
        }
        let start = cur.pos;
        match parse_call(&mut cur) {
            Some((mode, name, args)) => {
                let request = ToolCallRequest {
                    name,
                    mode,
                    args,
                    raw: text[start..cur.pos].trim().to_string(),
                };
                if request.is_valid() {
                    calls.push(request);
                }
            }
            None => {
                // Skip one word (or one stray character) and resynchronise.
                cur.pos = start;
                if cur.ident().is_empty() {
                    cur.bump();
                }
            }
        }
    }
    calls
}
