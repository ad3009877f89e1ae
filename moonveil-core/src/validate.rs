//! Quick structural check of Lua source
//!
//! Strings and comments are blanked out first, then block keywords and
//! brackets are balanced. A full parse runs last so its position-carrying
//! message is reported too.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::parse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Long brackets deeper than this are left to the parser
const MAX_LEVEL: usize = 4;

fn literal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut alternatives = Vec::new();
        for level in 0..=MAX_LEVEL {
            let eq = "=".repeat(level);
            alternatives.push(format!(r"--\[{eq}\[[\s\S]*?\]{eq}\]"));
        }
        alternatives.push(r"--[^\n]*".to_string());
        for level in 0..=MAX_LEVEL {
            let eq = "=".repeat(level);
            alternatives.push(format!(r"\[{eq}\[[\s\S]*?\]{eq}\]"));
        }
        alternatives.push(r#""(?:\\[\s\S]|[^"\\\n])*""#.to_string());
        alternatives.push(r"'(?:\\[\s\S]|[^'\\\n])*'".to_string());
        Regex::new(&alternatives.join("|")).expect("literal pattern is valid")
    })
}

fn keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(function|if|do|end|repeat|until)\b").expect("keyword pattern is valid")
    })
}

/// Replace strings and comments with blanks, keeping line breaks
fn strip_literals(source: &str) -> String {
    literal_pattern()
        .replace_all(source, |caps: &regex::Captures| {
            caps[0].chars().map(|c| if c == '\n' { '\n' } else { ' ' }).collect::<String>()
        })
        .into_owned()
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

pub fn validate_code(source: &str) -> Validation {
    let stripped = strip_literals(source);
    let mut errors = Vec::new();

    let mut blocks = 0i64;
    let mut repeats = 0i64;
    for m in keyword_pattern().find_iter(&stripped) {
        match m.as_str() {
            "function" | "if" | "do" => blocks += 1,
            "end" => {
                blocks -= 1;
                if blocks < 0 {
                    errors.push(format!("unexpected 'end' at line {}", line_of(&stripped, m.start())));
                    blocks = 0;
                }
            }
            "repeat" => repeats += 1,
            _ => {
                repeats -= 1;
                if repeats < 0 {
                    errors.push(format!("'until' without 'repeat' at line {}", line_of(&stripped, m.start())));
                    repeats = 0;
                }
            }
        }
    }
    if blocks > 0 {
        errors.push(format!("{} block(s) missing 'end'", blocks));
    }
    if repeats > 0 {
        errors.push(format!("{} 'repeat' without 'until'", repeats));
    }

    let mut open: Vec<(char, usize)> = Vec::new();
    for (offset, c) in stripped.char_indices() {
        let expected = match c {
            '(' | '{' | '[' => {
                open.push((c, offset));
                continue;
            }
            ')' => '(',
            '}' => '{',
            ']' => '[',
            _ => continue,
        };
        match open.pop() {
            Some((opener, _)) if opener == expected => {}
            _ => {
                errors.push(format!("unmatched '{}' at line {}", c, line_of(&stripped, offset)));
                open.clear();
                break;
            }
        }
    }
    for (c, offset) in open {
        errors.push(format!("unclosed '{}' from line {}", c, line_of(&stripped, offset)));
    }

    if errors.is_empty() {
        if let Err(e) = parse(source) {
            errors.push(e.to_string());
        }
    }

    Validation {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_program() {
        let source = "local function f(t)\n  for i = 1, #t do\n    if t[i] then print(t[i]) end\n  end\n  repeat until true\nend";
        let result = validate_code(source);
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_keywords_inside_strings_and_comments_ignored() {
        let source = "local s = \"end end (\" -- function do [\n--[==[ if ( ]==]\nlocal t = [[ until { ]]";
        assert!(validate_code(source).valid);
    }

    #[test]
    fn test_missing_end() {
        let result = validate_code("function f()\n  if x then\n  end\n");
        assert!(!result.valid);
        assert_eq!(result.errors, ["1 block(s) missing 'end'"]);
    }

    #[test]
    fn test_stray_end_and_until() {
        let result = validate_code("x = 1\nend\nuntil x");
        assert!(result.errors.iter().any(|e| e == "unexpected 'end' at line 2"));
        assert!(result.errors.iter().any(|e| e == "'until' without 'repeat' at line 3"));
    }

    #[test]
    fn test_bracket_balance() {
        let result = validate_code("print((1 + 2)");
        assert_eq!(result.errors, ["unclosed '(' from line 1"]);
        let result = validate_code("local t = {1, 2)");
        assert_eq!(result.errors, ["unmatched ')' at line 1"]);
    }

    #[test]
    fn test_parse_error_reported_when_structure_balances() {
        let result = validate_code("local = 5");
        assert!(!result.valid);
        assert!(result.errors[0].contains("parse error"));
    }
}
