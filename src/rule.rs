//! Derived-value (rule) expressions.
//!
//! A rule tag's value is computed on the server from other tags. The client
//! only needs the expression to be well formed and to know which tags feed it.
//! Inputs are referenced as `#<tag id>`, for example
//! `(#1000 > 5)|(#1001 = true)[2],true[0]`.

use crate::types::TagId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A validated rule expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleExpression {
    expression: String,
    input_tag_ids: BTreeSet<TagId>,
}

impl RuleExpression {
    /// Parse and validate `expression`. The error is a human-readable reason.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err("empty rule expression".to_string());
        }

        let mut brackets = Vec::new();
        let mut input_tag_ids = BTreeSet::new();
        let mut chars = trimmed.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '(' | '[' => brackets.push(c),
                ')' | ']' => {
                    let open = if c == ')' { '(' } else { '[' };
                    if brackets.pop() != Some(open) {
                        return Err(format!("unbalanced '{}' at position {}", c, pos));
                    }
                }
                '#' => {
                    let mut digits = String::new();
                    while let Some((_, d)) = chars.peek().copied() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        digits.push(d);
                        chars.next();
                    }
                    let id = digits
                        .parse::<u64>()
                        .map_err(|_| format!("invalid tag reference at position {}", pos))?;
                    input_tag_ids.insert(TagId(id));
                }
                _ => {}
            }
        }

        if let Some(open) = brackets.pop() {
            return Err(format!("unclosed '{}'", open));
        }
        if input_tag_ids.is_empty() {
            return Err("rule expression references no input tag".to_string());
        }

        Ok(Self {
            expression: trimmed.to_string(),
            input_tag_ids,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Tags the rule is computed from.
    pub fn input_tag_ids(&self) -> &BTreeSet<TagId> {
        &self.input_tag_ids
    }
}

impl fmt::Display for RuleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
