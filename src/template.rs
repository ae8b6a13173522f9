//! Variable-binding renderer for `template` steps.
//!
//! Syntax is intentionally small:
//!
//! | Tag                  | Meaning |
//! |----------------------|---------|
//! | `{{ name }}`         | Substitute the binding `name` |
//! | `{{#if name}}`       | Emit the block when `name` is truthy |
//! | `{{else}}`           | Alternate branch of the innermost `if` |
//! | `{{/if}}`            | Close the innermost `if` |
//!
//! Referencing an unbound name is an error in both positions, so a typo in a
//! template fails the run instead of silently rendering an empty value.

use crate::error::{Result, RigupError};
use serde_json::Value;
use std::collections::BTreeMap;

/// Variable bindings handed to a template.
pub type TemplateVars = BTreeMap<String, Value>;

struct Frame {
    parent_active: bool,
    condition: bool,
    in_else: bool,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

/// Render `source` with `vars`.
pub fn render(source: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut rest = source;

    let is_active = |stack: &[Frame]| stack.last().is_none_or(Frame::active);

    while let Some(open) = rest.find("{{") {
        if is_active(&stack) {
            out.push_str(&rest[..open]);
        }
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| RigupError::template("unterminated '{{' tag"))?;
        let tag = after[..close].trim();
        rest = &after[close + 2..];

        if let Some(name) = tag.strip_prefix("#if ") {
            let condition = truthy(lookup(vars, name.trim())?);
            stack.push(Frame {
                parent_active: is_active(&stack),
                condition,
                in_else: false,
            });
        } else if tag == "else" {
            let frame = stack
                .last_mut()
                .ok_or_else(|| RigupError::template("'else' outside of 'if'"))?;
            if frame.in_else {
                return Err(RigupError::template("duplicate 'else' in one 'if'"));
            }
            frame.in_else = true;
        } else if tag == "/if" {
            stack
                .pop()
                .ok_or_else(|| RigupError::template("'/if' without matching 'if'"))?;
        } else {
            let value = lookup(vars, tag)?;
            if is_active(&stack) {
                out.push_str(&display(value));
            }
        }
    }

    if !stack.is_empty() {
        return Err(RigupError::template(format!("{} unclosed 'if' block(s)", stack.len())));
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup<'a>(vars: &'a TemplateVars, name: &str) -> Result<&'a Value> {
    vars.get(name)
        .ok_or_else(|| RigupError::template(format!("unbound variable '{}'", name)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
