//! Style channel parser
//!
//! A small rule sheet: comma-separated selectors, `property: value`
//! declarations, block comments, at-rule blocks skipped whole. Resolution
//! is deliberately simple: the inline `style` attribute wins, otherwise
//! the last matching rule that sets the property.

use super::dom::{Document, NodeId, Selector};

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct StyleRule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Default)]
pub struct StyleSheet {
    pub rules: Vec<StyleRule>,
}

/// Parse the style channel. Unparseable pieces are dropped, never fatal.
pub fn parse_style(input: &str) -> StyleSheet {
    let src = strip_comments(input);
    let mut rules = Vec::new();
    let mut pos = 0;

    while pos < src.len() {
        let Some(brace) = src[pos..].find('{') else {
            break;
        };
        let prelude = src[pos..pos + brace].trim().to_string();
        let body_start = pos + brace + 1;

        if prelude.starts_with('@') {
            pos = skip_balanced_block(&src, pos + brace);
            continue;
        }

        let body_end = match src[body_start..].find('}') {
            Some(at) => body_start + at,
            None => src.len(),
        };
        let selectors: Vec<Selector> = prelude
            .split(',')
            .filter_map(Selector::parse)
            .collect();
        let declarations = parse_declarations(&src[body_start..body_end]);
        if !selectors.is_empty() && !declarations.is_empty() {
            rules.push(StyleRule {
                selectors,
                declarations,
            });
        }
        pos = (body_end + 1).min(src.len());
    }

    StyleSheet { rules }
}

/// Parse a declaration list, as found in rule bodies and inline `style`
/// attributes.
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    body.split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let property = prop.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if property.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration { property, value })
        })
        .collect()
}

fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Advance past a `{ ... }` block starting at `open`, tolerating nesting.
fn skip_balanced_block(src: &str, open: usize) -> usize {
    let mut depth = 0usize;
    for (i, c) in src[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return open + i + 1;
                }
            }
            _ => {}
        }
    }
    src.len()
}

impl StyleSheet {
    /// Effective value of `property` on a node: inline attribute first,
    /// then the last matching sheet rule.
    pub fn resolve(&self, doc: &Document, id: NodeId, property: &str) -> Option<String> {
        let property = property.to_ascii_lowercase();

        if let Some(inline) = doc.attr(id, "style") {
            let decls = parse_declarations(inline);
            if let Some(d) = decls.iter().rev().find(|d| d.property == property) {
                return Some(d.value.clone());
            }
        }

        for rule in self.rules.iter().rev() {
            if !rule.selectors.iter().any(|s| doc.matches(s, id)) {
                continue;
            }
            if let Some(d) = rule.declarations.iter().rev().find(|d| d.property == property) {
                return Some(d.value.clone());
            }
        }
        None
    }
}
