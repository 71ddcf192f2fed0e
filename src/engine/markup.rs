//! Markup channel parser
//!
//! Tag-soup parsing, never failing: malformed input yields the best tree
//! we can recover. Close tags without a matching open are ignored, tags
//! still open at end of input stay where they are, comments and doctype
//! declarations are skipped, and a `<` that does not begin a tag is plain
//! text.

use super::dom::Document;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Parse the markup channel into a document tree.
pub fn parse_markup(input: &str) -> Document {
    Parser::new(input).run()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    doc: Document,
    stack: Vec<(String, super::dom::NodeId)>,
    text: String,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            doc: Document::new(),
            stack: Vec::new(),
            text: String::new(),
        }
    }

    fn run(mut self) -> Document {
        while self.pos < self.input.len() {
            let rest = &self.input[self.pos..];
            if rest.starts_with("<!--") {
                self.flush_text();
                self.skip_past("-->", 4);
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.flush_text();
                self.skip_past(">", 2);
            } else if rest.starts_with("</") {
                self.flush_text();
                self.close_tag();
            } else if rest.starts_with('<') && Self::starts_tag_name(&rest[1..]) {
                self.flush_text();
                self.open_tag();
            } else {
                let ch = rest.chars().next().unwrap_or('<');
                self.text.push(ch);
                self.pos += ch.len_utf8();
            }
        }
        self.flush_text();
        self.doc
    }

    fn starts_tag_name(rest: &str) -> bool {
        rest.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
    }

    fn skip_past(&mut self, marker: &str, skip: usize) {
        match self.input[self.pos + skip..].find(marker) {
            Some(at) => self.pos += skip + at + marker.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        if text.trim().is_empty() {
            return;
        }
        let node = self.doc.create_text(&text);
        self.append(node);
    }

    fn append(&mut self, node: super::dom::NodeId) {
        match self.stack.last() {
            Some(&(_, parent)) => self.doc.append_child(parent, node),
            None => self.doc.append_root(node),
        }
    }

    fn open_tag(&mut self) {
        self.pos += 1; // consume '<'
        let tag = self.take_name();
        let mut attrs: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            let rest = &self.input[self.pos..];
            if rest.is_empty() {
                break;
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            if rest.starts_with('/') {
                self.pos += 1;
                continue;
            }
            let name = self.take_attr_name();
            if name.is_empty() {
                // Not attribute-shaped; drop the character and move on.
                self.pos += rest.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                continue;
            }
            self.skip_whitespace();
            let value = if self.input[self.pos..].starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                self.take_attr_value()
            } else {
                String::new()
            };
            // First occurrence of an attribute wins.
            if !attrs.iter().any(|(k, _)| *k == name) {
                attrs.push((name, value));
            }
        }

        let node = self.doc.create_element(&tag, attrs);
        self.append(node);
        if !self_closing && !VOID_TAGS.contains(&tag.as_str()) {
            self.stack.push((tag, node));
        }
    }

    fn close_tag(&mut self) {
        self.pos += 2; // consume '</'
        let tag = self.take_name();
        match self.input[self.pos..].find('>') {
            Some(at) => self.pos += at + 1,
            None => self.pos = self.input.len(),
        }
        // Pop to the nearest matching open element; no match, no effect.
        if let Some(depth) = self.stack.iter().rposition(|(t, _)| *t == tag) {
            self.stack.truncate(depth);
        }
    }

    fn take_name(&mut self) -> String {
        let mut name = String::new();
        for c in self.input[self.pos..].chars() {
            if c.is_ascii_alphanumeric() || c == '-' {
                name.push(c.to_ascii_lowercase());
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        name
    }

    fn take_attr_name(&mut self) -> String {
        let mut name = String::new();
        for c in self.input[self.pos..].chars() {
            if c.is_whitespace() || c == '=' || c == '>' || c == '/' {
                break;
            }
            name.push(c.to_ascii_lowercase());
            self.pos += c.len_utf8();
        }
        name
    }

    fn take_attr_value(&mut self) -> String {
        let rest = &self.input[self.pos..];
        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => Some(q),
            _ => None,
        };
        let mut value = String::new();
        if let Some(q) = quote {
            self.pos += 1;
            for c in self.input[self.pos..].chars() {
                self.pos += c.len_utf8();
                if c == q {
                    return value;
                }
                value.push(c);
            }
            value
        } else {
            for c in self.input[self.pos..].chars() {
                if c.is_whitespace() || c == '>' {
                    break;
                }
                if c == '/' && self.input[self.pos..].starts_with("/>") {
                    break;
                }
                value.push(c);
                self.pos += c.len_utf8();
            }
            value
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.input[self.pos..].chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }
}
