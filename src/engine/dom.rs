//! Document tree
//!
//! Arena-backed node tree built from the markup channel and mutated by the
//! script channel. Nodes are addressed by index; detaching a node just
//! unlinks it, so stale ids never dangle.

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_element(&mut self, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push_node(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn append_root(&mut self, id: NodeId) {
        self.nodes[id].parent = None;
        self.roots.push(id);
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Unlink a node from its parent (or from the root list). The arena
    /// slot stays allocated; traversals simply no longer reach it.
    pub fn detach(&mut self, id: NodeId) {
        match self.nodes[id].parent.take() {
            Some(parent) => self.nodes[parent].children.retain(|&c| c != id),
            None => self.roots.retain(|&r| r != id),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id].kind {
            match attrs.iter_mut().find(|(k, _)| *k == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => attrs.push((name, value.to_string())),
            }
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .map(|v| v.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Concatenated text of the subtree, in document order.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { .. } => {
                for &child in &self.nodes[id].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Replace the subtree's content with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        let children = std::mem::take(&mut self.nodes[id].children);
        for child in children {
            self.nodes[child].parent = None;
        }
        let text_node = self.create_text(text);
        self.append_child(id, text_node);
    }

    /// All element ids reachable from the roots, in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if matches!(self.nodes[id].kind, NodeKind::Element { .. }) {
                out.push(id);
            }
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Elements matching the selector, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&id| self.matches(selector, id))
            .collect()
    }

    pub fn select_first(&self, selector: &Selector) -> Option<NodeId> {
        self.elements().into_iter().find(|&id| self.matches(selector, id))
    }

    /// Descendant-chain matching: the node must match the last part and
    /// have ancestors matching the earlier parts, innermost first.
    pub fn matches(&self, selector: &Selector, id: NodeId) -> bool {
        let Some((last, rest)) = selector.parts.split_last() else {
            return false;
        };
        if !self.part_matches(last, id) {
            return false;
        }
        let mut cursor = self.nodes[id].parent;
        for part in rest.iter().rev() {
            loop {
                match cursor {
                    Some(ancestor) => {
                        cursor = self.nodes[ancestor].parent;
                        if self.part_matches(part, ancestor) {
                            break;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }

    fn part_matches(&self, part: &SelectorPart, id: NodeId) -> bool {
        let NodeKind::Element { tag, .. } = &self.nodes[id].kind else {
            return false;
        };
        if let Some(want) = &part.tag {
            if want != tag {
                return false;
            }
        }
        if let Some(want) = &part.id {
            if self.attr(id, "id") != Some(want.as_str()) {
                return false;
            }
        }
        part.classes.iter().all(|c| self.has_class(id, c))
    }
}

/// One compound in a selector: optional tag, optional `#id`, classes.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorPart {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

/// A whitespace-separated descendant chain of compound parts, e.g.
/// `ul.menu li`, `#root p.note`, `h1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub parts: Vec<SelectorPart>,
}

impl Selector {
    /// Parse a selector. Returns `None` for anything outside the
    /// supported grammar (combinators, pseudo-classes, attributes).
    pub fn parse(input: &str) -> Option<Selector> {
        let mut parts = Vec::new();
        for token in input.split_whitespace() {
            parts.push(Self::parse_part(token)?);
        }
        if parts.is_empty() {
            return None;
        }
        Some(Selector { parts })
    }

    fn parse_part(token: &str) -> Option<SelectorPart> {
        let mut part = SelectorPart {
            tag: None,
            id: None,
            classes: Vec::new(),
        };
        let mut chars = token.chars().peekable();
        let mut universal = false;

        if matches!(chars.peek(), Some(c) if *c != '#' && *c != '.') {
            if *chars.peek()? == '*' {
                chars.next();
                universal = true;
            } else {
                let name = Self::take_name(&mut chars)?;
                part.tag = Some(name.to_ascii_lowercase());
            }
        }

        while let Some(&c) = chars.peek() {
            chars.next();
            match c {
                '#' => {
                    if part.id.is_some() {
                        return None;
                    }
                    part.id = Some(Self::take_name(&mut chars)?);
                }
                '.' => part.classes.push(Self::take_name(&mut chars)?),
                _ => return None,
            }
        }

        if !universal && part.tag.is_none() && part.id.is_none() && part.classes.is_empty() {
            return None;
        }
        Some(part)
    }

    fn take_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        // <div id="root" class="wrap"><p class="note bold">hi</p><span>x</span></div>
        let mut doc = Document::new();
        let div = doc.create_element(
            "div",
            vec![("id".into(), "root".into()), ("class".into(), "wrap".into())],
        );
        let p = doc.create_element("p", vec![("class".into(), "note bold".into())]);
        let span = doc.create_element("span", vec![]);
        let hi = doc.create_text("hi");
        let x = doc.create_text("x");
        doc.append_root(div);
        doc.append_child(div, p);
        doc.append_child(p, hi);
        doc.append_child(div, span);
        doc.append_child(span, x);
        (doc, div, p, span)
    }

    #[test]
    fn test_selector_parse() {
        let sel = Selector::parse("ul.menu li").unwrap();
        assert_eq!(sel.parts.len(), 2);
        assert_eq!(sel.parts[0].tag.as_deref(), Some("ul"));
        assert_eq!(sel.parts[0].classes, vec!["menu".to_string()]);
        assert_eq!(sel.parts[1].tag.as_deref(), Some("li"));

        let sel = Selector::parse("#root").unwrap();
        assert_eq!(sel.parts[0].id.as_deref(), Some("root"));
        assert!(sel.parts[0].tag.is_none());

        assert!(Selector::parse("").is_none());
        assert!(Selector::parse("p > span").is_none());
        assert!(Selector::parse("p:hover").is_none());
        assert!(Selector::parse(".").is_none());
    }

    #[test]
    fn test_select_by_tag_id_class() {
        let (doc, div, p, span) = sample();
        assert_eq!(doc.select(&Selector::parse("div").unwrap()), vec![div]);
        assert_eq!(doc.select(&Selector::parse("#root").unwrap()), vec![div]);
        assert_eq!(doc.select(&Selector::parse(".note").unwrap()), vec![p]);
        assert_eq!(doc.select(&Selector::parse("p.bold.note").unwrap()), vec![p]);
        assert_eq!(doc.select(&Selector::parse("*").unwrap()), vec![div, p, span]);
        assert!(doc.select(&Selector::parse("h1").unwrap()).is_empty());
    }

    #[test]
    fn test_descendant_chain() {
        let (doc, _, p, span) = sample();
        assert_eq!(doc.select(&Selector::parse("div p").unwrap()), vec![p]);
        assert_eq!(doc.select(&Selector::parse("#root span").unwrap()), vec![span]);
        assert_eq!(doc.select(&Selector::parse(".wrap .note").unwrap()), vec![p]);
        assert!(doc.select(&Selector::parse("span p").unwrap()).is_empty());
    }

    #[test]
    fn test_text_content_and_set_text() {
        let (mut doc, div, p, _) = sample();
        assert_eq!(doc.text_content(div), "hix");
        doc.set_text(p, "bye");
        assert_eq!(doc.text_content(p), "bye");
        assert_eq!(doc.text_content(div), "byex");
    }

    #[test]
    fn test_detach_removes_from_traversal() {
        let (mut doc, div, p, span) = sample();
        doc.detach(span);
        assert_eq!(doc.elements(), vec![div, p]);
        assert_eq!(doc.text_content(div), "hi");
    }

    #[test]
    fn test_set_attr_insert_and_replace() {
        let (mut doc, div, _, span) = sample();
        doc.set_attr(span, "data-k", "1");
        assert_eq!(doc.attr(span, "data-k"), Some("1"));
        doc.set_attr(div, "id", "other");
        assert_eq!(doc.attr(div, "id"), Some("other"));
        assert!(doc.select(&Selector::parse("#root").unwrap()).is_empty());
    }

    #[test]
    fn test_tag_lookup_is_case_insensitive() {
        let mut doc = Document::new();
        let el = doc.create_element("DIV", vec![]);
        doc.append_root(el);
        assert_eq!(doc.tag(el), Some("div"));
        assert_eq!(doc.select(&Selector::parse("DIV").unwrap()), vec![el]);
    }
}
