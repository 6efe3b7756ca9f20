use std::collections::{HashMap, HashSet};

use crate::observer::MutationRecord;
use crate::selector::{Selector, SelectorAttrCondition, SelectorCombinator, SelectorPart, SelectorStep};
use crate::style::{css_property_name, parse_style_declarations, serialize_style_declarations};
use crate::{Error, Result};

// Recursive walks grow the stack on demand for pathological nesting.
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) svg: bool,
    pub(crate) attrs: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Dom {
    nodes: Vec<Node>,
    pub(crate) root: NodeId,
    id_index: HashMap<String, NodeId>,
    records: Vec<MutationRecord>,
}

impl Dom {
    pub(crate) fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
            records: Vec::new(),
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    /// Builds an element in place without recording a mutation. Used while
    /// parsing, before anything can observe the tree.
    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let svg = tag_name.eq_ignore_ascii_case("svg")
            || self.element(parent).is_some_and(|element| element.svg);
        let element = Element {
            tag_name,
            svg,
            attrs,
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, id);
        }
        id
    }

    pub(crate) fn create_detached_element(&mut self, tag_name: &str, svg: bool) -> NodeId {
        let element = Element {
            tag_name: tag_name.to_ascii_lowercase(),
            svg,
            attrs: HashMap::new(),
        };
        self.create_node(None, NodeType::Element(element))
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    pub(crate) fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0).and_then(|node| node.parent)
    }

    pub(crate) fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(node_id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn is_valid_node(&self, node_id: NodeId) -> bool {
        node_id.0 < self.nodes.len()
    }

    /// Inclusive containment, like `Node.contains`.
    pub(crate) fn contains(&self, ancestor: NodeId, node_id: NodeId) -> bool {
        let mut cursor = Some(node_id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn is_connected(&self, node_id: NodeId) -> bool {
        self.contains(self.root, node_id)
    }

    pub(crate) fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    pub(crate) fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub(crate) fn text_content(&self, node_id: NodeId) -> String {
        match self.nodes.get(node_id.0).map(|node| &node.node_type) {
            Some(NodeType::Document | NodeType::Element(_)) => {
                let mut out = String::new();
                for child in self.children(node_id) {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            Some(NodeType::Text(text)) => text.clone(),
            None => String::new(),
        }
    }

    pub(crate) fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|e| e.attrs.get(&name.to_ascii_lowercase()).cloned())
    }

    pub(crate) fn disabled(&self, node_id: NodeId) -> bool {
        self.element(node_id)
            .is_some_and(|e| e.attrs.contains_key("disabled"))
    }

    pub(crate) fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let lowered = name.to_ascii_lowercase();
        let connected = self.is_connected(node_id);
        let old_value = {
            let element = self.element_mut(node_id).ok_or_else(|| {
                Error::Runtime("setAttribute target is not an element".into())
            })?;
            element.attrs.insert(lowered.clone(), value.to_string())
        };

        if lowered == "id" && connected {
            self.rebuild_id_index();
        }

        self.records
            .push(MutationRecord::attributes(node_id, &lowered, old_value));
        Ok(())
    }

    pub(crate) fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        let lowered = name.to_ascii_lowercase();
        let connected = self.is_connected(node_id);
        let old_value = {
            let element = self.element_mut(node_id).ok_or_else(|| {
                Error::Runtime("removeAttribute target is not an element".into())
            })?;
            element.attrs.remove(&lowered)
        };

        // Removing an absent attribute is not a mutation.
        if old_value.is_none() {
            return Ok(());
        }
        if lowered == "id" && connected {
            self.rebuild_id_index();
        }
        self.records
            .push(MutationRecord::attributes(node_id, &lowered, old_value));
        Ok(())
    }

    pub(crate) fn style_get(&self, node_id: NodeId, key: &str) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;
        let name = css_property_name(key);
        let decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        Ok(decls
            .iter()
            .find(|(prop, _)| prop == &name)
            .map(|(_, value)| value.clone())
            .unwrap_or_default())
    }

    /// Sets one inline style property; an empty value removes it. The
    /// `style` attribute is only touched when its serialisation changes.
    pub(crate) fn style_set(&mut self, node_id: NodeId, key: &str, value: &str) -> Result<()> {
        let name = css_property_name(key);
        let current = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?
            .attrs
            .get("style")
            .cloned();

        let mut decls = parse_style_declarations(current.as_deref());
        if let Some(pos) = decls.iter().position(|(prop, _)| prop == &name) {
            if value.is_empty() {
                decls.remove(pos);
            } else {
                decls[pos].1 = value.trim().to_string();
            }
        } else if !value.is_empty() {
            decls.push((name, value.trim().to_string()));
        }

        if decls.is_empty() {
            if current.is_some() {
                self.remove_attr(node_id, "style")?;
            }
            return Ok(());
        }

        let serialized = serialize_style_declarations(&decls);
        if current.as_deref() == Some(serialized.as_str()) {
            return Ok(());
        }
        self.set_attr(node_id, "style", &serialized)
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId, op: &str) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(Error::Runtime(format!("{op} target cannot have children")));
        }
        if child == self.root || child == parent {
            return Err(Error::Runtime(format!("invalid {op} node")));
        }
        if !self.is_valid_node(child) {
            return Err(Error::Runtime(format!("{op} node is invalid")));
        }
        // Prevent cycles: parent must not be inside child's subtree.
        if self.contains(child, parent) {
            return Err(Error::Runtime(format!("{op} would create a cycle")));
        }
        Ok(())
    }

    fn detach_for_move(&mut self, child: NodeId) {
        if let Some(old_parent) = self.parent(child) {
            self.nodes[old_parent.0].children.retain(|id| *id != child);
            self.nodes[child.0].parent = None;
            self.records
                .push(MutationRecord::child_list(old_parent, Vec::new(), vec![child]));
        }
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertable(parent, child, "appendChild")?;
        self.detach_for_move(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.rebuild_id_index();
        self.records
            .push(MutationRecord::child_list(parent, vec![child], Vec::new()));
        Ok(())
    }

    pub(crate) fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertable(parent, child, "prepend")?;
        self.detach_for_move(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(0, child);
        self.rebuild_id_index();
        self.records
            .push(MutationRecord::child_list(parent, vec![child], Vec::new()));
        Ok(())
    }

    pub(crate) fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::Runtime("cannot remove document root".into()));
        }
        if !self.is_valid_node(node) {
            return Err(Error::Runtime("remove node is invalid".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.nodes[parent.0].children.retain(|id| *id != node);
        self.nodes[node.0].parent = None;
        self.rebuild_id_index();
        self.records
            .push(MutationRecord::child_list(parent, Vec::new(), vec![node]));
        Ok(())
    }

    /// Copies a subtree from another document (a parsed fragment) as a
    /// detached subtree of this one.
    pub(crate) fn import_subtree(&mut self, source: &Dom, source_node: NodeId) -> Result<NodeId> {
        self.import_subtree_into(source, source_node, None)
    }

    fn import_subtree_into(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            let node_type = match &source.nodes[source_node.0].node_type {
                NodeType::Document => {
                    return Err(Error::Runtime(
                        "cannot import a document node into a page".into(),
                    ));
                }
                NodeType::Element(element) => NodeType::Element(element.clone()),
                NodeType::Text(text) => NodeType::Text(text.clone()),
            };

            let node = self.create_node(parent, node_type);
            for child in &source.nodes[source_node.0].children {
                self.import_subtree_into(source, *child, Some(node))?;
            }
            Ok(node)
        })
    }

    pub(crate) fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        self.query_selector_all(selector).into_iter().next()
    }

    pub(crate) fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        if let Some(id) = selector.id_only() {
            return self.by_id(id).into_iter().collect();
        }
        self.query_selector_all_from(self.root, selector)
    }

    /// Matches among `root` and its descendants, in tree order.
    pub(crate) fn query_selector_all_from(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.collect_elements_dfs(root, &mut ids);

        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|candidate| self.matches(*candidate, selector) && seen.insert(*candidate))
            .collect()
    }

    pub(crate) fn matches(&self, node_id: NodeId, selector: &Selector) -> bool {
        selector
            .groups()
            .iter()
            .any(|steps| self.matches_selector_chain(node_id, steps))
    }

    fn can_have_children(&self, node_id: NodeId) -> bool {
        matches!(
            self.nodes.get(node_id.0).map(|n| &n.node_type),
            Some(NodeType::Document | NodeType::Element(_))
        )
    }

    fn rebuild_id_index(&mut self) {
        let mut next = HashMap::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if let NodeType::Element(element) = &self.nodes[node.0].node_type {
                if let Some(id) = element.attrs.get("id") {
                    if !id.is_empty() {
                        next.entry(id.clone()).or_insert(node);
                    }
                }
            }
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        self.id_index = next;
    }

    fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            if matches!(
                self.nodes.get(node_id.0).map(|node| &node.node_type),
                Some(NodeType::Element(_))
            ) {
                out.push(node_id);
            }
            for child in self.children(node_id) {
                self.collect_elements_dfs(*child, out);
            }
        })
    }

    fn matches_selector_chain(&self, node_id: NodeId, steps: &[SelectorPart]) -> bool {
        let Some((last, prefix)) = steps.split_last() else {
            return false;
        };
        self.matches_step(node_id, &last.step)
            && self.matches_chain_prefix(node_id, prefix, last.combinator)
    }

    /// Matches `prefix` against the ancestors of `current`. A descendant
    /// step tries every matching ancestor, not only the nearest one.
    fn matches_chain_prefix(
        &self,
        current: NodeId,
        prefix: &[SelectorPart],
        combinator: Option<SelectorCombinator>,
    ) -> bool {
        let Some((last, rest)) = prefix.split_last() else {
            return true;
        };
        match combinator.unwrap_or(SelectorCombinator::Descendant) {
            SelectorCombinator::Child => self.parent(current).is_some_and(|parent| {
                self.matches_step(parent, &last.step)
                    && self.matches_chain_prefix(parent, rest, last.combinator)
            }),
            SelectorCombinator::Descendant => {
                let mut cursor = self.parent(current);
                while let Some(ancestor) = cursor {
                    if self.matches_step(ancestor, &last.step)
                        && self.matches_chain_prefix(ancestor, rest, last.combinator)
                    {
                        return true;
                    }
                    cursor = self.parent(ancestor);
                }
                false
            }
        }
    }

    fn matches_step(&self, node_id: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };

        if let Some(tag) = &step.tag {
            if !element.tag_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        if let Some(id) = &step.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }

        if step
            .classes
            .iter()
            .any(|class_name| !has_class(element, class_name))
        {
            return false;
        }

        step.attrs.iter().all(|cond| match cond {
            SelectorAttrCondition::Exists { key } => element.attrs.contains_key(key),
            SelectorAttrCondition::Eq { key, value } => element.attrs.get(key) == Some(value),
        })
    }

    pub(crate) fn dump_node(&self, node_id: NodeId) -> String {
        match self.nodes.get(node_id.0).map(|node| &node.node_type) {
            Some(NodeType::Document) => {
                let mut out = String::new();
                for child in self.children(node_id) {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            Some(NodeType::Text(text)) => text.clone(),
            Some(NodeType::Element(element)) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                let mut attrs = element.attrs.iter().collect::<Vec<_>>();
                attrs.sort_by(|(a, _), (b, _)| a.cmp(b));
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&value.replace('"', "&quot;"));
                    out.push('"');
                }
                out.push('>');
                for child in self.children(node_id) {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
            None => String::new(),
        }
    }
}

fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attrs
        .get("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}
