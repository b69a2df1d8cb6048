//! Component instance tree.
//!
//! Nodes live in an arena indexed by [`ComponentId`]; parents and children
//! refer to each other by index. Paths are the dotted instance names from
//! the root, with [`EXTERNAL`](crate::trace::EXTERNAL) standing in for the
//! world outside the system.

use serde::{Deserialize, Serialize};

use crate::identity::{ComponentId, EventId, Peer, PortId};
use crate::trace::EXTERNAL;

/// How a component is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Generated or hand-written component dispatched by the kernel.
    #[default]
    Native,
    /// Component driven from outside the kernel; exempt from collateral blocking.
    Foreign,
}

/// A declaration that must be bound before the system may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingCheck {
    /// A provided port whose requirer must be connected.
    Provided(PortId),
    /// A required port that some provider must be connected to.
    Required {
        /// Port name on the requiring component.
        port: String,
    },
    /// An in-event that needs a body.
    InEvent(EventId),
    /// An out-event that needs a handler.
    OutEvent(EventId),
}

/// One component instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaNode {
    /// Instance name.
    pub name: String,
    /// Component type name.
    pub type_name: String,
    /// Enclosing system, if any.
    pub parent: Option<ComponentId>,
    /// Sub-instances in declaration order.
    pub children: Vec<ComponentId>,
    /// Dispatch discipline.
    pub kind: ComponentKind,
    /// Declarations checked by [`Runtime::check_bindings`](crate::Runtime::check_bindings).
    pub checks: Vec<BindingCheck>,
}

/// Arena of component nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaTree {
    nodes: Vec<MetaNode>,
}

impl MetaTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under `parent` and return its id.
    pub fn add(
        &mut self,
        name: &str,
        type_name: &str,
        parent: Option<ComponentId>,
        kind: ComponentKind,
    ) -> ComponentId {
        let id = ComponentId(self.nodes.len());
        self.nodes.push(MetaNode {
            name: name.to_string(),
            type_name: type_name.to_string(),
            parent,
            children: Vec::new(),
            kind,
            checks: Vec::new(),
        });
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(p.0)) {
            node.children.push(id);
        }
        id
    }

    /// Node for `id`.
    #[must_use]
    pub fn get(&self, id: ComponentId) -> Option<&MetaNode> {
        self.nodes.get(id.0)
    }

    /// Change an instance name, e.g. to root a system as `sut`.
    pub fn rename(&mut self, id: ComponentId, name: &str) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.name = name.to_string();
        }
    }

    /// Record a binding obligation on `id`.
    pub fn require(&mut self, id: ComponentId, check: BindingCheck) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.checks.push(check);
        }
    }

    /// Dispatch discipline of `peer`; the external world counts as foreign.
    #[must_use]
    pub fn kind(&self, peer: Peer) -> ComponentKind {
        peer.and_then(|id| self.get(id))
            .map_or(ComponentKind::Foreign, |node| node.kind)
    }

    /// Dotted instance path of `peer`.
    #[must_use]
    pub fn path(&self, peer: Peer) -> String {
        let Some(mut id) = peer else {
            return EXTERNAL.to_string();
        };
        let mut names = Vec::new();
        while let Some(node) = self.get(id) {
            names.push(node.name.as_str());
            match node.parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
        names.reverse();
        names.join(".")
    }

    /// Path of `peer` followed by `.name`.
    #[must_use]
    pub fn port_path(&self, peer: Peer, name: &str) -> String {
        format!("{}.{name}", self.path(peer))
    }

    /// Visit `root` and all of its descendants in pre-order.
    pub fn apply<F>(&self, root: ComponentId, mut visit: F)
    where
        F: FnMut(ComponentId, &MetaNode),
    {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            visit(id, node);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    /// `path: type` lines for the subtree under `root`.
    #[must_use]
    pub fn dump_tree(&self, root: ComponentId) -> Vec<String> {
        let mut lines = Vec::new();
        self.apply(root, |id, node| {
            lines.push(format!("{}: {}", self.path(Some(id)), node.type_name));
        });
        lines
    }

    /// Nodes without a parent.
    #[must_use]
    pub fn roots(&self) -> Vec<ComponentId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(index, _)| ComponentId(index))
            .collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
