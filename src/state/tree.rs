use std::collections::HashSet;

use super::StateError;
use crate::schema::ModelType;

/// What a leaf state shows: a view name and, optionally, the model whose
/// records make up the view's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDescriptor {
    name: String,
    content: Option<ModelType>,
}

impl ViewDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: None,
        }
    }

    /// Load every record of `model` as this view's content.
    pub fn showing(mut self, model: impl Into<ModelType>) -> Self {
        self.content = Some(model.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> Option<&ModelType> {
        self.content.as_ref()
    }
}

/// Builder for one node of a state tree.
#[derive(Debug, Clone)]
pub struct StateNode {
    name: String,
    view: Option<ViewDescriptor>,
    initial: Option<String>,
    children: Vec<StateNode>,
}

impl StateNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            view: None,
            initial: None,
            children: Vec::new(),
        }
    }

    pub fn view(mut self, view: ViewDescriptor) -> Self {
        self.view = Some(view);
        self
    }

    /// Child entered when this node is entered without a longer path.
    pub fn initial(mut self, child: impl Into<String>) -> Self {
        self.initial = Some(child.into());
        self
    }

    pub fn child(mut self, node: StateNode) -> Self {
        self.children.push(node);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    initial: Option<NodeId>,
    view: Option<ViewDescriptor>,
}

/// Validated, immutable state hierarchy stored as an arena.
#[derive(Debug)]
pub struct StateTree {
    nodes: Vec<Node>,
}

impl StateTree {
    /// Build and validate a tree rooted at `root`.
    ///
    /// Every node with children must name one of them as its initial
    /// state, and sibling names must be unique.
    pub fn build(root: StateNode) -> Result<Self, StateError> {
        let mut tree = Self { nodes: Vec::new() };
        tree.insert(root, None)?;
        tracing::debug!(states = tree.nodes.len(), "State tree built");
        Ok(tree)
    }

    fn insert(&mut self, node: StateNode, parent: Option<NodeId>) -> Result<NodeId, StateError> {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: node.name,
            parent,
            children: Vec::new(),
            initial: None,
            view: node.view,
        });

        let mut names = HashSet::new();
        for child in &node.children {
            if !names.insert(child.name.clone()) {
                return Err(StateError::DuplicateState {
                    parent: self.display_path(id),
                    name: child.name.clone(),
                });
            }
        }

        let mut children = Vec::with_capacity(node.children.len());
        for child in node.children {
            children.push(self.insert(child, Some(id))?);
        }

        let initial = match node.initial {
            Some(initial) => Some(
                children
                    .iter()
                    .copied()
                    .find(|c| self.nodes[c.0].name == initial)
                    .ok_or_else(|| StateError::UnknownInitial {
                        state: self.display_path(id),
                        initial,
                    })?,
            ),
            None if !children.is_empty() => {
                return Err(StateError::MissingInitial {
                    state: self.display_path(id),
                })
            }
            None => None,
        };

        let slot = &mut self.nodes[id.0];
        slot.children = children;
        slot.initial = initial;
        Ok(id)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn initial(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].initial
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id.0].children.is_empty()
    }

    pub fn view(&self, id: NodeId) -> Option<&ViewDescriptor> {
        self.nodes[id.0].view.as_ref()
    }

    /// Walk a dotted path from the root. The empty path is the root.
    pub fn resolve(&self, path: &str) -> Result<NodeId, StateError> {
        let mut current = self.root();
        if path.is_empty() {
            return Ok(current);
        }
        for segment in path.split('.') {
            current = self
                .children(current)
                .iter()
                .copied()
                .find(|c| self.name(*c) == segment)
                .ok_or_else(|| StateError::UnknownState {
                    path: path.to_string(),
                })?;
        }
        Ok(current)
    }

    /// Dotted path from the root, excluding the root itself.
    pub fn path(&self, id: NodeId) -> String {
        self.ancestors(id)
            .into_iter()
            .skip(1)
            .map(|n| self.name(n))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn display_path(&self, id: NodeId) -> String {
        let path = self.path(id);
        if path.is_empty() {
            self.name(id).to_string()
        } else {
            path
        }
    }

    /// Nodes from the root down to `id`, inclusive.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }
}

/// Follow initial-child pointers from `from` down to a leaf.
pub fn enter(tree: &StateTree, from: NodeId) -> NodeId {
    let mut current = from;
    while let Some(initial) = tree.initial(current) {
        current = initial;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photoblog() -> StateTree {
        StateTree::build(
            StateNode::new("root")
                .initial("photos")
                .child(
                    StateNode::new("photos")
                        .initial("index")
                        .child(
                            StateNode::new("index")
                                .view(ViewDescriptor::new("photos_index").showing("photo")),
                        )
                        .child(StateNode::new("show").view(ViewDescriptor::new("photo_show"))),
                )
                .child(StateNode::new("about").view(ViewDescriptor::new("about"))),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_and_path() {
        let tree = photoblog();
        let show = tree.resolve("photos.show").unwrap();
        assert_eq!(tree.name(show), "show");
        assert_eq!(tree.path(show), "photos.show");
        assert_eq!(tree.resolve("").unwrap(), tree.root());
        assert_eq!(tree.path(tree.root()), "");
    }

    #[test]
    fn test_resolve_unknown_segment() {
        let err = photoblog().resolve("photos.missing").unwrap_err();
        assert_eq!(
            err,
            StateError::UnknownState {
                path: "photos.missing".to_string()
            }
        );
    }

    #[test]
    fn test_enter_follows_initial_chain() {
        let tree = photoblog();
        let leaf = enter(&tree, tree.root());
        assert_eq!(tree.path(leaf), "photos.index");
        assert_eq!(tree.view(leaf).unwrap().name(), "photos_index");

        let about = tree.resolve("about").unwrap();
        assert_eq!(enter(&tree, about), about);
    }

    #[test]
    fn test_build_rejects_invalid_trees() {
        let missing = StateTree::build(StateNode::new("root").child(StateNode::new("a")));
        assert!(matches!(missing, Err(StateError::MissingInitial { .. })));

        let unknown = StateTree::build(
            StateNode::new("root")
                .initial("b")
                .child(StateNode::new("a")),
        );
        assert!(matches!(unknown, Err(StateError::UnknownInitial { .. })));

        let duplicate = StateTree::build(
            StateNode::new("root")
                .initial("a")
                .child(StateNode::new("a"))
                .child(StateNode::new("a")),
        );
        assert!(matches!(duplicate, Err(StateError::DuplicateState { .. })));
    }
}
