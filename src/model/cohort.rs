//! Cohort configurations: set-operation trees over aggregate configurations.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AggregateConfiguration, AggregateId, Catalogue, ModelError, ModelResult, SqlParameter};

pub type ContainerId = u32;
pub type JoinableId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetOperation {
    Union,
    Intersect,
    Except,
}

impl SetOperation {
    pub fn keyword(&self) -> &'static str {
        match self {
            SetOperation::Union => "UNION",
            SetOperation::Intersect => "INTERSECT",
            SetOperation::Except => "EXCEPT",
        }
    }
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CohortNode {
    Aggregate(AggregateConfiguration),
    Container(CohortContainer),
}

impl CohortNode {
    pub fn order(&self) -> i32 {
        match self {
            CohortNode::Aggregate(a) => a.order,
            CohortNode::Container(c) => c.order,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CohortNode::Aggregate(a) => &a.name,
            CohortNode::Container(c) => &c.name,
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            CohortNode::Aggregate(a) => NodeKey::Leaf(a.id),
            CohortNode::Container(c) => NodeKey::SetOp(c.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortContainer {
    pub id: ContainerId,
    pub name: String,
    pub operation: SetOperation,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub children: Vec<CohortNode>,
}

impl CohortContainer {
    pub fn new(id: ContainerId, name: impl Into<String>, operation: SetOperation) -> Self {
        Self {
            id,
            name: name.into(),
            operation,
            order: 0,
            children: Vec::new(),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateConfiguration) -> Self {
        self.children.push(CohortNode::Aggregate(aggregate));
        self
    }

    pub fn with_container(mut self, container: CohortContainer) -> Self {
        self.children.push(CohortNode::Container(container));
        self
    }

    /// Children sorted by `order`; ties keep their authored position.
    pub fn ordered_children(&self) -> Vec<&CohortNode> {
        let mut children: Vec<&CohortNode> = self.children.iter().collect();
        children.sort_by_key(|c| c.order());
        children
    }

    /// Every aggregate below this container, depth first in child order.
    pub fn aggregates_recursive(&self) -> Vec<&AggregateConfiguration> {
        let mut out = Vec::new();
        for child in self.ordered_children() {
            match child {
                CohortNode::Aggregate(a) => out.push(a),
                CohortNode::Container(c) => out.extend(c.aggregates_recursive()),
            }
        }
        out
    }

    /// Every container below this one (not including itself).
    pub fn subcontainers_recursive(&self) -> Vec<&CohortContainer> {
        let mut out = Vec::new();
        for child in self.ordered_children() {
            if let CohortNode::Container(c) = child {
                out.push(c);
                out.extend(c.subcontainers_recursive());
            }
        }
        out
    }

    pub fn find_container(&self, id: ContainerId) -> Option<&CohortContainer> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            CohortNode::Container(c) => c.find_container(id),
            CohortNode::Aggregate(_) => None,
        })
    }

    pub fn find_aggregate(&self, id: AggregateId) -> Option<&AggregateConfiguration> {
        self.children.iter().find_map(|child| match child {
            CohortNode::Aggregate(a) if a.id == id => Some(a),
            CohortNode::Aggregate(_) => None,
            CohortNode::Container(c) => c.find_aggregate(id),
        })
    }

    /// The container directly holding `key`, and whether `key` is its first
    /// child in order.
    pub fn parent_of(&self, key: NodeKey) -> Option<(&CohortContainer, bool)> {
        let children = self.ordered_children();
        if let Some(pos) = children.iter().position(|c| c.key() == key) {
            return Some((self, pos == 0));
        }
        children.into_iter().find_map(|child| match child {
            CohortNode::Container(c) => c.parent_of(key),
            CohortNode::Aggregate(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinDirection {
    #[default]
    Left,
    Right,
}

impl JoinDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinDirection::Left => "LEFT",
            JoinDirection::Right => "RIGHT",
        }
    }
}

/// An aggregate's dependency on a patient index table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinableUse {
    pub joinable: JoinableId,
    #[serde(default)]
    pub direction: JoinDirection,
}

/// A patient index table: an aggregate joined into other aggregates rather
/// than run as a cohort set of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joinable {
    pub id: JoinableId,
    pub aggregate: AggregateConfiguration,
}

impl Joinable {
    /// Alias of the joined subquery.
    pub fn alias(&self) -> String {
        format!("ix{}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfiguration {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub catalogue: Catalogue,
    pub root: CohortContainer,
    #[serde(default)]
    pub joinables: Vec<Joinable>,
    /// Global parameters, supplied once for the whole tree.
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
}

impl CohortConfiguration {
    pub fn from_json_str(json: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn joinable(&self, id: JoinableId) -> Option<&Joinable> {
        self.joinables.iter().find(|j| j.id == id)
    }

    pub fn aggregate(&self, id: AggregateId) -> Option<&AggregateConfiguration> {
        self.root.find_aggregate(id)
    }

    pub fn container(&self, id: ContainerId) -> Option<&CohortContainer> {
        self.root.find_container(id)
    }

    /// Display name of a node, if it exists in this configuration.
    pub fn node_name(&self, key: NodeKey) -> Option<&str> {
        match key {
            NodeKey::Leaf(id) => self.aggregate(id).map(|a| a.name.as_str()),
            NodeKey::SetOp(id) => self.container(id).map(|c| c.name.as_str()),
            NodeKey::JoinSource(id) => self.joinable(id).map(|j| j.aggregate.name.as_str()),
        }
    }
}

/// Identity of a compilable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKey {
    Leaf(AggregateId),
    SetOp(ContainerId),
    JoinSource(JoinableId),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Leaf(id) => write!(f, "aggregate:{}", id),
            NodeKey::SetOp(id) => write!(f, "container:{}", id),
            NodeKey::JoinSource(id) => write!(f, "joinable:{}", id),
        }
    }
}
