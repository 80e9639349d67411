use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub name: String,
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(HierarchyNode::size).sum::<usize>()
    }

    pub fn find(&self, name: &str) -> Option<&HierarchyNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

/// Builds a forest from flat `(name, parent)` pairs where the parent link is a name.
///
/// A record becomes a root when its parent is empty, equals its own name, or
/// does not resolve to any record. When names repeat, children attach to the
/// first record with that name. Parent cycles are cut at the first member (in
/// input order) whose walk returns to itself, which then becomes a root.
/// Roots and children keep input order.
pub fn build_hierarchy<I, N, P>(records: I) -> Vec<HierarchyNode>
where
    I: IntoIterator<Item = (N, P)>,
    N: Into<String>,
    P: Into<String>,
{
    let records: Vec<(String, String)> = records
        .into_iter()
        .map(|(name, parent)| {
            (
                name.into().trim().to_string(),
                parent.into().trim().to_string(),
            )
        })
        .collect();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    for (position, (name, _)) in records.iter().enumerate() {
        index.entry(name.as_str()).or_insert(position);
    }

    let mut parent_of: Vec<Option<usize>> = records
        .iter()
        .enumerate()
        .map(|(position, (name, parent))| {
            if parent.is_empty() || parent == name {
                return None;
            }
            index
                .get(parent.as_str())
                .copied()
                .filter(|resolved| *resolved != position)
        })
        .collect();

    for position in 0..records.len() {
        let mut seen = HashSet::from([position]);
        let mut cursor = parent_of[position];
        while let Some(ancestor) = cursor {
            if ancestor == position {
                parent_of[position] = None;
                break;
            }
            if !seen.insert(ancestor) {
                break;
            }
            cursor = parent_of[ancestor];
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut roots = Vec::new();
    for (position, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(parent) => children[*parent].push(position),
            None => roots.push(position),
        }
    }

    roots
        .into_iter()
        .map(|root| assemble(root, &records, &children))
        .collect()
}

fn assemble(
    position: usize,
    records: &[(String, String)],
    children: &[Vec<usize>],
) -> HierarchyNode {
    HierarchyNode {
        name: records[position].0.clone(),
        children: children[position]
            .iter()
            .map(|child| assemble(*child, records, children))
            .collect(),
    }
}
