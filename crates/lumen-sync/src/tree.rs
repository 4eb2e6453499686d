//! Category tree operations used by the merge.
//!
//! Every function here works on owned trees cloned from the catalog, so no
//! step can observe another merge's intermediate state.

use std::collections::{BTreeSet, HashMap, HashSet};

use lumen_store::CategoryNode;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Id of the synthetic top-level category holding orphaned playlists.
pub const ABANDONED_CATEGORY_ID: &str = "0";

/// Id of the synthetic subcategory orphaned playlists are filed under.
pub const ABANDONED_SUB_CATEGORY_ID: &str = "-1";

/// Set `path` on every node that lacks one, pre-order.
///
/// Nodes that already carry a path keep it and their children extend it, so
/// running this twice is a no-op.
pub fn compute_paths(nodes: &mut [CategoryNode]) {
    assign_paths(nodes, &[]);
}

fn assign_paths(nodes: &mut [CategoryNode], parent: &[String]) {
    for node in nodes {
        let path = match &node.path {
            Some(path) => path.clone(),
            None => {
                let mut path = parent.to_vec();
                path.push(node.id.clone());
                node.path = Some(path.clone());
                path
            }
        };
        assign_paths(&mut node.sub_categories, &path);
    }
}

/// Append each custom entry's subcategories to the top-level category with
/// the same id. Entries naming an unknown category are skipped.
pub fn inject_custom(categories: &mut [CategoryNode], custom: &[CategoryNode]) {
    for entry in custom {
        match categories.iter_mut().find(|c| c.id == entry.id) {
            Some(category) => category
                .sub_categories
                .extend(entry.sub_categories.iter().cloned()),
            None => debug!(category = %entry.id, "custom subcategories for unknown category"),
        }
    }
}

/// Every id in the tree, at any depth.
pub fn collect_ids(nodes: &[CategoryNode]) -> HashSet<String> {
    let mut ids = HashSet::new();
    let mut stack: Vec<&CategoryNode> = nodes.iter().collect();
    while let Some(node) = stack.pop() {
        ids.insert(node.id.clone());
        stack.extend(node.sub_categories.iter());
    }
    ids
}

/// Remove hidden subcategories at every depth below the top level. A
/// top-level category left without subcategories is dropped.
pub fn hide_sub_categories(
    categories: Vec<CategoryNode>,
    hidden: &BTreeSet<String>,
) -> Vec<CategoryNode> {
    categories
        .into_iter()
        .filter_map(|mut category| {
            category.sub_categories = prune(std::mem::take(&mut category.sub_categories), hidden);
            (!category.sub_categories.is_empty()).then_some(category)
        })
        .collect()
}

fn prune(nodes: Vec<CategoryNode>, hidden: &BTreeSet<String>) -> Vec<CategoryNode> {
    nodes
        .into_iter()
        .filter(|node| !hidden.contains(&node.id))
        .map(|mut node| {
            node.sub_categories = prune(std::mem::take(&mut node.sub_categories), hidden);
            node
        })
        .collect()
}

/// Set `count` on every leaf below the top level from `counts`. Top-level
/// and intermediate nodes are reset to zero.
pub fn assign_counts(categories: &mut [CategoryNode], counts: &HashMap<&str, usize>) {
    for category in categories {
        category.count = 0;
        count_children(&mut category.sub_categories, counts);
    }
}

fn count_children(nodes: &mut [CategoryNode], counts: &HashMap<&str, usize>) {
    for node in nodes {
        if node.sub_categories.is_empty() {
            node.count = counts.get(node.id.as_str()).copied().unwrap_or(0);
        } else {
            node.count = 0;
            count_children(&mut node.sub_categories, counts);
        }
    }
}

/// The synthetic category pair holding orphaned playlists.
pub fn abandoned_bucket(count: usize) -> CategoryNode {
    let mut child = CategoryNode::new(ABANDONED_SUB_CATEGORY_ID, "Abandoned playlists");
    child.path = Some(vec![
        ABANDONED_CATEGORY_ID.to_string(),
        ABANDONED_SUB_CATEGORY_ID.to_string(),
    ]);
    child.count = count;

    let mut bucket = CategoryNode::new(ABANDONED_CATEGORY_ID, "Abandoned").with_children(vec![child]);
    bucket.path = Some(vec![ABANDONED_CATEGORY_ID.to_string()]);
    bucket
}

/// One row of the flattened category list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatCategory {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub path: Vec<String>,
    pub depth: usize,
    pub count: usize,
}

/// Flatten the tree into pre-order rows.
pub fn flatten_categories(categories: &[CategoryNode]) -> Vec<FlatCategory> {
    let mut out = Vec::new();
    push_flat(categories, None, 0, &mut out);
    out
}

fn push_flat(
    nodes: &[CategoryNode],
    parent: Option<&CategoryNode>,
    depth: usize,
    out: &mut Vec<FlatCategory>,
) {
    for node in nodes {
        let path = node.path.clone().unwrap_or_else(|| {
            let mut path = parent
                .and_then(|p| p.path.clone())
                .unwrap_or_default();
            path.push(node.id.clone());
            path
        });
        out.push(FlatCategory {
            id: node.id.clone(),
            name: node.name.first().unwrap_or_default().to_string(),
            parent_id: parent.map(|p| p.id.clone()),
            path,
            depth,
            count: node.count,
        });
        push_flat(&node.sub_categories, Some(node), depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample() -> Vec<CategoryNode> {
        vec![
            CategoryNode::new("A", "Alpha").with_children(vec![
                CategoryNode::new("A1", "Alpha one")
                    .with_children(vec![CategoryNode::new("A1a", "Deep")]),
                CategoryNode::new("A2", "Alpha two"),
            ]),
            CategoryNode::new("B", "Beta").with_children(vec![CategoryNode::new("B1", "Beta one")]),
        ]
    }

    #[test]
    fn test_compute_paths() {
        let mut tree = sample();
        compute_paths(&mut tree);
        assert_eq!(tree[0].path, Some(vec!["A".to_string()]));
        assert_eq!(
            tree[0].sub_categories[0].sub_categories[0].path,
            Some(vec!["A".to_string(), "A1".to_string(), "A1a".to_string()])
        );
    }

    #[test]
    fn test_existing_path_is_kept() {
        let mut tree = sample();
        tree[1].path = Some(vec!["root".to_string(), "B".to_string()]);
        compute_paths(&mut tree);
        assert_eq!(
            tree[1].sub_categories[0].path,
            Some(vec!["root".to_string(), "B".to_string(), "B1".to_string()])
        );
    }

    #[test]
    fn test_inject_custom_appends() {
        let mut tree = sample();
        let custom = vec![
            CategoryNode::new("B", "").with_children(vec![CategoryNode::new("B9", "Custom")]),
            CategoryNode::new("missing", "").with_children(vec![CategoryNode::new("X", "x")]),
        ];
        inject_custom(&mut tree, &custom);
        let ids: Vec<_> = tree[1].sub_categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["B1", "B9"]);
        assert!(!collect_ids(&tree).contains("X"));
    }

    #[test]
    fn test_hide_drops_empty_top_level() {
        let hidden: BTreeSet<String> = ["B1", "A1a"].iter().map(|s| s.to_string()).collect();
        let tree = hide_sub_categories(sample(), &hidden);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "A");
        assert!(tree[0].sub_categories[0].sub_categories.is_empty());
    }

    #[test]
    fn test_assign_counts() {
        let mut tree = sample();
        tree[0].count = 9;
        let counts: HashMap<&str, usize> = [("A1", 2), ("A1a", 1), ("A", 5)].into_iter().collect();
        assign_counts(&mut tree, &counts);
        assert_eq!(tree[0].count, 0);
        // A1 has children of its own, so only its leaf is counted.
        assert_eq!(tree[0].sub_categories[0].count, 0);
        assert_eq!(tree[0].sub_categories[0].sub_categories[0].count, 1);
        assert_eq!(tree[0].sub_categories[1].count, 0);
    }

    #[test]
    fn test_flatten_categories_preorder() {
        let mut tree = sample();
        compute_paths(&mut tree);
        let flat = flatten_categories(&tree);
        let ids: Vec<_> = flat.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "A1", "A1a", "A2", "B", "B1"]);
        assert_eq!(flat[2].depth, 2);
        assert_eq!(flat[2].parent_id.as_deref(), Some("A1"));
        assert_eq!(flat[4].parent_id, None);
    }

    #[test]
    fn test_abandoned_bucket_shape() {
        let bucket = abandoned_bucket(3);
        assert_eq!(bucket.id, ABANDONED_CATEGORY_ID);
        assert_eq!(bucket.sub_categories.len(), 1);
        assert_eq!(bucket.sub_categories[0].id, ABANDONED_SUB_CATEGORY_ID);
        assert_eq!(bucket.sub_categories[0].count, 3);
    }

    fn arb_tree() -> impl Strategy<Value = Vec<CategoryNode>> {
        let leaf = "[a-z]{1,4}".prop_map(|id| CategoryNode::new(id, "leaf"));
        let node = leaf.prop_recursive(3, 24, 4, |inner| {
            ("[a-z]{1,4}", prop::collection::vec(inner, 0..4))
                .prop_map(|(id, children)| CategoryNode::new(id, "node").with_children(children))
        });
        prop::collection::vec(node, 0..5)
    }

    fn all_paths(nodes: &[CategoryNode], out: &mut Vec<Option<Vec<String>>>) {
        for node in nodes {
            out.push(node.path.clone());
            all_paths(&node.sub_categories, out);
        }
    }

    proptest! {
        #[test]
        fn compute_paths_is_idempotent(tree in arb_tree()) {
            let mut once = tree.clone();
            compute_paths(&mut once);
            let mut twice = once.clone();
            compute_paths(&mut twice);
            prop_assert_eq!(&once, &twice);

            let mut paths = Vec::new();
            all_paths(&once, &mut paths);
            prop_assert!(paths.iter().all(|p| p.is_some()));
        }

        #[test]
        fn paths_end_with_own_id(tree in arb_tree()) {
            let mut tree = tree;
            compute_paths(&mut tree);
            for row in flatten_categories(&tree) {
                prop_assert_eq!(row.path.last(), Some(&row.id));
                prop_assert_eq!(row.path.len(), row.depth + 1);
            }
        }
    }
}
