//! The in-memory representation of a fetched key subtree.
//!
//! Mirrors the `nodeMapping`/`nodeValue` conversion of the original client:
//! an etcd node tree becomes a nested map keyed by path segment, with leaf
//! nodes holding their raw string value.

use std::collections::BTreeMap;

/// A node in a fetched context tree: either a value, or a directory of
/// further nodes keyed by segment name.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Leaf(String),
    Dir(BTreeMap<String, Tree>),
}

impl Default for Tree {
    fn default() -> Self {
        Tree::empty_dir()
    }
}

impl Tree {
    pub fn empty_dir() -> Self {
        Tree::Dir(BTreeMap::new())
    }

    pub fn leaf<S: Into<String>>(value: S) -> Self {
        Tree::Leaf(value.into())
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Tree::Dir(_))
    }

    /// Descends into `segments`, returning an empty directory if any segment
    /// along the way is absent or not itself a directory.
    pub fn descend(&self, segments: &[String]) -> Tree {
        let mut node = self;
        for segment in segments {
            match node {
                Tree::Dir(children) => match children.get(segment) {
                    Some(child) => node = child,
                    None => return Tree::empty_dir(),
                },
                Tree::Leaf(_) => return Tree::empty_dir(),
            }
        }
        node.clone()
    }

    /// Converts this tree into a `serde_json::Value` suitable for handing
    /// to a template engine as render context.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Tree::Leaf(s) => serde_json::Value::String(s),
            Tree::Dir(children) => {
                let map = children
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Maps a raw path segment to an identifier-safe name by replacing hyphens
/// with underscores, so that `{{ my-key }}` (invalid in a template
/// identifier) is addressable as `{{ my_key }}`.
pub fn key_name(segment: &str) -> String {
    segment.replace('-', "_")
}

/// Deep-merges `b` over `a`: at any path where both sides are directories,
/// their children are merged recursively; otherwise `b` simply replaces `a`
/// (this is also how a later directory replaces an earlier leaf of the same
/// name, and vice versa — the later value always wins except when both
/// sides are directories, in which case merging continues one level down).
pub fn deep_merge(a: Tree, b: Tree) -> Tree {
    match (a, b) {
        (Tree::Dir(mut a_children), Tree::Dir(b_children)) => {
            for (key, b_child) in b_children {
                match a_children.remove(&key) {
                    Some(a_child) => {
                        a_children.insert(key, deep_merge(a_child, b_child));
                    }
                    None => {
                        a_children.insert(key, b_child);
                    }
                }
            }
            Tree::Dir(a_children)
        }
        (_, b) => b,
    }
}
