//! Workspace file tree synthesis.
//!
//! The backend lists a session's workspace as a flat list, a nested tree, or
//! some mix of both, and the nesting it sends is not reliable. Every record is
//! flattened, indexed by path, and the hierarchy is rebuilt from the
//! `/`-separated paths alone:
//!
//! ```text
//! [a/b.txt, a/c/d.txt]  ──▶  a/
//!                            ├── c/
//!                            │   └── d.txt
//!                            └── b.txt
//! ```
//!
//! Missing ancestors become implicit folders, siblings are ordered folders
//! first and then by name, and folders left without children are pruned.

use crate::sessions::null_as_default;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Node type. `Folder` sorts before `File`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Folder,
    /// Explicit records without a `type` are treated as files.
    #[default]
    File,
}

/// One file or folder in a session workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sole identity of the node.
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileRecord {
    /// Plain file record identified by its path.
    pub fn file(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: Some(path.clone()),
            name: last_segment(&path).to_string(),
            path,
            kind: FileKind::File,
            children: None,
            url: None,
        }
    }

    /// Folder synthesized because a descendant path requires it.
    fn implicit_folder(path: &str) -> Self {
        Self {
            id: Some(path.to_string()),
            name: last_segment(path).to_string(),
            path: path.to_string(),
            kind: FileKind::Folder,
            children: None,
            url: None,
        }
    }

    /// Copy of this record with its nesting discarded.
    fn detached(&self) -> Self {
        Self {
            id: self.id.clone(),
            path: self.path.clone(),
            name: if self.name.is_empty() {
                last_segment(&self.path).to_string()
            } else {
                self.name.clone()
            },
            kind: self.kind,
            children: None,
            url: self.url.clone(),
        }
    }
}

/// Last non-empty `/` segment, or the whole path when it has none.
fn last_segment(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// Ancestor prefixes of `path`, shortest first, ending with `path` itself.
///
/// Empty segments (leading `/`, `//`) never yield an ancestor, so a malformed
/// path still lands at the root under its own literal string.
fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(move |&idx| idx > 0 && !path[..idx].ends_with('/'))
        .map(move |idx| &path[..idx])
        .chain(std::iter::once(path))
}

/// Every record in `records`, depth first, including nested `children`.
pub fn flatten(records: &[FileRecord]) -> Vec<&FileRecord> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        out.push(record);
        if let Some(children) = &record.children {
            out.extend(flatten(children));
        }
    }
    out
}

/// Rebuild a sorted forest from any mix of flat and nested records.
///
/// Duplicate paths resolve last-write-wins. The result still contains empty
/// folders; see [`remove_empty_folders`].
pub fn build_file_tree(records: &[FileRecord]) -> Vec<FileRecord> {
    let mut index: BTreeMap<String, FileRecord> = BTreeMap::new();
    for record in flatten(records) {
        index.insert(record.path.clone(), record.detached());
    }

    let mut roots: Vec<String> = Vec::new();
    let mut links: HashMap<String, Vec<String>> = HashMap::new();
    let mut linked: HashSet<String> = HashSet::new();

    let registered: Vec<String> = index.keys().cloned().collect();
    for path in &registered {
        let mut parent: Option<&str> = None;
        for prefix in prefixes(path) {
            if linked.insert(prefix.to_string()) {
                index
                    .entry(prefix.to_string())
                    .or_insert_with(|| FileRecord::implicit_folder(prefix));
                match parent {
                    Some(parent) => links
                        .entry(parent.to_string())
                        .or_default()
                        .push(prefix.to_string()),
                    None => roots.push(prefix.to_string()),
                }
            }
            parent = Some(prefix);
        }
    }

    let mut forest: Vec<FileRecord> = roots
        .iter()
        .filter_map(|path| assemble(path, &mut index, &links))
        .collect();
    sort_tree(&mut forest);
    forest
}

/// Move `path` and its linked descendants out of the index into an owned tree.
fn assemble(
    path: &str,
    index: &mut BTreeMap<String, FileRecord>,
    links: &HashMap<String, Vec<String>>,
) -> Option<FileRecord> {
    let mut node = index.remove(path)?;
    let children: Vec<FileRecord> = links
        .get(path)
        .map(|paths| {
            paths
                .iter()
                .filter_map(|child| assemble(child, index, links))
                .collect()
        })
        .unwrap_or_default();

    node.children = match node.kind {
        FileKind::Folder => Some(children),
        FileKind::File if children.is_empty() => None,
        // A file record that other paths nest under keeps them.
        FileKind::File => Some(children),
    };
    Some(node)
}

/// Order siblings folders first, then by name (case-sensitive), recursively.
pub fn sort_tree(nodes: &mut [FileRecord]) {
    nodes.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.path.cmp(&b.path))
    });
    for node in nodes.iter_mut() {
        if let Some(children) = node.children.as_mut() {
            sort_tree(children);
        }
    }
}

/// Drop folders that end up with no children, innermost first.
///
/// Subtrees nested under file records are pruned too.
pub fn remove_empty_folders(nodes: Vec<FileRecord>) -> Vec<FileRecord> {
    nodes
        .into_iter()
        .filter_map(|mut node| {
            let children = node
                .children
                .take()
                .map(remove_empty_folders)
                .filter(|children| !children.is_empty());
            if node.kind == FileKind::Folder && children.is_none() {
                return None;
            }
            node.children = children;
            Some(node)
        })
        .collect()
}

/// Rewrite every node's `url` through `resolve(resource_id, path)`.
pub fn fix_urls<F>(nodes: Vec<FileRecord>, resource_id: &str, resolve: &F) -> Vec<FileRecord>
where
    F: Fn(&str, &str) -> String,
{
    nodes
        .into_iter()
        .map(|mut node| {
            node.url = Some(resolve(resource_id, &node.path));
            node.children = node
                .children
                .map(|children| fix_urls(children, resource_id, resolve));
            node
        })
        .collect()
}

/// Build, prune and resolve URLs in one pass; what the file panel renders.
pub fn workspace_tree<F>(records: &[FileRecord], resource_id: &str, resolve: &F) -> Vec<FileRecord>
where
    F: Fn(&str, &str) -> String,
{
    let tree = remove_empty_folders(build_file_tree(records));
    fix_urls(tree, resource_id, resolve)
}

/// Flat file records from a session's `state_patch.workspace_state.file_changes`.
///
/// Used when the workspace listing endpoint is unavailable. Entries may be
/// objects carrying `path` or bare path strings.
pub fn records_from_file_changes(state_patch: &serde_json::Value) -> Vec<FileRecord> {
    let Some(changes) = state_patch
        .pointer("/workspace_state/file_changes")
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    changes
        .iter()
        .filter_map(|change| match change {
            serde_json::Value::String(path) => Some(path.as_str()),
            other => other.get("path").and_then(|p| p.as_str()),
        })
        .map(FileRecord::file)
        .collect()
}
