//! Folder arena with leaf-first deletion ordering.
//!
//! Folders reference their parent by id. The tree is validated once on
//! construction (known parents, no cycles) and traversed with explicit
//! stacks, so arbitrarily deep trees cannot overflow the call stack.

use std::collections::{HashMap, HashSet};

use crate::error::ResourceError;
use crate::model::{Folder, FolderId};

struct FolderNode {
    folder: Folder,
    children: Vec<FolderId>,
}

/// Validated folder tree for one workspace.
pub struct FolderTree {
    nodes: HashMap<FolderId, FolderNode>,
    roots: Vec<FolderId>,
}

impl FolderTree {
    /// Build from a flat list. Fails on unknown parents or cycles.
    pub fn build(folders: Vec<Folder>) -> Result<Self, ResourceError> {
        let mut nodes: HashMap<FolderId, FolderNode> = HashMap::with_capacity(folders.len());
        for folder in folders {
            let id = folder.id;
            if nodes
                .insert(
                    id,
                    FolderNode {
                        folder,
                        children: Vec::new(),
                    },
                )
                .is_some()
            {
                return Err(ResourceError::FolderTree(format!("duplicate folder {}", id)));
            }
        }

        let mut links: Vec<(FolderId, FolderId, String)> = Vec::new();
        let mut roots: Vec<(String, FolderId)> = Vec::new();
        for node in nodes.values() {
            match node.folder.parent_id {
                Some(parent) if !nodes.contains_key(&parent) => {
                    return Err(ResourceError::FolderTree(format!(
                        "folder {} references unknown parent {}",
                        node.folder.id, parent
                    )));
                }
                Some(parent) => links.push((parent, node.folder.id, node.folder.name.clone())),
                None => roots.push((node.folder.name.clone(), node.folder.id)),
            }
        }

        // Deterministic sibling order: by name, then id.
        links.sort_by(|a, b| a.2.cmp(&b.2).then(a.1.cmp(&b.1)));
        for (parent, child, _) in links {
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }
        roots.sort();

        let tree = Self {
            nodes,
            roots: roots.into_iter().map(|(_, id)| id).collect(),
        };
        tree.check_acyclic()?;
        Ok(tree)
    }

    /// Walk parent pointers from every folder; a walk that revisits a
    /// folder before reaching a root or a known-good folder is a cycle.
    fn check_acyclic(&self) -> Result<(), ResourceError> {
        let mut acyclic: HashSet<FolderId> = HashSet::with_capacity(self.nodes.len());

        for start in self.nodes.keys() {
            let mut path: Vec<FolderId> = Vec::new();
            let mut on_path: HashSet<FolderId> = HashSet::new();
            let mut current = Some(*start);

            while let Some(id) = current {
                if acyclic.contains(&id) {
                    break;
                }
                if !on_path.insert(id) {
                    return Err(ResourceError::FolderTree(format!("cycle through folder {}", id)));
                }
                path.push(id);
                current = self.nodes.get(&id).and_then(|n| n.folder.parent_id);
            }
            acyclic.extend(path);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: FolderId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: FolderId) -> Option<&Folder> {
        self.nodes.get(&id).map(|n| &n.folder)
    }

    pub fn children(&self, id: FolderId) -> &[FolderId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// `root` and all of its descendants, parents before children.
    pub fn subtree(&self, root: FolderId) -> Vec<FolderId> {
        if !self.contains(root) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    /// Post-order of the subtree under `root` (or the whole forest when
    /// `None`): every folder appears after all of its descendants.
    pub fn deletion_order(&self, root: Option<FolderId>) -> Vec<FolderId> {
        let starts: Vec<FolderId> = match root {
            Some(id) if self.contains(id) => vec![id],
            Some(_) => return Vec::new(),
            None => self.roots.clone(),
        };

        let mut order = Vec::with_capacity(self.nodes.len());
        for start in starts {
            // (folder, children already pushed)
            let mut stack: Vec<(FolderId, bool)> = vec![(start, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                stack.push((id, true));
                for child in self.children(id).iter().rev() {
                    stack.push((*child, false));
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn folder(ws: Uuid, name: &str, parent: Option<&Folder>) -> Folder {
        Folder::new(ws, name, parent.map(|p| p.id))
    }

    #[test]
    fn test_leaf_first_order() {
        let ws = Uuid::new_v4();
        let a = folder(ws, "a", None);
        let b = folder(ws, "b", Some(&a));
        let c = folder(ws, "c", Some(&b));
        let d = folder(ws, "d", Some(&a));
        let e = folder(ws, "e", None);

        let tree = FolderTree::build(vec![d.clone(), c.clone(), e.clone(), a.clone(), b.clone()]).unwrap();

        assert_eq!(tree.deletion_order(None), vec![c.id, b.id, d.id, a.id, e.id]);
        assert_eq!(tree.deletion_order(Some(b.id)), vec![c.id, b.id]);
        assert_eq!(tree.subtree(a.id), vec![a.id, b.id, c.id, d.id]);
        assert!(tree.deletion_order(Some(Uuid::new_v4())).is_empty());
    }

    #[test]
    fn test_every_folder_after_descendants() {
        let ws = Uuid::new_v4();
        let root = folder(ws, "root", None);
        let mut folders = vec![root.clone()];
        let mut parent = root.clone();
        for i in 0..500 {
            let child = folder(ws, &format!("f{}", i), Some(&parent));
            folders.push(child.clone());
            parent = child;
        }

        let tree = FolderTree::build(folders).unwrap();
        let order = tree.deletion_order(None);
        assert_eq!(order.len(), 501);
        assert_eq!(order.first(), Some(&parent.id));
        assert_eq!(order.last(), Some(&root.id));
    }

    #[test]
    fn test_cycle_detected() {
        let ws = Uuid::new_v4();
        let mut a = folder(ws, "a", None);
        let b = folder(ws, "b", Some(&a));
        a.parent_id = Some(b.id);

        let result = FolderTree::build(vec![a, b]);
        assert!(matches!(result, Err(ResourceError::FolderTree(msg)) if msg.contains("cycle")));
    }

    #[test]
    fn test_self_parent_is_cycle() {
        let ws = Uuid::new_v4();
        let mut a = folder(ws, "a", None);
        a.parent_id = Some(a.id);
        assert!(FolderTree::build(vec![a]).is_err());
    }

    #[test]
    fn test_unknown_parent() {
        let ws = Uuid::new_v4();
        let orphan = Folder::new(ws, "orphan", Some(Uuid::new_v4()));
        let result = FolderTree::build(vec![orphan]);
        assert!(matches!(result, Err(ResourceError::FolderTree(msg)) if msg.contains("unknown parent")));
    }
}
