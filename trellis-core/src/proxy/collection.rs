//! Map and Set Interception
//!
//! Map entries and set members are addressed by value. A key or member that
//! is a node or symbol becomes an identity token in the reported path, so
//! the same reference always yields the same path. Reading `size` records
//! the synthetic `size` key, and any mutation that changes the entry count
//! reports a set of `size`.

use super::{ProxyNode, Read};
use crate::error::{MutationKind, Result};
use crate::tracking::{PathKey, SIZE_KEY};
use crate::value::{Data, Node, NodeKind, Value};

impl ProxyNode {
    fn entry_count(&self) -> usize {
        self.with_node(Node::len).unwrap_or(0)
    }

    fn emit_size(&self) {
        let size = Value::from(self.entry_count());
        self.ctx()
            .emit(MutationKind::Set, &size, &self.child(PathKey::from(SIZE_KEY)));
    }

    /// Number of map entries or set members. Counts as a read of `size`.
    pub fn size(&self) -> usize {
        let size = self
            .with_node(|node| match node {
                Node::Map(_) | Node::Set(_) => node.len(),
                _ => 0,
            })
            .unwrap_or(0);
        self.read_count(SIZE_KEY, size)
    }

    pub(super) fn map_get(&self, key: PathKey) -> Read {
        let key = key.into_value();
        let value = self
            .with_node(|node| match node {
                Node::Map(map) => map.get(&key).cloned(),
                _ => None,
            })
            .flatten()
            .unwrap_or_default();
        self.read_child(PathKey::from_value(key), value, self.ctx().proxy_set_deep())
    }

    pub(super) fn map_has(&self, key: Value) -> bool {
        let value = self
            .with_node(|node| match node {
                Node::Map(map) => map.get(&key).cloned(),
                _ => None,
            })
            .flatten();
        let present = value.is_some();
        self.read_child(PathKey::from_value(key), value.unwrap_or_default(), false);
        present
    }

    pub(super) fn map_set(&self, key: PathKey, data: Data) -> Result<()> {
        let key = key.into_value();
        let path = self.child(PathKey::from_value(key.clone()));
        let old = self
            .with_node(|node| match node {
                Node::Map(map) => map.get(&key).cloned(),
                _ => None,
            })
            .flatten();

        if let (Some(old), Some(new)) = (&old, data.as_value()) {
            if old == new {
                return Ok(());
            }
        }

        let op = if old.is_some() {
            MutationKind::Set
        } else {
            MutationKind::Add
        };
        self.ctx().guard(op, &path)?;

        let value = {
            let mut heap = self.ctx().heap.write();
            let value = heap.materialize(data);
            if let Some(Node::Map(map)) = heap.get_mut(self.id()) {
                map.insert(key, value.clone());
            }
            value
        };

        if let Some(old) = &old {
            self.ctx().forget(old);
        }
        self.ctx().emit(op, &value, &path);
        if op == MutationKind::Add {
            self.emit_size();
        }
        Ok(())
    }

    pub(super) fn map_delete(&self, key: Value) -> Result<bool> {
        let present = self
            .with_node(|node| matches!(node, Node::Map(map) if map.contains_key(&key)))
            .unwrap_or(false);
        if !present {
            return Ok(false);
        }

        let path = self.child(PathKey::from_value(key.clone()));
        self.ctx().guard(MutationKind::Delete, &path)?;

        let old = self
            .with_node_mut(|node| match node {
                Node::Map(map) => map.shift_remove(&key),
                _ => None,
            })
            .flatten()
            .unwrap_or_default();
        self.ctx().forget(&old);
        self.ctx().emit(MutationKind::Delete, &old, &path);
        self.emit_size();
        Ok(true)
    }

    pub(super) fn set_get(&self, key: PathKey) -> Read {
        let member = key.into_value();
        let present = self.set_contains(&member);
        let value = if present {
            member.clone()
        } else {
            Value::Undefined
        };
        self.read_child(PathKey::from_value(member), value, self.ctx().proxy_set_deep())
    }

    fn set_contains(&self, member: &Value) -> bool {
        self.with_node(|node| matches!(node, Node::Set(set) if set.contains(member)))
            .unwrap_or(false)
    }

    pub(super) fn set_has(&self, member: Value) -> bool {
        let present = self.set_contains(&member);
        let value = Value::Bool(present);
        self.read_child(PathKey::from_value(member), value, false);
        present
    }

    /// Add a member to a set. Returns false if it was already present or
    /// this node is not a set.
    pub fn add(&self, member: impl Into<Data>) -> Result<bool> {
        if self.kind() != Some(NodeKind::Set) {
            return Ok(false);
        }
        let data = member.into();
        if let Some(value) = data.as_value() {
            if self.set_contains(value) {
                return Ok(false);
            }
        }

        if let Some(value) = data.as_value() {
            self.ctx()
                .guard(MutationKind::Add, &self.child(PathKey::from_value(value.clone())))?;
        } else {
            self.ctx().guard(MutationKind::Add, self.path())?;
        }

        let member = {
            let mut heap = self.ctx().heap.write();
            let member = heap.materialize(data);
            if let Some(Node::Set(set)) = heap.get_mut(self.id()) {
                set.insert(member.clone());
            }
            member
        };

        let path = self.child(PathKey::from_value(member.clone()));
        self.ctx().emit(MutationKind::Add, &member, &path);
        self.emit_size();
        Ok(true)
    }

    pub(super) fn set_delete(&self, member: Value) -> Result<bool> {
        if !self.set_contains(&member) {
            return Ok(false);
        }

        let path = self.child(PathKey::from_value(member.clone()));
        self.ctx().guard(MutationKind::Delete, &path)?;

        self.with_node_mut(|node| {
            if let Node::Set(set) = node {
                set.shift_remove(&member);
            }
        });
        self.ctx().forget(&member);
        self.ctx().emit(MutationKind::Delete, &member, &path);
        self.emit_size();
        Ok(true)
    }

    /// Remove every entry. Arrays are truncated; objects lose every key.
    pub fn clear(&self) -> Result<()> {
        match self.kind() {
            Some(NodeKind::Map) | Some(NodeKind::Set) => self.clear_collection(),
            Some(NodeKind::Array) => self.set_len(0),
            Some(NodeKind::Object) => {
                let names = self
                    .with_node(|node| match node {
                        Node::Object(map) => map.keys().cloned().collect::<Vec<_>>(),
                        _ => Vec::new(),
                    })
                    .unwrap_or_default();
                for name in names {
                    self.delete(name)?;
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn clear_collection(&self) -> Result<()> {
        let Some(first) = self
            .with_node(|node| match node {
                Node::Map(map) => map.keys().next().cloned(),
                Node::Set(set) => set.iter().next().cloned(),
                _ => None,
            })
            .flatten()
        else {
            return Ok(());
        };
        self.ctx()
            .guard(MutationKind::Delete, &self.child(PathKey::from_value(first)))?;

        let removed: Vec<(Value, Value)> = self
            .with_node_mut(|node| match node {
                Node::Map(map) => map.drain(..).collect(),
                Node::Set(set) => set.drain(..).map(|m| (m.clone(), m)).collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();

        for (key, old) in removed {
            self.ctx().forget(&old);
            let path = self.child(PathKey::from_value(key));
            self.ctx().emit(MutationKind::Delete, &old, &path);
        }
        self.emit_size();
        Ok(())
    }

    /// Entries of a map or set. Counts as a read of `size` and each entry.
    pub(super) fn collection_entries(&self) -> Vec<(Value, Read)> {
        self.size();
        let pairs = self
            .with_node(|node| match node {
                Node::Map(map) => map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>(),
                Node::Set(set) => set.iter().map(|m| (m.clone(), m.clone())).collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();

        let deep = self.ctx().proxy_set_deep();
        pairs
            .into_iter()
            .map(|(key, value)| {
                let read = self.read_child(PathKey::from_value(key.clone()), value, deep);
                (key, read)
            })
            .collect()
    }
}
