//! Array Interception
//!
//! Invalidation is path-based, so array methods cannot be reported as one
//! opaque event. Each method runs against a copy of the elements, the copy
//! is diffed against the original, and every index whose value differs is
//! reported as its own add, set or delete, followed by `length` when the
//! length changed. The diff is exact, which covers every index a shifting
//! method (`shift`, `unshift`, `splice`) moved.
//!
//! A method whose diff is empty (popping an empty array, sorting a sorted
//! one) is not gated and reports nothing.

use std::cmp::Ordering;

use super::{ProxyNode, Read};
use crate::error::{MutationKind, Result};
use crate::tracking::{array_length, PathKey, LENGTH_KEY, MAX_ARRAY_LENGTH};
use crate::value::{Data, Node, Value};

/// One index-level change found by diffing.
#[derive(Debug, Clone, PartialEq)]
struct ElementChange {
    op: MutationKind,
    key: PathKey,
    /// New value, or the removed value for deletes.
    value: Value,
    /// Value that was overwritten or removed.
    replaced: Option<Value>,
}

fn diff_elements(old: &[Value], new: &[Value]) -> Vec<ElementChange> {
    let mut changes = Vec::new();
    for i in 0..old.len().max(new.len()) {
        let change = match (old.get(i), new.get(i)) {
            (Some(before), Some(after)) if before != after => ElementChange {
                op: MutationKind::Set,
                key: PathKey::Index(i),
                value: after.clone(),
                replaced: Some(before.clone()),
            },
            (None, Some(after)) => ElementChange {
                op: MutationKind::Add,
                key: PathKey::Index(i),
                value: after.clone(),
                replaced: None,
            },
            (Some(before), None) => ElementChange {
                op: MutationKind::Delete,
                key: PathKey::Index(i),
                value: before.clone(),
                replaced: Some(before.clone()),
            },
            _ => continue,
        };
        changes.push(change);
    }

    if old.len() != new.len() {
        changes.push(ElementChange {
            op: MutationKind::Set,
            key: PathKey::from(LENGTH_KEY),
            value: Value::from(new.len()),
            replaced: None,
        });
    }
    changes
}

/// Ordering used by [`ProxyNode::sort`]: null, booleans, numbers, strings,
/// symbols, then nodes, with `undefined` last.
fn default_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Symbol(_) => 4,
            Value::Node(_) => 5,
            Value::Undefined => 6,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Symbol(x), Value::Symbol(y)) => x.cmp(y),
        (Value::Node(x), Value::Node(y)) => {
            (x.index(), x.generation()).cmp(&(y.index(), y.generation()))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

impl ProxyNode {
    /// Run `f` on a copy of the elements and commit the result, reporting
    /// one event per changed index.
    ///
    /// Returns `None` if this node is not an array.
    fn apply_elements<R>(
        &self,
        op: MutationKind,
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Result<Option<R>> {
        let Some(old) = self
            .with_node(|node| match node {
                Node::Array(items) => Some(items.clone()),
                _ => None,
            })
            .flatten()
        else {
            return Ok(None);
        };

        let mut items = old.clone();
        let result = f(&mut items);
        let changes = diff_elements(&old, &items);
        let Some(first) = changes.first() else {
            return Ok(Some(result));
        };

        self.ctx().guard(op, &self.child(first.key.clone()))?;
        self.with_node_mut(|node| {
            if let Node::Array(slot) = node {
                *slot = items;
            }
        });

        for change in &changes {
            if let Some(replaced) = &change.replaced {
                self.ctx().forget(replaced);
            }
            self.ctx()
                .emit(change.op, &change.value, &self.child(change.key.clone()));
        }
        Ok(Some(result))
    }

    fn materialize_all(&self, items: impl IntoIterator<Item = Data>) -> Vec<Value> {
        let mut heap = self.ctx().heap.write();
        items.into_iter().map(|d| heap.materialize(d)).collect()
    }

    pub(super) fn array_len(&self) -> usize {
        let len = self
            .with_node(|node| match node {
                Node::Array(items) => items.len(),
                _ => 0,
            })
            .unwrap_or(0);
        self.read_count(LENGTH_KEY, len)
    }

    pub(super) fn get_element(&self, key: PathKey) -> Read {
        if key.is_str(LENGTH_KEY) {
            return Read::Value(Value::from(self.array_len()));
        }
        let Some(index) = key.as_index() else {
            return self.read_child(key, Value::Undefined, false);
        };

        let value = self
            .with_node(|node| match node {
                Node::Array(items) => items.get(index).cloned(),
                _ => None,
            })
            .flatten()
            .unwrap_or_default();
        self.read_child(PathKey::Index(index), value, true)
    }

    pub(super) fn set_element(&self, key: PathKey, data: Data) -> Result<()> {
        if key.is_str(LENGTH_KEY) {
            return match data.as_value().and_then(Value::as_f64).and_then(array_length) {
                Some(len) => self.set_len(len),
                None => Ok(()),
            };
        }
        let Some(index) = key.as_index() else {
            return Ok(());
        };
        let Some(new_len) = index.checked_add(1) else {
            return Ok(());
        };

        let current = self
            .with_node(|node| match node {
                Node::Array(items) => Some((items.len(), items.get(index).cloned())),
                _ => None,
            })
            .flatten();
        let Some((len, old)) = current else {
            return Ok(());
        };
        if let (Some(old), Some(new)) = (&old, data.as_value()) {
            if old == new {
                return Ok(());
            }
        }

        let op = if index < len {
            MutationKind::Set
        } else {
            MutationKind::Add
        };
        self.ctx().guard(op, &self.child(PathKey::Index(index)))?;

        let value = self.ctx().heap.write().materialize(data);
        self.apply_elements(op, move |items| {
            if index >= items.len() {
                if items.try_reserve(new_len - items.len()).is_err() {
                    return;
                }
                items.resize(new_len, Value::Undefined);
            }
            items[index] = value;
        })?;
        Ok(())
    }

    /// Clear one index, leaving a hole. Length is unchanged.
    pub(super) fn delete_element(&self, key: PathKey) -> Result<bool> {
        let Some(index) = key.as_index().filter(|i| *i < self.raw_len()) else {
            return Ok(false);
        };
        let path = self.child(PathKey::Index(index));
        self.ctx().guard(MutationKind::Delete, &path)?;

        let old = self
            .with_node_mut(|node| match node {
                Node::Array(items) => Some(std::mem::take(&mut items[index])),
                _ => None,
            })
            .flatten()
            .unwrap_or_default();
        self.ctx().forget(&old);
        self.ctx().emit(MutationKind::Delete, &old, &path);
        Ok(true)
    }

    /// Element count, or `None` if this node is not an array.
    fn elements_len(&self) -> Option<usize> {
        self.with_node(|node| match node {
            Node::Array(items) => Some(items.len()),
            _ => None,
        })
        .flatten()
    }

    fn raw_len(&self) -> usize {
        self.with_node(Node::len).unwrap_or(0)
    }

    /// Every element in order. Counts as a read of `length` and each index.
    pub fn iter(&self) -> Vec<Read> {
        let len = self.array_len();
        (0..len)
            .map(|i| self.get_element(PathKey::Index(i)))
            .collect()
    }

    /// Append one element. Returns the new length.
    pub fn push(&self, item: impl Into<Data>) -> Result<usize> {
        self.extend([item.into()])
    }

    /// Append elements in order. Returns the new length.
    pub fn extend<D: Into<Data>>(&self, items: impl IntoIterator<Item = D>) -> Result<usize> {
        let Some(len) = self.elements_len() else {
            return Ok(0);
        };
        let items: Vec<Data> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            return Ok(len);
        }
        self.ctx().guard(MutationKind::Add, &self.child(PathKey::Index(len)))?;

        let values = self.materialize_all(items);
        let len = self.apply_elements(MutationKind::Add, move |items| {
            items.extend(values);
            items.len()
        })?;
        Ok(len.unwrap_or(0))
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Value> {
        let popped = self.apply_elements(MutationKind::Delete, Vec::pop)?;
        Ok(popped.flatten().unwrap_or_default())
    }

    /// Remove and return the first element, moving the rest down.
    pub fn shift(&self) -> Result<Value> {
        let shifted = self.apply_elements(MutationKind::Delete, |items| {
            (!items.is_empty()).then(|| items.remove(0))
        })?;
        Ok(shifted.flatten().unwrap_or_default())
    }

    /// Insert one element at the front. Returns the new length.
    pub fn unshift(&self, item: impl Into<Data>) -> Result<usize> {
        if self.elements_len().is_none() {
            return Ok(0);
        }
        self.ctx().guard(MutationKind::Add, &self.child(PathKey::Index(0)))?;

        let value = self.ctx().heap.write().materialize(item.into());
        let len = self.apply_elements(MutationKind::Add, move |items| {
            items.insert(0, value);
            items.len()
        })?;
        Ok(len.unwrap_or(0))
    }

    /// Remove `delete_count` elements at `start` and insert `items` in their
    /// place. Both bounds are clamped to the array. Returns the removed
    /// elements.
    pub fn splice<D: Into<Data>>(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = D>,
    ) -> Result<Vec<Value>> {
        let values = self.materialize_all(items.into_iter().map(Into::into));
        let removed = self.apply_elements(MutationKind::Set, move |elements| {
            let start = start.min(elements.len());
            let end = start.saturating_add(delete_count).min(elements.len());
            elements.splice(start..end, values).collect::<Vec<_>>()
        })?;
        Ok(removed.unwrap_or_default())
    }

    /// Sort in place with the default value ordering.
    pub fn sort(&self) -> Result<()> {
        self.sort_by(default_order)
    }

    /// Sort in place with a comparator over raw values.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        self.apply_elements(MutationKind::Set, |items| items.sort_by(compare))?;
        Ok(())
    }

    pub fn reverse(&self) -> Result<()> {
        self.apply_elements(MutationKind::Set, |items| items.reverse())?;
        Ok(())
    }

    /// Set the length directly. Shrinking deletes every discarded index;
    /// growing fills with `undefined`. Lengths past [`MAX_ARRAY_LENGTH`], or
    /// that cannot be allocated, leave the array unchanged.
    pub fn set_len(&self, len: usize) -> Result<()> {
        if len > MAX_ARRAY_LENGTH {
            return Ok(());
        }
        let op = if len < self.raw_len() {
            MutationKind::Delete
        } else {
            MutationKind::Set
        };
        self.apply_elements(op, |items| {
            if len > items.len() && items.try_reserve(len - items.len()).is_err() {
                return;
            }
            items.resize(len, Value::Undefined);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::tests::{session, Event};
    use serde_json::json;

    fn touched(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                Event::Set(p, _) | Event::Add(p, _) | Event::Delete(p) | Event::Get(p) => p.clone(),
            })
            .collect()
    }

    #[test]
    fn shift_reports_every_moved_index() {
        let (state, recorder) = session(json!({"data": [2, 6, 3, 1]}), false);
        let data = state.get("data").into_node().unwrap();
        recorder.take();

        assert_eq!(data.shift().unwrap(), Value::from(2));
        let events = recorder.mutations();
        assert_eq!(
            events,
            vec![
                Event::Set("data.0".into(), Value::from(6)),
                Event::Set("data.1".into(), Value::from(3)),
                Event::Set("data.2".into(), Value::from(1)),
                Event::Delete("data.3".into()),
                Event::Set("data.length".into(), Value::from(3)),
            ]
        );
    }

    #[test]
    fn push_and_pop() {
        let (state, recorder) = session(json!({"list": [1]}), false);
        let list = state.get("list").into_node().unwrap();
        recorder.take();

        assert_eq!(list.push(2).unwrap(), 2);
        assert_eq!(
            recorder.mutations(),
            vec![
                Event::Add("list.1".into(), Value::from(2)),
                Event::Set("list.length".into(), Value::from(2)),
            ]
        );

        assert_eq!(list.pop().unwrap(), Value::from(2));
        assert_eq!(
            touched(&recorder.mutations()),
            vec!["list.1".to_string(), "list.length".to_string()]
        );
    }

    #[test]
    fn pop_on_empty_array_reports_nothing() {
        let (state, recorder) = session(json!({"list": []}), true);
        let list = state.get("list").into_node().unwrap();
        recorder.take();

        // No effective change, so strict mode does not reject it.
        assert_eq!(list.pop().unwrap(), Value::Undefined);
        assert!(recorder.mutations().is_empty());
    }

    #[test]
    fn unshift_moves_every_index_up() {
        let (state, recorder) = session(json!([1, 2]), false);
        recorder.take();

        assert_eq!(state.unshift(0).unwrap(), 3);
        assert_eq!(touched(&recorder.mutations()), vec!["0", "1", "2", "length"]);
        assert_eq!(state.to_json().unwrap(), json!([0, 1, 2]));
    }

    #[test]
    fn splice_with_size_delta() {
        let (state, recorder) = session(json!([1, 2, 3, 4]), false);
        recorder.take();

        let removed = state.splice(1, 2, [9]).unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(state.to_json().unwrap(), json!([1, 9, 4]));
        assert_eq!(touched(&recorder.mutations()), vec!["1", "2", "3", "length"]);
    }

    #[test]
    fn sort_and_reverse_report_changed_indices_only() {
        let (state, recorder) = session(json!([3, 2, 1]), false);
        recorder.take();

        state.reverse().unwrap();
        // Middle element stays in place
        assert_eq!(touched(&recorder.mutations()), vec!["0", "2"]);

        state.sort_by(|a, b| default_order(b, a)).unwrap();
        assert_eq!(state.to_json().unwrap(), json!([3, 2, 1]));
        recorder.take();

        state.sort().unwrap();
        assert_eq!(state.to_json().unwrap(), json!([1, 2, 3]));
        assert_eq!(touched(&recorder.mutations()), vec!["0", "2"]);
    }

    #[test]
    fn shrinking_length_deletes_discarded_indices() {
        let (state, recorder) = session(json!(["a", "b", "c"]), false);
        recorder.take();

        state.set("length", 1).unwrap();
        assert_eq!(
            recorder.mutations(),
            vec![
                Event::Delete("1".into()),
                Event::Delete("2".into()),
                Event::Set("length".into(), Value::from(1)),
            ]
        );
    }

    #[test]
    fn writing_past_the_end_fills_holes() {
        let (state, recorder) = session(json!([1]), false);
        recorder.take();

        state.set(3usize, 4).unwrap();
        assert_eq!(state.to_json().unwrap(), json!([1, null, null, 4]));
        assert_eq!(touched(&recorder.mutations()), vec!["1", "2", "3", "length"]);
    }

    #[test]
    fn delete_leaves_a_hole() {
        let (state, recorder) = session(json!([1, 2]), false);
        recorder.take();

        assert!(state.delete(0usize).unwrap());
        assert_eq!(recorder.mutations(), vec![Event::Delete("0".into())]);
        assert_eq!(state.to_json().unwrap(), json!([null, 2]));
    }

    #[test]
    fn iteration_reads_length_and_every_index() {
        let (state, recorder) = session(json!([5, 6]), false);

        let values: Vec<_> = state.iter().iter().filter_map(Read::as_f64).collect();
        assert_eq!(values, vec![5.0, 6.0]);
        assert_eq!(touched(&recorder.take()), vec!["length", "0", "1"]);
    }

    #[test]
    fn out_of_range_index_and_length_writes_are_ignored() {
        let (state, recorder) = session(json!([1, 2]), false);
        recorder.take();

        state.set(usize::MAX, 1).unwrap();
        state.set(MAX_ARRAY_LENGTH, 1).unwrap();
        state.set(LENGTH_KEY, 1e300).unwrap();
        state.set(LENGTH_KEY, -1).unwrap();
        state.set(LENGTH_KEY, 1.5).unwrap();
        state.set_len(usize::MAX).unwrap();

        assert!(recorder.mutations().is_empty());
        assert_eq!(state.to_json().unwrap(), json!([1, 2]));
    }

    #[test]
    fn rejected_writes_allocate_nothing() {
        let (state, recorder) = session(json!([1, 2]), true);
        recorder.take();
        let nodes = state.context().heap.read().len();

        assert!(state.set(0usize, json!({"a": 1})).unwrap_err().is_mutation_not_allowed());
        assert!(state.set(5usize, json!([1])).unwrap_err().is_mutation_not_allowed());
        assert!(state.push(json!({"b": 2})).unwrap_err().is_mutation_not_allowed());
        assert!(state.unshift(json!({"c": 3})).unwrap_err().is_mutation_not_allowed());

        assert_eq!(state.context().heap.read().len(), nodes);
        assert!(recorder.mutations().is_empty());
    }

    #[test]
    fn strict_mode_rejects_array_methods() {
        let (state, recorder) = session(json!([1, 2]), true);
        recorder.take();

        assert!(state.push(3).unwrap_err().is_mutation_not_allowed());
        assert!(state.shift().unwrap_err().is_mutation_not_allowed());
        assert!(recorder.mutations().is_empty());
        assert_eq!(state.to_json().unwrap(), json!([1, 2]));
    }
}
