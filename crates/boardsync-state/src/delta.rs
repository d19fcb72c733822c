//! Structural diffs between two serialized game states.
//!
//! A delta is a tree of operations mirroring the JSON it patches:
//!
//! ```text
//! { "baseVersion": 7, "version": 8, "changes": {
//!     "_version": { "op": "SET", "value": 8 },
//!     "players":  { "op": "KEYED", "key": "playerId", "order": ["p1", "p2"],
//!                   "changes": { "p2": { "op": "PATCH", "changes": {
//!                       "nickname": { "op": "SET", "value": "Rex" } } } } }
//! } }
//! ```
//!
//! Arrays listed in [`KEYED_ARRAYS`] are diffed by element id, so adding,
//! removing or reordering players does not rewrite every index.
//! Every other array is replaced wholesale when it changes.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::StateError;

/// Object keys whose array values are diffed by the given id field.
pub const KEYED_ARRAYS: &[(&str, &str)] = &[("players", "playerId")];

/// Default ratio below which a delta is preferred over a full state.
pub const DEFAULT_DELTA_THRESHOLD: f64 = 0.5;

/// A single change to one JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum DeltaOp {
    /// Replace (or create) the value.
    Set { value: Value },
    /// Delete the key.
    Remove,
    /// Recursively patch an object.
    Patch { changes: BTreeMap<String, DeltaOp> },
    /// Rebuild an array of objects from their ids.
    ///
    /// The new array lists `order`; each element is taken from the old
    /// array by id, then patched or replaced by its entry in `changes`.
    Keyed {
        key: String,
        order: Vec<String>,
        changes: BTreeMap<String, DeltaOp>,
    },
}

/// Diff from one state version to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub base_version: u64,
    pub version: u64,
    pub changes: BTreeMap<String, DeltaOp>,
}

impl StateDelta {
    /// Diffs two serialized states. Both must be JSON objects.
    pub fn between(old: &Value, new: &Value) -> Result<Self, StateError> {
        let (Some(old_obj), Some(new_obj)) = (old.as_object(), new.as_object()) else {
            return Err(StateError::Delta("both sides must be objects".into()));
        };
        Ok(Self {
            base_version: version_of(old_obj),
            version: version_of(new_obj),
            changes: diff_objects(old_obj, new_obj),
        })
    }

    /// `true` if the delta was computed against `current_version`.
    pub fn can_apply(&self, current_version: u64) -> bool {
        self.base_version == current_version
    }

    /// Applies the delta to `base`, returning the new tree.
    pub fn apply(&self, base: &Value) -> Result<Value, StateError> {
        let Some(object) = base.as_object() else {
            return Err(StateError::Delta("base must be an object".into()));
        };
        let mut object = object.clone();
        apply_changes(&mut object, &self.changes).inspect_err(|error| {
            tracing::debug!(base_version = self.base_version, version = self.version, %error, "delta did not apply");
        })?;
        Ok(Value::Object(object))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn from_value(value: Value) -> Result<Self, StateError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value, StateError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Decides whether sending a delta of `delta_bytes` beats a full state of
/// `full_bytes`.
pub fn should_use_delta(delta_bytes: usize, full_bytes: usize, threshold: f64) -> bool {
    (delta_bytes as f64) < (full_bytes as f64) * threshold
}

fn version_of(object: &Map<String, Value>) -> u64 {
    object.get("_version").and_then(Value::as_u64).unwrap_or(0)
}

fn keyed_field(key: &str) -> Option<&'static str> {
    KEYED_ARRAYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, field)| *field)
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> BTreeMap<String, DeltaOp> {
    let mut changes = BTreeMap::new();
    for (key, new_value) in new {
        match old.get(key) {
            None => {
                changes.insert(key.clone(), DeltaOp::Set { value: new_value.clone() });
            }
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => {
                changes.insert(key.clone(), diff_value(key, old_value, new_value));
            }
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.insert(key.clone(), DeltaOp::Remove);
        }
    }
    changes
}

fn diff_value(key: &str, old: &Value, new: &Value) -> DeltaOp {
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => DeltaOp::Patch {
            changes: diff_objects(o, n),
        },
        (Value::Array(o), Value::Array(n)) => keyed_field(key)
            .and_then(|field| diff_keyed(field, o, n))
            .unwrap_or_else(|| DeltaOp::Set { value: new.clone() }),
        _ => DeltaOp::Set { value: new.clone() },
    }
}

/// Indexes an array of objects by their `field`. Returns `None` when an
/// element lacks a string id or two elements share one.
fn index_by<'a>(field: &str, items: &'a [Value]) -> Option<(Vec<String>, HashMap<String, &'a Value>)> {
    let mut order = Vec::with_capacity(items.len());
    let mut by_id = HashMap::with_capacity(items.len());
    for item in items {
        let id = item.get(field)?.as_str()?.to_string();
        if by_id.insert(id.clone(), item).is_some() {
            return None;
        }
        order.push(id);
    }
    Some((order, by_id))
}

fn diff_keyed(field: &str, old: &[Value], new: &[Value]) -> Option<DeltaOp> {
    let (_, old_by_id) = index_by(field, old)?;
    let (order, new_by_id) = index_by(field, new)?;

    let mut changes = BTreeMap::new();
    for id in &order {
        let new_item = new_by_id[id];
        match old_by_id.get(id) {
            None => {
                changes.insert(id.clone(), DeltaOp::Set { value: new_item.clone() });
            }
            Some(old_item) if *old_item == new_item => {}
            Some(old_item) => {
                changes.insert(id.clone(), diff_value("", old_item, new_item));
            }
        }
    }
    Some(DeltaOp::Keyed {
        key: field.to_string(),
        order,
        changes,
    })
}

fn apply_changes(object: &mut Map<String, Value>, changes: &BTreeMap<String, DeltaOp>) -> Result<(), StateError> {
    for (key, op) in changes {
        match apply_op(object.get(key), op)? {
            Some(value) => {
                object.insert(key.clone(), value);
            }
            None => {
                object.remove(key);
            }
        }
    }
    Ok(())
}

fn apply_op(old: Option<&Value>, op: &DeltaOp) -> Result<Option<Value>, StateError> {
    match op {
        DeltaOp::Set { value } => Ok(Some(value.clone())),
        DeltaOp::Remove => Ok(None),
        DeltaOp::Patch { changes } => {
            let Some(Value::Object(object)) = old else {
                return Err(StateError::Delta("PATCH target is not an object".into()));
            };
            let mut object = object.clone();
            apply_changes(&mut object, changes)?;
            Ok(Some(Value::Object(object)))
        }
        DeltaOp::Keyed { key, order, changes } => {
            let Some(Value::Array(items)) = old else {
                return Err(StateError::Delta("KEYED target is not an array".into()));
            };
            let (_, by_id) = index_by(key, items)
                .ok_or_else(|| StateError::Delta(format!("KEYED target has bad {key:?} ids")))?;

            let mut seen = HashSet::with_capacity(order.len());
            let mut rebuilt = Vec::with_capacity(order.len());
            for id in order {
                if !seen.insert(id) {
                    return Err(StateError::Delta(format!("duplicate id {id:?} in order")));
                }
                let previous = by_id.get(id).copied();
                let item = match changes.get(id) {
                    Some(op) => apply_op(previous, op)?,
                    None => previous.cloned(),
                };
                let item = item.ok_or_else(|| StateError::Delta(format!("no element for id {id:?}")))?;
                rebuilt.push(item);
            }
            Ok(Some(Value::Array(rebuilt)))
        }
    }
}
