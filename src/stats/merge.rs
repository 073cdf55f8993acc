//! Merge and diff rules for schema-free stats records.
//!
//! Nested objects recurse. Scalars overwrite. Arrays are always replaced
//! wholesale and never merged element-wise, so a list field in a partial
//! update is exactly the latest list.

use serde_json::{Map, Value};

/// Stats record of a single service.
pub type Record = Map<String, Value>;

/// Merges `patch` into `target`.
pub fn merge_value(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => merge_object(target, patch),
        (target, patch) => *target = patch,
    }
}

/// Merges every key of `patch` into `target`.
pub fn merge_object(target: &mut Record, patch: Record) {
    for (key, value) in patch {
        match target.get_mut(&key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}

/// Leaf-level changes needed to turn `prev` into `next`.
///
/// Keys missing from `next` are not reported.
pub fn diff_object(prev: &Record, next: &Record) -> Record {
    let mut changes = Record::new();

    for (key, next_value) in next {
        match (prev.get(key), next_value) {
            (Some(Value::Object(prev_obj)), Value::Object(next_obj)) => {
                let nested = diff_object(prev_obj, next_obj);
                if !nested.is_empty() {
                    changes.insert(key.clone(), Value::Object(nested));
                }
            }
            (Some(prev_value), next_value) if prev_value == next_value => {}
            (_, next_value) => {
                changes.insert(key.clone(), next_value.clone());
            }
        }
    }

    changes
}

/// Looks up the value at a dotted path of object keys.
pub fn value_at<'a>(record: &'a Record, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = record;
    for key in parents {
        current = current.get(*key)?.as_object()?;
    }
    current.get(*last)
}

/// Writes `value` at `path`, creating or overwriting intermediate objects.
pub fn set_at(record: &mut Record, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = record;
    for key in parents {
        let entry = current
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Record::new()));
        if !entry.is_object() {
            *entry = Value::Object(Record::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }

    current.insert((*last).to_string(), value);
}

/// Builds a record holding only `value` at `path`.
pub fn record_at(path: &[&str], value: Value) -> Record {
    let mut record = Record::new();
    set_at(&mut record, path, value);
    record
}

/// Removes the entries of `patch` that already hold their value in `base`.
///
/// Nested objects left empty are removed as well.
pub fn prune_unchanged(patch: &mut Record, base: &Record) {
    patch.retain(|key, value| {
        let Some(prev) = base.get(key) else {
            return true;
        };
        match (value, prev) {
            (Value::Object(inner), Value::Object(prev_inner)) => {
                prune_unchanged(inner, prev_inner);
                !inner.is_empty()
            }
            (value, prev) => value != prev,
        }
    });
}
