use serde_json::{Map, Value};

/// Deep-merge `update` into `base`.
///
/// Objects present on both sides are merged key by key. Anything else in
/// `update` (scalars, arrays, timestamps, null, or an object whose counterpart
/// in `base` is missing or not an object) replaces the value in `base`
/// wholesale. Keys absent from `update` are left untouched.
pub fn merge_into(base: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        if let Value::Object(nested) = value {
            if let Some(Value::Object(existing)) = base.get_mut(&key) {
                merge_into(existing, nested);
                continue;
            }
            base.insert(key, Value::Object(nested));
        } else {
            base.insert(key, value);
        }
    }
}

/// Non-mutating variant of [`merge_into`]
pub fn merged(base: &Map<String, Value>, update: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    merge_into(&mut out, update.clone());
    out
}
