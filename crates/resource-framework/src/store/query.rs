//! Filter, update and pipeline evaluation over JSON documents.
//!
//! Supported syntax:
//!
//! - **Filters**: field equality, `$eq $ne $gt $gte $lt $lte $in $nin $exists`,
//!   top-level `$and` / `$or`, dotted paths into nested objects.
//! - **Updates**: `$set $unset $inc`. `_id` cannot be changed.
//! - **Pipelines**: `$match $sort $skip $limit $project $count`.
//!
//! Values of different types order as: null, numbers, strings, objects, arrays, booleans.

use crate::document::ID_FIELD;
use crate::error::StoreError;
use crate::store::{SortKey, SortOrder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub type Document = Map<String, Value>;

/// Extended-JSON literal for native ids, compared as a value rather than an operator.
fn is_oid_literal(map: &Document) -> bool {
    map.len() == 1 && map.contains_key("$oid")
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && !is_oid_literal(map) && map.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

/// Returns the value at a dotted path, if every segment resolves.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Integers compare exactly; f64 would merge values above 2^53.
fn exact_integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Total order over JSON values.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (exact_integer(x), exact_integer(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // key order is insignificant for equality
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => compare_values(a, b) == Ordering::Equal,
    }
}

fn field_equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn field_compares(field: Option<&Value>, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    match field {
        Some(value) if type_rank(value) == type_rank(bound) => {
            accept(compare_values(value, bound))
        }
        _ => false,
    }
}

fn expect_array<'a>(op: &str, operand: &'a Value) -> Result<&'a Vec<Value>, StoreError> {
    operand
        .as_array()
        .ok_or_else(|| StoreError::MalformedFilter(format!("{op} expects an array")))
}

fn eval_operators(field: Option<&Value>, ops: &Document) -> Result<bool, StoreError> {
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => field_equals(field, operand),
            "$ne" => !field_equals(field, operand),
            "$gt" => field_compares(field, operand, Ordering::is_gt),
            "$gte" => field_compares(field, operand, Ordering::is_ge),
            "$lt" => field_compares(field, operand, Ordering::is_lt),
            "$lte" => field_compares(field, operand, Ordering::is_le),
            "$in" => expect_array(op, operand)?
                .iter()
                .any(|candidate| field_equals(field, candidate)),
            "$nin" => !expect_array(op, operand)?
                .iter()
                .any(|candidate| field_equals(field, candidate)),
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    StoreError::MalformedFilter("$exists expects a boolean".into())
                })?;
                field.is_some() == wanted
            }
            other => {
                return Err(StoreError::MalformedFilter(format!(
                    "unknown operator {other}"
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluates `filter` against `doc`. An empty filter matches everything.
pub fn matches(doc: &Document, filter: &Value) -> Result<bool, StoreError> {
    let terms = filter
        .as_object()
        .ok_or_else(|| StoreError::MalformedFilter("filter must be an object".into()))?;

    for (key, cond) in terms {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in expect_array(key, cond)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in expect_array(key, cond)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            other if other.starts_with('$') => {
                return Err(StoreError::MalformedFilter(format!(
                    "unknown top-level operator {other}"
                )))
            }
            path => match cond {
                Value::Object(ops) if is_operator_object(cond) => {
                    eval_operators(lookup(doc, path), ops)?
                }
                _ => field_equals(lookup(doc, path), cond),
            },
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Stable multi-key sort. Missing fields sort as null.
pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    let null = Value::Null;
    docs.sort_by(|a, b| {
        for key in keys {
            let l = lookup(a, &key.field).unwrap_or(&null);
            let r = lookup(b, &key.field).unwrap_or(&null);
            let ord = match key.order {
                SortOrder::Ascending => compare_values(l, r),
                SortOrder::Descending => compare_values(r, l),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), StoreError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments
        .pop()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::MalformedUpdate(format!("empty field path {path:?}")))?;

    let mut current = doc;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match slot {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::MalformedUpdate(format!(
                    "cannot set {path}: {segment} is not an object"
                )))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.rsplit_once('.') {
        None => {
            doc.remove(path);
        }
        Some((parent, last)) => {
            let mut current = doc;
            for segment in parent.split('.') {
                current = match current.get_mut(segment) {
                    Some(Value::Object(map)) => map,
                    _ => return,
                };
            }
            current.remove(last);
        }
    }
}

fn add_numbers(current: &Value, delta: &Value, path: &str) -> Result<Value, StoreError> {
    let not_numeric = || StoreError::MalformedUpdate(format!("$inc on non-numeric field {path}"));
    let (Value::Number(a), Value::Number(b)) = (current, delta) else {
        return Err(not_numeric());
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::from(sum));
        }
    }
    let sum = a.as_f64().ok_or_else(not_numeric)? + b.as_f64().ok_or_else(not_numeric)?;
    Ok(Value::from(sum))
}

/// Returns `true` when `update` consists solely of operator keys.
pub fn has_operators(update: &Document) -> bool {
    !update.is_empty() && update.keys().all(|k| k.starts_with('$'))
}

/// Applies an operator update to a copy of `doc`.
///
/// The input is untouched when the update is rejected.
pub fn apply_update(doc: &Document, update: &Value) -> Result<Document, StoreError> {
    let ops = update
        .as_object()
        .ok_or_else(|| StoreError::MalformedUpdate("update must be an object".into()))?;
    if ops.is_empty() {
        return Err(StoreError::MalformedUpdate("empty update".into()));
    }
    if !has_operators(ops) {
        return Err(StoreError::MalformedUpdate(
            "update must use operators only".into(),
        ));
    }

    let mut next = doc.clone();
    for (op, fields) in ops {
        let fields = fields
            .as_object()
            .ok_or_else(|| StoreError::MalformedUpdate(format!("{op} expects an object")))?;
        for (path, value) in fields {
            if path == ID_FIELD || path.starts_with("_id.") {
                let unchanged = op == "$set" && doc.get(ID_FIELD).is_some_and(|id| id == value);
                if !unchanged {
                    return Err(StoreError::MalformedUpdate("_id is immutable".into()));
                }
                continue;
            }
            match op.as_str() {
                "$set" => set_path(&mut next, path, value.clone())?,
                "$unset" => unset_path(&mut next, path),
                "$inc" => {
                    let current = lookup(&next, path).cloned().unwrap_or(Value::from(0));
                    let sum = add_numbers(&current, value, path)?;
                    set_path(&mut next, path, sum)?;
                }
                other => {
                    return Err(StoreError::MalformedUpdate(format!(
                        "unknown operator {other}"
                    )))
                }
            }
        }
    }
    Ok(next)
}

/// Builds the initial document for an upsert from the filter's equality terms.
pub fn upsert_seed(filter: &Value) -> Result<Document, StoreError> {
    let mut seed = Map::new();
    if let Some(terms) = filter.as_object() {
        for (key, cond) in terms {
            if key.starts_with('$') {
                continue;
            }
            let value = match cond {
                Value::Object(ops) if is_operator_object(cond) => match ops.get("$eq") {
                    Some(v) => v.clone(),
                    None => continue,
                },
                literal => literal.clone(),
            };
            set_path(&mut seed, key, value)?;
        }
    }
    Ok(seed)
}

fn stage_count(stage: &Value, name: &str) -> Result<usize, StoreError> {
    stage
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| StoreError::UnsupportedStage(format!("{name} expects a non-negative integer")))
}

fn project(doc: Document, spec: &Document) -> Result<Document, StoreError> {
    let flag = |v: &Value| match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
        _ => Err(StoreError::UnsupportedStage(
            "$project expects 0/1 or booleans".into(),
        )),
    };

    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (field, value) in spec {
        let keep = flag(value)?;
        if field == ID_FIELD {
            include_id = keep;
        } else if keep {
            included.push(field.as_str());
        } else {
            excluded.push(field.as_str());
        }
    }
    if !included.is_empty() && !excluded.is_empty() {
        return Err(StoreError::UnsupportedStage(
            "$project cannot mix inclusion and exclusion".into(),
        ));
    }

    if included.is_empty() {
        let mut out = doc;
        for field in excluded {
            unset_path(&mut out, field);
        }
        if !include_id {
            out.remove(ID_FIELD);
        }
        return Ok(out);
    }

    let mut out = Map::new();
    if include_id {
        if let Some(id) = doc.get(ID_FIELD) {
            out.insert(ID_FIELD.to_string(), id.clone());
        }
    }
    for field in included {
        if let Some(value) = lookup(&doc, field) {
            set_path(&mut out, field, value.clone())
                .map_err(|e| StoreError::UnsupportedStage(e.to_string()))?;
        }
    }
    Ok(out)
}

/// Runs an aggregation pipeline over a snapshot of documents.
pub fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Value]) -> Result<Vec<Value>, StoreError> {
    for stage in pipeline {
        let (name, arg) = match stage.as_object() {
            Some(map) if map.len() == 1 => map
                .iter()
                .next()
                .ok_or_else(|| StoreError::UnsupportedStage("empty stage".into()))?,
            _ => {
                return Err(StoreError::UnsupportedStage(
                    "each stage must have exactly one key".into(),
                ))
            }
        };

        match name.as_str() {
            "$match" => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, arg)? {
                        kept.push(doc);
                    }
                }
                docs = kept;
            }
            "$sort" => {
                let spec = arg
                    .as_object()
                    .ok_or_else(|| StoreError::UnsupportedStage("$sort expects an object".into()))?;
                let keys: Vec<SortKey> = spec
                    .iter()
                    .map(|(field, dir)| SortKey {
                        field: field.clone(),
                        order: if dir.as_i64() == Some(-1) {
                            SortOrder::Descending
                        } else {
                            SortOrder::Ascending
                        },
                    })
                    .collect();
                sort_documents(&mut docs, &keys);
            }
            "$skip" => {
                let n = stage_count(arg, name)?;
                docs = docs.into_iter().skip(n).collect();
            }
            "$limit" => {
                let n = stage_count(arg, name)?;
                docs.truncate(n);
            }
            "$project" => {
                let spec = arg.as_object().ok_or_else(|| {
                    StoreError::UnsupportedStage("$project expects an object".into())
                })?;
                docs = docs
                    .into_iter()
                    .map(|doc| project(doc, spec))
                    .collect::<Result<_, _>>()?;
            }
            "$count" => {
                let field = arg
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| StoreError::UnsupportedStage("$count expects a field name".into()))?;
                let mut out = Map::new();
                out.insert(field.to_string(), Value::from(docs.len() as u64));
                docs = vec![out];
            }
            other => return Err(StoreError::UnsupportedStage(other.to_string())),
        }
    }
    Ok(docs.into_iter().map(Value::Object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn filter_operators() {
        let d = doc(json!({"name": "Ann", "age": 31, "tags": ["a", "b"], "addr": {"city": "Oslo"}}));
        assert!(matches(&d, &json!({})).unwrap());
        assert!(matches(&d, &json!({"name": "Ann"})).unwrap());
        assert!(matches(&d, &json!({"age": {"$gte": 31, "$lt": 40}})).unwrap());
        assert!(matches(&d, &json!({"age": 31.0})).unwrap());
        assert!(matches(&d, &json!({"tags": "b"})).unwrap());
        assert!(matches(&d, &json!({"addr.city": {"$in": ["Oslo", "Rome"]}})).unwrap());
        assert!(matches(&d, &json!({"missing": {"$exists": false}})).unwrap());
        assert!(matches(&d, &json!({"$or": [{"name": "Bob"}, {"age": {"$gt": 30}}]})).unwrap());
        assert!(!matches(&d, &json!({"age": {"$gt": "30"}})).unwrap());
        assert!(!matches(&d, &json!({"name": {"$ne": "Ann"}})).unwrap());
        assert!(matches(&d, &json!({"name": {"$regex": "A"}})).is_err());
    }

    #[test]
    fn large_integers_compare_exactly() {
        let d = doc(json!({"seq": 9_007_199_254_740_993_i64, "big": u64::MAX}));
        assert!(!matches(&d, &json!({"seq": 9_007_199_254_740_992_i64})).unwrap());
        assert!(matches(&d, &json!({"seq": 9_007_199_254_740_993_i64})).unwrap());
        assert!(matches(&d, &json!({"seq": {"$gt": 9_007_199_254_740_992_i64}})).unwrap());
        assert!(matches(&d, &json!({"big": {"$gt": i64::MAX}})).unwrap());
        assert!(!matches(&d, &json!({"big": u64::MAX - 1})).unwrap());
    }

    #[test]
    fn oid_literal_is_matched_as_a_value() {
        let d = doc(json!({"_id": {"$oid": "0190b6b2-0000-7000-8000-000000000001"}}));
        assert!(matches(&d, &json!({"_id": {"$oid": "0190b6b2-0000-7000-8000-000000000001"}})).unwrap());
        assert!(!matches(&d, &json!({"_id": "0190b6b2-0000-7000-8000-000000000001"})).unwrap());
    }

    #[test]
    fn update_operators_and_immutable_id() {
        let d = doc(json!({"_id": "x", "n": 1, "drop": true}));
        let next = apply_update(&d, &json!({"$set": {"a.b": 2}, "$inc": {"n": 2}, "$unset": {"drop": ""}})).unwrap();
        assert_eq!(Value::Object(next), json!({"_id": "x", "n": 3, "a": {"b": 2}}));

        assert!(apply_update(&d, &json!({"$set": {"_id": "y"}})).is_err());
        assert!(apply_update(&d, &json!({"$set": {"n": 1}, "plain": 1})).is_err());
        assert!(apply_update(&d, &json!({"$inc": {"drop": 1}})).is_err());
    }

    #[test]
    fn pipeline_stages() {
        let docs = vec![
            doc(json!({"_id": "1", "n": 3, "g": "a"})),
            doc(json!({"_id": "2", "n": 1, "g": "b"})),
            doc(json!({"_id": "3", "n": 2, "g": "a"})),
        ];
        let out = run_pipeline(
            docs.clone(),
            &[
                json!({"$match": {"g": "a"}}),
                json!({"$sort": {"n": 1}}),
                json!({"$project": {"n": 1, "_id": 0}}),
            ],
        )
        .unwrap();
        assert_eq!(out, vec![json!({"n": 2}), json!({"n": 3})]);

        let counted = run_pipeline(docs.clone(), &[json!({"$count": "total"})]).unwrap();
        assert_eq!(counted, vec![json!({"total": 3})]);

        assert!(matches!(
            run_pipeline(docs, &[json!({"$group": {}})]),
            Err(StoreError::UnsupportedStage(_))
        ));
    }
}
