//! Mango selector matching for `_find`.
//!
//! Supports implicit equality, `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$exists`, `$and` and `$or`. Dotted field names walk into nested objects.
//! Values compare with CouchDB's type order: null, booleans, numbers,
//! strings, arrays, objects.

use std::cmp::Ordering;

use serde_json::{Map, Value};

pub fn matches(selector: &Value, doc: &Value) -> bool {
    let Some(selector) = selector.as_object() else {
        return false;
    };
    selector.iter().all(|(key, condition)| match key.as_str() {
        "$and" => all_of(condition, doc, true),
        "$or" => all_of(condition, doc, false),
        field => field_matches(lookup(doc, field), condition),
    })
}

fn all_of(conditions: &Value, doc: &Value, every: bool) -> bool {
    let Some(conditions) = conditions.as_array() else {
        return false;
    };
    if every {
        conditions.iter().all(|c| matches(c, doc))
    } else {
        conditions.iter().any(|c| matches(c, doc))
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> bool {
    match condition.as_object() {
        Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, arg)| operator_matches(value, op, arg))
        }
        _ => value == Some(condition),
    }
}

fn operator_matches(value: Option<&Value>, op: &str, arg: &Value) -> bool {
    if op == "$exists" {
        return value.is_some() == arg.as_bool().unwrap_or(true);
    }
    let Some(value) = value else {
        return false;
    };
    let ordering = collate(value, arg);
    match op {
        "$eq" => ordering == Ordering::Equal,
        "$ne" => ordering != Ordering::Equal,
        "$gt" => ordering == Ordering::Greater,
        "$gte" => ordering != Ordering::Less,
        "$lt" => ordering == Ordering::Less,
        "$lte" => ordering != Ordering::Greater,
        _ => false,
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, part| value.get(part))
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values following CouchDB view collation, with
/// plain codepoint order for strings.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| collate(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| collate(vx, vy)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Keep only `fields` (top-level or dotted) of `doc`.
pub fn project(doc: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = lookup(doc, field) {
            insert_path(&mut out, field, value.clone());
        }
    }
    Value::Object(out)
}

fn insert_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Sort `docs` by a Mango `sort` array such as `[{"year": "desc"}, "title"]`.
pub fn sort(docs: &mut [Value], order: &[Value]) {
    let keys: Vec<(String, bool)> = order
        .iter()
        .filter_map(|entry| match entry {
            Value::String(field) => Some((field.clone(), false)),
            Value::Object(map) => map
                .iter()
                .next()
                .map(|(field, dir)| (field.clone(), dir.as_str() == Some("desc"))),
            _ => None,
        })
        .collect();
    docs.sort_by(|a, b| {
        keys.iter()
            .map(|(field, desc)| {
                let null = Value::Null;
                let ordering = collate(lookup(a, field).unwrap_or(&null), lookup(b, field).unwrap_or(&null));
                if *desc {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn album() -> Value {
        json!({"_id": "a", "title": "Blue", "year": 1971, "artist": {"name": "Joni"}})
    }

    #[test]
    fn implicit_equality() {
        assert!(matches(&json!({"title": "Blue"}), &album()));
        assert!(!matches(&json!({"title": "Court"}), &album()));
    }

    #[test]
    fn comparison_operators() {
        assert!(matches(&json!({"year": {"$gt": 1970, "$lte": 1971}}), &album()));
        assert!(!matches(&json!({"year": {"$lt": 1971}}), &album()));
        assert!(matches(&json!({"year": {"$ne": 1970}}), &album()));
        assert!(matches(&json!({"title": {"$eq": "Blue"}}), &album()));
    }

    #[test]
    fn exists_and_nested_fields() {
        assert!(matches(&json!({"artist.name": "Joni"}), &album()));
        assert!(matches(&json!({"label": {"$exists": false}}), &album()));
        assert!(!matches(&json!({"year": {"$exists": false}}), &album()));
    }

    #[test]
    fn combinators() {
        let selector = json!({"$or": [{"year": 1970}, {"$and": [{"year": 1971}, {"title": "Blue"}]}]});
        assert!(matches(&selector, &album()));
    }

    #[test]
    fn missing_field_fails_comparisons() {
        assert!(!matches(&json!({"label": {"$ne": "x"}}), &album()));
    }

    #[test]
    fn collation_orders_types() {
        assert_eq!(collate(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(collate(&json!(10), &json!("a")), Ordering::Less);
        assert_eq!(collate(&json!("b"), &json!(["a"])), Ordering::Less);
        assert_eq!(collate(&json!(["a", 1]), &json!(["a"])), Ordering::Greater);
    }

    #[test]
    fn projection_keeps_requested_fields() {
        let projected = project(&album(), &["title".to_string(), "artist.name".to_string()]);
        assert_eq!(projected, json!({"title": "Blue", "artist": {"name": "Joni"}}));
    }

    #[test]
    fn sort_descending() {
        let mut docs = vec![json!({"y": 1}), json!({"y": 3}), json!({"y": 2})];
        sort(&mut docs, &[json!({"y": "desc"})]);
        assert_eq!(docs, vec![json!({"y": 3}), json!({"y": 2}), json!({"y": 1})]);
    }
}
