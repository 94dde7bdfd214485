//! Query-string construction for CouchDB endpoints.
//!
//! # Design
//! CouchDB's view API expects `key`, `keys`, `startkey` and `endkey` as JSON
//! values, so those four are always JSON-serialized: `"Ann"` goes on the wire
//! as `%22Ann%22` and `["Ann"]` as `%5B%22Ann%22%5D`. Every other parameter
//! passes strings through verbatim and renders scalars with their JSON text
//! (`true`, `10`). Names and values are percent-encoded with the
//! `encodeURIComponent` character set, which is also used for path segments.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

/// Parameters CouchDB parses as JSON.
pub const JSON_KEYS: [&str; 4] = ["key", "keys", "startkey", "endkey"];

const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode one URL component (path segment, query name or value).
pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}

/// Ordered query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pairs: Vec<(String, Value)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a parameter, keeping the original position on replace.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render as `a=1&b=2` without the leading `?`.
    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(&render_value(key, value))))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Append the encoded query to `url`, adding `?` only when non-empty.
    pub fn append_to(&self, url: &mut String) {
        if !self.is_empty() {
            url.push('?');
            url.push_str(&self.encode());
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (key, value) in iter {
            query.set(key, value);
        }
        query
    }
}

impl From<serde_json::Map<String, Value>> for Query {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

fn render_value(key: &str, value: &Value) -> String {
    if JSON_KEYS.contains(&key) {
        return value.to_string();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn startkey_is_json_encoded() {
        let query = Query::new().with("startkey", json!(["Ann"]));
        assert_eq!(query.encode(), "startkey=%5B%22Ann%22%5D");
    }

    #[rstest]
    #[case("key", json!("Ann"), "key=%22Ann%22")]
    #[case("endkey", json!({}), "endkey=%7B%7D")]
    #[case("keys", json!(["a", "b"]), "keys=%5B%22a%22%2C%22b%22%5D")]
    #[case("key", json!(5), "key=5")]
    #[case("limit", json!(10), "limit=10")]
    #[case("include_docs", json!(true), "include_docs=true")]
    #[case("rev", json!("1-abc"), "rev=1-abc")]
    #[case("stale", json!("update after"), "stale=update%20after")]
    #[case("conflicts", Value::Null, "conflicts=")]
    fn renders_parameters(#[case] key: &str, #[case] value: Value, #[case] expected: &str) {
        assert_eq!(Query::new().with(key, value).encode(), expected);
    }

    #[test]
    fn keeps_insertion_order_and_replaces_in_place() {
        let mut query = Query::new().with("limit", 1).with("skip", 2);
        query.set("limit", 5);
        assert_eq!(query.encode(), "limit=5&skip=2");
    }

    #[test]
    fn append_to_skips_empty_query() {
        let mut url = "http://h/db/_all_docs".to_string();
        Query::new().append_to(&mut url);
        assert_eq!(url, "http://h/db/_all_docs");

        Query::new().with("descending", true).append_to(&mut url);
        assert_eq!(url, "http://h/db/_all_docs?descending=true");
    }

    #[test]
    fn component_encoding_matches_uri_component_rules() {
        assert_eq!(encode_component("_design/app"), "_design%2Fapp");
        assert_eq!(encode_component("a b+c"), "a%20b%2Bc");
        assert_eq!(encode_component("it's-(ok)*!~_."), "it's-(ok)*!~_.");
        assert_eq!(encode_component("ü"), "%C3%BC");
    }

    #[test]
    fn collects_from_json_map() {
        let map = json!({"key": "x"}).as_object().cloned().unwrap_or_default();
        let query = Query::from(map);
        assert_eq!(query.get("key"), Some(&json!("x")));
    }
}
