//! Verify build/parse methods against JSON test vectors stored in `test-vectors/`.
//!
//! Each case names an operation, its inputs, the request the client must
//! build, a simulated server response and either the parsed result or the
//! expected error code. Results are compared as JSON values so field order
//! never matters.

use couch_core::{CouchClient, CouchError, HttpMethod, HttpRequest, HttpResponse, Query};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:5984";

fn client() -> CouchClient {
    CouchClient::new(BASE_URL)
}

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_array()
        .map(|headers| {
            headers
                .iter()
                .map(|h| {
                    let arr = h.as_array().unwrap();
                    (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_of<'a>(input: &'a Value, field: &str) -> &'a str {
    input[field].as_str().unwrap_or_else(|| panic!("input field {field} missing"))
}

fn query_of(input: &Value) -> Query {
    input["query"].as_object().cloned().map(Query::from).unwrap_or_default()
}

fn build(c: &CouchClient, operation: &str, input: &Value) -> Result<HttpRequest, CouchError> {
    let request = match operation {
        "server_info" => c.build_server_info(),
        "uuids" => c.build_uuids(input["count"].as_u64().unwrap() as u32),
        "list_databases" => c.build_list_databases(),
        "create_database" => c.build_create_database(str_of(input, "db")),
        "drop_database" => c.build_drop_database(str_of(input, "db")),
        "database_info" => c.build_database_info(str_of(input, "db")),
        "get_document" => c.build_get_document(str_of(input, "db"), str_of(input, "id"), &query_of(input)),
        "insert_document" => c.build_insert_document(str_of(input, "db"), &input["doc"])?,
        "update_document" => c.build_update_document(str_of(input, "db"), &input["doc"])?,
        "delete_document" => c.build_delete_document(str_of(input, "db"), str_of(input, "id"), str_of(input, "rev")),
        "all_docs" => c.build_all_docs(str_of(input, "db"), &query_of(input)),
        "view" => c.build_view(
            str_of(input, "db"),
            str_of(input, "ddoc"),
            str_of(input, "view"),
            &query_of(input),
        ),
        "find" => c.build_find(str_of(input, "db"), &input["mango"], &query_of(input))?,
        "update_function" => c.build_update_function(
            str_of(input, "db"),
            str_of(input, "ddoc"),
            str_of(input, "func"),
            &query_of(input),
            input["doc_id"].as_str(),
            input.get("body"),
        )?,
        "get_attachment" => c.build_get_attachment(
            str_of(input, "db"),
            str_of(input, "id"),
            str_of(input, "name"),
            input["rev"].as_str(),
        ),
        "insert_attachment" => c.build_insert_attachment(
            str_of(input, "db"),
            str_of(input, "id"),
            str_of(input, "name"),
            str_of(input, "body").as_bytes().to_vec(),
            str_of(input, "content_type"),
            input["rev"].as_str(),
        ),
        "delete_attachment" => c.build_delete_attachment(
            str_of(input, "db"),
            str_of(input, "id"),
            str_of(input, "name"),
            str_of(input, "rev"),
        ),
        other => panic!("unknown operation: {other}"),
    };
    Ok(request)
}

fn to_json<T: serde::Serialize>(value: Result<T, CouchError>) -> Result<Value, CouchError> {
    value.map(|v| serde_json::to_value(v).unwrap())
}

fn parse(c: &CouchClient, operation: &str, response: &HttpResponse) -> Result<Value, CouchError> {
    match operation {
        "server_info" => to_json(c.parse_server_info(response)),
        "uuids" => to_json(c.parse_uuids(response)),
        "list_databases" => to_json(c.parse_list_databases(response)),
        "create_database" => to_json(c.parse_create_database(response)),
        "drop_database" => to_json(c.parse_drop_database(response)),
        "database_info" => to_json(c.parse_database_info(response)),
        "get_document" => c.parse_get_document::<Value>(response),
        "insert_document" => to_json(c.parse_insert_document(response)),
        "update_document" => to_json(c.parse_update_document(response)),
        "delete_document" => to_json(c.parse_delete_document(response)),
        "all_docs" => c.parse_all_docs::<Value>(response),
        "view" => c.parse_view::<Value>(response),
        "find" => to_json(c.parse_find::<Value>(response)),
        "update_function" => c
            .parse_update_function(response)
            .map(|r| json!({"body": r.body, "doc_id": r.doc_id, "rev": r.rev})),
        "get_attachment" => c
            .parse_get_attachment(response)
            .map(|bytes| Value::String(String::from_utf8(bytes).unwrap())),
        "insert_attachment" => to_json(c.parse_insert_attachment(response)),
        "delete_attachment" => to_json(c.parse_delete_attachment(response)),
        other => panic!("unknown operation: {other}"),
    }
}

fn check_request(name: &str, req: &HttpRequest, expected: &Value) {
    assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
    assert_eq!(req.url, format!("{BASE_URL}{}", expected["path"].as_str().unwrap()), "{name}: url");
    assert_eq!(req.headers, pairs(&expected["headers"]), "{name}: headers");

    if let Some(body) = expected.get("body") {
        let sent: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(&sent, body, "{name}: body");
    } else if let Some(text) = expected.get("body_text") {
        assert_eq!(req.body.as_deref(), Some(text.as_str().unwrap().as_bytes()), "{name}: body");
    } else {
        assert!(req.body.is_none(), "{name}: body should be None");
    }
}

fn check_error(name: &str, err: &CouchError, expected: &Value) {
    let code = err.code().map(|c| c.as_str());
    assert_eq!(code, expected.as_str(), "{name}: error code ({err})");
}

fn run_vectors(raw: &str) {
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let c = client();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let operation = case["operation"].as_str().unwrap();
        let input = &case["input"];

        // Verify build
        let built = build(&c, operation, input);
        if let Some(expected) = case.get("expected_build_error") {
            check_error(name, &built.unwrap_err(), expected);
            continue;
        }
        let req = built.unwrap_or_else(|e| panic!("{name}: build failed: {e}"));
        check_request(name, &req, &case["expected_request"]);

        // Verify parse
        let sim = &case["simulated_response"];
        let response = HttpResponse {
            status: sim["status"].as_u64().unwrap() as u16,
            headers: pairs(&sim["headers"]),
            body: sim["body"].as_str().unwrap().as_bytes().to_vec(),
        };
        let result = parse(&c, operation, &response);

        match case.get("expected_error") {
            Some(expected) => {
                let err = result.unwrap_err();
                check_error(name, &err, expected);
                assert_eq!(err.status(), Some(response.status), "{name}: status carried");
            }
            None => {
                let value = result.unwrap_or_else(|e| panic!("{name}: parse failed: {e}"));
                assert_eq!(value, case["expected_result"], "{name}: parsed result");
            }
        }
    }
}

#[test]
fn database_test_vectors() {
    run_vectors(include_str!("../../test-vectors/databases.json"));
}

#[test]
fn document_test_vectors() {
    run_vectors(include_str!("../../test-vectors/documents.json"));
}

#[test]
fn query_test_vectors() {
    run_vectors(include_str!("../../test-vectors/queries.json"));
}

#[test]
fn attachment_test_vectors() {
    run_vectors(include_str!("../../test-vectors/attachments.json"));
}
