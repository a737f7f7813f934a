/*
 * Copyright 2024 The Twelve-Factor Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use std::{collections::BTreeMap, time::Duration};

use log::debug;
use reqwest::{blocking::Client, header, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{Error, FormatSnafu, Result, TransportSnafu};

/// Budget for the entire request-response cycle of the single fetch attempt.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const VARIABLES_PATH: &str = "/variables";

#[derive(Debug, Deserialize)]
struct Variable {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct VariablesEnvelope {
    variables: Vec<Variable>,
}

/// Fetch every variable from the not-env backend in one blocking request.
///
/// There is no retry: either the whole mapping comes back or an error does.
/// The call holds the current thread for up to [`FETCH_TIMEOUT`].
///
/// # Errors
///
/// - [`Error::Transport`] for connection, DNS, or TLS failures
/// - [`Error::Timeout`] when the request exceeds [`FETCH_TIMEOUT`]
/// - [`Error::Fetch`] for any non-200 status, carrying the status code and the
///   backend's JSON `message` field when one can be extracted
/// - [`Error::Format`] when a 200 body is not JSON or matches none of the
///   accepted shapes
pub fn fetch_variables(backend_url: &str, api_key: &str) -> Result<BTreeMap<String, String>> {
    let endpoint = endpoint(backend_url);
    debug!("fetching variables from {endpoint}");

    let client = Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context(TransportSnafu)?;

    let response = client
        .get(&endpoint)
        .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
        .header(header::CONTENT_TYPE, "application/json")
        .send()
        .map_err(classify)?;

    let status = response.status();
    let body = response.text().map_err(classify)?;

    if status != StatusCode::OK {
        return Err(error_from_body(status, &body));
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|_| FormatSnafu { shape: "a body that is not JSON" }.build())?;
    normalize(value)
}

fn endpoint(backend_url: &str) -> String {
    format!("{}{VARIABLES_PATH}", backend_url.trim_end_matches('/'))
}

fn classify(source: reqwest::Error) -> Error {
    if source.is_timeout() {
        Error::Timeout { source }
    } else {
        Error::Transport { source }
    }
}

/// Best-effort extraction of a human-readable message from an error body.
fn error_from_body(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|data| Some(data.get("message")?.as_str()?.to_owned()))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_owned()
        });
    Error::Fetch {
        status: status.as_u16(),
        message,
    }
}

/// Flatten a decoded response body into the fetched variable set.
///
/// Shapes are negotiated in order: an object with a `variables` list of
/// `{key, value}` entries, a bare list of `{key, value}` entries, then a bare
/// string-to-string object. If the backend ever repeats a key within one
/// response, the last occurrence wins.
fn normalize(value: Value) -> Result<BTreeMap<String, String>> {
    match value {
        Value::Object(fields) => {
            if fields.contains_key("variables") {
                let envelope: VariablesEnvelope = serde_json::from_value(Value::Object(fields))
                    .map_err(|_| {
                        FormatSnafu {
                            shape: "an object whose \"variables\" field is not a list of \
                                    {key, value} entries",
                        }
                        .build()
                    })?;
                return Ok(flatten(envelope.variables));
            }
            let mut variables = BTreeMap::new();
            for (key, value) in fields {
                match value {
                    Value::String(value) => {
                        variables.insert(key, value);
                    }
                    other => {
                        return FormatSnafu {
                            shape: format!(
                                "an object with {} value for {key:?}",
                                shape_of(&other)
                            ),
                        }
                        .fail()
                    }
                }
            }
            Ok(variables)
        }
        Value::Array(items) => {
            let variables: Vec<Variable> = serde_json::from_value(Value::Array(items))
                .map_err(|_| {
                    FormatSnafu {
                        shape: "a list whose entries are not {key, value} objects",
                    }
                    .build()
                })?;
            Ok(flatten(variables))
        }
        other => FormatSnafu {
            shape: shape_of(&other),
        }
        .fail(),
    }
}

fn flatten(variables: Vec<Variable>) -> BTreeMap<String, String> {
    variables.into_iter().map(|v| (v.key, v.value)).collect()
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::runtime::Runtime;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[test]
    fn endpoint_trims_trailing_slashes() {
        assert_eq!(
            endpoint("https://x.test/"),
            "https://x.test/variables"
        );
        assert_eq!(
            endpoint("https://x.test///"),
            "https://x.test/variables"
        );
        assert_eq!(endpoint("https://x.test"), "https://x.test/variables");
    }

    #[test]
    fn normalize_accepts_envelope_shape() {
        let vars = normalize(json!({
            "variables": [
                {"key": "K", "value": "V"},
                {"key": "DB_PORT", "value": "5432"}
            ]
        }))
        .unwrap();
        assert_eq!(vars.get("K").map(String::as_str), Some("V"));
        assert_eq!(vars.get("DB_PORT").map(String::as_str), Some("5432"));
    }

    #[test]
    fn normalize_accepts_bare_list_shape() {
        let vars = normalize(json!([{"key": "K", "value": "V"}])).unwrap();
        assert_eq!(vars.get("K").map(String::as_str), Some("V"));
    }

    #[test]
    fn normalize_accepts_flat_object_shape() {
        let vars = normalize(json!({"K": "V"})).unwrap();
        assert_eq!(vars.get("K").map(String::as_str), Some("V"));
    }

    #[test]
    fn normalize_keeps_last_duplicate() {
        let vars = normalize(json!({
            "variables": [
                {"key": "K", "value": "first"},
                {"key": "K", "value": "second"}
            ]
        }))
        .unwrap();
        assert_eq!(vars.get("K").map(String::as_str), Some("second"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn normalize_rejects_scalars() {
        let err = normalize(json!(42)).unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "{err}");
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn normalize_rejects_non_string_values_in_flat_object() {
        let err = normalize(json!({"K": 5432})).unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "{err}");
    }

    #[test]
    fn normalize_rejects_malformed_list_entries() {
        let err = normalize(json!(["K=V"])).unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "{err}");
    }

    fn serve(rt: &Runtime, response: ResponseTemplate) -> MockServer {
        rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/variables"))
                .and(header("authorization", "Bearer secret-key"))
                .and(header("content-type", "application/json"))
                .respond_with(response)
                .mount(&server)
                .await;
            server
        })
    }

    #[test]
    fn fetch_sends_bearer_auth_and_decodes_envelope() {
        let rt = Runtime::new().unwrap();
        let response = ResponseTemplate::new(200).set_body_json(json!({
            "variables": [{"key": "DB_HOST", "value": "localhost"}]
        }));
        let server = serve(&rt, response);

        let vars = fetch_variables(&server.uri(), "secret-key").unwrap();
        assert_eq!(vars.get("DB_HOST").map(String::as_str), Some("localhost"));
    }

    #[test]
    fn fetch_tolerates_trailing_slash_in_backend_url() {
        let rt = Runtime::new().unwrap();
        let response = ResponseTemplate::new(200).set_body_json(json!({"K": "V"}));
        let server = serve(&rt, response);

        let url = format!("{}/", server.uri());
        let vars = fetch_variables(&url, "secret-key").unwrap();
        assert_eq!(vars.get("K").map(String::as_str), Some("V"));
    }

    #[test]
    fn fetch_reports_status_and_backend_message() {
        let rt = Runtime::new().unwrap();
        let response =
            ResponseTemplate::new(401).set_body_json(json!({"message": "invalid key"}));
        let server = serve(&rt, response);

        let err = fetch_variables(&server.uri(), "secret-key").unwrap_err();
        assert!(matches!(err, Error::Fetch { status: 401, .. }), "{err}");
        let rendered = err.to_string();
        assert!(rendered.contains("401"), "{rendered}");
        assert!(rendered.contains("invalid key"), "{rendered}");
    }

    #[test]
    fn fetch_falls_back_to_status_reason_for_unparseable_error_bodies() {
        let rt = Runtime::new().unwrap();
        let response = ResponseTemplate::new(500).set_body_string("oops");
        let server = serve(&rt, response);

        let err = fetch_variables(&server.uri(), "secret-key").unwrap_err();
        assert!(matches!(err, Error::Fetch { status: 500, .. }), "{err}");
        assert!(err.to_string().contains("Internal Server Error"), "{err}");
    }

    #[test]
    fn fetch_rejects_success_bodies_that_are_not_json() {
        let rt = Runtime::new().unwrap();
        let response = ResponseTemplate::new(200).set_body_string("not json");
        let server = serve(&rt, response);

        let err = fetch_variables(&server.uri(), "secret-key").unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "{err}");
    }

    #[test]
    fn fetch_classifies_connection_failures_as_transport() {
        // Port 1 on localhost refuses connections.
        let err = fetch_variables("http://127.0.0.1:1", "secret-key").unwrap_err();
        assert!(matches!(err, Error::Transport { .. }), "{err}");
    }
}
