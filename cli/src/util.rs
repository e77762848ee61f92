use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap());
    std::process::exit(1);
}

/// Resolve the owner id from --owner-id / FORMA_OWNER_ID.
pub fn resolve_owner(owner_id: Option<&str>) -> String {
    match owner_id {
        Some(id) => id.to_string(),
        None => exit_error(
            "owner id is required",
            Some("Pass --owner-id or set FORMA_OWNER_ID"),
        ),
    }
}

pub fn parse_json_arg(raw: &str, what: &str) -> serde_json::Value {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => exit_error(&format!("{what} is not valid JSON: {err}"), None),
    }
}

/// Run one JSON request against the API. Prints the response body (pretty)
/// to stdout on 2xx, or the structured error to stderr otherwise, and
/// returns the process exit code.
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    owner_id: &str,
    body: Option<serde_json::Value>,
    query: &[(&str, String)],
) -> i32 {
    let mut request = client()
        .request(method, format!("{api_url}{path}"))
        .header("x-owner-id", owner_id);
    if !query.is_empty() {
        request = request.query(query);
    }
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => exit_error(&format!("request failed: {err}"), None),
    };

    let status = response.status();
    let payload: serde_json::Value = match response.json().await {
        Ok(payload) => payload,
        Err(err) => exit_error(&format!("unreadable response body: {err}"), None),
    };

    let rendered = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    if status.is_success() {
        println!("{rendered}");
        0
    } else {
        eprintln!("{rendered}");
        1
    }
}
