use crate::util::{client, exit_error};

pub async fn run(api_url: &str) -> i32 {
    let response = match client().get(format!("{api_url}/health")).send().await {
        Ok(response) => response,
        Err(err) => exit_error(&format!("request failed: {err}"), None),
    };

    let status = response.status();
    let payload: serde_json::Value = match response.json().await {
        Ok(payload) => payload,
        Err(err) => exit_error(&format!("unreadable response body: {err}"), None),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
    );
    if status.is_success() { 0 } else { 1 }
}
