use serde_json::json;

use crate::util::{api_request, resolve_owner};

pub async fn create(api_url: &str, owner_id: Option<&str>, workout_id: Option<&str>) -> i32 {
    let owner = resolve_owner(owner_id);
    let mut body = json!({});
    if let Some(workout_id) = workout_id {
        body["workout_session_id"] = json!(workout_id);
    }
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/sessions",
        &owner,
        Some(body),
        &[],
    )
    .await
}

pub async fn show(api_url: &str, owner_id: Option<&str>, id: &str) -> i32 {
    let owner = resolve_owner(owner_id);
    api_request(
        api_url,
        reqwest::Method::GET,
        &format!("/v1/sessions/{id}"),
        &owner,
        None,
        &[],
    )
    .await
}

pub async fn events(
    api_url: &str,
    owner_id: Option<&str>,
    id: &str,
    limit: Option<u32>,
    cursor: Option<&str>,
) -> i32 {
    let owner = resolve_owner(owner_id);
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor.to_string()));
    }
    api_request(
        api_url,
        reqwest::Method::GET,
        &format!("/v1/sessions/{id}/events"),
        &owner,
        None,
        &query,
    )
    .await
}
