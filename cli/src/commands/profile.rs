use serde_json::json;

use crate::util::{api_request, parse_json_arg, resolve_owner};

pub async fn show(api_url: &str, owner_id: Option<&str>) -> i32 {
    let owner = resolve_owner(owner_id);
    api_request(
        api_url,
        reqwest::Method::GET,
        "/v1/profile",
        &owner,
        None,
        &[],
    )
    .await
}

pub async fn set(api_url: &str, owner_id: Option<&str>, facts: &str) -> i32 {
    let owner = resolve_owner(owner_id);
    let facts = parse_json_arg(facts, "--facts");
    api_request(
        api_url,
        reqwest::Method::PUT,
        "/v1/profile",
        &owner,
        Some(json!({ "facts": facts })),
        &[],
    )
    .await
}
