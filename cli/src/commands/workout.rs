use crate::util::{api_request, parse_json_arg, resolve_owner};

pub async fn create(api_url: &str, owner_id: Option<&str>, data: &str) -> i32 {
    let owner = resolve_owner(owner_id);
    let body = parse_json_arg(data, "--data");
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/workouts",
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
        &format!("/v1/workouts/{id}"),
        &owner,
        None,
        &[],
    )
    .await
}

pub async fn command(api_url: &str, owner_id: Option<&str>, id: &str, data: &str) -> i32 {
    let owner = resolve_owner(owner_id);
    let body = parse_json_arg(data, "--data");
    api_request(
        api_url,
        reqwest::Method::POST,
        &format!("/v1/workouts/{id}/commands"),
        &owner,
        Some(body),
        &[],
    )
    .await
}
