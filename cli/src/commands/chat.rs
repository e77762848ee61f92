use forma_core::stream::{StreamEvent, TurnStatus};
use futures::StreamExt;
use serde_json::json;

use crate::util::{client, exit_error, resolve_owner};

/// Post a message and print the turn's SSE events as they arrive.
/// Coach messages go to stdout as plain text; everything else is printed
/// as one JSON line per event on stderr, so scripts can separate the two.
pub async fn run(api_url: &str, owner_id: Option<&str>, session_id: &str, text: &str) -> i32 {
    let owner = resolve_owner(owner_id);

    let response = match client()
        .post(format!("{api_url}/v1/sessions/{session_id}/messages"))
        .header("x-owner-id", &owner)
        .header("accept", "text/event-stream")
        .json(&json!({ "text": text }))
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => exit_error(&format!("request failed: {err}"), None),
    };

    if !response.status().is_success() {
        let payload: serde_json::Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!({"error": "unreadable response"}));
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
        );
        return 1;
    }

    let mut exit_code = 0;
    let mut buffer = String::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => exit_error(&format!("stream failed: {err}"), None),
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // SSE frames are newline-delimited; data lines carry the payload.
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end().to_string();
            buffer.drain(..=newline);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                continue;
            };

            match &event {
                StreamEvent::Message { text } => println!("{text}"),
                StreamEvent::Error { .. } => {
                    eprintln!("{data}");
                    exit_code = 1;
                }
                StreamEvent::Done { status, .. } => {
                    eprintln!("{data}");
                    if *status != TurnStatus::Completed {
                        exit_code = 1;
                    }
                }
                _ => eprintln!("{data}"),
            }
        }
    }

    exit_code
}
