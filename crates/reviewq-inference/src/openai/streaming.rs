//! SSE stream parsing for OpenAI-compatible streaming responses.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use reviewq_core::{Error, Result};

use super::types::ChatCompletionChunk;

/// Stream of generated text deltas.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Parse SSE stream from OpenAI-compatible endpoint.
///
/// Network chunks are not aligned with SSE events, so bytes are buffered and
/// only complete lines are parsed.
pub fn parse_sse_stream(
    stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> TokenStream {
    let mut buffer = String::new();
    stream
        .map(|chunk_result| {
            chunk_result.map_err(|e| Error::Inference(format!("Stream error: {}", e)))
        })
        .filter_map(move |result| {
            let parsed = match result {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    match buffer.rfind('\n') {
                        Some(end) => {
                            let complete: String = buffer.drain(..=end).collect();
                            parse_sse_chunk(&complete)
                        }
                        None => None,
                    }
                }
                Err(e) => Some(Err(e)),
            };
            async move { parsed }
        })
        .boxed()
}

/// Parse complete SSE lines and extract content.
fn parse_sse_chunk(chunk: &str) -> Option<Result<String>> {
    let mut content = String::new();

    for line in chunk.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        if line == "data: [DONE]" {
            break;
        }

        if let Some(data) = line.strip_prefix("data: ") {
            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    for choice in chunk.choices {
                        if let Some(c) = choice.delta.content {
                            content.push_str(&c);
                        }
                    }
                }
                Err(e) => {
                    return Some(Err(Error::Inference(format!(
                        "Failed to parse SSE chunk: {}",
                        e
                    ))));
                }
            }
        }
    }

    if content.is_empty() {
        None
    } else {
        Some(Ok(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_chunk_with_content() {
        let chunk = r#"data: {"id":"test","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_chunk(chunk).unwrap().unwrap(), "Hello");
    }

    #[test]
    fn test_parse_sse_chunk_done() {
        assert!(parse_sse_chunk("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_sse_chunk_role_only() {
        let chunk = r#"data: {"id":"test","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        assert!(parse_sse_chunk(chunk).is_none());
    }

    #[test]
    fn test_parse_sse_chunk_multiple_lines() {
        let chunk = r#"data: {"id":"t","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}

data: {"id":"t","choices":[{"index":0,"delta":{"content":" World"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_chunk(chunk).unwrap().unwrap(), "Hello World");
    }

    #[test]
    fn test_parse_sse_chunk_invalid_json() {
        assert!(parse_sse_chunk("data: {invalid json}").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_lines() {
        let line = "data: {\"id\":\"t\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n";
        let (head, tail) = line.split_at(20);
        let parts: Vec<std::result::Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from(head.to_string())),
            Ok(bytes::Bytes::from(tail.to_string())),
            Ok(bytes::Bytes::from("data: [DONE]\n\n")),
        ];
        let deltas: Vec<String> = parse_sse_stream(futures::stream::iter(parts))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hi".to_string()]);
    }
}
