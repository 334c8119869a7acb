//! Server-Sent-Events streaming for `/completion` and `/v1/chat/completions`
//! (`"stream": true`).
//!
//! llama.cpp's streaming wire format is a sequence of `data: {json}\n\n`
//! frames. `/completion` terminates its own frames with `"stop": true`;
//! the OpenAI-compatible `/v1/chat/completions` instead sends a literal
//! `data: [DONE]` sentinel as its last frame. Either way we parse
//! line-by-line over whatever `post_raw_stream` hands back, skip frames that
//! don't parse as JSON rather than aborting the whole stream (a single
//! malformed keep-alive comment line shouldn't kill an otherwise-good
//! generation), and stop at the first frame that is terminal.

use std::io::{BufRead, BufReader, Read};

use serde_json::Value;

use crate::{
    LmcppServer,
    client::types::completion::{CompletionRequest, CompletionResponse},
    error::LmcppResult,
    server::ipc::error::ClientError,
};

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

impl LmcppServer {
    /// Streams a `/completion` request, calling `on_chunk` once per parsed
    /// SSE frame. Returns once the server signals completion (`stop: true`)
    /// or the connection ends.
    pub fn completion_stream<F>(&self, mut request: CompletionRequest, mut on_chunk: F) -> LmcppResult<()>
    where
        F: FnMut(CompletionResponse),
    {
        request.stream = true;
        let body = serde_json::to_vec(&request).map_err(ClientError::from)?;
        let reader = self.client.post_raw_stream("/completion", &body)?;

        for line in BufReader::new(reader).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break, // connection dropped; treat as stream end
            };
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue; // blank line / comment / keep-alive, not a data frame
            };
            if payload.trim() == DONE_MARKER {
                break;
            }
            let Ok(chunk) = serde_json::from_str::<CompletionResponse>(payload) else {
                continue; // malformed frame: skip, don't abort the stream
            };
            let is_final = chunk.stop.unwrap_or(false);
            on_chunk(chunk);
            if is_final {
                break;
            }
        }
        Ok(())
    }

    /// Streams a `/v1/chat/completions` request, calling `on_delta` once per
    /// non-empty `choices[0].delta.content` string as it arrives. `stream` is
    /// forced to `true` in `body` regardless of what the caller set, since
    /// there is no other way to reach this method. Returns once `[DONE]` is
    /// seen or the connection ends.
    pub fn chat_completion_stream<F>(&self, mut body: Value, on_delta: F) -> LmcppResult<()>
    where
        F: FnMut(&str),
    {
        body["stream"] = Value::Bool(true);
        let bytes = serde_json::to_vec(&body).map_err(ClientError::from)?;
        let reader = self.client.post_raw_stream("/v1/chat/completions", &bytes)?;
        parse_chat_sse(reader, on_delta)
    }
}

/// Parses a chat-completions SSE byte stream, extracting
/// `choices[0].delta.content` from each `data: {json}` frame. Factored out of
/// [`LmcppServer::chat_completion_stream`] so the resilience behaviour —
/// skip-unparseable-frame, terminate-on-`[DONE]` — can be exercised against
/// an in-memory reader without a live server.
fn parse_chat_sse<R, F>(reader: R, mut on_delta: F) -> LmcppResult<()>
where
    R: Read,
    F: FnMut(&str),
{
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break, // connection dropped; treat as stream end
        };
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            continue; // blank line / comment / keep-alive, not a data frame
        };
        if payload.trim() == DONE_MARKER {
            break;
        }
        let Ok(frame) = serde_json::from_str::<Value>(payload) else {
            continue; // malformed frame: skip, don't abort the stream
        };
        if let Some(content) = frame["choices"][0]["delta"]["content"].as_str() {
            if !content.is_empty() {
                on_delta(content);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn done_marker_terminates_before_json_parse() {
        // Smoke-test the frame-recognition predicates in isolation, since
        // exercising completion_stream end-to-end needs a live server.
        let line = format!("{DATA_PREFIX}{DONE_MARKER}");
        let payload = line.strip_prefix(DATA_PREFIX).unwrap();
        assert_eq!(payload.trim(), DONE_MARKER);
    }

    /// Property 9: a malformed frame in the middle of a chat stream is
    /// skipped, not fatal — every valid delta before and after it is still
    /// yielded, and the stream terminates cleanly on `[DONE]`.
    #[test]
    fn chat_sse_skips_malformed_frame_and_terminates_on_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            "data: not json at all\n",
            "data: {\"choices\":[{\"delta\":{}}]}\n", // no content key: ignored
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n", // empty: ignored
            "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"unreachable\"}}]}\n",
        );

        let mut deltas = Vec::new();
        parse_chat_sse(Cursor::new(body.as_bytes()), |chunk| deltas.push(chunk.to_string())).unwrap();

        assert_eq!(deltas, vec!["Hel", "lo", " world"]);
    }

    #[test]
    fn chat_sse_with_no_done_marker_drains_to_eof() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"only\"}}]}\n";

        let mut deltas = Vec::new();
        parse_chat_sse(Cursor::new(body.as_bytes()), |chunk| deltas.push(chunk.to_string())).unwrap();

        assert_eq!(deltas, vec!["only"]);
    }
}
