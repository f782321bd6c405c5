//! Server-Sent Events (SSE) processing for streamed agent runs.
//!
//! This module handles parsing and processing of SSE streams from the agents
//! service, converting raw byte streams into structured [`AgentStreamEvent`]
//! objects.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_EVENTS};
use crate::types::{AgentStreamEvent, LastError};
use crate::{Error, Result};

/// Process a stream of bytes into a stream of agent run events.
///
/// Frames may be split across chunks arbitrarily; bytes are buffered until a
/// blank line terminates a frame.  Carriage returns are dropped so CRLF
/// framed streams parse the same as LF framed ones.  Comment-only frames are
/// skipped.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<AgentStreamEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    // Convert reqwest errors to our error type
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (stream, buffer),
        move |(mut stream, mut buffer)| async move {
            loop {
                // First check if we have a complete frame in the buffer
                if let Some(frame) = take_frame(&mut buffer) {
                    match decode_frame(&frame) {
                        Some(event) => {
                            record(&event);
                            return Some((event, (stream, buffer)));
                        }
                        None => continue,
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, buffer)));
                    }
                    None => {
                        // End of stream; a final frame may lack its blank line
                        if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                            let frame = std::mem::take(&mut buffer);
                            if let Some(event) = decode_frame(&frame) {
                                record(&event);
                                return Some((event, (stream, buffer)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

fn record(event: &Result<AgentStreamEvent>) {
    match event {
        Ok(_) => STREAM_EVENTS.click(),
        Err(_) => STREAM_ERRORS.click(),
    }
}

/// Remove and return the first complete frame from `buffer`.
fn take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let rest = buffer.split_off(end + 2);
    let mut frame = std::mem::replace(buffer, rest);
    frame.truncate(end);
    Some(frame)
}

/// Decode one frame into an event.
///
/// Returns `None` for frames that carry nothing (keep-alive comments).
fn decode_frame(frame: &[u8]) -> Option<Result<AgentStreamEvent>> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text,
        Err(e) => return Some(Err(e.into())),
    };

    let mut event_type = None;
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            return Some(Err(Error::serialization(
                format!("Malformed SSE event: missing field separator in '{line}'"),
                None,
            )));
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event_type = Some(value.trim()),
            "data" => data.push(value),
            // id and retry carry nothing this client uses
            _ => {}
        }
    }

    if event_type.is_none() && data.is_empty() {
        return None;
    }
    let data = data.join("\n");
    Some(parse_event_type(event_type.unwrap_or("message"), data.trim()))
}

fn parse_json<T: DeserializeOwned>(event_type: &str, data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        Error::serialization(
            format!("Failed to parse {event_type} payload: {e}"),
            Some(Box::new(e)),
        )
    })
}

/// Parse a specific SSE event type and its data.
fn parse_event_type(event_type: &str, data: &str) -> Result<AgentStreamEvent> {
    if data == "[DONE]" {
        return Ok(AgentStreamEvent::Done);
    }
    let event = match event_type {
        "done" => AgentStreamEvent::Done,
        "thread.created" => AgentStreamEvent::ThreadCreated(parse_json(event_type, data)?),
        "thread.run.created" => AgentStreamEvent::RunCreated(parse_json(event_type, data)?),
        "thread.run.queued"
        | "thread.run.in_progress"
        | "thread.run.requires_action"
        | "thread.run.cancelling" => {
            AgentStreamEvent::RunStatusChanged(parse_json(event_type, data)?)
        }
        "thread.run.completed" => AgentStreamEvent::RunCompleted(parse_json(event_type, data)?),
        "thread.run.failed"
        | "thread.run.cancelled"
        | "thread.run.expired"
        | "thread.run.incomplete" => AgentStreamEvent::RunEnded(parse_json(event_type, data)?),
        "thread.message.created" => {
            AgentStreamEvent::MessageCreated(parse_json(event_type, data)?)
        }
        "thread.message.in_progress" => {
            AgentStreamEvent::MessageInProgress(parse_json(event_type, data)?)
        }
        "thread.message.delta" => AgentStreamEvent::MessageDelta(parse_json(event_type, data)?),
        "thread.message.completed" | "thread.message.incomplete" => {
            AgentStreamEvent::MessageCompleted(parse_json(event_type, data)?)
        }
        "error" => AgentStreamEvent::Error(parse_error_payload(data)),
        _ if event_type.starts_with("thread.run.step.") => {
            AgentStreamEvent::RunStep(event_type.to_string())
        }
        _ => AgentStreamEvent::Unknown(event_type.to_string()),
    };
    Ok(event)
}

/// Error payloads come either bare or wrapped in an `error` object, and
/// sometimes as plain text.
fn parse_error_payload(data: &str) -> LastError {
    #[derive(serde::Deserialize)]
    struct Wrapped {
        error: LastError,
    }

    if let Ok(wrapped) = serde_json::from_str::<Wrapped>(data) {
        return wrapped.error;
    }
    if let Ok(bare) = serde_json::from_str::<LastError>(data)
        && !bare.message.is_empty()
    {
        return bare;
    }
    LastError {
        code: None,
        message: data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn sse_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static
    {
        stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk)))
                .collect::<Vec<_>>(),
        )
    }

    const DELTA: &[u8] = b"event: thread.message.delta\ndata: {\"id\":\"msg_1\",\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\"Hi\"}}]}}\n\n";

    #[tokio::test]
    async fn parse_delta_event() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![DELTA])));
        let event = sse.next().await.unwrap().unwrap();
        match event {
            AgentStreamEvent::MessageDelta(delta) => {
                assert_eq!(delta.text().as_deref(), Some("Hi"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sse.next().await.is_none());
    }

    #[tokio::test]
    async fn parse_done_event() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![b"event: done\ndata: [DONE]\n\n"])));
        assert_eq!(sse.next().await.unwrap().unwrap(), AgentStreamEvent::Done);
    }

    #[tokio::test]
    async fn handle_split_event() {
        let (head, tail) = DELTA.split_at(17);
        let mut sse = Box::pin(process_sse(sse_stream(vec![head, tail])));
        let event = sse.next().await.unwrap().unwrap();
        assert!(matches!(event, AgentStreamEvent::MessageDelta(_)));
    }

    #[tokio::test]
    async fn handle_crlf_framing() {
        let data: &[u8] = b"event: thread.run.created\r\ndata: {\"id\":\"run_1\",\"thread_id\":\"t\",\"status\":\"queued\",\"created_at\":1}\r\n\r\nevent: done\r\ndata: [DONE]\r\n\r\n";
        let mut sse = Box::pin(process_sse(sse_stream(vec![data])));
        let first = sse.next().await.unwrap().unwrap();
        assert!(matches!(first, AgentStreamEvent::RunCreated(ref run) if run.id == "run_1"));
        assert_eq!(sse.next().await.unwrap().unwrap(), AgentStreamEvent::Done);
    }

    #[tokio::test]
    async fn handle_multibyte_split() {
        let data = "event: thread.message.delta\ndata: {\"id\":\"m\",\"delta\":{\"content\":[{\"index\":0,\"type\":\"text\",\"text\":{\"value\":\"héllo\"}}]}}\n\n";
        let bytes = data.as_bytes();
        let split = data.find('é').unwrap() + 1;
        let head: &'static [u8] = Box::leak(bytes[..split].to_vec().into_boxed_slice());
        let tail: &'static [u8] = Box::leak(bytes[split..].to_vec().into_boxed_slice());
        let mut sse = Box::pin(process_sse(sse_stream(vec![head, tail])));
        match sse.next().await.unwrap().unwrap() {
            AgentStreamEvent::MessageDelta(delta) => {
                assert_eq!(delta.text().as_deref(), Some("héllo"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_comment_frames() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![
            b": keep-alive\n\n",
            b"event: done\ndata: [DONE]\n\n",
        ])));
        assert_eq!(sse.next().await.unwrap().unwrap(), AgentStreamEvent::Done);
    }

    #[tokio::test]
    async fn final_frame_without_blank_line() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![b"event: done\ndata: [DONE]"])));
        assert_eq!(sse.next().await.unwrap().unwrap(), AgentStreamEvent::Done);
        assert!(sse.next().await.is_none());
    }

    #[tokio::test]
    async fn handle_malformed_event() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![
            b"malformed data without proper format\n\n",
        ])));
        assert!(sse.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn handle_bad_json() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![
            b"event: thread.message.delta\ndata: {not json}\n\n",
        ])));
        let err = sse.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("thread.message.delta"));
    }

    #[tokio::test]
    async fn unknown_and_step_events_pass_through() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![
            b"event: thread.run.step.created\ndata: {}\n\nevent: vendor.custom\ndata: {}\n\n",
        ])));
        assert_eq!(
            sse.next().await.unwrap().unwrap(),
            AgentStreamEvent::RunStep("thread.run.step.created".to_string())
        );
        assert_eq!(
            sse.next().await.unwrap().unwrap(),
            AgentStreamEvent::Unknown("vendor.custom".to_string())
        );
    }

    #[tokio::test]
    async fn error_event_payloads() {
        let mut sse = Box::pin(process_sse(sse_stream(vec![
            b"event: error\ndata: {\"error\":{\"code\":\"server_error\",\"message\":\"boom\"}}\n\n",
            b"event: error\ndata: upstream went away\n\n",
        ])));
        assert_eq!(
            sse.next().await.unwrap().unwrap(),
            AgentStreamEvent::Error(LastError {
                code: Some("server_error".to_string()),
                message: "boom".to_string(),
            })
        );
        assert_eq!(
            sse.next().await.unwrap().unwrap(),
            AgentStreamEvent::Error(LastError {
                code: None,
                message: "upstream went away".to_string(),
            })
        );
    }
}
