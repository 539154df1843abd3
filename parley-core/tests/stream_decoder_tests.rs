//! Stream decoder tests: chunk-split robustness, framing and cancellation

use bytes::Bytes;
use futures::StreamExt;
use parley_core::providers::ProviderError;
use parley_core::stream::{decode_frames, FrameDecoder};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use test_case::test_case;
use tokio_util::sync::CancellationToken;

/// Feed `body` to a decoder in the given pieces and collect every frame
fn decode_in_pieces(body: &[u8], cuts: &[usize]) -> Vec<Value> {
    let mut decoder = FrameDecoder::new(200);
    let mut frames = Vec::new();
    let mut start = 0;
    for &cut in cuts.iter().chain(std::iter::once(&body.len())) {
        let end = cut.clamp(start, body.len());
        decoder.push(&body[start..end]);
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame.unwrap());
        }
        start = end;
    }
    decoder.finish();
    while let Some(frame) = decoder.next_frame() {
        frames.push(frame.unwrap());
    }
    frames
}

fn chunked(pieces: Vec<&'static str>) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::iter(pieces.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))))
}

fn sse_body(texts: &[String]) -> String {
    let mut body = String::new();
    for (i, text) in texts.iter().enumerate() {
        if i % 2 == 0 {
            body.push_str(": keepalive\n");
        }
        body.push_str("event: delta\n");
        body.push_str(&format!("data: {}\n\n", json!({"i": i, "t": text})));
    }
    body.push_str("data: [DONE]\n");
    body
}

proptest! {
    #[test]
    fn prop_frames_survive_any_split(
        texts in prop::collection::vec("[a-zé漢😀 ]{0,12}", 1..8),
        mut cuts in prop::collection::vec(0usize..512, 0..16),
    ) {
        let body = sse_body(&texts);
        cuts.sort_unstable();

        let frames = decode_in_pieces(body.as_bytes(), &cuts);
        let expected: Vec<Value> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"i": i, "t": t}))
            .collect();
        prop_assert_eq!(frames, expected);
    }

    #[test]
    fn prop_ndjson_order_preserved_byte_by_byte(count in 1usize..20) {
        let body: String = (0..count).map(|i| format!("{{\"n\":{}}}\n", i)).collect();
        let cuts: Vec<usize> = (0..body.len()).collect();
        let frames = decode_in_pieces(body.as_bytes(), &cuts);
        let ns: Vec<u64> = frames.iter().map(|f| f["n"].as_u64().unwrap()).collect();
        prop_assert_eq!(ns, (0..count as u64).collect::<Vec<_>>());
    }
}

#[test_case("data: [DONE]\n" ; "sse sentinel")]
#[test_case("[DONE]\n" ; "bare sentinel")]
#[test_case(": ping\n\n" ; "comment keepalive")]
#[test_case("event: ping\n" ; "event metadata")]
#[test_case("data:\n" ; "empty data")]
#[test_case("\r\n\r\n" ; "blank crlf lines")]
fn test_non_payload_lines_yield_nothing(body: &str) {
    assert!(decode_in_pieces(body.as_bytes(), &[]).is_empty());
}

#[tokio::test]
async fn test_vertex_sse_scenario_yields_one_frame() {
    let source = chunked(vec![
        "data: {\"candidates\":[{\"index\":0}]}\n",
        "\n",
        "event: ping\n",
        "data: [DONE]\n",
    ]);
    let frames: Vec<_> = decode_frames(source, 200, CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].as_ref().unwrap(), &json!({"candidates": [{"index": 0}]}));
}

#[tokio::test]
async fn test_trailing_line_without_newline_is_flushed() {
    let source = chunked(vec!["{\"a\":1}\n{\"b\"", ":2}"]);
    let frames: Vec<_> = decode_frames(source, 200, CancellationToken::new())
        .map(|f| f.unwrap())
        .collect()
        .await;
    assert_eq!(frames, vec![json!({"a": 1}), json!({"b": 2})]);
}

#[tokio::test]
async fn test_trailing_garbage_is_protocol_error() {
    let source = chunked(vec!["{\"a\":1}\n", "{\"b\":"]);
    let frames: Vec<_> = decode_frames(source, 200, CancellationToken::new())
        .collect()
        .await;
    assert_eq!(frames.len(), 2);
    assert!(frames[0].is_ok());
    assert!(matches!(frames[1], Err(ProviderError::Protocol { status: 200, .. })));
}

#[tokio::test]
async fn test_malformed_line_stops_stream() {
    let source = chunked(vec!["data: {\"ok\":1}\n", "data: {nope\n", "data: {\"late\":1}\n"]);
    let frames: Vec<_> = decode_frames(source, 207, CancellationToken::new())
        .collect()
        .await;
    assert_eq!(frames.len(), 2);
    match &frames[1] {
        Err(ProviderError::Protocol { status, message }) => {
            assert_eq!(*status, 207);
            assert!(message.starts_with("Failed to parse streamed response chunk"));
        }
        other => panic!("Expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_read_error_becomes_network_error() {
    let source = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"{\"a\":1}\n")),
        Err("connection reset"),
    ]);
    let frames: Vec<_> = decode_frames(source, 200, CancellationToken::new())
        .collect()
        .await;
    assert!(frames[0].is_ok());
    assert!(matches!(&frames[1], Err(ProviderError::Network(m)) if m.contains("connection reset")));
}

#[tokio::test]
async fn test_cancellation_stops_reading() {
    let cancel = CancellationToken::new();
    let first = futures::stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(b"{\"a\":1}\n"))]);
    let stalled = first.chain(futures::stream::pending());

    let mut frames = decode_frames(stalled, 200, cancel.clone());
    assert_eq!(frames.next().await.unwrap().unwrap(), json!({"a": 1}));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    assert!(matches!(frames.next().await, Some(Err(ProviderError::Cancelled))));
    assert!(frames.next().await.is_none());
}

#[tokio::test]
async fn test_stream_is_lazy() {
    let polled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = polled.clone();
    let source = futures::stream::once(async move {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok::<_, Infallible>(Bytes::from_static(b"{}\n"))
    });

    let frames = decode_frames(source, 200, CancellationToken::new());
    tokio::task::yield_now().await;
    assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    drop(frames);
}
