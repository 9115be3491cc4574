//! Streaming decoder (Bytes -> SSE `data:` payloads)
//!
//! Decodes the Server-Sent Events *format* only; what a payload means is the
//! driver's business.

use crate::BoxStream;
use bytes::Bytes;
use futures::{stream, StreamExt};

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// SSE decoder:
/// - normalizes CRLF line endings
/// - splits frames on a blank line
/// - joins multi-line `data:` fields with `\n`, ignores comments and other fields
/// - stops on the done signal (default "[DONE]")
#[derive(Debug, Clone)]
pub struct SseDecoder {
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SseDecoder {
    pub fn new(done_signal: Option<String>) -> Self {
        Self {
            done_signal: done_signal.unwrap_or_else(|| "[DONE]".to_string()),
        }
    }

    pub fn decode(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, String> {
        let done_signal = self.done_signal.clone();

        // Incrementally buffer bytes and emit full frames split by a blank line.
        let stream = stream::unfold(
            (input, Vec::<u8>::new(), false),
            move |(mut input, mut buf, finished)| {
                let done_signal = done_signal.clone();
                async move {
                    if finished {
                        return None;
                    }
                    loop {
                        if let Some(idx) = find(&buf, FRAME_DELIMITER) {
                            let frame: Vec<u8> = buf.drain(..idx + FRAME_DELIMITER.len()).collect();
                            match parse_frame(&frame[..idx]) {
                                Some(data) if data.trim() == done_signal => return None,
                                Some(data) => return Some((Ok(data), (input, buf, false))),
                                None => continue,
                            }
                        }

                        // Need more data.
                        match input.next().await {
                            Some(Ok(bytes)) => {
                                buf.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                            }
                            Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                            None => {
                                // EOF: a final frame may lack the trailing blank line
                                let data = parse_frame(&buf)?;
                                if data.trim() == done_signal {
                                    return None;
                                }
                                return Some((Ok(data), (input, Vec::new(), true)));
                            }
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Joined `data:` lines of one frame, or `None` when the frame carries no data.
fn parse_frame(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut data: Option<String> = None;
    for line in text.lines() {
        // Ignore SSE comment lines and non-data fields (event:, id:, retry:)
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match &mut data {
            Some(d) => {
                d.push('\n');
                d.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data.filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    async fn decode_chunks(chunks: Vec<&'static str>) -> Vec<Result<String>> {
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        ));
        SseDecoder::default().decode(input).collect().await
    }

    #[tokio::test]
    async fn splits_frames_across_chunk_boundaries() {
        let out = decode_chunks(vec![
            "data: {\"a\":",
            "1}\n\nevent: ping\ndata: {\"b\":2}\r\n\r\n: keep-alive\n\n",
            "data: [DONE]\n\n",
            "data: {\"after\":true}\n\n",
        ])
        .await;
        let out: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn joins_multiline_data_and_flushes_tail_at_eof() {
        let out = decode_chunks(vec!["data: line1\ndata: line2\n\n", "data: tail"]).await;
        let out: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec!["line1\nline2", "tail"]);
    }

    #[tokio::test]
    async fn multibyte_characters_survive_split_chunks() {
        let bytes = "data: {\"t\":\"héllo\"}\n\n".as_bytes();
        let split = 14; // inside the two-byte 'é'
        let (a, b) = (bytes[..split].to_vec(), bytes[split..].to_vec());
        let input: BoxStream<'static, Bytes> =
            Box::pin(stream::iter(vec![Ok(Bytes::from(a)), Ok(Bytes::from(b))]));
        let out: Vec<Result<String>> = SseDecoder::default().decode(input).collect().await;
        assert_eq!(out[0].as_ref().unwrap(), "{\"t\":\"héllo\"}");
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"data: 1\n\n")),
            Err(crate::Error::validation("boom")),
            Ok(Bytes::from_static(b"data: 2\n\n")),
        ]));
        let out: Vec<Result<String>> = SseDecoder::default().decode(input).collect().await;
        assert_eq!(out.len(), 2);
        assert!(out[1].is_err());
    }
}
