//! Stream Capture
//!
//! Drains the combined output of one exec into a bounded buffer. Stops at the
//! end of the stream, at the byte cap, or at the deadline, whichever comes
//! first, and reports which one it was so a hang never looks like silence.

use bollard::container::LogOutput;
use futures_util::stream::{Stream, StreamExt};
use tokio::time::Instant;

use crate::error::RuntimeError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    /// The byte cap was reached and reading stopped
    pub truncated: bool,
    /// The deadline passed before the stream closed
    pub timed_out: bool,
}

fn frame_bytes(frame: &LogOutput) -> Option<&[u8]> {
    match frame {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => Some(&message[..]),
        LogOutput::StdIn { .. } => None,
    }
}

/// Read `stream` until it closes, `limit` bytes are collected or `deadline` passes.
///
/// Only a transport fault on the stream is an error. An exec that prints
/// nothing yields an empty, untruncated, non-timed-out capture.
pub async fn capture<S>(
    mut stream: S,
    limit: usize,
    deadline: Instant,
) -> Result<CapturedOutput, RuntimeError>
where
    S: Stream<Item = Result<LogOutput, RuntimeError>> + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut timed_out = false;

    loop {
        let next = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                timed_out = true;
                break;
            }
        };

        let frame = match next {
            Some(frame) => frame?,
            None => break,
        };

        let Some(bytes) = frame_bytes(&frame) else {
            continue;
        };

        let room = limit.saturating_sub(buffer.len());
        if bytes.len() > room {
            buffer.extend_from_slice(&bytes[..room]);
            truncated = true;
            break;
        }
        buffer.extend_from_slice(bytes);
    }

    // Decode once so multi-byte characters split across frames survive
    Ok(CapturedOutput {
        text: String::from_utf8_lossy(&buffer).into_owned(),
        truncated,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::time::Duration;

    fn stdout(text: &str) -> Result<LogOutput, RuntimeError> {
        Ok(LogOutput::StdOut {
            message: text.as_bytes().to_vec().into(),
        })
    }

    fn stderr(text: &str) -> Result<LogOutput, RuntimeError> {
        Ok(LogOutput::StdErr {
            message: text.as_bytes().to_vec().into(),
        })
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_empty_stream_is_empty_capture() {
        let frames: Vec<Result<LogOutput, RuntimeError>> = Vec::new();
        let output = capture(stream::iter(frames), 1024, soon()).await.unwrap();
        assert_eq!(output, CapturedOutput::default());
    }

    #[tokio::test]
    async fn test_interleaves_in_arrival_order() {
        let frames = vec![stdout("running\n"), stderr("Traceback\n"), stdout("done\n")];
        let output = capture(stream::iter(frames), 1024, soon()).await.unwrap();
        assert_eq!(output.text, "running\nTraceback\ndone\n");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_stops_at_byte_cap() {
        let frames = vec![stdout("0123456789"), stdout("abcdef"), stdout("never read")];
        let output = capture(stream::iter(frames), 12, soon()).await.unwrap();
        assert_eq!(output.text, "0123456789ab");
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_exact_cap_is_not_truncated() {
        let frames = vec![stdout("01234"), stdout("56789")];
        let output = capture(stream::iter(frames), 10, soon()).await.unwrap();
        assert_eq!(output.text, "0123456789");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_split_utf8_is_decoded_whole() {
        let snowman = "☃".as_bytes();
        let frames = vec![
            Ok(LogOutput::StdErr { message: snowman[..1].to_vec().into() }),
            Ok(LogOutput::StdErr { message: snowman[1..].to_vec().into() }),
        ];
        let output = capture(stream::iter(frames), 1024, soon()).await.unwrap();
        assert_eq!(output.text, "☃");
    }

    #[tokio::test]
    async fn test_deadline_keeps_partial_output() {
        let frames = stream::iter(vec![stdout("partial")]).chain(stream::pending());
        let deadline = Instant::now() + Duration::from_millis(50);
        let output = capture(Box::pin(frames), 1024, deadline).await.unwrap();
        assert_eq!(output.text, "partial");
        assert!(output.timed_out);
    }

    #[tokio::test]
    async fn test_stream_fault_is_error() {
        let frames = vec![
            stdout("before"),
            Err(RuntimeError::DockerResponseServerError {
                status_code: 500,
                message: "connection reset".to_string(),
            }),
        ];
        assert!(capture(stream::iter(frames), 1024, soon()).await.is_err());
    }
}
