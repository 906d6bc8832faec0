use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::util::RingBytes;

#[derive(Debug, Clone)]
pub struct LineTap {
    pub line: String,
    pub stream: LineStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStream {
    Stdout,
    Stderr,
}

impl LineStream {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Receives complete lines read from a child. Must not block.
pub trait LineTapSink: Send + Sync {
    fn tap(&self, tap: LineTap);
}

/// Copies `rd` into `ring` (when given) and forwards each complete line to
/// `sink` (when given) until EOF. Returns the number of bytes read.
pub fn pump<R>(
    mut rd: R,
    ring: Option<Arc<RingBytes>>,
    sink: Option<Arc<dyn LineTapSink>>,
    stream: LineStream,
) -> JoinHandle<std::io::Result<u64>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;
        let mut line_buf: Vec<u8> = Vec::with_capacity(8 * 1024);

        loop {
            let n = match rd.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(stream = stream.label(), error = %e, "pump read failed");
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }

            if let Some(ring) = ring.as_ref() {
                ring.push(&buf[..n]);
            }
            total += n as u64;

            let Some(sink) = sink.as_ref() else {
                continue;
            };
            line_buf.extend_from_slice(&buf[..n]);
            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let mut one = line_buf.drain(..=pos).collect::<Vec<u8>>();
                trim_newline(&mut one);
                let line = String::from_utf8_lossy(&one).to_string();
                sink.tap(LineTap { line, stream });
            }
        }

        // EOF flush: deliver the last partial line if it doesn't end with '\n'.
        if let Some(sink) = sink.as_ref() {
            trim_newline(&mut line_buf);
            if !line_buf.is_empty() {
                let line = String::from_utf8_lossy(&line_buf).to_string();
                sink.tap(LineTap { line, stream });
            }
        }

        Ok(total)
    })
}

fn trim_newline(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Collect(Mutex<Vec<LineTap>>);

    impl LineTapSink for Collect {
        fn tap(&self, tap: LineTap) {
            self.0.lock().unwrap().push(tap);
        }
    }

    #[tokio::test]
    async fn flushes_last_line_without_newline_on_eof() {
        let (mut wr, rd) = tokio::io::duplex(1024);
        let ring = RingBytes::new(1024);
        let sink = Arc::new(Collect::default());

        let task = pump(rd, Some(ring.clone()), Some(sink.clone()), LineStream::Stdout);

        wr.write_all(b"first\r\nhello").await.unwrap();
        drop(wr);

        assert_eq!(task.await.unwrap().unwrap(), 12);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, "first");
        assert_eq!(lines[1].line, "hello");
        assert_eq!(lines[1].stream, LineStream::Stdout);
        assert_eq!(ring.to_string_lossy(), "first\r\nhello");
    }
}
