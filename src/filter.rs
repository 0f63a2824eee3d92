//! Sanitizing output forwarded from a VM to the local terminal.
//!
//! A compromised VM must not be able to drive the local terminal with
//! escape sequences, so by default every byte that isn't printable ASCII
//! or harmless whitespace is replaced before it reaches stdout/stderr.
//! Output can also be wrapped in an ANSI colour to mark where it came from.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const REPLACEMENT: u8 = b'_';
const BUF_SIZE: usize = 4096;

fn is_allowed(b: u8) -> bool {
    matches!(b, 0x20..=0x7e | b'\t' | b'\n' | b'\r' | 0x08 | 0x07)
}

/// Replace disallowed bytes in place.
pub fn filter_escape_chars(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        if !is_allowed(*b) {
            *b = REPLACEMENT;
        }
    }
}

/// Per-stream output transformation.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    filter_escape: bool,
    colour: Option<u8>,
    started: bool,
}

impl OutputFilter {
    pub fn new(filter_escape: bool, colour: Option<u8>) -> Self {
        Self {
            filter_escape,
            colour,
            started: false,
        }
    }

    /// Transform one chunk. The colour sequence precedes the first chunk.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + 8);
        if !self.started {
            self.started = true;
            if let Some(colour) = self.colour {
                out.extend_from_slice(format!("\x1b[0;{colour}m").as_bytes());
            }
        }
        let start = out.len();
        out.extend_from_slice(chunk);
        if self.filter_escape {
            filter_escape_chars(&mut out[start..]);
        }
        out
    }

    /// Bytes to emit once the stream ends: resets the colour if one was set.
    pub fn finish(&mut self) -> Vec<u8> {
        if self.started && self.colour.is_some() {
            b"\x1b[0m".to_vec()
        } else {
            Vec::new()
        }
    }
}

/// Copy `reader` to `writer` through `filter` until EOF.
pub async fn forward<R, W>(mut reader: R, mut writer: W, mut filter: OutputFilter) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        writer.write_all(&filter.process(&buf[..n])).await?;
        writer.flush().await?;
    }
    writer.write_all(&filter.finish()).await?;
    writer.flush().await?;
    Ok(total)
}
