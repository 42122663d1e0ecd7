//! Line-oriented event source
//!
//! Reads one event per line from any async reader (stdin, a file, a socket).
//! Blank lines and lines starting with `#` are skipped.

use super::{EventSource, PacketEvent};
use crate::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

pub struct LineSource<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Number of lines read so far
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R> EventSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_event(&mut self) -> Result<Option<PacketEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            return PacketEvent::parse_line(line)
                .map(Some)
                .map_err(|e| match e {
                    Error::InvalidInput(msg) => {
                        Error::InvalidInput(format!("line {}: {}", self.line_no, msg))
                    }
                    other => other,
                });
        }
        Ok(None)
    }
}
