//! AsyncRead adapter over a channel of body chunks produced on a blocking thread.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Body stream fed by a producer (the curl write callback). A closed channel
/// is end of body; an `Err` item is a transfer failure.
pub(crate) struct ChannelBody {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChannelBody {
    pub(crate) fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl AsyncRead for ChannelBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.pos < self.chunk.len() {
                let n = buf.remaining().min(self.chunk.len() - self.pos);
                let start = self.pos;
                buf.put_slice(&self.chunk[start..start + n]);
                self.pos += n;
                return Poll::Ready(Ok(()));
            }
            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_across_chunk_boundaries_in_small_buffers() {
        let (tx, rx) = mpsc::channel(4);
        let mut body = ChannelBody::new(rx);
        tokio::spawn(async move {
            tx.send(Ok(b"hello ".to_vec())).await.unwrap();
            tx.send(Ok(Vec::new())).await.unwrap();
            tx.send(Ok(b"world".to_vec())).await.unwrap();
        });
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = body.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn producer_error_surfaces_to_reader() {
        let (tx, rx) = mpsc::channel(4);
        let mut body = ChannelBody::new(rx);
        tx.send(Ok(b"ab".to_vec())).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .await
            .unwrap();
        drop(tx);
        let mut buf = [0u8; 8];
        assert_eq!(body.read(&mut buf).await.unwrap(), 2);
        let err = body.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
