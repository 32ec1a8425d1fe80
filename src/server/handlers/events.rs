//! Server-sent event stream mirroring the in-process bus.
//!
//! The subscription receiver is wrapped in a blocking `Read` impl handed to
//! tiny_http, which writes frames as they become available. Dropping the
//! response (client disconnect) drops the reader, which detaches the
//! subscription.

use std::io::Read;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use tracing::debug;

use crate::app::AppContext;
use crate::domain::Event;
use crate::events::SubscriptionId;

pub fn stream(ctx: &Arc<AppContext>, request: tiny_http::Request) {
    let (id, rx) = ctx.bus.subscribe();
    debug!("event stream subscriber {} connected", id);

    let reader = SseReader::new(Arc::clone(ctx), id, rx);
    let response = tiny_http::Response::new(
        tiny_http::StatusCode(200),
        vec![
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/event-stream"[..])
                .expect("static header"),
            tiny_http::Header::from_bytes(&b"Cache-Control"[..], &b"no-cache"[..])
                .expect("static header"),
        ],
        reader,
        None,
        None,
    );
    let _ = request.respond(response);
}

/// One SSE frame: an event-name line, a JSON data line, a blank line.
fn frame(event: &Event) -> String {
    format!("event: {}\ndata: {}\n\n", event.name(), event.payload())
}

struct SseReader {
    ctx: Arc<AppContext>,
    id: SubscriptionId,
    rx: Receiver<Event>,
    pending: Vec<u8>,
    offset: usize,
}

impl SseReader {
    fn new(ctx: Arc<AppContext>, id: SubscriptionId, rx: Receiver<Event>) -> Self {
        Self {
            ctx,
            id,
            rx,
            // Initial comment frame flushes headers on the client side.
            pending: b": connected\n\n".to_vec(),
            offset: 0,
        }
    }
}

impl Read for SseReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.offset >= self.pending.len() {
            // Block until the next event; a closed bus ends the stream.
            match self.rx.recv() {
                Ok(event) => {
                    self.pending = frame(&event).into_bytes();
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = (&self.pending[self.offset..]).read(buf)?;
        self.offset += n;
        Ok(n)
    }
}

impl Drop for SseReader {
    fn drop(&mut self) {
        debug!("event stream subscriber {} disconnected", self.id);
        self.ctx.bus.unsubscribe(self.id);
    }
}
