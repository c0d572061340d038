use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::connection::Connection;
use crate::http::error::ApiError;
use crate::request::StreamRequest;
use crate::server::BroadcastServer;
use crate::sink::ChannelSink;

/// Response body of one subscriber. Dropping it (hyper does so when the
/// client goes away) closes the connection.
struct SubscriberStream {
    frames: ReceiverStream<String>,
    conn: Arc<Connection>,
}

impl Stream for SubscriberStream {
    type Item = Result<String, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        if self.conn.is_active() {
            debug!(conn_id = %self.conn.id(), "response body dropped");
        }
        self.conn.close();
    }
}

/// Any method on {path}. Only GET is admitted; everything else gets 405.
pub async fn stream_handler(State(server): State<BroadcastServer>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let subscribe = StreamRequest::from_http(&parts.method, &parts.headers, &parts.uri, peer);

    let (sink, rx) = ChannelSink::pair(server.stream_buffer(), server.config().write_timeout());
    let conn = match server.accept(subscribe, Box::new(sink)).await {
        Ok(conn) => conn,
        Err(e) => return ApiError(e).into_response(),
    };

    let ended = conn.cancellation();
    let frames = SubscriberStream {
        frames: ReceiverStream::new(rx),
        conn,
    }
    .take_until(ended.cancelled_owned());

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
