//! HTTP front of the Herald broadcast server.
//!
//! | Module       | Role                                                   |
//! |--------------|--------------------------------------------------------|
//! | `server`     | [`BroadcastServer`]: admission, fan-out, shutdown      |
//! | `connection` | one subscriber's serialized stream and lifecycle       |
//! | `sink`       | byte destination behind a connection                   |
//! | `dispatch`   | new-connection notices and their handlers              |
//! | `registry`   | producer-facing publisher trait and named servers      |
//! | `http`       | axum handlers for streaming, publishing and admin      |

pub mod app;
pub mod connection;
pub mod cors;
pub mod dispatch;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod server;
pub mod sink;

pub use connection::{ConnState, Connection, ConnectionMeta};
pub use dispatch::{ConnectionHandler, HandlerBinding, LogHandler};
pub use registry::{publish, EventPublisher, ServerRegistry};
pub use request::StreamRequest;
pub use server::{BackgroundTasks, BroadcastServer};
pub use sink::{ChannelSink, EventSink, SinkError};
