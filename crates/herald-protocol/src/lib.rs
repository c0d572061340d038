//! Wire types shared by the server and its producers: the SSE event block,
//! connection notices and snapshots, and publish targets.

pub mod event;
pub mod notice;
pub mod target;

pub use event::Event;
pub use notice::{ConnectionInfo, ConnectionNotice};
pub use target::{DataFormat, Target};
