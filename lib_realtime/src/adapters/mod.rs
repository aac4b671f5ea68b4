//! Consumer-facing adapters over the shared connection.

mod buffer;
mod channel_feed;

pub use buffer::ChannelBuffer;
pub use channel_feed::ChannelFeed;
pub(crate) use channel_feed::FeedSink;
