//! # streamsend
//!
//! Chunked byte-stream sender over a message broker channel.
//!
//! A [`DataSender`] cuts every submitted byte stream into frames of a
//! bounded size and publishes each frame as one broker message. All frames
//! of a stream share a correlation id; each carries its index, and the last
//! one is marked as end of stream.
//!
//! ## Delivery
//!
//! - **Confirmed** (default): the channel is switched into publisher-confirm
//!   mode. At most `message_buffer` frames await an ack at any time; senders
//!   wait when the budget is exhausted. Nacked frames are republished.
//! - **Best effort** (`message_buffer(0)`, or when the broker refuses
//!   confirms): frames are handed to the channel once.
//!
//! Frames may reach the broker out of index order after a resend; receivers
//! must reorder by index.
//!
//! ## Example
//!
//! ```ignore
//! use streamsend::channel::{MemoryChannel, Queue};
//! use streamsend::DataSender;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sender = DataSender::builder()
//!         .queue(Queue::new("data", MemoryChannel::shared()))
//!         .build()?;
//!
//!     sender.send_bytes(b"hello").await?;
//!     sender.finish().await;
//!     Ok(())
//! }
//! ```

pub mod backpressure;
pub mod channel;
pub mod config;
pub mod confirm;
pub mod error;
pub mod id;
pub mod protocol;

mod sender;

pub use backpressure::DEFAULT_MAX_IN_FLIGHT;
pub use config::SenderConfig;
pub use confirm::ConfirmTracker;
pub use error::{ChannelError, Result, SenderError};
pub use id::{IdGenerator, RandomIdGenerator, SteppingIdGenerator};
pub use sender::{DataSender, SenderBuilder, SenderState, QUEUE_INFO_MISSING};
