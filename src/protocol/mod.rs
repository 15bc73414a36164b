//! Protocol module - framing and per-message metadata.
//!
//! This module implements the sending half of the stream protocol:
//! - Frame struct with stream id, index and terminal flag
//! - Frame reader cutting an async byte source into frames
//! - Message properties published alongside every frame

mod frame;
mod frame_reader;
mod properties;

pub use frame::Frame;
pub use frame_reader::FrameReader;
pub use properties::{DeliveryMode, MessageProperties, END_OF_STREAM_MESSAGE_TYPE};
