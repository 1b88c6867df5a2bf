pub mod cancel;
pub mod client;
pub mod consumer;
pub mod error;
pub mod event;
pub mod frame;
pub mod progress;
pub mod request;
pub mod sequencer;

pub use cancel::CancelSignal;
pub use client::StreamClient;
pub use consumer::{ConsumerConfig, StreamConsumer, StreamOutcome, StreamUpdate};
pub use error::StreamError;
pub use event::{FinishReason, StreamEvent, StreamMetadata};
pub use frame::{DONE_MARKER, Frame, FrameParser};
pub use progress::{Progress, ProgressTracker};
pub use request::{ChatMessage, ChatStreamRequest, GenerationOptions, RetrievalOptions, Role};
pub use sequencer::{EventSequencer, ReceiverClosed};
