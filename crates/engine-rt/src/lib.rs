//! Real-time primitives shared by the rtio buffer manager, device backends and
//! engine threads.

pub mod packet;
pub mod queue;
pub mod ring;
pub mod thread;
pub mod view;

pub use packet::{InputPacket, OutputPacket, SampleFormat, Samples, SamplesMut};
pub use queue::{MessageQueue, QueueError};
pub use ring::{Cursor, FillCount, RingIndex};
pub use view::{AudioView, AudioViewMut};
