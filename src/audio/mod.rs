//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod playout;
pub mod reorder;
pub mod volume;

pub use buffer::{BufferStats, JitterBuffer, JitterThresholds, SharedJitterBuffer};
pub use capture::AudioCapture;
pub use device::{get_output_device, list_devices, AudioDevice};
pub use playback::AudioPlayback;
pub use playout::{OutputSink, PlayoutLoop, PlayoutState};
pub use reorder::ReorderBuffer;
pub use volume::{SharedVolume, Volume};
