pub mod blob;
pub mod decoder;
pub mod error;
pub mod input;
pub mod media_object;
pub mod observability;
pub mod parameters;
pub mod session;
pub mod versions;
pub mod video;
pub mod worker;

pub use error::{MediaError, MediaResult};
pub use input::{Input, InputMode, StreamSelector};
pub use media_object::MediaObject;
pub use video::{StereoLayout, VideoFrame};
