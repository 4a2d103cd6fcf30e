mod interface;
mod mock;

pub use interface::CameraControl;
pub use mock::{CameraCall, MockCamera};
