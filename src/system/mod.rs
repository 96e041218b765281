pub mod button;
pub mod reset;

pub use button::{BootButton, ButtonEvent};
pub use reset::DeviceRestart;
