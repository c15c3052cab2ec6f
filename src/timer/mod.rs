pub mod controller;
pub mod elapsed;

pub use controller::TimerController;
