pub mod scheduler;

pub use scheduler::{Reservation, TaskHandle, TaskScheduler};
