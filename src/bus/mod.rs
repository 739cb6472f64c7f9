pub mod bus;

pub use bus::{Bus, BusEvent, Subscription};
