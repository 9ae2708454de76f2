#![forbid(unsafe_code)]

pub mod countdown;
pub mod lifecycle;
pub mod model;
pub mod time;

pub use time::Clock;
