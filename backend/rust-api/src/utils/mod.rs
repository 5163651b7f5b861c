pub mod clock;
pub mod retry;
pub mod time;
