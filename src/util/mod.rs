pub mod retry;
pub mod trace;
