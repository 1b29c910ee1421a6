pub mod junkipedia;
pub mod logs;
pub mod twitter;
