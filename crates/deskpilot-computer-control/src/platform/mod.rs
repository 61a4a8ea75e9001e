pub mod macos;
pub mod unsupported;
