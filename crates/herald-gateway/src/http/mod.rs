pub mod admin;
pub mod error;
pub mod publish;
pub mod stream;
