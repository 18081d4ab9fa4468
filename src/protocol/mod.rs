//! RESP Wire Protocol
//!
//! The value model and incremental parser for the Redis serialization
//! protocol. Commands arrive as arrays of bulk strings (or inline text
//! lines); replies leave as simple strings, integers, and errors.

pub mod parser;
pub mod types;

pub use parser::{parse, ParseError};
pub use types::RespValue;
