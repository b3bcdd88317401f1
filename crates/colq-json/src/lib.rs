// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod parser;
mod token;

pub use parser::{FragmentParser, ParseEvent, StructureError};
pub use token::{JsonToken, JsonTokenizer, TokenizeError};
