//! Structural collaborators: parsing generated responses into code units
//! and validating the accumulated source.

#![warn(missing_docs)]

pub mod parser;
pub mod validator;

pub use parser::{extract_code_block, parse_single_unit, ParseError, ParsedUnit};
pub use validator::{BasicValidator, Finding, StructuralValidator};
