//! While Compiler — front-end and bytecode back-end for the While language.
//!
//! # Compiler Pipeline
//!
//! ```text
//! Source Code (.while)
//!     │
//!     ▼
//! ┌──────────┐
//! │  Lexer    │  Tokenizes source into a stream of tokens with spans
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Parser   │  Single-pass recursive descent + inline semantic checks
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │ Checker   │  Annotates every expression with its resolved type
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │ Codegen   │  Type-annotated AST → stack-machine instructions
//! └────┬─────┘
//!      │
//!      ▼
//! Bytecode (.wb)
//! ```

pub mod ast;
pub mod bytecode;
pub mod checker;
pub mod codegen;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod token;
