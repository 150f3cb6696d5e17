//! A Z-Machine interpreter core for classic interactive-fiction story
//! files: memory image, instruction decoder, execution engine, ZSCII
//! codec, object tree, and dictionary/tokenizer, with all terminal I/O
//! behind the presenter seam.

#![allow(dead_code)]

#[macro_use]
extern crate lazy_static;

pub mod debugger;
pub mod dictionary;
pub mod header;
pub mod instruction;
pub mod interpreter;
pub mod opcode_tables;
pub mod presenter;
pub mod presenter_headless;
pub mod presenter_terminal;
pub mod text;
pub mod vm;
pub mod zobject;
pub mod zrand;
