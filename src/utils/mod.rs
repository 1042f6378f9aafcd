//! 工具模块

pub mod disasm;
mod loader;

pub use disasm::{Disassembly, disassemble};
pub use loader::{ByteOrder, ImageFormat, LoaderError, load_program, words_from_bytes, words_from_hex};
