//! Middle end: bytecode, code generation and the binary image

pub mod bytecode;
pub mod codegen;
pub mod image;

pub use bytecode::{Constant, Instr, MethodDef, Module, Opcode, TypeDef, MODULE_TYPE};
pub use image::{CompiledImage, ImageError};
