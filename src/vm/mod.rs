//! Virtual Machine and bytecode execution
//!
//! This module contains the sandboxed bytecode interpreter. YX code reaches
//! the host only through the natives in [`crate::std`].

pub use errors::{VMError, VMResult};
pub use executor::{LoadedImage, VMConfig, VM};
pub use heap::AllocMeter;
pub use value::{Object, Shape, Value};

pub mod errors;
mod executor;
pub mod heap;
pub mod value;
