//! Frontend compilation pipeline
//!
//! Lexer, parser and resolver. [`Compiler`] drives them and hands resolved
//! units to `middle` for code generation and image emission.

use tracing::debug;

use crate::middle::bytecode::Module;
use crate::middle::codegen;
use crate::middle::image::CompiledImage;
use crate::std::ReferenceSet;
use crate::util::diagnostic::Diagnostics;

pub mod lexer;
pub mod parser;
pub mod resolve;

/// Compiler context
#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    refs: &'static ReferenceSet,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// Compiler over the standard reference set
    #[inline]
    pub fn new() -> Self {
        Self::with_references(ReferenceSet::standard())
    }

    pub fn with_references(refs: &'static ReferenceSet) -> Self {
        Self { refs }
    }

    pub fn references(&self) -> &'static ReferenceSet {
        self.refs
    }

    /// Compile source text to an in-memory image
    ///
    /// On failure every diagnostic found (warnings included) is returned in
    /// source order.
    pub fn compile(
        &self,
        source: &str,
    ) -> Result<CompiledImage, Diagnostics> {
        let (module, warnings) = self.compile_module(source)?;
        let bytes = module.to_bytes();
        debug!("Emitted image ({} bytes)", bytes.len());
        Ok(CompiledImage::new(bytes, warnings))
    }

    /// Compile source text to a decoded module plus its warnings
    pub fn compile_module(
        &self,
        source: &str,
    ) -> Result<(Module, Diagnostics), Diagnostics> {
        debug!("Compiling source code ({} bytes)", source.len());

        // Lexical analysis
        let (tokens, mut diagnostics) = lexer::tokenize(source);
        debug!("Tokenized into {} tokens", tokens.len());

        // Parsing
        let (unit, parse_diagnostics) = parser::parse(&tokens);
        diagnostics.extend(parse_diagnostics);

        // Resolution
        let info = resolve::ProgramInfo::collect(&unit, self.refs, &mut diagnostics);
        resolve::check_bodies(&unit, &info, &mut diagnostics);
        diagnostics.sort();

        if diagnostics.has_errors() {
            debug!(
                "Compilation failed with {} error(s)",
                diagnostics.error_count()
            );
            return Err(diagnostics);
        }

        // Code generation
        match codegen::generate(&unit, &info) {
            Ok(module) => Ok((module, diagnostics)),
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                diagnostics.sort();
                Err(diagnostics)
            }
        }
    }
}
