//! Driver pipeline for the scc compiler
//!
//! Wires the phases together: source registration, lexing, parsing and
//! semantic analysis, reachability, and one of the two backends. All
//! diagnostics funnel through here; code generation is skipped (and no
//! output is produced) when any error-severity diagnostic was reported.

use log::debug;
use scc_codegen::{Backend, WasmBackend, X86Backend};
use scc_common::{Diagnostic, Diagnostics, SccError, SourceMap};
use scc_lexer::Lexer;
use scc_parser::{analyze, Parser};
use scc_types::TargetLayout;

/// Emission target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    X86_64,
    Wasm,
}

impl Target {
    pub fn layout(self) -> TargetLayout {
        match self {
            Target::X86_64 => TargetLayout::X86_64,
            Target::Wasm => TargetLayout::WASM32,
        }
    }

    /// Default output path when `-o` is absent.
    pub fn default_output(self) -> &'static str {
        match self {
            Target::X86_64 => "a.s",
            Target::Wasm => "a.wasm",
        }
    }
}

/// Outcome of one compilation: the accumulated diagnostics, and the
/// module bytes when no error occurred
pub struct CompileResult {
    pub diagnostics: Diagnostics,
    pub output: Option<Vec<u8>>,
}

impl CompileResult {
    fn failed(diagnostics: Diagnostics) -> Self {
        Self { diagnostics, output: None }
    }

    pub fn succeeded(&self) -> bool {
        self.output.is_some() && !self.diagnostics.has_errors()
    }
}

/// Compile every source registered in `sources` for `target`.
///
/// `exports` names the symbols to export and is required (non-empty) for
/// the WebAssembly target; it must be empty for the native target.
pub fn compile_sources(
    sources: &SourceMap,
    target: Target,
    exports: &[String],
) -> CompileResult {
    let mut diagnostics = Diagnostics::new();

    // The lexer drains its stack top-down, so later-registered sources
    // are pushed first to keep file order.
    let mut lexer = Lexer::new();
    for file_id in (0..sources.len() as u32).rev() {
        if let Some(text) = sources.text(file_id) {
            lexer.push_source(text, file_id);
        }
    }

    let tokens = match lexer.tokenize() {
        Ok(tokens) => tokens,
        Err(_) => {
            // Lexical errors are fatal; the diagnostics carry locations.
            diagnostics.extend(lexer.diagnostics().clone());
            return CompileResult::failed(diagnostics);
        }
    };
    debug!("lexed {} tokens", tokens.len());

    let parser = Parser::new(tokens, target.layout());
    let (program, parse_diags) = match parser.parse_program() {
        Ok(result) => result,
        Err(err) => {
            diagnostics.add(Diagnostic::from(err));
            return CompileResult::failed(diagnostics);
        }
    };
    diagnostics.extend(parse_diags);
    if diagnostics.has_errors() {
        return CompileResult::failed(diagnostics);
    }
    debug!(
        "parsed {} functions, {} strings",
        program.functions.len(),
        program.strings.len()
    );

    let result = match target {
        Target::X86_64 => {
            let mut backend: Box<dyn Backend> = Box::new(X86Backend::new(false));
            let names: Vec<String> = program
                .functions
                .iter()
                .filter(|f| f.is_defined())
                .map(|f| f.name.clone())
                .collect();
            lower_all(backend.as_mut(), &program, &names).and_then(|_| backend.finalize(&program))
        }
        Target::Wasm => match analyze(&program, exports) {
            Ok(reach) => {
                let defined = reach.defined.clone();
                match WasmBackend::new(&program, reach, exports.to_vec()) {
                    Ok(wasm) => {
                        let mut backend: Box<dyn Backend> = Box::new(wasm);
                        lower_all(backend.as_mut(), &program, &defined)
                            .and_then(|_| backend.finalize(&program))
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(bytes) => CompileResult { diagnostics, output: Some(bytes) },
        Err(err) => {
            diagnostics.add(Diagnostic::from(err));
            CompileResult::failed(diagnostics)
        }
    }
}

fn lower_all(
    backend: &mut dyn Backend,
    program: &scc_parser::Program,
    names: &[String],
) -> Result<(), SccError> {
    for name in names {
        backend.lower_function(program, name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources_for(text: &str) -> SourceMap {
        let mut sources = SourceMap::new();
        sources.add("test.c", text);
        sources
    }

    #[test]
    fn native_compilation_produces_assembly() {
        let sources = sources_for("int main(void) { return 0; }");
        let result = compile_sources(&sources, Target::X86_64, &[]);
        assert!(result.succeeded(), "diagnostics: {:?}", result.diagnostics.messages);
        let text = String::from_utf8(result.output.unwrap()).unwrap();
        assert!(text.contains("main:"));
    }

    #[test]
    fn wasm_compilation_needs_an_export_that_exists() {
        let sources = sources_for("int f(void) { return 1; }");
        let result = compile_sources(&sources, Target::Wasm, &["missing".to_string()]);
        assert!(!result.succeeded());
        assert!(result.diagnostics.has_errors());
    }

    #[test]
    fn semantic_errors_suppress_output() {
        let sources = sources_for("int f(void) { return undeclared; }");
        let result = compile_sources(&sources, Target::X86_64, &[]);
        assert!(result.output.is_none());
        assert_eq!(result.diagnostics.error_count(), 1);
    }
}
