//! End-to-end driver scenarios

use pretty_assertions::assert_eq;
use scc_cli::{compile_sources, Target};
use scc_common::SourceMap;

fn sources_for(text: &str) -> SourceMap {
    let mut sources = SourceMap::new();
    sources.add("input.c", text);
    sources
}

#[test]
fn wasm_add_one_end_to_end() {
    let sources = sources_for("int f(int x) { return x + 1; }");
    let result = compile_sources(&sources, Target::Wasm, &["f".to_string()]);
    assert!(result.succeeded(), "diagnostics: {:?}", result.diagnostics.messages);

    let module = result.output.unwrap();
    assert_eq!(&module[0..8], b"\0asm\x01\x00\x00\x00");
    // Export section names "f".
    let needle = [0x01u8, b'f', 0x00, 0x00];
    assert!(module.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn native_global_end_to_end() {
    let sources = sources_for("int g;\nint main(void) { g = 42; return g; }");
    let result = compile_sources(&sources, Target::X86_64, &[]);
    assert!(result.succeeded(), "diagnostics: {:?}", result.diagnostics.messages);

    let asm = String::from_utf8(result.output.unwrap()).unwrap();
    assert!(asm.contains("\t.bss"));
    assert!(asm.contains("$42"));
    assert!(asm.contains("g(%rip)"));
}

#[test]
fn syntax_error_is_pinned_to_line_and_column() {
    // The stray '+' sits on line 5, column 7.
    let src = "int a;\n\
               int b;\n\
               \n\
               int f(void) {\n\
               (1 + +;\n\
               }\n";
    let sources = sources_for(src);
    let result = compile_sources(&sources, Target::X86_64, &[]);
    assert!(!result.succeeded());
    assert!(result.output.is_none(), "no output may be produced on failure");

    let rendered: Vec<String> =
        result.diagnostics.errors().map(|d| d.render(&sources)).collect();
    assert!(
        rendered.iter().any(|line| line.starts_with("input.c:5:7:")),
        "expected a diagnostic at input.c:5:7, got {:?}",
        rendered
    );
}

#[test]
fn multiple_inputs_form_one_translation_unit() {
    let mut sources = SourceMap::new();
    sources.add("decls.c", "int shared(int);\n");
    sources.add("defs.c", "int shared(int x) { return x * 2; }\nint use(int x) { return shared(x); }\n");
    let result = compile_sources(&sources, Target::Wasm, &["use".to_string()]);
    assert!(result.succeeded(), "diagnostics: {:?}", result.diagnostics.messages);
}

#[test]
fn lexical_error_aborts_with_location() {
    let sources = sources_for("int x = `3;\n");
    let result = compile_sources(&sources, Target::X86_64, &[]);
    assert!(!result.succeeded());
    let rendered: Vec<String> =
        result.diagnostics.errors().map(|d| d.render(&sources)).collect();
    assert!(rendered.iter().any(|line| line.starts_with("input.c:1:9:")), "{:?}", rendered);
}

#[test]
fn wasm_missing_export_reports_linkage_error() {
    let sources = sources_for("static int f(void) { return 1; }");
    let result = compile_sources(&sources, Target::Wasm, &["f".to_string()]);
    assert!(!result.succeeded());
    let message = format!("{:?}", result.diagnostics.messages);
    assert!(message.contains("not externally visible"), "{}", message);
}
