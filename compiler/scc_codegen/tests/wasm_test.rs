//! WebAssembly backend integration tests: module structure, section
//! sizing, signature deduplication, and the end-to-end lowering shapes.

use pretty_assertions::assert_eq;
use scc_codegen::{Backend, WasmBackend};
use scc_lexer::Lexer;
use scc_parser::{analyze, Parser, Program};
use scc_types::TargetLayout;

fn parse(src: &str) -> Program {
    let mut lexer = Lexer::new();
    lexer.push_source(src, 0);
    let tokens = lexer.tokenize().expect("tokenization should succeed");
    let parser = Parser::new(tokens, TargetLayout::WASM32);
    let (program, diagnostics) = parser.parse_program().expect("parsing should not abort");
    assert!(
        !diagnostics.has_errors(),
        "unexpected diagnostics: {:?}",
        diagnostics.messages
    );
    program
}

fn compile(src: &str, exports: &[&str]) -> Vec<u8> {
    let program = parse(src);
    let export_names: Vec<String> = exports.iter().map(|s| s.to_string()).collect();
    let reach = analyze(&program, &export_names).expect("reachability should succeed");
    let defined = reach.defined.clone();
    let mut backend = Box::new(
        WasmBackend::new(&program, reach, export_names).expect("backend construction"),
    );
    for name in &defined {
        backend.lower_function(&program, name).expect("lowering should succeed");
    }
    backend.finalize(&program).expect("finalize should succeed")
}

/// Decode one ULEB128 value; returns (value, bytes consumed).
fn read_uleb(bytes: &[u8]) -> (u64, usize) {
    let mut value = 0u64;
    let mut shift = 0;
    for (i, byte) in bytes.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return (value, i + 1);
        }
        shift += 7;
    }
    panic!("unterminated LEB128");
}

fn minimal_uleb(value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = value;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}

/// Walk the module's sections: ids in increasing order, each size prefix
/// canonical and exactly covering its body. Returns (id, body) pairs.
fn walk_sections(module: &[u8]) -> Vec<(u8, Vec<u8>)> {
    assert_eq!(&module[0..4], b"\0asm", "magic");
    assert_eq!(&module[4..8], &[1, 0, 0, 0], "version");
    let mut sections = Vec::new();
    let mut pos = 8;
    let mut last_id = 0u8;
    while pos < module.len() {
        let id = module[pos];
        pos += 1;
        assert!(id > last_id, "section ids must be in canonical order");
        last_id = id;
        let (size, n) = read_uleb(&module[pos..]);
        assert_eq!(
            &module[pos..pos + n],
            minimal_uleb(size).as_slice(),
            "section size must be canonical LEB128"
        );
        pos += n;
        assert!(pos + size as usize <= module.len(), "section overruns module");
        sections.push((id, module[pos..pos + size as usize].to_vec()));
        pos += size as usize;
    }
    assert_eq!(pos, module.len(), "section sizes must tile the module exactly");
    sections
}

fn section<'a>(sections: &'a [(u8, Vec<u8>)], id: u8) -> &'a [u8] {
    &sections.iter().find(|(s, _)| *s == id).expect("section should be present").1
}

/// Count of non-overlapping occurrences of `needle`.
fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[test]
fn add_one_module_shape() {
    let module = compile("int f(int x) { return x + 1; }", &["f"]);
    let sections = walk_sections(&module);

    // Type section: one signature, (i32) -> i32.
    let types = section(&sections, 1);
    assert_eq!(types, &[0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f]);

    // No imports; one function of type 0.
    assert!(!sections.iter().any(|(id, _)| *id == 2));
    assert_eq!(section(&sections, 3), &[0x01, 0x00]);

    // Export section: "f", function kind, index 0.
    let exports = section(&sections, 7);
    assert_eq!(exports, &[0x01, 0x01, b'f', 0x00, 0x00]);

    // Code: read local 0, push 1, add, store to the return local, branch
    // out, read it back, end.
    let code = section(&sections, 10);
    assert!(count_occurrences(code, &[0x20, 0x00, 0x41, 0x01, 0x6a]) == 1);
    // local.set of the return-value local (local 1).
    assert!(count_occurrences(code, &[0x21, 0x01]) >= 1);
    // Reads it back before the final end.
    let tail = &code[code.len() - 3..];
    assert_eq!(tail, &[0x20, 0x01, 0x0b]);
}

#[test]
fn fib_recursion_is_two_self_calls() {
    let module = compile(
        "int fib(int n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }",
        &["fib"],
    );
    let sections = walk_sections(&module);
    // Single function, exported as fib, no imports.
    assert!(!sections.iter().any(|(id, _)| *id == 2));
    let code = section(&sections, 10);
    assert_eq!(count_occurrences(code, &[0x10, 0x00]), 2, "recursion is two call 0");
}

#[test]
fn type_section_deduplicates_signatures() {
    // Forty functions, three structurally distinct signatures.
    let mut src = String::new();
    for i in 0..13 {
        src.push_str(&format!("int a{0}(int x) {{ return x + {0}; }}\n", i));
        src.push_str(&format!("int b{0}(int x, int y) {{ return x * y + {0}; }}\n", i));
        src.push_str(&format!("void c{0}(void) {{ }}\n", i));
    }
    src.push_str("int root(int x) {\n int acc = x;\n");
    for i in 0..13 {
        src.push_str(&format!("acc += a{0}(acc); acc += b{0}(acc, {0}); c{0}();\n", i));
    }
    src.push_str("return acc;\n}\n");

    let module = compile(&src, &["root"]);
    let sections = walk_sections(&module);
    let types = section(&sections, 1);
    let (count, _) = read_uleb(types);
    // a* and root share (i32)->i32; b* is (i32,i32)->i32; c* is ()->void.
    assert_eq!(count, 3);

    let functions = section(&sections, 3);
    let (func_count, _) = read_uleb(functions);
    assert_eq!(func_count, 40);
}

#[test]
fn imports_occupy_first_indices() {
    let module = compile(
        "int external(int);\n\
         int wrap(int x) { return external(x) + 1; }",
        &["wrap"],
    );
    let sections = walk_sections(&module);

    let imports = section(&sections, 2);
    // One import: module "c", name "external", func kind, type 0.
    let mut expected = vec![0x01];
    expected.push(1);
    expected.extend_from_slice(b"c");
    expected.push(8);
    expected.extend_from_slice(b"external");
    expected.push(0x00);
    expected.push(0x00);
    assert_eq!(imports, expected.as_slice());

    // The defined function calls index 0 (the import).
    let code = section(&sections, 10);
    assert_eq!(count_occurrences(code, &[0x10, 0x00]), 1);

    // And the export references index 1.
    let exports = section(&sections, 7);
    assert_eq!(exports.last(), Some(&0x01));
}

#[test]
fn globals_carry_mutability_and_initials() {
    let module = compile(
        "int counter = 7;\n\
         const int limit = 42;\n\
         int bump(void) { counter = counter + 1; return counter < limit; }",
        &["bump"],
    );
    let sections = walk_sections(&module);
    let globals = section(&sections, 6);
    let (count, n) = read_uleb(globals);
    assert_eq!(count, 2);
    // First global: i32 mutable, init 7.
    assert_eq!(&globals[n..n + 5], &[0x7f, 0x01, 0x41, 0x07, 0x0b]);
    // Second: i32 immutable, init 42.
    assert_eq!(&globals[n + 5..n + 10], &[0x7f, 0x00, 0x41, 0x2a, 0x0b]);
}

#[test]
fn signature_identity_is_structural_over_source_types() {
    // `long` lowers to i32 under the ILP32 layout, but (long)->long and
    // (int)->int remain distinct signatures: deduplication follows the
    // source-level function type, not its encoding.
    let module = compile(
        "long f(long x) { return x + 1; }\n\
         int g(int x) { return f(x); }",
        &["g"],
    );
    let sections = walk_sections(&module);
    let types = section(&sections, 1);
    let (count, n) = read_uleb(types);
    assert_eq!(count, 2);
    // Both entries encode as (i32) -> i32 all the same.
    assert_eq!(&types[n..], &[0x60, 0x01, 0x7f, 0x01, 0x7f, 0x60, 0x01, 0x7f, 0x01, 0x7f]);
}

#[test]
fn emitter_is_idempotent() {
    let src = "int f(int x) { int y = x * 2; while (y > 0) y = y - 3; return y; }";
    let first = compile(src, &["f"]);
    let second = compile(src, &["f"]);
    assert_eq!(first, second);
}

#[test]
fn varargs_is_rejected_not_silently_emitted() {
    let program = parse("int f(int x, ...) { return x; }");
    let reach = analyze(&program, &["f".to_string()]).expect("reachable");
    let defined = reach.defined.clone();
    let mut backend =
        Box::new(WasmBackend::new(&program, reach, vec!["f".to_string()]).expect("backend"));
    let err = backend.lower_function(&program, &defined[0]);
    assert!(err.is_err(), "varargs must be diagnosed on the wasm target");
}

#[test]
fn switch_fallthrough_lowers_structurally() {
    let module = compile(
        "int pick(int x) {\n\
           int r = 0;\n\
           switch (x) {\n\
             case 1: r += 1;\n\
             case 2: r += 2; break;\n\
             case 3: r += 4; break;\n\
             default: r = 9;\n\
           }\n\
           return r;\n\
         }",
        &["pick"],
    );
    // Must validate structurally: sections well-formed, code present.
    let sections = walk_sections(&module);
    let code = section(&sections, 10);
    assert!(code.len() > 20);
}
