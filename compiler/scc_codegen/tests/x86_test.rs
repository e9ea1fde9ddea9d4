//! Native backend integration tests over the emitted assembly text

use scc_codegen::{Backend, X86Backend};
use scc_lexer::Lexer;
use scc_parser::{Parser, Program};
use scc_types::TargetLayout;

fn parse(src: &str) -> Program {
    let mut lexer = Lexer::new();
    lexer.push_source(src, 0);
    let tokens = lexer.tokenize().expect("tokenization should succeed");
    let parser = Parser::new(tokens, TargetLayout::X86_64);
    let (program, diagnostics) = parser.parse_program().expect("parsing should not abort");
    assert!(
        !diagnostics.has_errors(),
        "unexpected diagnostics: {:?}",
        diagnostics.messages
    );
    program
}

fn compile(src: &str) -> String {
    let program = parse(src);
    let mut backend = Box::new(X86Backend::new(false));
    let names: Vec<String> = program
        .functions
        .iter()
        .filter(|f| f.is_defined())
        .map(|f| f.name.clone())
        .collect();
    for name in names {
        backend.lower_function(&program, &name).expect("lowering should succeed");
    }
    let bytes = backend.finalize(&program).expect("finalize should succeed");
    String::from_utf8(bytes).expect("assembly text is UTF-8")
}

#[test]
fn global_load_store_uses_bss() {
    let asm = compile("int g;\nint main(void) { g = 42; return g; }");
    assert!(asm.contains("\t.bss"), "uninitialized global goes to .bss:\n{}", asm);
    assert!(asm.contains("g:"), "global label emitted");
    assert!(asm.contains(".globl g"));
    assert!(asm.contains("$42"), "the constant store is present");
    assert!(asm.contains("g(%rip)"), "globals are addressed rip-relative");
    assert!(asm.contains(".globl main"));
}

#[test]
fn initialized_global_goes_to_data() {
    let asm = compile("int counter = 7;\nint main(void) { return counter; }");
    assert!(asm.contains("\t.data"));
    assert!(asm.contains("counter:"));
    assert!(asm.contains("\t.long 7"));
}

#[test]
fn static_global_is_not_exported() {
    let asm = compile("static int hidden = 1;\nint main(void) { return hidden; }");
    assert!(asm.contains("hidden:"));
    assert!(!asm.contains(".globl hidden"));
}

#[test]
fn recursion_emits_two_self_calls() {
    let asm = compile("int fib(int n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }");
    assert_eq!(asm.matches("call fib").count(), 2, "asm was:\n{}", asm);
}

#[test]
fn prologue_and_epilogue_are_balanced() {
    let asm = compile("int f(int a, int b) { return a + b; }");
    assert!(asm.contains("pushq %rbp"));
    assert!(asm.contains("movq %rsp, %rbp"));
    assert!(asm.contains("popq %rbp"));
    assert!(asm.contains("\tret"));
}

#[test]
fn high_pressure_function_spills_to_the_frame() {
    // More simultaneously live values than the integer file can hold.
    let mut src = String::from("int squeeze(int seed) {\n");
    for i in 0..32 {
        src.push_str(&format!("int v{} = seed + {};\n", i, i));
    }
    src.push_str("return ");
    for i in 0..32 {
        if i > 0 {
            src.push_str(" + ");
        }
        src.push_str(&format!("v{}", i));
    }
    src.push_str(";\n}\n");

    let asm = compile(&src);
    // Spill slots show up as a frame reservation and rbp-relative
    // traffic.
    assert!(asm.contains("subq $"), "frame must be reserved:\n{}", asm);
    assert!(asm.contains("(%rbp)"), "spill slots are rbp-relative");
}

#[test]
fn string_literals_land_in_rodata() {
    let asm = compile(
        "char *greet(void) { return \"hi\\n\"; }\n\
         int main(void) { greet(); return 0; }",
    );
    assert!(asm.contains(".section .rodata"));
    assert!(asm.contains(".Lstr0:"));
    assert!(asm.contains("\t.string \"hi\\012\""));
}

#[test]
fn stack_arguments_beyond_six_use_the_outgoing_area() {
    let asm = compile(
        "int sum8(int a, int b, int c, int d, int e, int f, int g, int h) {\n\
           return a + b + c + d + e + f + g + h;\n\
         }\n\
         int main(void) { return sum8(1, 2, 3, 4, 5, 6, 7, 8); }",
    );
    // Two arguments spill to the stack slots at 0 and 8.
    assert!(asm.contains("0(%rsp)") || asm.contains("movq %rax, (%rsp)"), "asm:\n{}", asm);
    assert!(asm.contains("8(%rsp)"));
    // Callee reads them from above the frame.
    assert!(asm.contains("16(%rbp)"));
    assert!(asm.contains("24(%rbp)"));
}

#[test]
fn inline_assembly_passes_through() {
    let asm = compile("void pause_cpu(void) { __asm(\"pause\"); }");
    assert!(asm.contains("\tpause\n"));
}

#[test]
fn dense_switch_uses_a_jump_table() {
    let asm = compile(
        "int classify(int x) {\n\
           switch (x) {\n\
             case 0: return 10;\n\
             case 1: return 11;\n\
             case 2: return 12;\n\
             case 3: return 13;\n\
             case 4: return 14;\n\
             default: return -1;\n\
           }\n\
         }",
    );
    assert!(asm.contains(".Ltab"), "dense cases should produce a table:\n{}", asm);
    assert!(asm.contains("\t.quad .Lclassify_"));
}

#[test]
fn sparse_switch_uses_a_compare_chain() {
    let asm = compile(
        "int pick(int x) {\n\
           switch (x) {\n\
             case 1: return 1;\n\
             case 100: return 2;\n\
             case 10000: return 3;\n\
             default: return 0;\n\
           }\n\
         }",
    );
    assert!(!asm.contains(".Ltab"));
    assert!(asm.matches("cmpq").count() >= 3);
}

#[test]
fn emitter_is_idempotent() {
    let src = "int f(int x) { int y = x * 3; if (y > 10) y -= 2; return y; }";
    assert_eq!(compile(src), compile(src));
}

#[test]
fn float_arithmetic_goes_through_sse() {
    let asm = compile("double scale(double x) { return x * 2.0 + 0.5; }");
    assert!(asm.contains("mulsd"));
    assert!(asm.contains("addsd"));
    assert!(asm.contains(".LC"), "float literals come from the constant pool");
}
