//! IR and CFG well-formedness tests over the builder's output

use scc_codegen::{Ir, IrBuilder, IrFunction};
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

fn lower(src: &str, name: &str) -> IrFunction {
    let program = parse(src);
    let func = program.find_function(name).expect("function should exist");
    IrBuilder::build(&program, TargetLayout::X86_64, func).expect("lowering should succeed")
}

/// Every block ends with a branch or return, and every branch target
/// names a block of the function.
fn assert_cfg_well_formed(func: &IrFunction) {
    let labels: Vec<_> = func.blocks.iter().map(|b| b.label).collect();
    for block in &func.blocks {
        let last = block.irs.last().unwrap_or_else(|| {
            panic!("block {} of '{}' is empty", block.label, func.name)
        });
        assert!(
            matches!(
                last,
                Ir::Jmp { .. } | Ir::TableJmp { .. } | Ir::Ret { .. } | Ir::CondJmp { .. }
            ) || block.label == *labels.last().unwrap(),
            "block {} of '{}' does not end in a branch or return: {:?}",
            block.label,
            func.name,
            last
        );
        for ir in &block.irs {
            match ir {
                Ir::Jmp { target } | Ir::CondJmp { target, .. } => {
                    assert!(labels.contains(target), "jump to unknown block {}", target);
                }
                Ir::TableJmp { targets, .. } => {
                    for target in targets {
                        assert!(labels.contains(target), "table jump to unknown block");
                    }
                }
                _ => {}
            }
        }
    }
}

#[test]
fn control_flow_shapes_are_well_formed() {
    let src = "int f(int n) {\n\
                 int total = 0;\n\
                 for (int i = 0; i < n; i++) {\n\
                   if (i % 2) continue;\n\
                   while (total > 100) { total /= 2; }\n\
                   do { total += i; } while (0);\n\
                   if (total == 7) break;\n\
                 }\n\
                 switch (total) {\n\
                   case 0: return 0;\n\
                   case 1: total += 1;\n\
                   default: total += 2;\n\
                 }\n\
                 return total;\n\
               }";
    let func = lower(src, "f");
    assert_cfg_well_formed(&func);
}

#[test]
fn goto_targets_resolve_forward_and_back() {
    let src = "int f(int n) {\n\
                 int acc = 0;\n\
               again:\n\
                 acc += n;\n\
                 if (acc < 10) goto again;\n\
                 goto done;\n\
                 acc = 999;\n\
               done:\n\
                 return acc;\n\
               }";
    let func = lower(src, "f");
    assert_cfg_well_formed(&func);
}

#[test]
fn funargs_with_calls_are_hoisted_before_marshalling() {
    let src = "int inner(int x) { return x + 1; }\n\
               int outer(int a) { return inner(inner(a) + 2); }";
    let func = lower(src, "outer");

    // The nested call must complete (Call + Result + Store to a frame
    // temporary) before the outer call's Precall opens.
    let irs: Vec<&Ir> = func.blocks.iter().flat_map(|b| b.irs.iter()).collect();
    let outer_precall = irs
        .iter()
        .rposition(|ir| matches!(ir, Ir::Precall { .. }))
        .expect("two call sequences exist");
    let calls_before: usize = irs[..outer_precall]
        .iter()
        .filter(|ir| matches!(ir, Ir::Call { .. }))
        .count();
    assert_eq!(calls_before, 1, "the argument call is evaluated before the outer precall");
    let store_before = irs[..outer_precall].iter().any(|ir| matches!(ir, Ir::Store { .. }));
    assert!(store_before, "the hoisted argument is parked in a frame temporary");
}

#[test]
fn division_arguments_are_hoisted() {
    let src = "int use2(int a, int b) { return a + b; }\n\
               int f(int x, int y) { return use2(x / y, y); }";
    let func = lower(src, "f");
    let irs: Vec<&Ir> = func.blocks.iter().flat_map(|b| b.irs.iter()).collect();
    let first_precall = irs
        .iter()
        .position(|ir| matches!(ir, Ir::Precall { .. }))
        .expect("a call sequence exists");
    let div_before = irs[..first_precall]
        .iter()
        .any(|ir| matches!(ir, Ir::Bin { op: scc_codegen::IrBinOp::Div, .. }));
    assert!(div_before, "the divide runs before argument marshalling");
}

#[test]
fn stack_call_sequence_brackets_the_stack_pointer() {
    let src = "int many(int a, int b, int c, int d, int e, int f, int g) { return g; }\n\
               int f(void) { return many(1, 2, 3, 4, 5, 6, 7); }";
    let func = lower(src, "f");
    let irs: Vec<&Ir> = func.blocks.iter().flat_map(|b| b.irs.iter()).collect();

    let grows = irs.iter().position(|ir| matches!(ir, Ir::SubSp { bytes } if *bytes < 0));
    let call = irs.iter().position(|ir| matches!(ir, Ir::Call { .. }));
    let shrinks = irs.iter().position(|ir| matches!(ir, Ir::SubSp { bytes } if *bytes > 0));
    let (grows, call, shrinks) =
        (grows.expect("stack grows"), call.expect("call"), shrinks.expect("stack restored"));
    assert!(grows < call && call < shrinks);
    assert_eq!(func.max_call_stack, 16, "one stack slot rounds up to alignment");
}

#[test]
fn struct_return_reserves_a_hidden_pointer() {
    let src = "struct pair { int a; int b; };\n\
               struct pair make(int x) { struct pair p; p.a = x; p.b = x + 1; return p; }\n\
               int f(int x) { struct pair q = make(x); return q.a; }";
    let func = lower(src, "f");
    let irs: Vec<&Ir> = func.blocks.iter().flat_map(|b| b.irs.iter()).collect();
    // The hidden pointer is marshalled as integer argument zero.
    let hidden = irs
        .iter()
        .any(|ir| matches!(ir, Ir::PushArg { index: 0, reg: Some(0), .. }));
    assert!(hidden, "struct-returning call passes a hidden first pointer");
}

#[test]
fn short_circuit_produces_branching_cfg() {
    let src = "int f(int a, int b) { return a && b; }";
    let func = lower(src, "f");
    assert!(func.blocks.len() >= 4, "&& in value position builds its own CFG");
    assert_cfg_well_formed(&func);
}
