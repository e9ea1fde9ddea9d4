//! Integration tests for parsing and semantic analysis

use pretty_assertions::assert_eq;
use scc_lexer::Lexer;
use scc_parser::{analyze, BinOp, Expr, ExprKind, Parser, Program, Stmt, StmtKind};
use scc_types::{IntKind, TargetLayout, Type};

fn parse(src: &str) -> (Program, scc_common::Diagnostics) {
    let mut lexer = Lexer::new();
    lexer.push_source(src, 0);
    let tokens = lexer.tokenize().expect("tokenization should succeed");
    let parser = Parser::new(tokens, TargetLayout::X86_64);
    parser.parse_program().expect("parsing should not abort")
}

fn parse_ok(src: &str) -> Program {
    let (program, diagnostics) = parse(src);
    assert!(
        !diagnostics.has_errors(),
        "unexpected diagnostics: {:?}",
        diagnostics.messages
    );
    program
}

/// The statements of a function's outermost block.
fn body_stmts(program: &Program, name: &str) -> Vec<Stmt> {
    let func = program.find_function(name).expect("function should exist");
    match &func.body.as_ref().expect("function should have a body").kind {
        StmtKind::Block { stmts, .. } => stmts.clone(),
        other => panic!("expected block body, got {:?}", other),
    }
}

fn return_expr(program: &Program, name: &str) -> Expr {
    for stmt in body_stmts(program, name) {
        if let StmtKind::Return(Some(expr)) = stmt.kind {
            return expr;
        }
    }
    panic!("no return statement in '{}'", name);
}

#[test]
fn function_definition_and_typed_return() {
    let program = parse_ok("int f(int x) { return x + 1; }");
    let func = program.find_function("f").unwrap();
    let sig = func.ty.as_func().unwrap();
    assert_eq!(sig.params.len(), 1);
    assert!(sig.ret.is_integer());

    let expr = return_expr(&program, "f");
    assert!(matches!(expr.kind, ExprKind::Binary { op: BinOp::Add, .. }));
    assert_eq!(expr.ty, Type::plain_int());
}

#[test]
fn usual_arithmetic_conversions_insert_casts() {
    let program = parse_ok("long f(int a, long b) { return a + b; }");
    let expr = return_expr(&program, "f");
    let ExprKind::Binary { lhs, rhs, .. } = &expr.kind else {
        panic!("expected binary node");
    };
    // The int side is widened to long by an inserted cast.
    assert!(matches!(lhs.kind, ExprKind::Cast { explicit: false, .. }));
    assert_eq!(lhs.ty, Type::int(IntKind::Long, true));
    assert!(matches!(rhs.kind, ExprKind::Var(_)));
    assert_eq!(expr.ty, Type::int(IntKind::Long, true));
}

#[test]
fn unsigned_wins_at_equal_rank() {
    let program = parse_ok("unsigned f(int a, unsigned b) { return a + b; }");
    let expr = return_expr(&program, "f");
    assert_eq!(expr.ty, Type::int(IntKind::Int, false));
}

#[test]
fn float_contaminates_to_double() {
    let program = parse_ok("double f(int a, double b) { return a + b; }");
    let expr = return_expr(&program, "f");
    assert!(expr.ty.is_flonum());
    let ExprKind::Binary { lhs, .. } = &expr.kind else { panic!("expected binary node") };
    assert!(matches!(lhs.kind, ExprKind::Cast { explicit: false, .. }));
    assert!(lhs.ty.is_flonum());
}

#[test]
fn pointer_arithmetic_is_scaled() {
    let program = parse_ok("int *f(int *p, int n) { return p + n; }");
    let expr = return_expr(&program, "f");
    let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &expr.kind else {
        panic!("expected pointer addition");
    };
    // The integer operand was multiplied by sizeof(int).
    let ExprKind::Binary { op: BinOp::Mul, rhs: scale, .. } = &rhs.kind else {
        panic!("expected scaling multiply, got {:?}", rhs.kind);
    };
    assert_eq!(scale.int_const(), Some(4));
}

#[test]
fn pointer_difference_divides_by_element_size() {
    let program = parse_ok("long f(long *a, long *b) { return a - b; }");
    let expr = return_expr(&program, "f");
    let ExprKind::Binary { op: BinOp::Div, rhs, .. } = &expr.kind else {
        panic!("expected scaled pointer difference, got {:?}", expr.kind);
    };
    assert_eq!(rhs.int_const(), Some(8));
}

#[test]
fn constant_folding_collapses_to_literals() {
    let program = parse_ok("int f(void) { return 2 * 3 + (10 >> 1) - !5; }");
    let expr = return_expr(&program, "f");
    assert_eq!(expr.int_const(), Some(11));
}

#[test]
fn sizeof_folds_with_target_layout() {
    let program = parse_ok("unsigned long f(void) { return sizeof(long) + sizeof(int *); }");
    let expr = return_expr(&program, "f");
    assert_eq!(expr.int_const(), Some(16));
}

#[test]
fn array_decays_except_under_sizeof() {
    let program = parse_ok(
        "unsigned long f(void) { int a[8]; return sizeof(a); }\n\
         int *g(void) { static int a[8]; return a; }",
    );
    assert_eq!(return_expr(&program, "f").int_const(), Some(32));
    let decayed = return_expr(&program, "g");
    assert!(decayed.ty.is_ptr());
}

#[test]
fn typedef_names_disambiguate_declarations() {
    let program = parse_ok(
        "typedef int word;\n\
         word f(word w) { word x = w; return x; }",
    );
    let func = program.find_function("f").unwrap();
    assert_eq!(func.ty.as_func().unwrap().params[0], Type::plain_int());
}

#[test]
fn struct_members_resolve_with_offsets() {
    let program = parse_ok(
        "struct point { int x; int y; };\n\
         int f(struct point *p) { return p->y; }",
    );
    let expr = return_expr(&program, "f");
    let ExprKind::Member { member, .. } = &expr.kind else {
        panic!("expected member access, got {:?}", expr.kind);
    };
    assert_eq!(member.offset, 4);
}

#[test]
fn switch_cases_are_collected_at_parse_time() {
    let program = parse_ok(
        "int f(int x) {\n\
           switch (x) {\n\
             case 1: return 10;\n\
             case 2: return 20;\n\
             default: return 0;\n\
           }\n\
         }",
    );
    let stmts = body_stmts(&program, "f");
    let StmtKind::Switch { cases, has_default, .. } = &stmts[0].kind else {
        panic!("expected switch");
    };
    assert_eq!(cases, &vec![1, 2]);
    assert!(has_default);
}

#[test]
fn enum_constants_fold_in_constant_expressions() {
    let program = parse_ok(
        "enum color { RED, GREEN = 5, BLUE };\n\
         int f(void) { return BLUE; }",
    );
    assert_eq!(return_expr(&program, "f").int_const(), Some(6));
}

#[test]
fn function_pointer_declarator_parses() {
    let program = parse_ok("int apply(int (*fn)(int), int x) { return fn(x); }");
    let func = program.find_function("apply").unwrap();
    let sig = func.ty.as_func().unwrap();
    assert!(sig.params[0].is_ptr());
    assert!(sig.params[0].pointee().unwrap().is_func());
}

#[test]
fn semantic_errors_accumulate_without_aborting() {
    let (program, diagnostics) = parse(
        "int f(void) { return undeclared_a; }\n\
         int g(void) { return undeclared_b; }",
    );
    assert_eq!(diagnostics.error_count(), 2);
    // Both functions still parsed.
    assert!(program.find_function("f").is_some());
    assert!(program.find_function("g").is_some());
}

#[test]
fn non_lvalue_assignment_is_reported() {
    let (_, diagnostics) = parse("int f(int x) { x + 1 = 3; return x; }");
    assert!(diagnostics.has_errors());
}

#[test]
fn syntax_error_location_is_pinned() {
    let (_, diagnostics) = parse("int f(void) {\n  return 1 +;\n}\n");
    assert!(diagnostics.has_errors());
    let diag = diagnostics.errors().next().unwrap();
    assert_eq!(diag.span.start.line, 2);
}

#[test]
fn reachability_orders_imports_first() {
    let program = parse_ok(
        "int helper(int);\n\
         int twice(int x) { return helper(x) + helper(x); }\n\
         int entry(int x) { return twice(x); }",
    );
    let reach = analyze(&program, &["entry".to_string()]).expect("analysis should succeed");
    assert_eq!(reach.imports, vec!["helper".to_string()]);
    assert_eq!(reach.index_of("helper"), Some(0));
    assert_eq!(reach.index_of("entry"), Some(1));
    assert_eq!(reach.index_of("twice"), Some(2));
}

#[test]
fn recursion_is_reachable_once() {
    let program = parse_ok("int fib(int n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }");
    let reach = analyze(&program, &["fib".to_string()]).expect("analysis should succeed");
    assert_eq!(reach.defined, vec!["fib".to_string()]);
    assert!(reach.imports.is_empty());
}

#[test]
fn missing_export_is_a_linkage_error() {
    let program = parse_ok("int f(void) { return 0; }");
    assert!(analyze(&program, &["nope".to_string()]).is_err());
}

#[test]
fn static_function_cannot_be_exported() {
    let program = parse_ok("static int f(void) { return 0; }");
    assert!(analyze(&program, &["f".to_string()]).is_err());
}

mod conversion_properties {
    use super::*;
    use proptest::prelude::*;

    /// The C types the conversion property ranges over, with their layout
    /// rank under the x86-64 target.
    const TYPES: &[(&str, usize, bool)] = &[
        ("char", 1, true),
        ("short", 2, true),
        ("int", 4, true),
        ("unsigned", 4, false),
        ("long", 8, true),
        ("unsigned long", 8, false),
    ];

    proptest! {
        #[test]
        fn binary_operands_share_the_common_type(a in 0..TYPES.len(), b in 0..TYPES.len()) {
            let (ta, sa, siga) = TYPES[a];
            let (tb, sb, sigb) = TYPES[b];
            let src = format!("int f({} x, {} y) {{ return (int)(x + y); }}", ta, tb);
            let program = parse_ok(&src);

            let ret = return_expr(&program, "f");
            let ExprKind::Cast { inner, .. } = &ret.kind else {
                panic!("expected explicit result cast, got {:?}", ret.kind)
            };
            let ExprKind::Binary { lhs, rhs, .. } = &inner.kind else {
                panic!("expected binary node, got {:?}", inner.kind)
            };

            // Promotion floor is int; then larger size wins; at equal size,
            // unsigned wins.
            let (pa, pb) = (sa.max(4), sb.max(4));
            let expected_size = pa.max(pb);
            let expected_unsigned = if pa > pb {
                !siga && sa >= 4
            } else if pb > pa {
                !sigb && sb >= 4
            } else {
                (!siga && sa >= 4) || (!sigb && sb >= 4)
            };

            let layout = TargetLayout::X86_64;
            prop_assert_eq!(layout.size_of(&lhs.ty), expected_size);
            prop_assert_eq!(layout.size_of(&rhs.ty), expected_size);
            prop_assert_eq!(lhs.ty.is_unsigned(), expected_unsigned);
            prop_assert_eq!(&lhs.ty, &rhs.ty);
        }
    }
}
