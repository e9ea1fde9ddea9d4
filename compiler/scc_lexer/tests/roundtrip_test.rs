//! Span round-trip tests: token spans must tile the significant bytes of
//! the input so that slicing the source by spans reconstructs it exactly.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use scc_lexer::{Lexer, TokenKind};

fn lex_source(src: &str) -> Vec<scc_lexer::Token> {
    let mut lexer = Lexer::new();
    lexer.push_source(src, 0);
    lexer.tokenize().expect("tokenization should succeed")
}

/// Rebuild the input from token spans plus the original inter-token text.
fn rebuild(src: &str, tokens: &[scc_lexer::Token]) -> String {
    let mut out = String::new();
    let mut cursor = 0usize;
    for token in tokens {
        if token.value == TokenKind::Eof {
            break;
        }
        let start = token.span.start.offset as usize;
        let end = token.span.end.offset as usize;
        assert!(start >= cursor, "token spans must not overlap");
        out.push_str(&src[cursor..start]);
        out.push_str(&src[start..end]);
        cursor = end;
    }
    out.push_str(&src[cursor..]);
    out
}

#[test]
fn spans_reconstruct_the_input() {
    let src = "int main(void) {\n  return 040 + 0x2a - 'a';\n}\n";
    let tokens = lex_source(src);
    assert_eq!(rebuild(src, &tokens), src);
}

#[test]
fn spans_reconstruct_with_comments_and_strings() {
    let src = "char *s = \"hi\\n\"; /* gap */ int y; // tail\n";
    let tokens = lex_source(src);
    assert_eq!(rebuild(src, &tokens), src);
}

#[test]
fn relexing_span_slices_reproduces_kinds() {
    let src = "a += b[3] >>= c <<= 1.5e2f";
    let tokens = lex_source(src);
    for token in &tokens {
        if token.value == TokenKind::Eof {
            continue;
        }
        let slice = &src[token.span.start.offset as usize..token.span.end.offset as usize];
        let again = lex_source(slice);
        assert_eq!(again[0].value, token.value, "slice {:?}", slice);
    }
}

proptest! {
    #[test]
    fn roundtrip_random_token_soup(
        words in proptest::collection::vec(
            prop_oneof![
                "[a-z_][a-z0-9_]{0,6}".prop_map(|s| s),
                "(0|[1-9][0-9]{0,6})".prop_map(|s| s),
                "0x[0-9a-f]{1,6}".prop_map(|s| s),
                Just("<<=".to_string()),
                Just("+".to_string()),
                Just("->".to_string()),
                Just("...".to_string()),
                Just(";".to_string()),
            ],
            0..40,
        )
    ) {
        let src = words.join(" ");
        let tokens = lex_source(&src);
        prop_assert_eq!(rebuild(&src, &tokens), src);
    }

    #[test]
    fn decimal_literals_parse_to_their_value(value in 0u64..=u32::MAX as u64) {
        let src = format!("{}", value);
        let tokens = lex_source(&src);
        match tokens[0].value {
            TokenKind::IntLiteral { value: parsed, .. } => {
                prop_assert_eq!(parsed, value as i64)
            }
            ref other => prop_assert!(false, "expected integer literal, got {:?}", other),
        }
    }

    #[test]
    fn hex_and_octal_agree_with_decimal(value in 0u64..=0xFFFFFF) {
        let hex = format!("0x{:x}", value);
        let oct = format!("0{:o}", value);
        for src in [hex, oct] {
            let tokens = lex_source(&src);
            match tokens[0].value {
                TokenKind::IntLiteral { value: parsed, .. } => {
                    prop_assert_eq!(parsed, value as i64, "source {:?}", src)
                }
                ref other => prop_assert!(false, "expected integer literal, got {:?}", other),
            }
        }
    }
}
