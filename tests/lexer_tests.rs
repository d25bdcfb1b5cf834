// tests/lexer_tests.rs

use dynq::ast::{TokenKind};
use dynq::errors::ParseErrorKind;
use dynq::lexer::Lexer;

fn kinds(input: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(input);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token().expect("lex failure");
        let done = token.kind == TokenKind::End;
        out.push(token.kind);
        if done {
            break;
        }
    }
    out
}

// ============================================================================
// Punctuation and operators
// ============================================================================

#[test]
fn test_punctuation() {
    assert_eq!(
        kinds("( ) [ ] , : ? %"),
        vec![
            TokenKind::OpenParen,
            TokenKind::CloseParen,
            TokenKind::OpenBracket,
            TokenKind::CloseBracket,
            TokenKind::Comma,
            TokenKind::Colon,
            TokenKind::Question,
            TokenKind::Percent,
            TokenKind::End,
        ]
    );
}

#[test]
fn test_comparison_operators() {
    assert_eq!(
        kinds("== = != <> < <= > >="),
        vec![
            TokenKind::DoubleEqual,
            TokenKind::Equal,
            TokenKind::ExclamationEqual,
            TokenKind::LessGreater,
            TokenKind::LessThan,
            TokenKind::LessThanEqual,
            TokenKind::GreaterThan,
            TokenKind::GreaterThanEqual,
            TokenKind::End,
        ]
    );
}

#[test]
fn test_logical_operators() {
    assert_eq!(
        kinds("& && |   || !"),
        vec![
            TokenKind::Amp,
            TokenKind::DoubleAmp,
            TokenKind::Bar,
            TokenKind::DoubleBar,
            TokenKind::Exclamation,
            TokenKind::End,
        ]
    );
}

// ============================================================================
// Word-operator reclassification
// ============================================================================

#[test]
fn test_arithmetic_keywords() {
    assert_eq!(
        kinds("add sub mul div mod"),
        vec![
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Asterisk,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::End,
        ]
    );
}

#[test]
fn test_comparison_keywords() {
    assert_eq!(
        kinds("eq ne lt le gt ge"),
        vec![
            TokenKind::DoubleEqual,
            TokenKind::ExclamationEqual,
            TokenKind::LessThan,
            TokenKind::LessThanEqual,
            TokenKind::GreaterThan,
            TokenKind::GreaterThanEqual,
            TokenKind::End,
        ]
    );
}

#[test]
fn test_and_not_reclassify_but_or_stays_identifier() {
    assert_eq!(
        kinds("and not or"),
        vec![
            TokenKind::DoubleAmp,
            TokenKind::Exclamation,
            TokenKind::Identifier,
            TokenKind::End,
        ]
    );
}

#[test]
fn test_reclassification_is_case_sensitive() {
    // "EQ" stays an identifier; the parser's own case-insensitive word
    // matching is what picks up uppercase spellings of and/or/not/mod.
    assert_eq!(
        kinds("EQ Add"),
        vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::End]
    );
}

// ============================================================================
// Member access
// ============================================================================

#[test]
fn test_dot_and_slash_both_access_members() {
    assert_eq!(
        kinds("Customer.Name Customer/Name"),
        vec![
            TokenKind::Identifier,
            TokenKind::Dot,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Dot,
            TokenKind::Identifier,
            TokenKind::End,
        ]
    );
}

// ============================================================================
// Literals
// ============================================================================

#[test]
fn test_string_literal_quotes() {
    let mut lexer = Lexer::new("'Joe' \"Jane\"");
    let token = lexer.next_token().unwrap();
    assert_eq!(token.kind, TokenKind::StringLiteral);
    assert_eq!(token.text, "Joe");
    let token = lexer.next_token().unwrap();
    assert_eq!(token.kind, TokenKind::StringLiteral);
    assert_eq!(token.text, "Jane");
}

#[test]
fn test_string_escapes() {
    let mut lexer = Lexer::new(r"'don\'t \\ \n'");
    let token = lexer.next_token().unwrap();
    assert_eq!(token.text, "don't \\ \n");
}

#[test]
fn test_unterminated_string() {
    let mut lexer = Lexer::new("'oops");
    let err = lexer.next_token().unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Lexical);
    assert_eq!(err.position, 0);
}

#[test]
fn test_integer_literals() {
    let mut lexer = Lexer::new("42 42L 42l");
    for expected in ["42", "42L", "42L"] {
        let token = lexer.next_token().unwrap();
        assert_eq!(token.kind, TokenKind::IntegerLiteral);
        assert_eq!(token.text, expected);
    }
}

#[test]
fn test_real_literals() {
    let mut lexer = Lexer::new("3.5 2e10 1.5e-3 2.5f 1.25m 9d");
    for expected in ["3.5", "2e10", "1.5e-3", "2.5F", "1.25M", "9D"] {
        let token = lexer.next_token().unwrap();
        assert_eq!(token.kind, TokenKind::RealLiteral, "for {}", expected);
        assert_eq!(token.text, expected);
    }
}

#[test]
fn test_exponent_requires_digit() {
    let mut lexer = Lexer::new("2e+");
    assert!(lexer.next_token().is_err());
}

// ============================================================================
// Positions and errors
// ============================================================================

#[test]
fn test_token_positions_are_byte_offsets() {
    let mut lexer = Lexer::new("Name eq 'Joe'");
    assert_eq!(lexer.next_token().unwrap().position, 0);
    assert_eq!(lexer.next_token().unwrap().position, 5);
    assert_eq!(lexer.next_token().unwrap().position, 8);
}

#[test]
fn test_invalid_character() {
    let mut lexer = Lexer::new("Id # 2");
    lexer.next_token().unwrap();
    let err = lexer.next_token().unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Lexical);
    assert_eq!(err.position, 3);
    assert!(err.message.contains('#'));
}

#[test]
fn test_at_prefix_is_stripped() {
    let mut lexer = Lexer::new("@p0");
    let token = lexer.next_token().unwrap();
    assert_eq!(token.kind, TokenKind::Identifier);
    assert_eq!(token.text, "p0");
}
