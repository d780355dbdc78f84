//! JavaScript parsing for instrumented output.
//!
//! Instrumented code is parsed with swc as an ECMAScript script or module
//! with JSX enabled. Recoverable syntax errors are logged and ignored; only
//! errors the parser cannot recover from fail the read.
//!
//! Bracket nesting is measured on the token stream before parsing and
//! input nested deeper than [`MAX_NESTING_DEPTH`] is rejected, so a
//! pathological literal yields a [`ParseError`] instead of exhausting the
//! stack in the recursive descent.

use std::fmt;

use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, SourceFile, SourceMap as SwcSourceMap, Span, Spanned};
use swc_core::ecma::ast::{EsVersion, Program};
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::token::Token;
use swc_core::ecma::parser::{EsConfig, Parser, StringInput, Syntax};
use thiserror::Error;
use tracing::debug;

/// Deepest `(`/`[`/`{` nesting accepted in parsed source.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Machine-readable parse failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorCode {
    /// The parser could not recover
    Syntax,
    /// Brackets nest deeper than [`MAX_NESTING_DEPTH`]
    NestingTooDeep,
}

impl fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syntax => "syntax-error",
            Self::NestingTooDeep => "nesting-too-deep",
        })
    }
}

/// Syntax error with position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} at {line}:{column}: {message}")]
pub struct ParseError {
    /// Failure class
    pub code: ParseErrorCode,
    /// Human-readable detail
    pub message: String,
    /// 1-based line
    pub line: u32,
    /// 0-based column
    pub column: u32,
}

/// A parsed program together with the source map resolving its spans.
pub struct ParsedSource {
    cm: Lrc<SwcSourceMap>,
    program: Program,
}

impl fmt::Debug for ParsedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedSource")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl ParsedSource {
    /// Syntax tree of the whole source
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// 1-based line and 0-based column of the start of `span`.
    ///
    /// Synthesized spans resolve to `(0, 0)`.
    pub fn position(&self, span: Span) -> (u32, u32) {
        position_in(&self.cm, span)
    }
}

fn position_in(cm: &SwcSourceMap, span: Span) -> (u32, u32) {
    if span.is_dummy() {
        return (0, 0);
    }
    let loc = cm.lookup_char_pos(span.lo);
    (loc.line as u32, loc.col.0 as u32)
}

fn syntax() -> Syntax {
    Syntax::Es(EsConfig {
        jsx: true,
        allow_return_outside_function: true,
        ..EsConfig::default()
    })
}

/// Parse `code` as a script or module.
pub fn parse_source(code: &str) -> Result<ParsedSource, ParseError> {
    let cm: Lrc<SwcSourceMap> = Lrc::default();
    let fm = cm.new_source_file(FileName::Anon, code.to_string());

    check_nesting(&cm, &fm)?;

    let lexer = Lexer::new(syntax(), EsVersion::latest(), StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);
    let program = parser.parse_program().map_err(|e| {
        let (line, column) = position_in(&cm, e.span());
        ParseError {
            code: ParseErrorCode::Syntax,
            message: e.kind().msg().into_owned(),
            line,
            column,
        }
    })?;

    let recovered = parser.take_errors();
    if !recovered.is_empty() {
        debug!(errors = recovered.len(), "recovered from syntax errors");
    }
    Ok(ParsedSource { cm, program })
}

fn check_nesting(cm: &SwcSourceMap, fm: &SourceFile) -> Result<(), ParseError> {
    let lexer = Lexer::new(syntax(), EsVersion::latest(), StringInput::from(fm), None);
    let mut depth = 0usize;
    for token in lexer {
        match token.token {
            Token::LParen | Token::LBracket | Token::LBrace | Token::DollarLBrace => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    let (line, column) = position_in(cm, token.span);
                    return Err(ParseError {
                        code: ParseErrorCode::NestingTooDeep,
                        message: format!("brackets nest deeper than {MAX_NESTING_DEPTH}"),
                        line,
                        column,
                    });
                }
            }
            Token::RParen | Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            // The parser reports lexical errors with better context.
            Token::Error(_) => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_core::common::DUMMY_SP;
    use swc_core::ecma::ast::{Decl, Stmt};

    #[test]
    fn test_script_and_module_parse() {
        assert!(matches!(
            parse_source("var a = 1;").unwrap().program(),
            Program::Script(_)
        ));
        assert!(matches!(
            parse_source("export const a = 1;").unwrap().program(),
            Program::Module(_)
        ));
    }

    #[test]
    fn test_regex_after_control_headers() {
        for code in [
            "if (a) /re}/.test(b);",
            "for (;;) /x}/.exec(y);",
            "while (a) /x}/.exec(y);",
            "function f(s) { return /a}/.test(s); }",
        ] {
            assert!(parse_source(code).is_ok(), "{code}");
        }
    }

    #[test]
    fn test_jsx_is_accepted() {
        assert!(parse_source("x = <A>{'}'}</A>;").is_ok());
    }

    #[test]
    fn test_return_outside_function_is_tolerated() {
        assert!(parse_source("{ var output; output = 1; return output; }").is_ok());
    }

    #[test]
    fn test_unrecoverable_error_has_position() {
        let err = parse_source("var a = 1;\nfunction (").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::Syntax);
        assert_eq!(err.line, 2);
        assert!(err.to_string().starts_with("syntax-error at 2:"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let depth = 20_000;
        let code = format!("var x = {}1{};", "[".repeat(depth), "]".repeat(depth));
        let err = parse_source(&code).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::NestingTooDeep);
        assert_eq!((err.line, err.column), (1, 8 + MAX_NESTING_DEPTH as u32));
    }

    #[test]
    fn test_template_and_object_nesting_is_balanced() {
        let code = format!("var t = `${{{}}}`;\n", "{ a: 1 }");
        let wide = code.repeat(MAX_NESTING_DEPTH * 2);
        assert!(parse_source(&wide).is_ok());
    }

    #[test]
    fn test_positions_are_one_based_lines() {
        let parsed = parse_source("\n  var a = 1;").unwrap();
        let Program::Script(script) = parsed.program() else {
            panic!("expected script");
        };
        let Stmt::Decl(Decl::Var(decl)) = &script.body[0] else {
            panic!("expected declaration");
        };
        assert_eq!(parsed.position(decl.span), (2, 2));
        assert_eq!(parsed.position(DUMMY_SP), (0, 0));
    }
}
