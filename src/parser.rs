use crate::{
    ast::{BinaryOp, Expr, Marker, Segment, UnaryOp},
    error::{ParseError, ParseErrorKind},
};

type ParseResult<T> = Result<T, ParseError>;

/// Compiles a template body into literal runs and markers.
///
/// Marker expressions are parsed here, once, and the result (success or
/// failure) is cached in the segment list. A failed parse does not abort
/// compilation: the error is stored and surfaces when the template is
/// rendered, so registration itself never fails.
///
/// Escape handling in literal text: `\$` produces a literal `$`, and a
/// `$` immediately before `${` is the suppression sigil — it is removed
/// from the literal and flags the marker as unescaped.
pub(crate) fn compile(body: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    // True when the last literal char is a `\$`-escaped dollar, which must
    // not double as a suppression sigil.
    let mut escaped_dollar = false;
    let mut pos = 0;
    let mut line = 1;

    while pos < body.len() {
        let rest = &body[pos..];

        if rest.starts_with("\\$") {
            literal.push('$');
            escaped_dollar = true;
            pos += 2;
            continue;
        }

        if rest.starts_with("${") {
            let raw = literal.ends_with('$') && !escaped_dollar;
            if raw {
                literal.pop();
            }
            escaped_dollar = false;
            if !literal.is_empty() {
                segments.push(Segment::Literal {
                    data: std::mem::take(&mut literal),
                });
            }

            let expr_start = pos + 2;
            match find_marker_end(body, expr_start) {
                Some(end) => {
                    let source = &body[expr_start..end];
                    let expr = parse_expression(source).map_err(|mut error| {
                        error.line += line - 1;
                        error
                    });
                    segments.push(Segment::Marker(Marker {
                        raw,
                        source: source.to_string(),
                        expr,
                    }));
                    line += count_newlines(source);
                    pos = end + 1;
                }
                None => {
                    // Unclosed marker: consume to EOF and defer the error
                    // to render time, like any other bad expression.
                    segments.push(Segment::Marker(Marker {
                        raw,
                        source: body[expr_start..].to_string(),
                        expr: Err(ParseError {
                            line,
                            column: 1,
                            kind: ParseErrorKind::unexpected_eof(Some("}".to_string())),
                        }),
                    }));
                    pos = body.len();
                }
            }
            continue;
        }

        // Safe: pos < body.len() and always lands on a char boundary.
        if let Some(c) = rest.chars().next() {
            if c == '\n' {
                line += 1;
            }
            literal.push(c);
            escaped_dollar = false;
            pos += c.len_utf8();
        } else {
            break;
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal { data: literal });
    }
    segments
}

/// Finds the `}` closing a marker whose expression starts at `start`.
///
/// Tracks brace depth so object literals inside the expression do not end
/// the marker early, and skips string literals so a quoted `}` is inert.
fn find_marker_end(body: &str, start: usize) -> Option<usize> {
    let mut depth = 1_usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in body[start..].char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_string = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn count_newlines(text: &str) -> usize {
    text.chars().filter(|&c| c == '\n').count()
}

/// Parses a complete marker expression. The whole input must be consumed.
pub(crate) fn parse_expression(source: &str) -> ParseResult<Expr> {
    let mut parser = Parser::new(source);
    parser.consume_whitespace();
    if parser.eof() {
        return Err(parser.make_error(ParseErrorKind::Expected {
            description: "expression".to_string(),
        }));
    }
    let expr = parser.parse_ternary()?;
    parser.consume_whitespace();
    if !parser.eof() {
        return Err(parser.make_error(ParseErrorKind::Message(format!(
            "Parser did not consume entire input. Remaining: '{}'",
            &parser.input[parser.pos..]
        ))));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
        }
    }

    #[inline]
    fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    /// Advances the parser position by char_len bytes, correctly handling
    /// multi-byte characters. Updates line and column numbers if a newline
    /// is encountered.
    #[inline]
    fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances the parser position by `len` bytes.
    /// This method assumes that the consumed string does NOT contain
    /// newlines. Used for fixed delimiters and operators.
    #[inline]
    fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    /// Consume leading whitespace, handling newlines correctly.
    fn consume_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_ascii_whitespace() {
                self.advance_by_char(c, c.len_utf8());
            } else {
                break;
            }
        }
    }

    /// Expect `s` to be the start of the remaining input, consume it or
    /// return Err. Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            Ok(())
        } else {
            Err(self.make_error(ParseErrorKind::Expected {
                description: format!(
                    "'{}', found '{}'",
                    s,
                    &self.input[self.pos..std::cmp::min(self.pos + s.len() + 10, self.input.len())]
                ),
            }))
        }
    }

    /// Consume and return an identifier (`[A-Za-z_][A-Za-z0-9_]*`).
    ///
    /// Unlike a field path, an identifier never contains `.` — property
    /// access is an operator handled in `parse_postfix_expression`.
    fn consume_identifier(&mut self) -> ParseResult<&'a str> {
        let start = self.pos;
        match self.peek_char() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.advance_bytes_no_newline(c.len_utf8());
            }
            _ => {
                return Err(self.make_error(ParseErrorKind::Expected {
                    description: "identifier".to_string(),
                }));
            }
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance_bytes_no_newline(c.len_utf8());
            } else {
                break;
            }
        }
        Ok(&self.input[start..self.pos])
    }

    // --- Expression parsing (recursive descent) ---
    // Precedence, loosest to tightest:
    //   ternary -> || -> && -> == != -> < <= > >= -> + - -> * / %
    //   -> unary ! - -> postfix call/member/index -> primary

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_or_expression()?;
        self.consume_whitespace();
        if self.consume("?") {
            let then = self.parse_ternary()?;
            self.consume_whitespace();
            self.expect(":")?;
            let otherwise = self.parse_ternary()?;
            Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            })
        } else {
            Ok(condition)
        }
    }

    fn parse_or_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume("||") {
                let right = self.parse_and_expression()?;
                left = binary(BinaryOp::Or, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_equality_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume("&&") {
                let right = self.parse_equality_expression()?;
                left = binary(BinaryOp::And, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_equality_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_comparison_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume("==") {
                let right = self.parse_comparison_expression()?;
                left = binary(BinaryOp::Eq, left, right);
            } else if self.consume("!=") {
                let right = self.parse_comparison_expression()?;
                left = binary(BinaryOp::Ne, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_comparison_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_additive_expression()?;
        loop {
            self.consume_whitespace();
            // Two-character operators before their one-character prefixes.
            let op = if self.consume("<=") {
                BinaryOp::Le
            } else if self.consume(">=") {
                BinaryOp::Ge
            } else if self.consume("<") {
                BinaryOp::Lt
            } else if self.consume(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            let right = self.parse_additive_expression()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume("+") {
                let right = self.parse_multiplicative_expression()?;
                left = binary(BinaryOp::Add, left, right);
            } else if self.consume("-") {
                let right = self.parse_multiplicative_expression()?;
                left = binary(BinaryOp::Sub, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume("*") {
                let right = self.parse_unary_expression()?;
                left = binary(BinaryOp::Mul, left, right);
            } else if self.consume("/") {
                let right = self.parse_unary_expression()?;
                left = binary(BinaryOp::Div, left, right);
            } else if self.consume("%") {
                let right = self.parse_unary_expression()?;
                left = binary(BinaryOp::Rem, left, right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> ParseResult<Expr> {
        self.consume_whitespace();
        if self.consume("!") {
            let operand = self.parse_unary_expression()?;
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            })
        } else if self.consume("-") {
            let operand = self.parse_unary_expression()?;
            Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            })
        } else {
            self.parse_postfix_expression()
        }
    }

    fn parse_postfix_expression(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_expression()?;
        loop {
            self.consume_whitespace();
            if self.consume(".") {
                self.consume_whitespace();
                let property = self.consume_identifier()?.to_string();
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.consume("[") {
                let index = self.parse_ternary()?;
                self.consume_whitespace();
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.peek("(") {
                let Expr::Ident(name) = expr else {
                    return Err(self.make_error(ParseErrorKind::Message(
                        "only named helpers can be called".to_string(),
                    )));
                };
                self.advance_bytes_no_newline(1);
                let args = self.parse_call_args()?;
                expr = Expr::Call { name, args };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        self.consume_whitespace();
        if self.consume(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_ternary()?);
            self.consume_whitespace();
            if self.consume(",") {
                continue;
            }
            self.expect(")")?;
            break;
        }
        Ok(args)
    }

    fn parse_primary_expression(&mut self) -> ParseResult<Expr> {
        self.consume_whitespace();
        let Some(c) = self.peek_char() else {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                "expression".to_string(),
            ))));
        };

        if c == '(' {
            self.advance_bytes_no_newline(1);
            let expr = self.parse_ternary()?;
            self.consume_whitespace();
            self.expect(")")?;
            return Ok(expr);
        }
        if c == '[' {
            return self.parse_array_literal();
        }
        if c == '{' {
            return self.parse_object_literal();
        }
        if c == '"' || c == '\'' {
            return Ok(Expr::Str(self.consume_string_literal()?));
        }
        if c.is_ascii_digit() {
            return Ok(Expr::Number(self.consume_number()?));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let name = self.consume_identifier()?;
            return Ok(match name {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                _ => Expr::Ident(name.to_string()),
            });
        }
        Err(self.make_error(ParseErrorKind::UnexpectedChar { found: c }))
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expr> {
        self.expect("[")?;
        let mut items = Vec::new();
        self.consume_whitespace();
        if self.consume("]") {
            return Ok(Expr::Array(items));
        }
        loop {
            items.push(self.parse_ternary()?);
            self.consume_whitespace();
            if self.consume(",") {
                continue;
            }
            self.expect("]")?;
            break;
        }
        Ok(Expr::Array(items))
    }

    fn parse_object_literal(&mut self) -> ParseResult<Expr> {
        self.expect("{")?;
        let mut entries = Vec::new();
        self.consume_whitespace();
        if self.consume("}") {
            return Ok(Expr::Object(entries));
        }
        loop {
            self.consume_whitespace();
            let quoted = self.peek("\"") || self.peek("'");
            let key = if quoted {
                self.consume_string_literal()?
            } else {
                self.consume_identifier()?.to_string()
            };
            self.consume_whitespace();
            if self.consume(":") {
                self.consume_whitespace();
                let value = self.parse_ternary()?;
                entries.push((key, Some(value)));
            } else if quoted {
                // `{x}` shorthand only works for identifier keys.
                return Err(self.make_error(ParseErrorKind::Expected {
                    description: "':' after string key".to_string(),
                }));
            } else {
                entries.push((key, None));
            }
            self.consume_whitespace();
            if self.consume(",") {
                continue;
            }
            self.expect("}")?;
            break;
        }
        Ok(Expr::Object(entries))
    }

    fn consume_string_literal(&mut self) -> ParseResult<String> {
        let Some(quote) = self.peek_char() else {
            return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                "string literal".to_string(),
            ))));
        };
        self.advance_bytes_no_newline(1);
        let mut out = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                    quote.to_string(),
                ))));
            };
            if c == quote {
                self.advance_bytes_no_newline(1);
                return Ok(out);
            }
            if c == '\\' {
                self.advance_bytes_no_newline(1);
                let Some(escape) = self.peek_char() else {
                    return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                        "escape sequence".to_string(),
                    ))));
                };
                let resolved = match escape {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' | '\'' | '"' | '`' | '$' | '/' => escape,
                    other => {
                        return Err(
                            self.make_error(ParseErrorKind::UnknownEscape { escape: other })
                        );
                    }
                };
                out.push(resolved);
                self.advance_by_char(escape, escape.len_utf8());
                continue;
            }
            out.push(c);
            self.advance_by_char(c, c.len_utf8());
        }
    }

    fn consume_number(&mut self) -> ParseResult<f64> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance_bytes_no_newline(1);
            } else {
                break;
            }
        }
        // Only take the '.' when a fractional digit follows, so that a
        // trailing member access on a number stays a parse error rather
        // than swallowing the dot.
        if self.peek(".") {
            let has_fraction = self.input[self.pos + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit());
            if has_fraction {
                self.advance_bytes_no_newline(1);
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() {
                        self.advance_bytes_no_newline(1);
                    } else {
                        break;
                    }
                }
            }
        }
        let literal = &self.input[start..self.pos];
        literal
            .parse::<f64>()
            .map_err(|_| self.make_error(ParseErrorKind::InvalidNumber {
                literal: literal.to_string(),
            }))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
