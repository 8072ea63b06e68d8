use smallvec::SmallVec;

use crate::error::{Error, ErrorKind, Result};
use crate::token::{Op, SpannedToken, Token};
use crate::value::DataType;

/// Flat infix token stream, ready for the compiler. Every token carries the
/// byte offset it was read from so later stages can report positions.
pub(crate) type TokenStream = SmallVec<[SpannedToken; 32]>;

/// Function-name lookup. Names must be all lowercase; matching is
/// case-insensitive. A name is only treated as a function when the next
/// non-whitespace character after it is `(`.
const FUNC_TABLE: &[(&str, Op)] = &[
    ("sin", Op::Sin),
    ("sine", Op::Sin),
    ("cos", Op::Cos),
    ("cosine", Op::Cos),
    ("tan", Op::Tan),
    ("tangent", Op::Tan),
    ("asin", Op::Asin),
    ("arcsine", Op::Asin),
    ("acos", Op::Acos),
    ("arccosine", Op::Acos),
    ("atan", Op::Atan),
    ("arctangent", Op::Atan),
    ("atan2", Op::Atan2),
    ("max", Op::MaxFloat),
    ("maximum", Op::MaxFloat),
    ("min", Op::MinFloat),
    ("minimum", Op::MinFloat),
    ("sqrt", Op::Sqrt),
    ("squareroot", Op::Sqrt),
    ("square_root", Op::Sqrt),
    ("abs", Op::AbsFloat),
    ("absolute", Op::AbsFloat),
    ("sign", Op::SignFloat),
    ("toradians", Op::ToRadians),
    ("to_radians", Op::ToRadians),
    ("todegrees", Op::ToDegrees),
    ("to_degrees", Op::ToDegrees),
    ("vec", Op::MakeVec),
    ("vector", Op::MakeVec),
    ("not", Op::FnNot),
    ("log", Op::Log),
    ("logarithm", Op::Log),
    ("ln", Op::Ln),
    ("pow", Op::FnPow),
    ("power", Op::FnPow),
    ("exp", Op::Exp),
    ("exponential", Op::Exp),
    ("if", Op::IfFloat),
    ("ceil", Op::Ceil),
    ("floor", Op::Floor),
    ("frac", Op::Frac),
    ("fraction", Op::Frac),
    ("round", Op::Round),
    ("truncate", Op::Trunc),
    ("trunc", Op::Trunc),
    ("compare", Op::CompareFloat),
    ("dot", Op::Dot),
    ("cross", Op::Cross),
    ("normalize", Op::Normalize),
    ("length", Op::Length),
    ("length2", Op::LengthSquared),
];

/// Parses `src` into a flat infix token stream. Variable references are
/// resolved against `variables` and emitted as typed loads carrying the
/// variable's index. The first failure wins and is returned with its byte
/// offset.
pub(crate) fn parse(src: &str, variables: &[(&str, DataType)]) -> Result<TokenStream> {
    let mut parser = Parser {
        text: src.as_bytes(),
        read_pos: 0,
        variables,
        error: None,
    };

    let mut out = TokenStream::new();
    if parser.parse_expression(&mut out, false, false) {
        Ok(out)
    } else {
        Err(parser
            .error
            .unwrap_or_else(|| Error::new(ErrorKind::UnexpectedEnd, src.len())))
    }
}

enum NumberParse {
    NoMatch,
    Parsed,
    Failed,
}

struct Parser<'a> {
    text: &'a [u8],
    read_pos: usize,
    variables: &'a [(&'a str, DataType)],
    error: Option<Error>,
}

impl<'a> Parser<'a> {
    /// Parses `operand (operator operand)*`, stopping before a closing paren
    /// or comma when the caller asked for it. Returns false with the error
    /// recorded on failure.
    fn parse_expression(
        &mut self,
        out: &mut TokenStream,
        stop_at_paren: bool,
        stop_at_comma: bool,
    ) -> bool {
        self.skip_whitespace();
        if self.at_end() {
            return false;
        }

        if !self.parse_operand_or_unary(out) {
            self.set_error_if_none(ErrorKind::ExpectedOperand, self.read_pos);
            return false;
        }

        loop {
            self.skip_whitespace();
            if self.at_end() {
                return true;
            }
            if stop_at_paren && self.peek() == Some(b')') {
                return true;
            }
            if stop_at_comma && self.peek() == Some(b',') {
                return true;
            }

            if !self.parse_operator(out) {
                self.set_error_if_none(ErrorKind::ExpectedOperator, self.read_pos);
                return false;
            }

            // Member access is postfix, so no operand follows it
            if out.last().map(|t| t.token.op) != Some(Op::GetMemberVec) {
                if !self.parse_operand_or_unary(out) {
                    self.set_error_if_none(ErrorKind::ExpectedOperand, self.read_pos);
                    return false;
                }
            }
        }
    }

    fn parse_operand_or_unary(&mut self, out: &mut TokenStream) -> bool {
        self.skip_whitespace();
        let c = match self.peek() {
            Some(c) => c,
            None => return false,
        };

        // A '-' directly before a digit is part of the numeric literal
        let unary_op = match c {
            b'-' if self.read_pos + 1 < self.text.len()
                && !self.text[self.read_pos + 1].is_ascii_digit() =>
            {
                Some(Op::NegFloat)
            }
            b'!' => Some(Op::Not),
            _ => None,
        };

        match unary_op {
            Some(op) => {
                out.push(SpannedToken::new(Token::new(op, 0), self.read_pos));
                self.read_pos += 1;
                if !self.parse_operand(out) {
                    self.set_error_if_none(ErrorKind::ExpectedOperand, self.read_pos);
                    return false;
                }
                true
            }
            None => self.parse_operand(out),
        }
    }

    fn parse_operand(&mut self, out: &mut TokenStream) -> bool {
        self.skip_whitespace();
        if self.at_end() {
            return false;
        }

        if self.peek() == Some(b'(') {
            let paren_start = self.read_pos;
            out.push(SpannedToken::new(Token::new(Op::LParen, 0), paren_start));
            self.read_pos += 1;

            if !self.parse_expression(out, true, false) {
                self.set_error_if_none(ErrorKind::ExpectedOperand, self.read_pos);
                return false;
            }
            if !self.parse_right_paren(out, paren_start) {
                self.error = Some(Error::new(ErrorKind::UnclosedParen, paren_start));
                return false;
            }
            return true;
        }

        if self.function_op_ahead().is_some() {
            return self.parse_function(out);
        }
        match self.parse_number(out) {
            NumberParse::Parsed => return true,
            NumberParse::Failed => return false,
            NumberParse::NoMatch => {}
        }
        if self.identifier_len(self.read_pos) != 0 {
            return self.parse_variable(out);
        }

        self.set_error_if_none(ErrorKind::ExpectedOperand, self.read_pos);
        false
    }

    fn parse_function(&mut self, out: &mut TokenStream) -> bool {
        self.skip_whitespace();
        let start = self.read_pos;

        let (op, name_len) = match self.function_op_ahead() {
            Some(found) => found,
            None => {
                self.set_error_if_none(ErrorKind::UnknownFunction, start);
                return false;
            }
        };
        self.read_pos += name_len;
        out.push(SpannedToken::new(Token::new(op, 0), start));
        let arity = op.arity();

        let lparen_pos = match self.parse_left_paren(out) {
            Some(pos) => pos,
            None => {
                self.read_pos = start;
                return false;
            }
        };

        if !self.parse_expression(out, true, arity > 1) {
            return false;
        }
        for remaining in (0..arity.saturating_sub(1)).rev() {
            if !self.parse_comma(out) {
                return false;
            }
            if !self.parse_expression(out, true, remaining > 0) {
                self.set_error_if_none(
                    ErrorKind::WrongArity {
                        op: op.name(),
                        expected: arity,
                    },
                    start,
                );
                return false;
            }
        }

        self.parse_right_paren(out, lparen_pos)
    }

    fn parse_left_paren(&mut self, out: &mut TokenStream) -> Option<usize> {
        self.skip_whitespace();
        if self.peek() == Some(b'(') {
            let pos = self.read_pos;
            out.push(SpannedToken::new(Token::new(Op::LParen, 0), pos));
            self.read_pos += 1;
            Some(pos)
        } else {
            None
        }
    }

    fn parse_right_paren(&mut self, out: &mut TokenStream, opened_at: usize) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(b')') {
            out.push(SpannedToken::new(Token::new(Op::RParen, 0), self.read_pos));
            self.read_pos += 1;
            true
        } else {
            self.set_error_if_none(ErrorKind::UnclosedParen, opened_at);
            false
        }
    }

    fn parse_comma(&mut self, out: &mut TokenStream) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(b',') {
            out.push(SpannedToken::new(Token::new(Op::Comma, 0), self.read_pos));
            self.read_pos += 1;
            true
        } else {
            self.set_error_if_none(ErrorKind::ExpectedComma, self.read_pos);
            false
        }
    }

    fn parse_operator(&mut self, out: &mut TokenStream) -> bool {
        self.skip_whitespace();
        if self.at_end() {
            return false;
        }

        let start = self.read_pos;
        let op = match self.read_operator_op() {
            Some(op) => op,
            None => return false,
        };

        if op == Op::GetMemberVec {
            // The member name must follow the '.' with no whitespace
            match self.read_member_offset() {
                Some(offset) => out.push(SpannedToken::new(Token::new(op, offset), start)),
                None => {
                    self.read_pos = start;
                    self.set_error_if_none(ErrorKind::ExpectedOperator, start);
                    return false;
                }
            }
        } else {
            out.push(SpannedToken::new(Token::new(op, 0), start));
        }
        true
    }

    /// Longest-match numeric literal: both an integer and a float parse are
    /// attempted on the same prefix and the longer one wins, ties going to
    /// the integer. An integer literal that overflows is an error.
    fn parse_number(&mut self, out: &mut TokenStream) -> NumberParse {
        self.skip_whitespace();
        let rest = &self.text[self.read_pos..];
        let int_len = int_prefix_len(rest);
        let float_len = float_prefix_len(rest);
        if int_len == 0 && float_len == 0 {
            return NumberParse::NoMatch;
        }

        if int_len >= float_len {
            match slice(self.text, self.read_pos, self.read_pos + int_len).parse::<i32>() {
                Ok(value) => {
                    out.push(SpannedToken::new(
                        Token::new(Op::ConstInt, value),
                        self.read_pos,
                    ));
                    self.read_pos += int_len;
                    NumberParse::Parsed
                }
                Err(_) => {
                    self.set_error_if_none(ErrorKind::InvalidNumber, self.read_pos);
                    NumberParse::Failed
                }
            }
        } else {
            match slice(self.text, self.read_pos, self.read_pos + float_len).parse::<f32>() {
                Ok(value) if value.is_finite() => {
                    out.push(SpannedToken::new(
                        Token::with_float(Op::ConstFloat, value),
                        self.read_pos,
                    ));
                    self.read_pos += float_len;
                    NumberParse::Parsed
                }
                _ => {
                    self.set_error_if_none(ErrorKind::InvalidNumber, self.read_pos);
                    NumberParse::Failed
                }
            }
        }
    }

    fn parse_variable(&mut self, out: &mut TokenStream) -> bool {
        self.skip_whitespace();
        let start = self.read_pos;
        let len = self.identifier_len(start);
        if len == 0 {
            self.set_error_if_none(ErrorKind::ExpectedOperand, start);
            return false;
        }
        let name = slice(self.text, start, start + len);

        // Named constants take precedence over variable lookup
        if name.eq_ignore_ascii_case("pi") {
            out.push(SpannedToken::new(
                Token::with_float(Op::ConstFloat, std::f32::consts::PI),
                start,
            ));
            self.read_pos += len;
            return true;
        }
        if name.eq_ignore_ascii_case("tau") {
            out.push(SpannedToken::new(
                Token::with_float(Op::ConstFloat, std::f32::consts::TAU),
                start,
            ));
            self.read_pos += len;
            return true;
        }

        match self.variables.iter().position(|(n, _)| *n == name) {
            Some(index) => {
                self.read_pos += len;
                let op = match self.variables[index].1 {
                    DataType::Float => Op::VarFloat,
                    DataType::Int => Op::VarInt,
                    DataType::Bool => Op::VarBool,
                    DataType::Vec3 => Op::VarVec,
                };
                out.push(SpannedToken::new(Token::new(op, index as i32), start));
                true
            }
            None => {
                let kind = if self.text.get(self.skip_ws_from(start + len)) == Some(&b'(') {
                    ErrorKind::UnknownFunction
                } else {
                    ErrorKind::UnknownVariable
                };
                self.set_error_if_none(kind, start);
                false
            }
        }
    }

    fn read_operator_op(&mut self) -> Option<Op> {
        let c = self.peek()?;

        let single = match c {
            b'+' => Some(Op::AddFloat),
            b'-' => Some(Op::SubFloat),
            b'*' => Some(Op::MulFloat),
            b'/' => Some(Op::DivFloat),
            b'^' => Some(Op::PowFloat),
            b'%' => Some(Op::ModFloat),
            b'.' => Some(Op::GetMemberVec),
            _ => None,
        };
        if let Some(op) = single {
            self.read_pos += 1;
            return Some(op);
        }

        let text = self.text;
        let rest = &text[self.read_pos..];
        if rest.len() >= 2 {
            let two = match &rest[..2] {
                b"==" => Some(Op::EqFloat),
                b"!=" => Some(Op::NeFloat),
                b">=" => Some(Op::GeFloat),
                b"<=" => Some(Op::LeFloat),
                b"or" | b"OR" | b"||" => Some(Op::Or),
                b"&&" => Some(Op::And),
                _ => None,
            };
            if let Some(op) = two {
                self.read_pos += 2;
                return Some(op);
            }
        }

        // Single characters that are also the start of a two-character
        // operator; a lone '=' is accepted as '=='
        let fallback = match c {
            b'>' => Some(Op::GtFloat),
            b'<' => Some(Op::LtFloat),
            b'=' => Some(Op::EqFloat),
            _ => None,
        };
        if let Some(op) = fallback {
            self.read_pos += 1;
            return Some(op);
        }

        if rest.len() >= 3 && matches!(&rest[..3], b"and" | b"AND") {
            self.read_pos += 3;
            return Some(Op::And);
        }

        None
    }

    /// Reads the component name directly after `.`: x selects offset 2,
    /// y offset 1 and z offset 0 (the distance from stack top).
    fn read_member_offset(&mut self) -> Option<i32> {
        let offset = match self.peek()? {
            b'x' | b'X' => 2,
            b'y' | b'Y' => 1,
            b'z' | b'Z' => 0,
            _ => return None,
        };
        self.read_pos += 1;
        Some(offset)
    }

    /// Checks for a known function name whose next non-whitespace character
    /// is `(`, without consuming anything. Returns the op and name length.
    fn function_op_ahead(&self) -> Option<(Op, usize)> {
        let len = self.identifier_len(self.read_pos);
        if len == 0 {
            return None;
        }
        let name = slice(self.text, self.read_pos, self.read_pos + len).to_ascii_lowercase();
        let (_, op) = FUNC_TABLE.iter().find(|(n, _)| name == *n)?;
        if self.text.get(self.skip_ws_from(self.read_pos + len)) != Some(&b'(') {
            return None;
        }
        Some((*op, len))
    }

    /// Length of the identifier starting at `from`, or 0. Identifiers match
    /// `[_A-Za-z][_A-Za-z0-9]*`.
    fn identifier_len(&self, from: usize) -> usize {
        let first = match self.text.get(from) {
            Some(&c) => c,
            None => return 0,
        };
        if first != b'_' && !first.is_ascii_alphabetic() {
            return 0;
        }
        1 + self.text[from + 1..]
            .iter()
            .take_while(|&&c| c == b'_' || c.is_ascii_alphanumeric())
            .count()
    }

    fn skip_whitespace(&mut self) {
        self.read_pos = self.skip_ws_from(self.read_pos);
    }

    fn skip_ws_from(&self, mut pos: usize) -> usize {
        while pos < self.text.len() && self.text[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.read_pos).copied()
    }

    fn at_end(&self) -> bool {
        self.read_pos == self.text.len()
    }

    fn set_error_if_none(&mut self, kind: ErrorKind, offset: usize) {
        if self.error.is_none() {
            self.error = Some(Error::new(kind, offset));
        }
    }
}

fn slice(text: &[u8], start: usize, end: usize) -> &str {
    std::str::from_utf8(&text[start..end]).unwrap_or_default()
}

fn digit_run(text: &[u8], from: usize) -> usize {
    if from >= text.len() {
        return 0;
    }
    text[from..].iter().take_while(|c| c.is_ascii_digit()).count()
}

fn int_prefix_len(text: &[u8]) -> usize {
    let start = if text.first() == Some(&b'-') { 1 } else { 0 };
    let digits = digit_run(text, start);
    if digits == 0 {
        0
    } else {
        start + digits
    }
}

fn float_prefix_len(text: &[u8]) -> usize {
    let mut pos = if text.first() == Some(&b'-') { 1 } else { 0 };
    let int_digits = digit_run(text, pos);
    pos += int_digits;

    if text.get(pos) == Some(&b'.') {
        let frac_digits = digit_run(text, pos + 1);
        if int_digits == 0 && frac_digits == 0 {
            return 0;
        }
        pos += 1 + frac_digits;
    } else if int_digits == 0 {
        return 0;
    }

    // The exponent only counts when it has at least one digit
    if matches!(text.get(pos), Some(b'e') | Some(b'E')) {
        let mut exp_pos = pos + 1;
        if matches!(text.get(exp_pos), Some(b'+') | Some(b'-')) {
            exp_pos += 1;
        }
        let exp_digits = digit_run(text, exp_pos);
        if exp_digits > 0 {
            pos = exp_pos + exp_digits;
        }
    }

    pos
}
