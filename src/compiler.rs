use smallvec::SmallVec;

use crate::error::{Error, ErrorKind, Result, TypeMismatch};
use crate::token::{Op, SpannedToken, Token, ValueKind};
use crate::value::DataType;
use crate::MAX_STACK;

/// Typed overload sets. Each generic operator or function (spelled as its
/// float variant) lists the alternatives tried in order when the argument
/// types don't match the base signature. New value types extend this table,
/// not the resolution code.
static OVERLOADS: &[(Op, &[Op])] = &[
    (Op::NegFloat, &[Op::NegInt, Op::NegVec]),
    (Op::AbsFloat, &[Op::AbsInt]),
    (Op::SignFloat, &[Op::SignInt]),
    (Op::AddFloat, &[Op::AddInt, Op::AddVec]),
    (Op::SubFloat, &[Op::SubInt, Op::SubVec]),
    (Op::MulFloat, &[Op::MulInt, Op::MulVecFloat, Op::MulFloatVec]),
    (Op::DivFloat, &[Op::DivInt, Op::DivVecFloat]),
    (Op::PowFloat, &[Op::PowInt]),
    (Op::ModFloat, &[Op::ModInt]),
    (Op::EqFloat, &[Op::EqInt, Op::EqVec]),
    (Op::NeFloat, &[Op::NeInt, Op::NeVec]),
    (Op::GtFloat, &[Op::GtInt]),
    (Op::GeFloat, &[Op::GeInt]),
    (Op::LtFloat, &[Op::LtInt]),
    (Op::LeFloat, &[Op::LeInt]),
    (Op::MaxFloat, &[Op::MaxInt]),
    (Op::MinFloat, &[Op::MinInt]),
    (Op::IfFloat, &[Op::IfInt, Op::IfVec]),
    (Op::CompareFloat, &[Op::CompareVec]),
];

/// Rearranges the infix stream into a typed postfix program and returns it
/// together with the peak stack usage in cells. Errors carry the byte
/// offset of the token that could not be lowered.
pub(crate) fn compile(tokens: &[SpannedToken], output: DataType) -> Result<(Vec<Token>, usize)> {
    let mut compiler = Compiler {
        code: Vec::with_capacity(tokens.len()),
        kinds: SmallVec::new(),
        cells: 0,
        peak_cells: 0,
    };
    let mut operators: SmallVec<[SpannedToken; 16]> = SmallVec::new();

    for &spanned in tokens {
        let op = spanned.token.op;
        if op.is_operand() {
            compiler.emit_operand(spanned)?;
        } else if op.is_operator_or_function() {
            // Pop anything that binds at least as tightly, then stack this
            // operator until its own arguments are complete
            while let Some(&top) = operators.last() {
                if top.token.op == Op::LParen || top.token.op.precedence() < op.precedence() {
                    break;
                }
                compiler.lower(top)?;
                operators.pop();
            }
            operators.push(spanned);
        } else if op == Op::LParen {
            operators.push(spanned);
        } else {
            // RParen and Comma both flush to the matching LParen; only
            // RParen discards it
            loop {
                match operators.last() {
                    Some(top) if top.token.op == Op::LParen => break,
                    Some(&top) => {
                        compiler.lower(top)?;
                        operators.pop();
                    }
                    None => return Err(Error::new(ErrorKind::UnclosedParen, spanned.offset)),
                }
            }
            if op == Op::RParen {
                operators.pop();
            }
        }
    }

    while let Some(&top) = operators.last() {
        if top.token.op == Op::LParen {
            return Err(Error::new(ErrorKind::UnclosedParen, top.offset));
        }
        compiler.lower(top)?;
        operators.pop();
    }

    let end_offset = tokens.last().map_or(0, |t| t.offset);
    compiler.finish(output, end_offset)
}

struct Compiler {
    code: Vec<Token>,
    kinds: SmallVec<[ValueKind; 16]>,
    cells: usize,
    peak_cells: usize,
}

impl Compiler {
    fn emit_operand(&mut self, spanned: SpannedToken) -> Result<()> {
        let kind = match spanned.token.op {
            Op::ConstFloat | Op::VarFloat => ValueKind::Float,
            Op::ConstInt | Op::VarInt | Op::VarBool => ValueKind::Int,
            Op::VarVec => ValueKind::Vec,
            _ => return Err(Error::new(ErrorKind::ExpectedOperand, spanned.offset)),
        };
        self.code.push(spanned.token);
        self.push_kind(kind, spanned.offset)
    }

    /// Monomorphizes a generic operator or function against the current type
    /// stack and emits it, inserting implicit int-to-float conversions where
    /// that makes an overload match.
    fn lower(&mut self, spanned: SpannedToken) -> Result<()> {
        let token = spanned.token;
        let arity = token.op.arity();
        if self.kinds.len() < arity {
            return Err(self.wrong_types(token.op, arity, spanned.offset));
        }

        let mut args = [ValueKind::Float; 3];
        let first = self.kinds.len() - arity;
        args[..arity].copy_from_slice(&self.kinds[first..]);

        let op = match self.monomorphize(token.op, &mut args[..arity]) {
            Some(op) => op,
            None => return Err(self.wrong_types(token.op, arity, spanned.offset)),
        };
        self.code.push(Token::new(op, token.value));

        for kind in &args[..arity] {
            self.cells -= kind.cells();
        }
        self.kinds.truncate(first);
        self.push_kind(op.result_kind(), spanned.offset)
    }

    /// Finds the typed variant for the argument kinds, widening arguments
    /// when that produces a match. Conversion ops are emitted here with
    /// their cell offset from stack top; `args` is updated to the widened
    /// kinds so the caller can account stack space.
    fn monomorphize(&mut self, base: Op, args: &mut [ValueKind]) -> Option<Op> {
        use ValueKind::{Float, Int, Vec};

        if let Some(op) = variant_for(base, args) {
            return Some(op);
        }

        match args.len() {
            1 => {
                if args[0] != Int {
                    return None;
                }
                let op = variant_for(base, &[Float])?;
                self.convert(0);
                args[0] = Float;
                Some(op)
            }
            2 => {
                let (first, second) = (args[0], args[1]);
                if first == Int && second == Float {
                    if let Some(op) = variant_for(base, &[Float, Float]) {
                        self.convert(second.cells());
                        args[0] = Float;
                        return Some(op);
                    }
                }
                if second == Int && first == Float {
                    if let Some(op) = variant_for(base, &[Float, Float]) {
                        self.convert(0);
                        args[1] = Float;
                        return Some(op);
                    }
                }
                if first == Int && second == Int {
                    if let Some(op) = variant_for(base, &[Float, Float]) {
                        self.convert(1);
                        self.convert(0);
                        args[0] = Float;
                        args[1] = Float;
                        return Some(op);
                    }
                }
                if first == Int && second == Vec {
                    if let Some(op) = variant_for(base, &[Float, Vec]) {
                        self.convert(second.cells());
                        args[0] = Float;
                        return Some(op);
                    }
                }
                if first == Vec && second == Int {
                    if let Some(op) = variant_for(base, &[Vec, Float]) {
                        self.convert(0);
                        args[1] = Float;
                        return Some(op);
                    }
                }
                None
            }
            3 => {
                let (first, second, third) = (args[0], args[1], args[2]);
                if let Some(op) = variant_for(base, &[Float, Float, Float]) {
                    if first != Vec && second != Vec && third != Vec {
                        for (slot, offset) in [(0, 2), (1, 1), (2, 0)] {
                            if args[slot] == Int {
                                self.convert(offset);
                                args[slot] = Float;
                            }
                        }
                        return Some(op);
                    }
                }
                if let Some(op) = variant_for(base, &[first, Float, Float]) {
                    if second != Vec && third != Vec {
                        if second == Int {
                            self.convert(1);
                            args[1] = Float;
                        }
                        if third == Int {
                            self.convert(0);
                            args[2] = Float;
                        }
                        return Some(op);
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn convert(&mut self, offset: usize) {
        self.code.push(Token::new(Op::ConvIntFloat, offset as i32));
    }

    fn push_kind(&mut self, kind: ValueKind, offset: usize) -> Result<()> {
        self.kinds.push(kind);
        self.cells += kind.cells();
        if self.cells > MAX_STACK {
            return Err(Error::new(ErrorKind::StackOverflow, offset));
        }
        self.peak_cells = self.peak_cells.max(self.cells);
        Ok(())
    }

    fn wrong_types(&self, op: Op, arity: usize, offset: usize) -> Error {
        use ValueKind::Vec;

        let available = self.kinds.len().min(arity);
        let args = &self.kinds[self.kinds.len() - available..];
        let vectors = args.iter().filter(|&&k| k == Vec).count();

        let mismatch = if vectors > 0 && vectors < args.len() {
            TypeMismatch::MixedVectorScalar
        } else if vectors > 0 && vectors == args.len() {
            TypeMismatch::OnVector
        } else {
            TypeMismatch::Other
        };
        Error::new(
            ErrorKind::WrongArgumentTypes {
                op: op.name(),
                mismatch,
            },
            offset,
        )
    }

    /// Appends the conversions that bring the value left on the stack to the
    /// declared output type.
    fn finish(mut self, output: DataType, end_offset: usize) -> Result<(Vec<Token>, usize)> {
        let top = match self.kinds.last() {
            Some(&kind) => kind,
            None => return Err(Error::new(ErrorKind::UnexpectedEnd, end_offset)),
        };

        if top == ValueKind::Int && !matches!(output, DataType::Bool | DataType::Int) {
            self.code.push(Token::new(Op::ConvIntFloat, 0));
        }
        if top == ValueKind::Vec && output != DataType::Vec3 {
            // Scalar outputs take the x component
            self.code.push(Token::new(Op::GetMemberVec, 2));
            self.cells -= 2;
        }
        if output == DataType::Vec3 && top != ValueKind::Vec {
            // Pad the scalar out to the vector (value, 0, 0)
            self.code.push(Token::with_float(Op::ConstFloat, 0.0));
            self.code.push(Token::with_float(Op::ConstFloat, 0.0));
            self.cells += 2;
            if self.cells > MAX_STACK {
                return Err(Error::new(ErrorKind::StackOverflow, end_offset));
            }
            self.peak_cells = self.peak_cells.max(self.cells);
        }
        if top != ValueKind::Int && matches!(output, DataType::Bool | DataType::Int) {
            self.code.push(Token::new(Op::ConvFloatInt, 0));
        }

        Ok((self.code, self.peak_cells))
    }
}

fn variant_for(base: Op, args: &[ValueKind]) -> Option<Op> {
    if base.info().args == args {
        return Some(base);
    }
    let (_, alternatives) = OVERLOADS.iter().find(|(op, _)| *op == base)?;
    alternatives
        .iter()
        .copied()
        .find(|alt| alt.info().args == args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    const VARS: &[(&str, DataType)] = &[
        ("x", DataType::Float),
        ("n", DataType::Int),
        ("flag", DataType::Bool),
        ("v", DataType::Vec3),
    ];

    fn compile_src(src: &str, output: DataType) -> (Vec<Token>, usize) {
        let tokens = parser::parse(src, VARS).unwrap();
        match compile(&tokens, output) {
            Ok(result) => result,
            Err(e) => panic!("failed to compile {:?}: {}", src, e),
        }
    }

    fn compile_ops(src: &str, output: DataType) -> Vec<Op> {
        compile_src(src, output).0.iter().map(|t| t.op).collect()
    }

    fn compile_err(src: &str, output: DataType) -> Error {
        let tokens = parser::parse(src, VARS).unwrap();
        match compile(&tokens, output) {
            Ok(_) => panic!("expected {:?} to fail", src),
            Err(e) => e,
        }
    }

    #[test]
    fn postfix_order_follows_precedence() {
        assert_eq!(
            compile_ops("x + x * x", DataType::Float),
            vec![
                Op::VarFloat,
                Op::VarFloat,
                Op::VarFloat,
                Op::MulFloat,
                Op::AddFloat
            ]
        );
        // Power binds tighter than unary minus
        assert_eq!(
            compile_ops("-x ^ 2", DataType::Float),
            vec![
                Op::VarFloat,
                Op::ConstInt,
                Op::ConvIntFloat,
                Op::PowFloat,
                Op::NegFloat
            ]
        );
        // Parentheses override precedence
        assert_eq!(
            compile_ops("(x + x) * x", DataType::Float),
            vec![
                Op::VarFloat,
                Op::VarFloat,
                Op::AddFloat,
                Op::VarFloat,
                Op::MulFloat
            ]
        );
        // Comparisons bind tighter than logical operators
        assert_eq!(
            compile_ops("x == x && n > 1", DataType::Bool),
            vec![
                Op::VarFloat,
                Op::VarFloat,
                Op::EqFloat,
                Op::VarInt,
                Op::ConstInt,
                Op::GtInt,
                Op::And
            ]
        );
    }

    #[test]
    fn int_overloads_are_selected() {
        assert_eq!(
            compile_ops("n + 2", DataType::Int),
            vec![Op::VarInt, Op::ConstInt, Op::AddInt]
        );
        assert_eq!(
            compile_ops("min(n, 2)", DataType::Int),
            vec![Op::VarInt, Op::ConstInt, Op::MinInt]
        );
        assert_eq!(
            compile_ops("-n", DataType::Int),
            vec![Op::VarInt, Op::NegInt]
        );
    }

    #[test]
    fn int_arguments_widen_to_float() {
        // Second argument converts in place at the stack top
        let (code, _) = compile_src("x + 1", DataType::Float);
        assert_eq!(
            code,
            vec![
                Token::new(Op::VarFloat, 0),
                Token::new(Op::ConstInt, 1),
                Token::new(Op::ConvIntFloat, 0),
                Token::new(Op::AddFloat, 0),
            ]
        );

        // First argument sits one cell below the float on top
        let (code, _) = compile_src("min(1, 2.5)", DataType::Float);
        assert_eq!(
            code,
            vec![
                Token::new(Op::ConstInt, 1),
                Token::with_float(Op::ConstFloat, 2.5),
                Token::new(Op::ConvIntFloat, 1),
                Token::new(Op::MinFloat, 0),
            ]
        );

        // An int below a vector converts three cells down
        let (code, _) = compile_src("2 * v", DataType::Vec3);
        assert_eq!(
            code,
            vec![
                Token::new(Op::ConstInt, 2),
                Token::new(Op::VarVec, 3),
                Token::new(Op::ConvIntFloat, 3),
                Token::new(Op::MulFloatVec, 0),
            ]
        );

        // The vec constructor widens each scalar argument
        let (code, _) = compile_src("vec(1, x, 3)", DataType::Vec3);
        assert_eq!(
            code,
            vec![
                Token::new(Op::ConstInt, 1),
                Token::new(Op::VarFloat, 0),
                Token::new(Op::ConstInt, 3),
                Token::new(Op::ConvIntFloat, 2),
                Token::new(Op::ConvIntFloat, 0),
                Token::new(Op::MakeVec, 0),
            ]
        );
    }

    #[test]
    fn if_overloads() {
        assert_eq!(
            compile_ops("if(n > 1, n, 0)", DataType::Int),
            vec![
                Op::VarInt,
                Op::ConstInt,
                Op::GtInt,
                Op::VarInt,
                Op::ConstInt,
                Op::IfInt
            ]
        );
        assert_eq!(
            compile_ops("if(flag, v, -v)", DataType::Vec3),
            vec![Op::VarBool, Op::VarVec, Op::VarVec, Op::NegVec, Op::IfVec]
        );
        // Mixed scalar branches widen to the float form
        assert_eq!(
            compile_ops("if(flag, n, x)", DataType::Float),
            vec![
                Op::VarBool,
                Op::VarInt,
                Op::VarFloat,
                Op::ConvIntFloat,
                Op::IfFloat
            ]
        );
    }

    #[test]
    fn output_coercion() {
        // Int result widens for a float output
        assert_eq!(
            compile_ops("n + 1", DataType::Float),
            vec![Op::VarInt, Op::ConstInt, Op::AddInt, Op::ConvIntFloat]
        );
        // Float result narrows for an int output
        assert_eq!(
            compile_ops("x", DataType::Int),
            vec![Op::VarFloat, Op::ConvFloatInt]
        );
        // A vector reduces to its x component for scalar outputs
        assert_eq!(
            compile_ops("v", DataType::Int),
            vec![Op::VarVec, Op::GetMemberVec, Op::ConvFloatInt]
        );
        // Scalars pad out to (value, 0, 0) for vector outputs
        assert_eq!(
            compile_ops("x", DataType::Vec3),
            vec![Op::VarFloat, Op::ConstFloat, Op::ConstFloat]
        );
        assert_eq!(
            compile_ops("n", DataType::Vec3),
            vec![Op::VarInt, Op::ConvIntFloat, Op::ConstFloat, Op::ConstFloat]
        );
        // Bool output narrows like int
        assert_eq!(
            compile_ops("x > 1", DataType::Bool),
            vec![Op::VarFloat, Op::ConstInt, Op::ConvIntFloat, Op::GtFloat]
        );
    }

    #[test]
    fn stack_size_is_tracked_in_cells() {
        assert_eq!(compile_src("x + x", DataType::Float).1, 2);
        assert_eq!(compile_src("v", DataType::Vec3).1, 3);
        assert_eq!(compile_src("dot(v, v)", DataType::Float).1, 6);
        assert_eq!(compile_src("x", DataType::Vec3).1, 3);
    }

    #[test]
    fn deep_nesting_overflows_the_stack() {
        let mut src = String::new();
        for _ in 0..MAX_STACK + 1 {
            src.push_str("(1 + ");
        }
        src.push('1');
        for _ in 0..MAX_STACK + 1 {
            src.push(')');
        }
        let e = compile_err(&src, DataType::Float);
        assert_eq!(e.kind, ErrorKind::StackOverflow);
        // The operand that no longer fits: each "(1 + " group is 5 bytes
        assert_eq!(e.offset, 5 * MAX_STACK + 1);
    }

    #[test]
    fn type_errors_point_at_the_failing_token() {
        let e = compile_err("v * v", DataType::Vec3);
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentTypes {
                op: "mul_float",
                mismatch: TypeMismatch::OnVector
            }
        );
        assert_eq!(e.offset, 2);

        let e = compile_err("x + v", DataType::Float);
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentTypes {
                op: "add_float",
                mismatch: TypeMismatch::MixedVectorScalar
            }
        );
        assert_eq!(e.offset, 2);

        let e = compile_err("!v", DataType::Int);
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentTypes {
                op: "not",
                mismatch: TypeMismatch::OnVector
            }
        );
        assert_eq!(e.offset, 0);

        let e = compile_err("1 + sqrt(v)", DataType::Float);
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentTypes {
                op: "sqrt",
                mismatch: TypeMismatch::OnVector
            }
        );
        assert_eq!(e.offset, 4);
    }
}
