/// Compile-time type of a value on the evaluation stack. Booleans live as
/// `Int` 0/1; a `Vec` occupies three consecutive float cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    Float,
    Int,
    Vec,
}

impl ValueKind {
    /// Width in stack cells.
    pub fn cells(self) -> usize {
        match self {
            ValueKind::Vec => 3,
            _ => 1,
        }
    }
}

/// Every opcode the compiler can emit, plus the parse-only specials.
///
/// Declaration order matters: the range helpers below and the index into
/// [`OP_INFO`] both rely on it. Generic operators are spelled as their float
/// variant; the compiler rewrites them to the typed variant that matches the
/// arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum Op {
    // Constants
    ConstFloat,
    ConstInt,
    // Variable loads; the immediate is the input column index
    VarFloat,
    VarInt,
    VarBool,
    VarVec,
    // Parse-only specials, never present in a compiled program
    LParen,
    RParen,
    Comma,
    // Operators
    NegFloat,
    NegInt,
    NegVec,
    Not,
    AddFloat,
    AddInt,
    AddVec,
    SubFloat,
    SubInt,
    SubVec,
    MulFloat,
    MulInt,
    MulFloatVec,
    MulVecFloat,
    DivFloat,
    DivInt,
    DivVecFloat,
    PowFloat,
    PowInt,
    ModFloat,
    ModInt,
    EqFloat,
    EqInt,
    EqVec,
    NeFloat,
    NeInt,
    NeVec,
    GtFloat,
    GtInt,
    GeFloat,
    GeInt,
    LtFloat,
    LtInt,
    LeFloat,
    LeInt,
    And,
    Or,
    // Postfix; the immediate is the component offset from stack top
    GetMemberVec,
    // Functions
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    MaxFloat,
    MaxInt,
    MinFloat,
    MinInt,
    AbsFloat,
    AbsInt,
    SignFloat,
    SignInt,
    ToRadians,
    ToDegrees,
    MakeVec,
    FnNot,
    Log,
    Ln,
    FnPow,
    Exp,
    IfFloat,
    IfInt,
    IfVec,
    Ceil,
    Floor,
    Frac,
    Round,
    Trunc,
    CompareFloat,
    CompareVec,
    Dot,
    Cross,
    Normalize,
    Length,
    LengthSquared,
    // Conversions; the immediate is the cell offset from stack top
    ConvIntFloat,
    ConvFloatInt,
}

pub(crate) const OP_COUNT: usize = Op::ConvFloatInt as usize + 1;

/// Static record describing one opcode. `result` is meaningless for the
/// parse-only specials.
pub(crate) struct OpInfo {
    pub op: Op,
    pub name: &'static str,
    pub precedence: i8,
    pub result: ValueKind,
    pub args: &'static [ValueKind],
}

use ValueKind::{Float as F, Int as I, Vec as V};

macro_rules! op {
    ($op:ident, $name:literal, $prec:literal, $result:expr, $args:expr) => {
        OpInfo {
            op: Op::$op,
            name: $name,
            precedence: $prec,
            result: $result,
            args: $args,
        }
    };
}

static OP_INFO: [OpInfo; OP_COUNT] = [
    op!(ConstFloat, "const_float", 0, F, &[]),
    op!(ConstInt, "const_int", 0, I, &[]),
    op!(VarFloat, "var_float", 0, F, &[]),
    op!(VarInt, "var_int", 0, I, &[]),
    op!(VarBool, "var_bool", 0, I, &[]),
    op!(VarVec, "var_vec", 0, V, &[]),
    op!(LParen, "(", 0, F, &[]),
    op!(RParen, ")", 0, F, &[]),
    op!(Comma, ",", 0, F, &[]),
    op!(NegFloat, "neg_float", 7, F, &[F]),
    op!(NegInt, "neg_int", 7, I, &[I]),
    op!(NegVec, "neg_vec", 7, V, &[V]),
    op!(Not, "not", 7, I, &[I]),
    op!(AddFloat, "add_float", 1, F, &[F, F]),
    op!(AddInt, "add_int", 1, I, &[I, I]),
    op!(AddVec, "add_vec", 1, V, &[V, V]),
    op!(SubFloat, "sub_float", 1, F, &[F, F]),
    op!(SubInt, "sub_int", 1, I, &[I, I]),
    op!(SubVec, "sub_vec", 1, V, &[V, V]),
    op!(MulFloat, "mul_float", 2, F, &[F, F]),
    op!(MulInt, "mul_int", 2, I, &[I, I]),
    op!(MulFloatVec, "mul_float_vec", 2, V, &[F, V]),
    op!(MulVecFloat, "mul_vec_float", 2, V, &[V, F]),
    op!(DivFloat, "div_float", 2, F, &[F, F]),
    op!(DivInt, "div_int", 2, I, &[I, I]),
    op!(DivVecFloat, "div_vec_float", 2, V, &[V, F]),
    op!(PowFloat, "pow_float", 8, F, &[F, F]),
    op!(PowInt, "pow_int", 8, I, &[I, I]),
    op!(ModFloat, "mod_float", 2, F, &[F, F]),
    op!(ModInt, "mod_int", 2, I, &[I, I]),
    op!(EqFloat, "eq_float", -1, I, &[F, F]),
    op!(EqInt, "eq_int", -1, I, &[I, I]),
    op!(EqVec, "eq_vec", -1, I, &[V, V]),
    op!(NeFloat, "ne_float", -1, I, &[F, F]),
    op!(NeInt, "ne_int", -1, I, &[I, I]),
    op!(NeVec, "ne_vec", -1, I, &[V, V]),
    op!(GtFloat, "gt_float", 0, I, &[F, F]),
    op!(GtInt, "gt_int", 0, I, &[I, I]),
    op!(GeFloat, "ge_float", 0, I, &[F, F]),
    op!(GeInt, "ge_int", 0, I, &[I, I]),
    op!(LtFloat, "lt_float", 0, I, &[F, F]),
    op!(LtInt, "lt_int", 0, I, &[I, I]),
    op!(LeFloat, "le_float", 0, I, &[F, F]),
    op!(LeInt, "le_int", 0, I, &[I, I]),
    op!(And, "and", -2, I, &[I, I]),
    op!(Or, "or", -3, I, &[I, I]),
    op!(GetMemberVec, "get_member_vec", 9, F, &[V]),
    op!(Sqrt, "sqrt", 9, F, &[F]),
    op!(Sin, "sin", 9, F, &[F]),
    op!(Cos, "cos", 9, F, &[F]),
    op!(Tan, "tan", 9, F, &[F]),
    op!(Asin, "asin", 9, F, &[F]),
    op!(Acos, "acos", 9, F, &[F]),
    op!(Atan, "atan", 9, F, &[F]),
    op!(Atan2, "atan2", 9, F, &[F, F]),
    op!(MaxFloat, "max_float", 9, F, &[F, F]),
    op!(MaxInt, "max_int", 9, I, &[I, I]),
    op!(MinFloat, "min_float", 9, F, &[F, F]),
    op!(MinInt, "min_int", 9, I, &[I, I]),
    op!(AbsFloat, "abs_float", 9, F, &[F]),
    op!(AbsInt, "abs_int", 9, I, &[I]),
    op!(SignFloat, "sign_float", 9, I, &[F]),
    op!(SignInt, "sign_int", 9, I, &[I]),
    op!(ToRadians, "to_radians", 9, F, &[F]),
    op!(ToDegrees, "to_degrees", 9, F, &[F]),
    op!(MakeVec, "make_vec", 9, V, &[F, F, F]),
    op!(FnNot, "fn_not", 9, I, &[I]),
    op!(Log, "log", 9, F, &[F, F]),
    op!(Ln, "ln", 9, F, &[F]),
    op!(FnPow, "pow", 9, F, &[F, F]),
    op!(Exp, "exp", 9, F, &[F]),
    op!(IfFloat, "if_float", 9, F, &[I, F, F]),
    op!(IfInt, "if_int", 9, I, &[I, I, I]),
    op!(IfVec, "if_vec", 9, V, &[I, V, V]),
    op!(Ceil, "ceil", 9, F, &[F]),
    op!(Floor, "floor", 9, F, &[F]),
    op!(Frac, "frac", 9, F, &[F]),
    op!(Round, "round", 9, F, &[F]),
    op!(Trunc, "trunc", 9, F, &[F]),
    op!(CompareFloat, "compare_float", 9, I, &[F, F, F]),
    op!(CompareVec, "compare_vec", 9, I, &[V, V, F]),
    op!(Dot, "dot", 9, F, &[V, V]),
    op!(Cross, "cross", 9, V, &[V, V]),
    op!(Normalize, "normalize", 9, V, &[V]),
    op!(Length, "length", 9, F, &[V]),
    op!(LengthSquared, "length2", 9, F, &[V]),
    op!(ConvIntFloat, "conv_int_float", 9, F, &[I]),
    op!(ConvFloatInt, "conv_float_int", 9, I, &[F]),
];

impl Op {
    pub fn info(self) -> &'static OpInfo {
        let info = &OP_INFO[self as usize];
        debug_assert!(info.op == self, "op table out of order at {}", info.name);
        info
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn precedence(self) -> i8 {
        self.info().precedence
    }

    pub fn arity(self) -> usize {
        self.info().args.len()
    }

    pub fn result_kind(self) -> ValueKind {
        self.info().result
    }

    pub fn is_operand(self) -> bool {
        (Op::ConstFloat..=Op::VarVec).contains(&self)
    }

    pub fn is_operator_or_function(self) -> bool {
        self >= Op::NegFloat
    }
}

/// One parsed or compiled instruction: an opcode and a 32-bit immediate
/// holding an int literal, a bit-cast float literal, a variable index or a
/// cell offset, depending on the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub op: Op,
    pub value: i32,
}

impl Token {
    pub fn new(op: Op, value: i32) -> Token {
        Token { op, value }
    }

    pub fn with_float(op: Op, value: f32) -> Token {
        Token {
            op,
            value: value.to_bits() as i32,
        }
    }

    pub fn value_as_float(self) -> f32 {
        f32::from_bits(self.value as u32)
    }
}

/// A token in the parsed infix stream: the packed token plus the byte
/// offset of its first character in the source. The offset only exists so
/// compile errors can point back into the source; compiled programs store
/// the bare [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpannedToken {
    pub token: Token,
    pub offset: usize,
}

impl SpannedToken {
    pub fn new(token: Token, offset: usize) -> SpannedToken {
        SpannedToken { token, offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_in_declaration_order() {
        for (index, info) in OP_INFO.iter().enumerate() {
            assert_eq!(info.op as usize, index, "entry for {}", info.name);
        }
    }

    #[test]
    fn operators_and_functions_take_arguments() {
        for info in OP_INFO.iter() {
            if info.op.is_operator_or_function() {
                assert!(
                    (1..=3).contains(&info.args.len()),
                    "bad arity for {}",
                    info.name
                );
            } else {
                assert!(info.args.is_empty(), "unexpected args for {}", info.name);
            }
        }
    }

    #[test]
    fn float_immediates_round_trip() {
        let token = Token::with_float(Op::ConstFloat, -123.456);
        assert_eq!(token.value_as_float(), -123.456);
        assert_eq!(Token::with_float(Op::ConstFloat, 0.0).value, 0);
    }
}
