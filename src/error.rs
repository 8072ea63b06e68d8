use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A parse or compile failure. `offset` is the byte offset into the source
/// where the problem was detected: the stalled position for parse errors,
/// the offending token for compile errors, and the opening parenthesis for
/// [`ErrorKind::UnclosedParen`]. Hosts typically render the message with a
/// caret at the offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{offset}: {kind}")]
pub struct Error {
    pub kind: ErrorKind,
    pub offset: usize,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, offset: usize) -> Error {
        Error { kind, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected an operand")]
    ExpectedOperand,
    #[error("expected an operator")]
    ExpectedOperator,
    #[error("unknown function name")]
    UnknownFunction,
    #[error("unknown variable name")]
    UnknownVariable,
    #[error("unclosed parenthesis")]
    UnclosedParen,
    #[error("expected ','")]
    ExpectedComma,
    #[error("invalid number")]
    InvalidNumber,
    #[error("{op} expects {expected} arguments")]
    WrongArity { op: &'static str, expected: usize },
    #[error("{op}: {mismatch}")]
    WrongArgumentTypes {
        op: &'static str,
        mismatch: TypeMismatch,
    },
    #[error("expression uses too much stack space")]
    StackOverflow,
    #[error("cannot convert the result to the output type")]
    CannotCoerceOutput,
}

/// Refinement of [`ErrorKind::WrongArgumentTypes`] describing how the
/// argument types failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMismatch {
    /// One argument is a vector and another is not.
    MixedVectorScalar,
    /// The operation is not defined for vectors.
    OnVector,
    /// Anything else.
    Other,
}

impl std::fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TypeMismatch::MixedVectorScalar => {
                "cannot mix vector and non-vector types in this operation"
            }
            TypeMismatch::OnVector => "cannot perform this operation on a vector",
            TypeMismatch::Other => "wrong data type",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offset_and_message() {
        let error = Error::new(ErrorKind::UnknownVariable, 4);
        assert_eq!(error.to_string(), "4: unknown variable name");

        let error = Error::new(
            ErrorKind::WrongArgumentTypes {
                op: "add_float",
                mismatch: TypeMismatch::MixedVectorScalar,
            },
            0,
        );
        assert_eq!(
            error.to_string(),
            "0: add_float: cannot mix vector and non-vector types in this operation"
        );
    }
}
