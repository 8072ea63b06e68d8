mod compiler;
mod error;
mod parser;
mod token;
mod value;
mod vm;

pub use error::{Error, ErrorKind, Result, TypeMismatch};
pub use value::{DataType, Input, OutputBuffer, Value};

use token::{Op, Token};

/// Hard cap on evaluation stack depth, in cells. Enforced while compiling;
/// the interpreter never checks it.
pub const MAX_STACK: usize = 100;

/// Advisory minimum number of rows per worker when a host splits a batch
/// across threads, to amortize per-call overhead.
pub const MIN_GRAIN_SIZE: usize = 512;

/// A compiled expression: a typed postfix program plus the peak stack usage
/// and the declared output type. Immutable once built; evaluation borrows it
/// shared, so rows can be evaluated from many threads at once.
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<Token>,
    stack_size: usize,
    output: DataType,
}

/// Compiles `src` against the declared variables and output type. The
/// variable list is only borrowed for the duration of the call; the returned
/// program is self-contained and refers to variables by index.
pub fn compile(src: &str, variables: &[(&str, DataType)], output: DataType) -> Result<Program> {
    let compiled = parser::parse(src, variables)
        .and_then(|tokens| compiler::compile(&tokens, output))
        .map(|(code, stack_size)| Program {
            code,
            stack_size,
            output,
        });

    match compiled {
        Ok(program) => {
            log::trace!("compiled {:?} to:\n{}", src, program.dump());
            Ok(program)
        }
        Err(e) => {
            log::debug!("failed to compile {:?}: {}", src, e);
            Err(e)
        }
    }
}

impl Program {
    /// Evaluates one row. `inputs` must match the variable list the program
    /// was compiled with, in order and type.
    pub fn eval(&self, inputs: &[Input], row: usize) -> Value {
        vm::eval(&self.code, inputs, row, self.output)
    }

    /// Evaluates every row in `mask`, writing results into `out` at the same
    /// row indices. The buffer variant must match [`Program::output`].
    pub fn eval_batch(&self, inputs: &[Input], mask: &[usize], out: &mut OutputBuffer) {
        for &row in mask {
            out.set(row, self.eval(inputs, row));
        }
    }

    pub fn output(&self) -> DataType {
        self.output
    }

    /// Peak stack usage in cells, computed at compile time.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Disassembles the program, one op per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for t in &self.code {
            let line = match t.op {
                Op::ConstFloat => format!("{} {}", t.op.name(), t.value_as_float()),
                Op::ConstInt => format!("{} {}", t.op.name(), t.value),
                Op::VarFloat | Op::VarInt | Op::VarBool | Op::VarVec => {
                    format!("{} [{}]", t.op.name(), t.value)
                }
                Op::GetMemberVec | Op::ConvIntFloat | Op::ConvFloatInt => {
                    format!("{} @{}", t.op.name(), t.value)
                }
                _ => t.op.name().to_owned(),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}
