use super::class_file::ConstantPoolOverflow;
use super::verifier::VType;
use crate::util::Offset;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub enum Error {
    /// Structural problem with the instructions or exception table
    MalformedBytecode { offset: Offset, kind: MalformedKind },

    /// The instructions are well-formed, but the types flowing through them are inconsistent
    UnverifiableCode {
        offset: Offset,
        kind: VerifierErrorKind,
    },

    /// The dataflow analysis did not settle within the configured number of block visits
    ///
    /// The lattice has finite height, so this indicates a bug rather than bad input.
    FixedPointDivergence { iterations: usize },

    ConstantPoolOverflow(ConstantPoolOverflow),
    IoError(std::io::Error),

    /// A `StackMapTable` attribute body could not be decoded
    MalformedStackMapTable(String),

    /// A method descriptor could not be parsed
    BadDescriptor(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    /// Method has no instructions
    EmptyCode,

    /// Code array would be larger than the 65535 bytes a method can hold
    CodeTooLarge(usize),

    /// Jump to an offset outside the code or into the middle of an instruction
    InvalidBranchTarget(Offset),

    /// Exception handler whose range or entry doesn't line up with instructions
    InvalidHandler {
        start_pc: Offset,
        end_pc: Offset,
        handler_pc: Offset,
    },

    /// Exception handler covering no instructions
    EmptyHandlerRange,

    /// The last instruction can fall through past the end of the code
    FallsOffEnd,

    /// A merge point is never reached from the method entry
    UnreachableCode,

    /// Two frames were produced for the same offset
    DuplicateFrameOffset,

    /// The method parameters need more local slots than `max_locals`
    TooManyParameters { needed: usize, max_locals: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    /// Popping from an empty operand stack
    EmptyStack,

    /// Pushing past `max_stack`
    StackOverflow(u16),

    /// Operand of the wrong category (eg. a single-word `dup` on a `long`)
    InvalidWidth(usize),

    /// Array instruction on a value that isn't a matching array
    NotArrayType(VType),

    /// Local variable index at or past `max_locals`
    InvalidIndex(usize),

    /// Local variable read before being definitely assigned
    UnsetLocal(usize),

    /// Value of the wrong type for an instruction
    InvalidType { expected: &'static str, found: VType },

    /// Stack types that can't be merged at a join point
    IncompatibleTypes(VType, VType),

    /// Control flow joins with different operand stack heights
    StackHeightMismatch(usize, usize),

    /// `<init>` called on something that isn't an uninitialized object
    NotUninitialized(VType),

    /// The uninitialized value at the given offset doesn't come from a `new` instruction
    MissingNew(u16),

    /// Returning from a constructor before calling the superclass `<init>`
    UninitializedThisOnReturn,

    /// Return instruction doesn't match the method return type
    ReturnMismatch,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::MalformedBytecode { offset, kind } => {
                write!(f, "malformed bytecode at offset {}: {}", offset.0, kind)
            }
            Error::UnverifiableCode { offset, kind } => {
                write!(f, "unverifiable code at offset {}: {}", offset.0, kind)
            }
            Error::FixedPointDivergence { iterations } => write!(
                f,
                "frame computation did not converge after {} iterations",
                iterations
            ),
            Error::ConstantPoolOverflow(overflow) => write!(
                f,
                "constant pool overflow at index {} inserting {:?}",
                overflow.offset, overflow.constant
            ),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::MalformedStackMapTable(msg) => write!(f, "malformed StackMapTable: {}", msg),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
        }
    }
}

impl Display for MalformedKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MalformedKind::EmptyCode => f.write_str("method has no code"),
            MalformedKind::CodeTooLarge(len) => write!(f, "code length {} exceeds 65535", len),
            MalformedKind::InvalidBranchTarget(target) => {
                write!(f, "branch target {} is not an instruction", target.0)
            }
            MalformedKind::InvalidHandler {
                start_pc,
                end_pc,
                handler_pc,
            } => write!(
                f,
                "exception handler [{}, {}) -> {} does not line up with instructions",
                start_pc.0, end_pc.0, handler_pc.0
            ),
            MalformedKind::EmptyHandlerRange => f.write_str("exception handler covers no code"),
            MalformedKind::FallsOffEnd => f.write_str("execution falls off the end of the code"),
            MalformedKind::UnreachableCode => f.write_str("merge point is unreachable"),
            MalformedKind::DuplicateFrameOffset => f.write_str("two frames at the same offset"),
            MalformedKind::TooManyParameters { needed, max_locals } => write!(
                f,
                "parameters need {} locals but max_locals is {}",
                needed, max_locals
            ),
        }
    }
}

impl Display for VerifierErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VerifierErrorKind::EmptyStack => f.write_str("operand stack underflow"),
            VerifierErrorKind::StackOverflow(max) => {
                write!(f, "operand stack exceeds max_stack {}", max)
            }
            VerifierErrorKind::InvalidWidth(width) => {
                write!(f, "operand has unexpected width {}", width)
            }
            VerifierErrorKind::NotArrayType(found) => write!(f, "expected array, got {:?}", found),
            VerifierErrorKind::InvalidIndex(idx) => write!(f, "local {} is out of range", idx),
            VerifierErrorKind::UnsetLocal(idx) => write!(f, "local {} is not set", idx),
            VerifierErrorKind::InvalidType { expected, found } => {
                write!(f, "expected {}, got {:?}", expected, found)
            }
            VerifierErrorKind::IncompatibleTypes(t1, t2) => {
                write!(f, "cannot merge {:?} with {:?}", t1, t2)
            }
            VerifierErrorKind::StackHeightMismatch(h1, h2) => {
                write!(f, "stack heights {} and {} differ", h1, h2)
            }
            VerifierErrorKind::NotUninitialized(found) => {
                write!(f, "<init> called on {:?}", found)
            }
            VerifierErrorKind::MissingNew(offset) => {
                write!(f, "no `new` instruction at offset {}", offset)
            }
            VerifierErrorKind::UninitializedThisOnReturn => {
                f.write_str("constructor returns before `this` is initialized")
            }
            VerifierErrorKind::ReturnMismatch => {
                f.write_str("return instruction does not match method descriptor")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow(overflow)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
