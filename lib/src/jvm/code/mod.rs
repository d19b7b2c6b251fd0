//! Method bytecode and its control flow
//!
//! ### Structure
//!
//! A method body is a flat list of [`Instruction`]s. Offsets are not stored: they are the running
//! sum of instruction widths, and only the switch instructions have a width that depends on where
//! they are placed. Instructions that may branch are grouped under [`BranchInstruction`], with
//! jump targets given as absolute offsets into the code.
//!
//! [`ControlFlowGraph::build`] lays out the instructions and cuts them into [`BasicBlock`]s. Every
//! block that starts at a jump target, at an exception handler entry, or right after an
//! unconditional transfer of control is a merge point: the JVM wants a stack map frame there.
//!
//! See the [list of bytecode instructions][0].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod cfg;
mod instructions;

pub use cfg::*;
pub use instructions::*;
