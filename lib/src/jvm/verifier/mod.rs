//! Stack map frame inference
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`Frame`]) and the set of stack map frames for all merge points
//! in a method is the _stack map table_.
//!
//! The JVM [verifies by type-checking][0]: it does not infer frames itself, it only checks the
//! ones recorded in the `StackMapTable` attribute. Producing those frames is the job of this
//! module. It happens in a few stages:
//!
//!   1. the method entry state comes from the signature ([`AbstractState::entry`])
//!   2. a worklist fixpoint executes every basic block symbolically, merging states where control
//!      flow joins, until nothing changes ([`compute_frames`])
//!   3. the states at merge points are put into entry form and compressed against their
//!      predecessors into the smallest frame kinds that describe them ([`reduce`])
//!   4. the compressed frames are handed to a [`crate::jvm::class_file::FrameSink`]
//!
//! [`StackMapGenerator`] strings these together.
//!
//! Merging two class types needs to know about the class hierarchy, which is outside of the method
//! being analyzed. That knowledge is supplied through a [`TypeHierarchy`].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod dataflow;
mod frame;
mod generator;
mod hierarchy;
mod state;
mod types;

pub use dataflow::*;
pub use frame::*;
pub use generator::*;
pub use hierarchy::*;
pub use state::*;
pub use types::*;
