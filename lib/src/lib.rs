//! Compute `StackMapTable` attributes for JVM methods
//!
//! Since class file version 50, the JVM expects every method with non-trivial control flow to
//! come with a stack map frame at each merge point. This crate infers those frames from the
//! instructions of a method and encodes them as compactly as the class file format allows.
//!
//! The interesting parts live under [`jvm::verifier`].

pub mod jvm;
pub mod util;
