//! Model of JVM methods, as far as stack map frames are concerned
//!
//! ### Simple example
//!
//! Consider the following simple Java method:
//!
//! ```java,ignore,no_run
//! public static int max(int x, int y) {
//!     if (x < y) {
//!         return y;
//!     }
//!     return x;
//! }
//! ```
//!
//! The `return x` after the conditional jump is a merge point, so the method needs a
//! `StackMapTable`. Computing it can be done as follows:
//!
//! ```
//! use stackmap::jvm::class_file::ConstantsPool;
//! use stackmap::jvm::code::{BranchInstruction::*, Instruction::*, OrdComparison};
//! use stackmap::jvm::verifier::{ClassHierarchy, StackMapGenerator};
//! use stackmap::jvm::*;
//! use stackmap::util::Offset;
//!
//! # fn generate_attribute() -> Result<(), Error> {
//! // Describe the method
//! let mut method = Method::new(
//!     BinaryName::from_str("me/alec/Util").unwrap(),
//!     UnqualifiedName::from_str("max").unwrap(),
//!     "(II)I",
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//! )?;
//! method.max_stack = 2;
//! method.instructions = vec![
//!     ILoad(0),
//!     ILoad(1),
//!     Branch(IfICmp(OrdComparison::GE, Offset(7))),
//!     ILoad(1),
//!     Branch(IReturn),
//!     ILoad(0), // offset 7
//!     Branch(IReturn),
//! ];
//!
//! // Compute the frames and encode them, adding any classes they mention to the constant pool
//! let hierarchy = ClassHierarchy::new();
//! let generator = StackMapGenerator::new(&hierarchy, Settings::new());
//! let mut constants = ConstantsPool::new();
//! let body: Vec<u8> = generator.attribute_body(&method, &mut constants)?;
//!
//! // One `same_frame` with offset delta 7
//! assert_eq!(body, vec![0, 1, 7]);
//! # Ok(())
//! # }
//! # generate_attribute().unwrap();
//! ```

mod access_flags;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod method;
mod names;
mod settings;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use method::*;
pub use names::*;
pub use settings::*;
