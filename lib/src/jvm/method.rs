use super::code::Instruction;
use super::{
    BinaryName, Error, MethodAccessFlags, MethodDescriptor, ParseDescriptor, RefType,
    UnqualifiedName,
};
use crate::util::Offset;

/// Everything about one method that frame computation needs
///
/// This is the already-lowered method body: instructions are symbolic (constant pool references
/// are carried as names and descriptors) and jump targets are absolute offsets into the code.
#[derive(Debug, Clone)]
pub struct Method {
    /// Class declaring the method (type of `this`)
    pub class: BinaryName,

    /// Name of the method (`<init>` for constructors)
    pub name: UnqualifiedName,

    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,

    /// Maximum operand stack depth, in words
    pub max_stack: u16,

    /// Number of local variable slots
    pub max_locals: u16,

    pub instructions: Vec<Instruction>,
    pub exception_table: Vec<ExceptionHandler>,

    /// Local variable scopes, if known (eg. from a `LocalVariableTable`)
    ///
    /// A slot with at least one scope is considered dead at merge points outside of all of its
    /// scopes. Slots with no scope at all are never narrowed.
    pub local_variables: Option<Vec<LocalVariable>>,
}

impl Method {
    /// Method with no code yet, and `max_locals` just big enough for the parameters
    pub fn new(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: &str,
        access_flags: MethodAccessFlags,
    ) -> Result<Method, Error> {
        let descriptor = MethodDescriptor::parse(descriptor)
            .map_err(|err| Error::BadDescriptor(err.to_string()))?;
        let has_this = !access_flags.contains(MethodAccessFlags::STATIC);
        let max_locals = descriptor.parameter_length(has_this) as u16;
        Ok(Method {
            class,
            name,
            descriptor,
            access_flags,
            max_stack: 0,
            max_locals,
            instructions: vec![],
            exception_table: vec![],
            local_variables: None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }

    /// Number of local slots taken by `this` and the parameters
    pub fn parameter_slots(&self) -> usize {
        self.descriptor.parameter_length(!self.is_static())
    }
}

/// Entry in the exception table of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: Offset,

    /// End of exception handler range (exclusive)
    pub end_pc: Offset,

    /// Start of the exception handler
    pub handler_pc: Offset,

    /// Type of exception caught (`None` catches everything, as for `finally`)
    pub catch_type: Option<RefType<BinaryName>>,
}

impl ExceptionHandler {
    pub fn covers(&self, offset: Offset) -> bool {
        self.start_pc <= offset && offset < self.end_pc
    }

    /// Type on the stack when the handler is entered
    pub fn exception_type(&self) -> RefType<BinaryName> {
        self.catch_type.clone().unwrap_or(RefType::THROWABLE)
    }
}

/// Scope of one local variable slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub slot: u16,

    /// First offset where the variable holds a value
    pub start: Offset,

    /// Number of bytes of code covered
    pub length: usize,
}

impl LocalVariable {
    pub fn covers(&self, offset: Offset) -> bool {
        self.start <= offset && offset.0 < self.start.0 + self.length
    }
}
