use super::{Frame, TypeHierarchy, VType, VerificationType};
use crate::jvm::code::{
    BranchInstruction, ConstantData, ControlFlowGraph, Instruction, InvokeType,
};
use crate::jvm::{
    BaseType, BinaryName, Error, FieldType, LocalVariable, MalformedKind, Method, RefType,
    Settings, UnqualifiedName, VerifierErrorKind,
};
use crate::util::{Offset, OffsetVec, Width};
use std::collections::HashMap;

/// Types of the locals and operand stack at one point in the code
///
/// Locals are tracked per slot: there are always exactly `max_locals` of them, and a `long` or
/// `double` in slot `i` is followed by a `top` in slot `i + 1`. The stack is tracked per value,
/// with offsets measured in words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractState {
    pub locals: Vec<VType>,
    pub stack: OffsetVec<VType>,
}

/// Method-wide information needed while executing instructions
pub struct MethodContext<'a> {
    pub method: &'a Method,
    pub hierarchy: &'a dyn TypeHierarchy,
    pub settings: &'a Settings,

    /// Class created by each `new` instruction, keyed by offset
    new_sites: HashMap<u16, BinaryName>,
}

impl<'a> MethodContext<'a> {
    pub fn new(
        method: &'a Method,
        cfg: &ControlFlowGraph,
        hierarchy: &'a dyn TypeHierarchy,
        settings: &'a Settings,
    ) -> MethodContext<'a> {
        let new_sites = method
            .instructions
            .iter()
            .zip(&cfg.offsets)
            .filter_map(|(insn, offset)| match insn {
                Instruction::New(class) => Some((offset.0 as u16, class.clone())),
                _ => None,
            })
            .collect();
        MethodContext {
            method,
            hierarchy,
            settings,
            new_sites,
        }
    }

    /// Class whose `new` instruction is at the given offset
    pub fn new_site(&self, offset: u16) -> Option<&BinaryName> {
        self.new_sites.get(&offset)
    }
}

impl AbstractState {
    /// State on entry to the method, as implied by the method signature
    ///
    /// Constructors start with `this` uninitialized (except in `java/lang/Object`, which has no
    /// superclass constructor to call).
    pub fn entry(method: &Method) -> Result<AbstractState, Error> {
        let max_locals = method.max_locals as usize;
        let needed = method.parameter_slots();
        if needed > max_locals {
            return Err(Error::MalformedBytecode {
                offset: Offset(0),
                kind: MalformedKind::TooManyParameters {
                    needed,
                    max_locals: method.max_locals,
                },
            });
        }

        let mut locals = vec![VerificationType::Top; max_locals];
        let mut slot = 0;
        if !method.is_static() {
            locals[0] = if method.is_constructor() && method.class != BinaryName::OBJECT {
                VerificationType::UninitializedThis
            } else {
                VerificationType::Object(RefType::Object(method.class.clone()))
            };
            slot += 1;
        }
        for parameter in &method.descriptor.parameters {
            locals[slot] = VType::from(parameter.clone());
            slot += parameter.width();
        }

        Ok(AbstractState {
            locals,
            stack: OffsetVec::new(),
        })
    }

    /// State at the entry of an exception handler reached from this state
    pub fn handler_state(&self, exception_type: RefType<BinaryName>) -> AbstractState {
        let mut stack = OffsetVec::new();
        stack.push(VerificationType::Object(exception_type));
        AbstractState {
            locals: self.locals.clone(),
            stack,
        }
    }

    /// Forget every non-parameter local whose slot has scopes, none of which cover the offset
    ///
    /// Slots without any scope (compiler temporaries like the array, length and index of an
    /// enhanced `for`) are left alone.
    pub fn restrict_to_scopes(
        &mut self,
        offset: Offset,
        scopes: &[LocalVariable],
        parameter_slots: usize,
    ) {
        for slot in parameter_slots..self.locals.len() {
            let mut described = false;
            let mut in_scope = false;
            for scope in scopes.iter().filter(|scope| scope.slot as usize == slot) {
                described = true;
                in_scope |= scope.covers(offset);
            }
            if described && !in_scope {
                self.locals[slot] = VerificationType::Top;
            }
        }
    }

    /// Merge another state into this one, returning whether this state changed
    ///
    /// Locals that can't be merged become `top`. Stack entries have no such escape hatch: the
    /// stacks must have the same shape and mergeable types.
    pub fn merge_from(
        &mut self,
        other: &AbstractState,
        hierarchy: &dyn TypeHierarchy,
        object_fallback: bool,
    ) -> Result<bool, VerifierErrorKind> {
        if self.stack.len() != other.stack.len()
            || self.stack.offset_len() != other.stack.offset_len()
        {
            return Err(VerifierErrorKind::StackHeightMismatch(
                self.stack.offset_len().0,
                other.stack.offset_len().0,
            ));
        }

        let mut changed = false;
        let mut merged_stack = OffsetVec::new();
        for ((_, _, t1), (_, _, t2)) in self.stack.iter().zip(other.stack.iter()) {
            let merged = t1.merge(t2, hierarchy, object_fallback);
            if merged == VerificationType::Top {
                return Err(VerifierErrorKind::IncompatibleTypes(t1.clone(), t2.clone()));
            }
            changed |= &merged != t1;
            merged_stack.push(merged);
        }
        self.stack = merged_stack;

        for (t1, t2) in self.locals.iter_mut().zip(&other.locals) {
            let merged = t1.merge(t2, hierarchy, object_fallback);
            if &merged != t1 {
                *t1 = merged;
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Entry form of the state: one entry per value, trailing `top` locals trimmed
    pub fn to_frame(&self) -> Frame<RefType<BinaryName>> {
        let mut locals: Vec<VType> = vec![];
        let mut slot = 0;
        while slot < self.locals.len() {
            let local = &self.locals[slot];
            slot += local.width();
            locals.push(local.clone());
        }
        while locals.last() == Some(&VerificationType::Top) {
            locals.pop();
        }

        Frame {
            locals: locals.into_iter().collect(),
            stack: self.stack.clone(),
        }
    }

    /// Update the state to reflect the effects of the given instruction
    pub fn execute(
        &mut self,
        insn: &Instruction,
        offset: Offset,
        context: &MethodContext,
    ) -> Result<(), VerifierErrorKind> {
        execute_instruction(self, insn, offset, context)
    }
}

fn execute_instruction(
    state: &mut AbstractState,
    insn: &Instruction,
    insn_offset: Offset,
    context: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let max_stack = context.method.max_stack;
    let AbstractState { stack, locals } = state;

    match insn {
        Nop => (),
        AConstNull => push(stack, Null, max_stack)?,
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            push(stack, Integer, max_stack)?
        }
        LConst0 | LConst1 => push(stack, Long, max_stack)?,
        FConst0 | FConst1 | FConst2 => push(stack, Float, max_stack)?,
        DConst0 | DConst1 => push(stack, Double, max_stack)?,
        BiPush(_) | SiPush(_) => push(stack, Integer, max_stack)?,
        Ldc(constant) | LdcW(constant) => {
            let typ = constant_type(constant);
            if typ.width() != 1 {
                return Err(VerifierErrorKind::InvalidWidth(2));
            }
            push(stack, typ, max_stack)?;
        }
        Ldc2W(constant) => {
            let typ = constant_type(constant);
            if typ.width() != 2 {
                return Err(VerifierErrorKind::InvalidWidth(1));
            }
            push(stack, typ, max_stack)?;
        }

        ILoad(idx) => load(stack, locals, *idx, Some(Integer), max_stack)?,
        LLoad(idx) => load(stack, locals, *idx, Some(Long), max_stack)?,
        FLoad(idx) => load(stack, locals, *idx, Some(Float), max_stack)?,
        DLoad(idx) => load(stack, locals, *idx, Some(Double), max_stack)?,
        ALoad(idx) => load(stack, locals, *idx, None, max_stack)?,

        IALoad => array_load(stack, BaseType::Int, Integer, max_stack)?,
        LALoad => array_load(stack, BaseType::Long, Long, max_stack)?,
        FALoad => array_load(stack, BaseType::Float, Float, max_stack)?,
        DALoad => array_load(stack, BaseType::Double, Double, max_stack)?,
        BALoad => array_load(stack, BaseType::Byte, Integer, max_stack)?,
        CALoad => array_load(stack, BaseType::Char, Integer, max_stack)?,
        SALoad => array_load(stack, BaseType::Short, Integer, max_stack)?,
        AALoad => {
            pop_expecting_type(stack, Integer)?;
            let element_type = match pop(stack)? {
                Null => Null,
                Object(array) => match array.component_type() {
                    Some(FieldType::Ref(component)) => Object(component),
                    _ => return Err(VerifierErrorKind::NotArrayType(Object(array))),
                },
                other => return Err(VerifierErrorKind::NotArrayType(other)),
            };
            push(stack, element_type, max_stack)?;
        }

        IStore(idx) => {
            pop_expecting_type(stack, Integer)?;
            store(locals, *idx, Integer)?;
        }
        LStore(idx) => {
            pop_expecting_type(stack, Long)?;
            store(locals, *idx, Long)?;
        }
        FStore(idx) => {
            pop_expecting_type(stack, Float)?;
            store(locals, *idx, Float)?;
        }
        DStore(idx) => {
            pop_expecting_type(stack, Double)?;
            store(locals, *idx, Double)?;
        }
        AStore(idx) => {
            let typ = pop_reference(stack)?;
            store(locals, *idx, typ)?;
        }

        IAStore => array_store(stack, BaseType::Int, Integer)?,
        LAStore => array_store(stack, BaseType::Long, Long)?,
        FAStore => array_store(stack, BaseType::Float, Float)?,
        DAStore => array_store(stack, BaseType::Double, Double)?,
        BAStore => array_store(stack, BaseType::Byte, Integer)?,
        CAStore => array_store(stack, BaseType::Char, Integer)?,
        SAStore => array_store(stack, BaseType::Short, Integer)?,
        AAStore => {
            pop_initialized_reference(stack)?;
            pop_expecting_type(stack, Integer)?;
            match pop(stack)? {
                Null => (),
                Object(array) if matches!(array.component_type(), Some(FieldType::Ref(_))) => (),
                other => return Err(VerifierErrorKind::NotArrayType(other)),
            }
        }

        Pop => {
            pop_expecting_width(stack, 1)?;
        }
        Pop2 => {
            let arg1 = pop(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    pop_expecting_width(stack, 1)?;
                }

                // Form 2
                2 => (),

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Dup => {
            let arg1 = pop_expecting_width(stack, 1)?;
            push_all(stack, [arg1.clone(), arg1], max_stack)?;
        }
        DupX1 => {
            let arg1 = pop_expecting_width(stack, 1)?;
            let arg2 = pop_expecting_width(stack, 1)?;
            push_all(stack, [arg1.clone(), arg2, arg1], max_stack)?;
        }
        DupX2 => {
            let arg1 = pop_expecting_width(stack, 1)?;
            let arg2 = pop(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_expecting_width(stack, 1)?;
                    push_all(stack, [arg1.clone(), arg3, arg2, arg1], max_stack)?;
                }

                // Form 2
                2 => push_all(stack, [arg1.clone(), arg2, arg1], max_stack)?,

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }
        Dup2 => {
            let arg1 = pop(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_expecting_width(stack, 1)?;
                    push_all(stack, [arg2.clone(), arg1.clone(), arg2, arg1], max_stack)?;
                }

                // Form 2
                2 => push_all(stack, [arg1.clone(), arg1], max_stack)?,

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }
        Dup2X1 => {
            let arg1 = pop(stack)?;
            let arg2 = pop_expecting_width(stack, 1)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg3 = pop_expecting_width(stack, 1)?;
                    push_all(
                        stack,
                        [arg2.clone(), arg1.clone(), arg3, arg2, arg1],
                        max_stack,
                    )?;
                }

                // Form 2
                2 => push_all(stack, [arg1.clone(), arg2, arg1], max_stack)?,

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }
        Dup2X2 => {
            let arg1 = pop(stack)?;
            match arg1.width() {
                1 => {
                    let arg2 = pop_expecting_width(stack, 1)?;
                    let arg3 = pop(stack)?;
                    match arg3.width() {
                        // Form 1
                        1 => {
                            let arg4 = pop_expecting_width(stack, 1)?;
                            push_all(
                                stack,
                                [arg2.clone(), arg1.clone(), arg4, arg3, arg2, arg1],
                                max_stack,
                            )?;
                        }

                        // Form 3
                        2 => push_all(
                            stack,
                            [arg2.clone(), arg1.clone(), arg3, arg2, arg1],
                            max_stack,
                        )?,

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                2 => {
                    let arg2 = pop(stack)?;
                    match arg2.width() {
                        // Form 2
                        1 => {
                            let arg3 = pop_expecting_width(stack, 1)?;
                            push_all(stack, [arg1.clone(), arg3, arg2, arg1], max_stack)?;
                        }

                        // Form 4
                        2 => push_all(stack, [arg1.clone(), arg2, arg1], max_stack)?,

                        other => return Err(VerifierErrorKind::InvalidWidth(other)),
                    }
                }

                other => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }
        Swap => {
            let arg1 = pop_expecting_width(stack, 1)?;
            let arg2 = pop_expecting_width(stack, 1)?;
            push_all(stack, [arg1, arg2], max_stack)?;
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            binary_op(stack, Integer, Integer, Integer)?
        }
        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
            binary_op(stack, Long, Long, Long)?
        }
        FAdd | FSub | FDiv | FMul | FRem => binary_op(stack, Float, Float, Float)?,
        DAdd | DSub | DDiv | DMul | DRem => binary_op(stack, Double, Double, Double)?,
        LSh(_) => binary_op(stack, Long, Integer, Long)?,
        LCmp => binary_op(stack, Long, Long, Integer)?,
        FCmp(_) => binary_op(stack, Float, Float, Integer)?,
        DCmp(_) => binary_op(stack, Double, Double, Integer)?,

        INeg | I2B | I2C | I2S => unary_op(stack, Integer, Integer, max_stack)?,
        LNeg => unary_op(stack, Long, Long, max_stack)?,
        FNeg => unary_op(stack, Float, Float, max_stack)?,
        DNeg => unary_op(stack, Double, Double, max_stack)?,
        I2L => unary_op(stack, Integer, Long, max_stack)?,
        I2F => unary_op(stack, Integer, Float, max_stack)?,
        I2D => unary_op(stack, Integer, Double, max_stack)?,
        L2I => unary_op(stack, Long, Integer, max_stack)?,
        L2F => unary_op(stack, Long, Float, max_stack)?,
        L2D => unary_op(stack, Long, Double, max_stack)?,
        F2I => unary_op(stack, Float, Integer, max_stack)?,
        F2L => unary_op(stack, Float, Long, max_stack)?,
        F2D => unary_op(stack, Float, Double, max_stack)?,
        D2I => unary_op(stack, Double, Integer, max_stack)?,
        D2L => unary_op(stack, Double, Long, max_stack)?,
        D2F => unary_op(stack, Double, Float, max_stack)?,

        IInc(idx, _) => {
            get_local_expecting_type(locals, *idx, Integer)?;
        }

        GetStatic(field) => {
            push(stack, VType::from(field.descriptor.clone()), max_stack)?;
        }
        PutStatic(field) => {
            pop_assignable(stack, &VType::from(field.descriptor.clone()))?;
        }
        GetField(field) => {
            pop_initialized_reference(stack)?;
            push(stack, VType::from(field.descriptor.clone()), max_stack)?;
        }
        PutField(field) => {
            pop_assignable(stack, &VType::from(field.descriptor.clone()))?;

            // Fields of `this` may be set before the superclass constructor is called
            pop_reference(stack)?;
        }

        Invoke(invoke_type, method) => {
            let desc = &method.descriptor;
            for parameter in desc.parameters.iter().rev() {
                pop_assignable(stack, &VType::from(parameter.clone()))?;
            }

            let is_init = method.name == UnqualifiedName::INIT;
            match invoke_type {
                InvokeType::Special if is_init => {
                    let receiver = pop(stack)?;
                    let initialized = match &receiver {
                        UninitializedThis => {
                            Object(RefType::Object(context.method.class.clone()))
                        }
                        Uninitialized(offset) => match context.new_site(*offset) {
                            Some(class) => Object(RefType::Object(class.clone())),
                            None => return Err(VerifierErrorKind::MissingNew(*offset)),
                        },
                        other => return Err(VerifierErrorKind::NotUninitialized(other.clone())),
                    };
                    replace_all(stack, locals, &receiver, initialized);
                }
                InvokeType::Static => (),
                InvokeType::Virtual | InvokeType::Special | InvokeType::Interface => {
                    pop_initialized_reference(stack)?;
                }
            }

            if let Some(return_type) = &desc.return_type {
                push(stack, VType::from(return_type.clone()), max_stack)?;
            }
        }
        InvokeDynamic(indy) => {
            for parameter in indy.descriptor.parameters.iter().rev() {
                pop_assignable(stack, &VType::from(parameter.clone()))?;
            }
            if let Some(return_type) = &indy.descriptor.return_type {
                push(stack, VType::from(return_type.clone()), max_stack)?;
            }
        }

        New(_) => {
            push(stack, Uninitialized(insn_offset.0 as u16), max_stack)?;
        }
        NewArray(base_type) => {
            pop_expecting_type(stack, Integer)?;
            let array_type = RefType::array(FieldType::Base(*base_type));
            push(stack, Object(array_type), max_stack)?;
        }
        ANewArray(ref_type) => {
            pop_expecting_type(stack, Integer)?;
            let array_type = RefType::array(FieldType::Ref(ref_type.clone()));
            push(stack, Object(array_type), max_stack)?;
        }
        MultiANewArray(ref_type, dimensions) => {
            for _ in 0..*dimensions {
                pop_expecting_type(stack, Integer)?;
            }
            if ref_type.dimensions() < *dimensions as usize || *dimensions == 0 {
                return Err(VerifierErrorKind::NotArrayType(Object(ref_type.clone())));
            }
            push(stack, Object(ref_type.clone()), max_stack)?;
        }
        ArrayLength => {
            match pop(stack)? {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                other => return Err(VerifierErrorKind::NotArrayType(other)),
            }
            push(stack, Integer, max_stack)?;
        }
        CheckCast(ref_type) => {
            pop_initialized_reference(stack)?;
            push(stack, Object(ref_type.clone()), max_stack)?;
        }
        InstanceOf(_) => {
            pop_initialized_reference(stack)?;
            push(stack, Integer, max_stack)?;
        }
        MonitorEnter | MonitorExit => {
            pop_initialized_reference(stack)?;
        }

        Branch(branch) => execute_branch(stack, locals, branch, context)?,
    }

    Ok(())
}

fn execute_branch(
    stack: &mut OffsetVec<VType>,
    locals: &[VType],
    insn: &BranchInstruction,
    context: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use BranchInstruction::*;
    use VerificationType::*;

    let return_type = &context.method.descriptor.return_type;
    match insn {
        If(_, _) => pop_expecting_type(stack, Integer)?,
        IfICmp(_, _) => {
            pop_expecting_type(stack, Integer)?;
            pop_expecting_type(stack, Integer)?;
        }
        IfACmp(_, _) => {
            pop_reference(stack)?;
            pop_reference(stack)?;
        }
        IfNull(_, _) => {
            pop_reference(stack)?;
        }
        Goto(_) | GotoW(_) => (),
        TableSwitch { .. } | LookupSwitch { .. } => pop_expecting_type(stack, Integer)?,
        IReturn | LReturn | FReturn | DReturn | AReturn => {
            let expected = match return_type {
                Some(typ) => VType::from(typ.clone()),
                None => return Err(VerifierErrorKind::ReturnMismatch),
            };
            let matches_opcode = match insn {
                IReturn => expected == Integer,
                LReturn => expected == Long,
                FReturn => expected == Float,
                DReturn => expected == Double,
                _ => expected.is_reference(),
            };
            if !matches_opcode {
                return Err(VerifierErrorKind::ReturnMismatch);
            }
            pop_assignable(stack, &expected)?;
        }
        Return => {
            if return_type.is_some() {
                return Err(VerifierErrorKind::ReturnMismatch);
            }
            if context.method.is_constructor() && locals.contains(&UninitializedThis) {
                return Err(VerifierErrorKind::UninitializedThisOnReturn);
            }
        }
        AThrow => {
            pop_initialized_reference(stack)?;
        }
    }

    Ok(())
}

/// Type pushed by an `ldc`
fn constant_type(constant: &ConstantData) -> VType {
    match constant {
        ConstantData::Integer(_) => VerificationType::Integer,
        ConstantData::Float(_) => VerificationType::Float,
        ConstantData::Long(_) => VerificationType::Long,
        ConstantData::Double(_) => VerificationType::Double,
        ConstantData::String(_) => VerificationType::Object(RefType::STRING),
        ConstantData::Class(_) => VerificationType::Object(RefType::CLASS),
        ConstantData::MethodType(_) => {
            VerificationType::Object(RefType::Object(BinaryName::METHODTYPE))
        }
        ConstantData::MethodHandle => {
            VerificationType::Object(RefType::Object(BinaryName::METHODHANDLE))
        }
        ConstantData::Dynamic(field_type) => VType::from(field_type.clone()),
    }
}

/// Replace every copy of an uninitialized value once its `<init>` has been called
fn replace_all(
    stack: &mut OffsetVec<VType>,
    locals: &mut [VType],
    uninitialized: &VType,
    initialized: VType,
) {
    stack.map_in_place(|typ| {
        if typ == uninitialized {
            Some(initialized.clone())
        } else {
            None
        }
    });
    for local in locals.iter_mut() {
        if local == uninitialized {
            *local = initialized.clone();
        }
    }
}

fn push(
    stack: &mut OffsetVec<VType>,
    typ: VType,
    max_stack: u16,
) -> Result<(), VerifierErrorKind> {
    stack.push(typ);
    if stack.offset_len().0 > max_stack as usize {
        Err(VerifierErrorKind::StackOverflow(max_stack))
    } else {
        Ok(())
    }
}

fn push_all<const N: usize>(
    stack: &mut OffsetVec<VType>,
    types: [VType; N],
    max_stack: u16,
) -> Result<(), VerifierErrorKind> {
    for typ in types {
        push(stack, typ, max_stack)?;
    }
    Ok(())
}

fn pop(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let typ = pop(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_expecting_type(
    stack: &mut OffsetVec<VType>,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType {
            expected: type_name(&expected_type),
            found: typ,
        })
    }
}

/// Pop any reference, including uninitialized ones
fn pop_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    let typ = pop(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidType {
            expected: "reference",
            found: typ,
        })
    }
}

fn pop_initialized_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    let typ = pop_reference(stack)?;
    if typ.is_uninitialized() {
        Err(VerifierErrorKind::InvalidType {
            expected: "initialized reference",
            found: typ,
        })
    } else {
        Ok(typ)
    }
}

/// Pop a value that could be passed where the expected type is wanted
///
/// Class assignability isn't checked, since only the types flowing through the method are
/// tracked (and not the hierarchy they belong to).
fn pop_assignable(stack: &mut OffsetVec<VType>, expected: &VType) -> Result<(), VerifierErrorKind> {
    if expected.is_reference() {
        pop_initialized_reference(stack).map(|_| ())
    } else {
        pop_expecting_type(stack, expected.clone())
    }
}

fn unary_op(
    stack: &mut OffsetVec<VType>,
    argument: VType,
    result: VType,
    max_stack: u16,
) -> Result<(), VerifierErrorKind> {
    pop_expecting_type(stack, argument)?;
    push(stack, result, max_stack)
}

/// Binary operation, where `lhs` is deeper in the stack than `rhs`
///
/// The result never takes more space than the arguments, so there is no need to check the max.
fn binary_op(
    stack: &mut OffsetVec<VType>,
    lhs: VType,
    rhs: VType,
    result: VType,
) -> Result<(), VerifierErrorKind> {
    pop_expecting_type(stack, rhs)?;
    pop_expecting_type(stack, lhs)?;
    stack.push(result);
    Ok(())
}

fn array_load(
    stack: &mut OffsetVec<VType>,
    element_type: BaseType,
    result: VType,
    max_stack: u16,
) -> Result<(), VerifierErrorKind> {
    pop_expecting_type(stack, VerificationType::Integer)?;
    pop_primitive_array(stack, element_type)?;
    push(stack, result, max_stack)
}

fn array_store(
    stack: &mut OffsetVec<VType>,
    element_type: BaseType,
    value: VType,
) -> Result<(), VerifierErrorKind> {
    pop_expecting_type(stack, value)?;
    pop_expecting_type(stack, VerificationType::Integer)?;
    pop_primitive_array(stack, element_type)
}

/// Pop an array of the given primitive element type (`baload`/`bastore` also accept `boolean[]`)
fn pop_primitive_array(
    stack: &mut OffsetVec<VType>,
    element_type: BaseType,
) -> Result<(), VerifierErrorKind> {
    match pop(stack)? {
        VerificationType::Null => Ok(()),
        VerificationType::Object(RefType::PrimitiveArray(arr))
            if arr.additional_dimensions == 0
                && (arr.element_type == element_type
                    || (element_type == BaseType::Byte
                        && arr.element_type == BaseType::Boolean)) =>
        {
            Ok(())
        }
        other => Err(VerifierErrorKind::NotArrayType(other)),
    }
}

fn type_name(typ: &VType) -> &'static str {
    match typ {
        VerificationType::Top => "top",
        VerificationType::Integer => "int",
        VerificationType::Float => "float",
        VerificationType::Long => "long",
        VerificationType::Double => "double",
        VerificationType::Null => "null",
        VerificationType::UninitializedThis => "uninitializedThis",
        VerificationType::Object(_) => "object",
        VerificationType::Uninitialized(_) => "uninitialized",
    }
}

fn get_local(locals: &[VType], idx: u16) -> Result<&VType, VerifierErrorKind> {
    match locals.get(idx as usize) {
        None => Err(VerifierErrorKind::InvalidIndex(idx as usize)),
        Some(VerificationType::Top) => Err(VerifierErrorKind::UnsetLocal(idx as usize)),
        Some(typ) => Ok(typ),
    }
}

fn get_local_expecting_type(
    locals: &[VType],
    idx: u16,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    let typ = get_local(locals, idx)?;
    if typ == &expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType {
            expected: type_name(&expected_type),
            found: typ.clone(),
        })
    }
}

/// Push a local onto the stack, checking its type (or that it is a reference if `None`)
fn load(
    stack: &mut OffsetVec<VType>,
    locals: &[VType],
    idx: u16,
    expected_type: Option<VType>,
    max_stack: u16,
) -> Result<(), VerifierErrorKind> {
    let typ = match expected_type {
        Some(expected_type) => {
            get_local_expecting_type(locals, idx, expected_type.clone())?;
            expected_type
        }
        None => {
            let typ = get_local(locals, idx)?;
            if !typ.is_reference() {
                return Err(VerifierErrorKind::InvalidType {
                    expected: "reference",
                    found: typ.clone(),
                });
            }
            typ.clone()
        }
    };
    push(stack, typ, max_stack)
}

/// Store into a local, killing any two-slot value that gets partially overwritten
fn store(locals: &mut [VType], idx: u16, typ: VType) -> Result<(), VerifierErrorKind> {
    let idx = idx as usize;
    let width = typ.width();
    if idx + width > locals.len() {
        return Err(VerifierErrorKind::InvalidIndex(idx));
    }

    // Overwriting the second half of a `long`/`double`
    if idx > 0 && locals[idx - 1].width() == 2 {
        locals[idx - 1] = VerificationType::Top;
    }

    // Overwriting the first half of a `long`/`double` is fine: the second half is already `top`
    locals[idx] = typ;
    if width == 2 {
        locals[idx + 1] = VerificationType::Top;
    }
    Ok(())
}
