//! Symbolic JVM instructions
//!
//! The representation is close to the bytecode, but with the constant pool already resolved:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify (the width of a load is computed from its index)
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches.
//!
//!   - `jsr` and `ret` are omitted. Class files that carry a `StackMapTable` can't contain them.

use crate::jvm::{BaseType, BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::util::Offset;

/// JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantData),   // constant index fits in one byte
    LdcW(ConstantData),  // constant index needs two bytes
    Ldc2W(ConstantData), // `long` or `double` constant
    ILoad(u16),          // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
    InvokeDynamic(IndyRef),
    New(BinaryName),
    NewArray(BaseType),
    ANewArray(RefType<BinaryName>),
    ArrayLength,
    CheckCast(RefType<BinaryName>),
    InstanceOf(RefType<BinaryName>),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(RefType<BinaryName>, u8),

    /// Instructions that may transfer control somewhere other than the next instruction
    Branch(BranchInstruction),
}

impl Instruction {
    /// Number of bytes this instruction takes when placed at the given offset
    ///
    /// Everything except the switches has a width independent of the offset. Loads, stores, and
    /// `iinc` use the shortest encoding that fits their operands.
    pub fn width_at(&self, offset: Offset) -> usize {
        match self {
            Instruction::Nop
            | Instruction::AConstNull
            | Instruction::IConstM1
            | Instruction::IConst0
            | Instruction::IConst1
            | Instruction::IConst2
            | Instruction::IConst3
            | Instruction::IConst4
            | Instruction::IConst5
            | Instruction::LConst0
            | Instruction::LConst1
            | Instruction::FConst0
            | Instruction::FConst1
            | Instruction::FConst2
            | Instruction::DConst0
            | Instruction::DConst1
            | Instruction::ILoad(0..=3)
            | Instruction::LLoad(0..=3)
            | Instruction::FLoad(0..=3)
            | Instruction::DLoad(0..=3)
            | Instruction::ALoad(0..=3)
            | Instruction::IALoad
            | Instruction::LALoad
            | Instruction::FALoad
            | Instruction::DALoad
            | Instruction::AALoad
            | Instruction::BALoad
            | Instruction::CALoad
            | Instruction::SALoad
            | Instruction::IStore(0..=3)
            | Instruction::LStore(0..=3)
            | Instruction::FStore(0..=3)
            | Instruction::DStore(0..=3)
            | Instruction::AStore(0..=3)
            | Instruction::IAStore
            | Instruction::LAStore
            | Instruction::FAStore
            | Instruction::DAStore
            | Instruction::AAStore
            | Instruction::BAStore
            | Instruction::CAStore
            | Instruction::SAStore
            | Instruction::Pop
            | Instruction::Pop2
            | Instruction::Dup
            | Instruction::DupX1
            | Instruction::DupX2
            | Instruction::Dup2
            | Instruction::Dup2X1
            | Instruction::Dup2X2
            | Instruction::Swap
            | Instruction::IAdd
            | Instruction::LAdd
            | Instruction::FAdd
            | Instruction::DAdd
            | Instruction::ISub
            | Instruction::LSub
            | Instruction::FSub
            | Instruction::DSub
            | Instruction::IMul
            | Instruction::LMul
            | Instruction::FMul
            | Instruction::DMul
            | Instruction::IDiv
            | Instruction::LDiv
            | Instruction::FDiv
            | Instruction::DDiv
            | Instruction::IRem
            | Instruction::LRem
            | Instruction::FRem
            | Instruction::DRem
            | Instruction::INeg
            | Instruction::LNeg
            | Instruction::FNeg
            | Instruction::DNeg
            | Instruction::ISh(_)
            | Instruction::LSh(_)
            | Instruction::IAnd
            | Instruction::LAnd
            | Instruction::IOr
            | Instruction::LOr
            | Instruction::IXor
            | Instruction::LXor
            | Instruction::I2L
            | Instruction::I2F
            | Instruction::I2D
            | Instruction::L2I
            | Instruction::L2F
            | Instruction::L2D
            | Instruction::F2I
            | Instruction::F2L
            | Instruction::F2D
            | Instruction::D2I
            | Instruction::D2L
            | Instruction::D2F
            | Instruction::I2B
            | Instruction::I2C
            | Instruction::I2S
            | Instruction::LCmp
            | Instruction::FCmp(_)
            | Instruction::DCmp(_)
            | Instruction::ArrayLength
            | Instruction::MonitorEnter
            | Instruction::MonitorExit => 1,

            Instruction::BiPush(_)
            | Instruction::Ldc(_)
            | Instruction::ILoad(4..=255)
            | Instruction::LLoad(4..=255)
            | Instruction::FLoad(4..=255)
            | Instruction::DLoad(4..=255)
            | Instruction::ALoad(4..=255)
            | Instruction::IStore(4..=255)
            | Instruction::LStore(4..=255)
            | Instruction::FStore(4..=255)
            | Instruction::DStore(4..=255)
            | Instruction::AStore(4..=255)
            | Instruction::NewArray(_) => 2,

            Instruction::SiPush(_)
            | Instruction::LdcW(_)
            | Instruction::Ldc2W(_) // always wide, unlike `ldc` vs. `ldc_w`
            | Instruction::IInc(0..=255, -128..=127)
            | Instruction::GetStatic(_)
            | Instruction::PutStatic(_)
            | Instruction::GetField(_)
            | Instruction::PutField(_)
            | Instruction::Invoke(InvokeType::Special, _)
            | Instruction::Invoke(InvokeType::Static, _)
            | Instruction::Invoke(InvokeType::Virtual, _)
            | Instruction::New(_)
            | Instruction::ANewArray(_)
            | Instruction::CheckCast(_)
            | Instruction::InstanceOf(_) => 3,

            Instruction::ILoad(_)
            | Instruction::LLoad(_)
            | Instruction::FLoad(_)
            | Instruction::DLoad(_)
            | Instruction::ALoad(_)
            | Instruction::IStore(_)
            | Instruction::LStore(_)
            | Instruction::FStore(_)
            | Instruction::DStore(_)
            | Instruction::AStore(_)
            | Instruction::MultiANewArray(_, _) => 4,

            Instruction::Invoke(InvokeType::Interface, _) | Instruction::InvokeDynamic(_) => 5,

            Instruction::IInc(_, _) => 6,

            Instruction::Branch(branch) => branch.width_at(offset),
        }
    }

    /// If this is a branch instruction, get it
    pub fn branch(&self) -> Option<&BranchInstruction> {
        match self {
            Instruction::Branch(branch) => Some(branch),
            _ => None,
        }
    }

    /// Can execution continue on to the next instruction?
    pub fn falls_through(&self) -> bool {
        self.branch().map_or(true, BranchInstruction::falls_through)
    }

    /// Offsets this instruction can jump to (not counting falling through)
    pub fn jump_targets(&self) -> Vec<Offset> {
        self.branch()
            .map_or(vec![], |branch| branch.jump_targets().targets().to_vec())
    }
}

/// Branching instructions, with jump targets as absolute offsets into the code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction {
    If(OrdComparison, Offset), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Offset), // covers `if_icmpeq`, `if_icmpne`, ... `if_icmple`
    IfACmp(EqComparison, Offset), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Offset), // covers `ifnull`, `ifnonnull`
    Goto(Offset),
    GotoW(Offset),
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len() - 1`
        default: Offset,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<Offset>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Offset,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Offset)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl BranchInstruction {
    /// Can execution continue on to the next instruction?
    pub fn falls_through(&self) -> bool {
        match self {
            BranchInstruction::Goto(_)
            | BranchInstruction::GotoW(_)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => false,

            BranchInstruction::If(_, _)
            | BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::IfNull(_, _) => true,
        }
    }

    /// Non-fallthrough jump targets
    pub fn jump_targets(&self) -> JumpTargets<'_> {
        match self {
            BranchInstruction::If(_, target)
            | BranchInstruction::IfICmp(_, target)
            | BranchInstruction::IfACmp(_, target)
            | BranchInstruction::IfNull(_, target)
            | BranchInstruction::Goto(target) => JumpTargets::Regular(target),
            BranchInstruction::GotoW(target) => JumpTargets::Wide(target),
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                JumpTargets::WideMany(ts)
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                JumpTargets::WideMany(ts)
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => JumpTargets::None,
        }
    }

    /// Number of bytes this instruction takes when placed at the given offset
    pub fn width_at(&self, offset: Offset) -> usize {
        match self {
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => 1,

            BranchInstruction::Goto(_)
            | BranchInstruction::If(_, _)
            | BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::IfNull(_, _) => 3,

            BranchInstruction::GotoW(_) => 5,

            BranchInstruction::TableSwitch { targets, .. } => {
                1 + switch_padding(offset) + 4 * (3 + targets.len())
            }

            BranchInstruction::LookupSwitch { targets, .. } => {
                1 + switch_padding(offset) + 8 * (1 + targets.len())
            }
        }
    }
}

/// `default` of a switch must be at a multiple of four bytes from the start of the method, so
/// there is a 0-3 inclusive byte padding after the opcode
pub fn switch_padding(offset: Offset) -> usize {
    match (offset.0 + 1) % 4 {
        0 => 0,
        x => 4 - x,
    }
}

/// Non-fallthrough jump targets of a `BranchInstruction`
pub enum JumpTargets<'a> {
    None,
    Regular(&'a Offset),
    Wide(&'a Offset),
    WideMany(Vec<Offset>),
}

impl<'a> JumpTargets<'a> {
    pub fn targets(&self) -> &[Offset] {
        match self {
            JumpTargets::None => &[],
            JumpTargets::Regular(a) => std::slice::from_ref(*a),
            JumpTargets::Wide(a) => std::slice::from_ref(*a),
            JumpTargets::WideMany(a_many) => a_many,
        }
    }

    /// Do these targets have to fit in a signed 16-bit jump offset?
    pub fn is_short(&self) -> bool {
        matches!(self, JumpTargets::Regular(_))
    }
}

/// Field referenced by a `getfield`/`putfield`/`getstatic`/`putstatic`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

/// Method referenced by an `invoke*` instruction
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Class (or array type, for `clone` on arrays) declaring the method
    pub class: RefType<BinaryName>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

/// Call site of an `invokedynamic`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndyRef {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
}

/// Loadable constants, as far as their type is concerned
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
    MethodType(MethodDescriptor<BinaryName>),
    MethodHandle,

    /// Dynamically-computed constant (`CONSTANT_Dynamic`) of the given type
    Dynamic(FieldType<BinaryName>),
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because it has no receiver or declaring class.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_widths() {
        assert_eq!(Instruction::ALoad(0).width_at(Offset(0)), 1);
        assert_eq!(Instruction::ALoad(4).width_at(Offset(0)), 2);
        assert_eq!(Instruction::ALoad(256).width_at(Offset(0)), 4);
        assert_eq!(Instruction::IInc(1, 1).width_at(Offset(0)), 3);
        assert_eq!(Instruction::IInc(1, 1000).width_at(Offset(0)), 6);
    }

    #[test]
    fn switch_padding_depends_on_offset() {
        let switch = Instruction::Branch(BranchInstruction::LookupSwitch {
            default: Offset(32),
            targets: vec![(1, Offset(24))],
        });
        assert_eq!(switch.width_at(Offset(5)), 19);
        assert_eq!(switch.width_at(Offset(3)), 17);
        assert_eq!(switch.width_at(Offset(4)), 20);

        let table = Instruction::Branch(BranchInstruction::TableSwitch {
            default: Offset(0),
            low: 0,
            targets: vec![Offset(0), Offset(0)],
        });
        assert_eq!(table.width_at(Offset(0)), 1 + 3 + 4 * 5);
    }

    #[test]
    fn jump_targets() {
        let goto = Instruction::Branch(BranchInstruction::Goto(Offset(7)));
        assert_eq!(goto.jump_targets(), vec![Offset(7)]);
        assert!(!goto.falls_through());

        let cond = Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Offset(9)));
        assert_eq!(cond.jump_targets(), vec![Offset(9)]);
        assert!(cond.falls_through());

        assert!(Instruction::Nop.jump_targets().is_empty());
        assert!(Instruction::Nop.falls_through());
    }
}
