use super::{compute_frames, reduce, AbstractState, Frame, MethodContext, NoHierarchy, TypeHierarchy};
use crate::jvm::class_file::{
    write_stack_map_table, Attribute, AttributeSink, ConstantsPool, FrameSink, StackMapFrame,
    StackMapTable,
};
use crate::jvm::code::ControlFlowGraph;
use crate::jvm::{BinaryName, Error, Method, Name, RefType, Settings};
use crate::util::Offset;

/// Computes the stack map table of methods
///
/// The generator holds the method-independent inputs (what is known about the class hierarchy
/// and the analysis settings) so that it can be reused across all of the methods in a class.
pub struct StackMapGenerator<'a> {
    hierarchy: &'a dyn TypeHierarchy,
    settings: Settings,
}

impl<'a> StackMapGenerator<'a> {
    pub fn new(hierarchy: &'a dyn TypeHierarchy, settings: Settings) -> StackMapGenerator<'a> {
        StackMapGenerator {
            hierarchy,
            settings,
        }
    }

    /// Implicit entry frame of the method along with the full frame at every merge point
    pub fn frames(
        &self,
        method: &Method,
    ) -> Result<(Frame<RefType<BinaryName>>, Vec<(Offset, Frame<RefType<BinaryName>>)>), Error>
    {
        let cfg = ControlFlowGraph::build(&method.instructions, &method.exception_table)?;
        let entry = AbstractState::entry(method)?;
        let context = MethodContext::new(method, &cfg, self.hierarchy, &self.settings);

        let states = compute_frames(&cfg, entry.clone(), &context)?;
        let frames = states
            .iter()
            .map(|(offset, state)| (*offset, state.to_frame()))
            .collect();
        Ok((entry.to_frame(), frames))
    }

    /// Compressed stack map frames for a method, ready to be written out
    pub fn stack_map_frames(
        &self,
        method: &Method,
    ) -> Result<Vec<StackMapFrame<RefType<BinaryName>>>, Error> {
        let (entry, frames) = self.frames(method)?;
        let stack_map_frames = reduce(&entry, &frames)?;
        log::debug!(
            "Computed {} stack map frames for {}.{}",
            stack_map_frames.len(),
            method.class.as_str(),
            method.name.as_str()
        );
        Ok(stack_map_frames)
    }

    /// Compute the frames of a method and send them to a sink
    pub fn write<S: FrameSink>(&self, method: &Method, sink: &mut S) -> Result<(), Error> {
        let frames = self.stack_map_frames(method)?;
        write_stack_map_table(&frames, sink)
    }

    /// Body of the `StackMapTable` attribute for a method
    ///
    /// Classes mentioned in frames are added to the constant pool.
    pub fn attribute_body(&self, method: &Method, constants: &mut ConstantsPool) -> Result<Vec<u8>, Error> {
        let mut sink = AttributeSink::new(constants);
        self.write(method, &mut sink)?;
        Ok(sink.into_bytes())
    }

    /// `StackMapTable` attribute for a method, or `None` if the method has no merge points
    ///
    /// Methods with straight-line code don't need the attribute at all.
    pub fn attribute(
        &self,
        method: &Method,
        constants: &mut ConstantsPool,
    ) -> Result<Option<Attribute>, Error> {
        let frames = self.stack_map_frames(method)?;
        if frames.is_empty() {
            return Ok(None);
        }

        let frames = frames
            .iter()
            .map(|frame| frame.map(|class| constants.get_class(class)))
            .collect::<Result<Vec<_>, _>>()?;
        let attribute = constants.get_attribute(StackMapTable(frames))?;
        Ok(Some(attribute))
    }
}

impl Default for StackMapGenerator<'static> {
    fn default() -> StackMapGenerator<'static> {
        StackMapGenerator::new(&NoHierarchy, Settings::new())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{FrameKind, Serialize};
    use crate::jvm::code::{BranchInstruction, Instruction, OrdComparison};
    use crate::jvm::verifier::{VType, VerificationType};
    use crate::jvm::{MethodAccessFlags, UnqualifiedName};

    fn method(descriptor: &str, flags: MethodAccessFlags, code: Vec<Instruction>) -> Method {
        let mut method = Method::new(
            BinaryName::from_str("Foo").unwrap(),
            UnqualifiedName::from_str("f").unwrap(),
            descriptor,
            flags,
        )
        .unwrap();
        method.instructions = code;
        method
    }

    /// Sink that records what it is sent
    #[derive(Default)]
    struct RecordingSink {
        count: Option<u16>,
        frames: Vec<(FrameKind, u16, Vec<VType>, Vec<VType>)>,
    }

    impl FrameSink for RecordingSink {
        fn emit_frame_count(&mut self, count: u16) -> Result<(), Error> {
            self.count = Some(count);
            Ok(())
        }

        fn emit_frame(
            &mut self,
            kind: FrameKind,
            offset_delta: u16,
            locals: &[VType],
            stack: &[VType],
        ) -> Result<(), Error> {
            self.frames
                .push((kind, offset_delta, locals.to_vec(), stack.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn straight_line_code() {
        // 0: iload_0
        // 1: ireturn
        let mut method = method(
            "(I)I",
            MethodAccessFlags::STATIC,
            vec![
                Instruction::ILoad(0),
                Instruction::Branch(BranchInstruction::IReturn),
            ],
        );
        method.max_stack = 1;

        let generator = StackMapGenerator::default();
        let mut constants = ConstantsPool::new();
        assert!(generator
            .attribute(&method, &mut constants)
            .unwrap()
            .is_none());
        assert_eq!(
            generator.attribute_body(&method, &mut constants).unwrap(),
            vec![0, 0]
        );
        assert!(constants.is_empty());
    }

    #[test]
    fn conditional_null() {
        // 0: iload_1
        // 1: ifeq 8
        // 4: aload_0
        // 5: goto 9
        // 8: aconst_null
        // 9: areturn
        let mut method = method(
            "(I)Ljava/lang/Object;",
            MethodAccessFlags::empty(),
            vec![
                Instruction::ILoad(1),
                Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Offset(8))),
                Instruction::ALoad(0),
                Instruction::Branch(BranchInstruction::Goto(Offset(9))),
                Instruction::AConstNull,
                Instruction::Branch(BranchInstruction::AReturn),
            ],
        );
        method.max_stack = 1;

        let generator = StackMapGenerator::default();
        let mut sink = RecordingSink::default();
        generator.write(&method, &mut sink).unwrap();

        let foo = VerificationType::Object(RefType::Object(BinaryName::from_str("Foo").unwrap()));
        assert_eq!(sink.count, Some(2));
        assert_eq!(
            sink.frames,
            vec![
                (FrameKind::Same, 8, vec![], vec![]),
                (FrameKind::SameLocals1StackItem, 0, vec![], vec![foo]),
            ]
        );

        let mut constants = ConstantsPool::new();
        let attribute = generator
            .attribute(&method, &mut constants)
            .unwrap()
            .unwrap();
        assert_eq!(constants.utf8(attribute.name_index), Some("StackMapTable"));
        let table = StackMapTable::parse(&attribute.info).unwrap();
        assert_eq!(table.0.len(), 2);

        // name index, `u4` length, then the body
        let mut bytes = vec![];
        attribute.serialize(&mut bytes).unwrap();
        assert_eq!(&bytes[..6], &[0, 3, 0, 0, 0, attribute.info.len() as u8]);
        assert_eq!(&bytes[6..], &attribute.info[..]);
    }

    #[test]
    fn errors_leave_no_output() {
        // 0: iconst_0
        // 1: goto 0
        let mut method = method(
            "()V",
            MethodAccessFlags::STATIC,
            vec![
                Instruction::IConst0,
                Instruction::Branch(BranchInstruction::Goto(Offset(0))),
            ],
        );
        method.max_stack = 1;

        let generator = StackMapGenerator::default();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            generator.write(&method, &mut sink),
            Err(Error::UnverifiableCode { .. })
        ));
        assert_eq!(sink.count, None);
        assert!(sink.frames.is_empty());
    }
}
