use super::{AbstractState, MethodContext};
use crate::jvm::code::ControlFlowGraph;
use crate::jvm::{Error, MalformedKind};
use crate::util::Offset;
use std::collections::{BTreeMap, VecDeque};

/// Compute the state at the start of every merge point of a method
///
/// This is a forward dataflow fixpoint over basic blocks, using a worklist of blocks whose entry
/// state changed. Exception handlers are fed a state before every instruction covered by their
/// range, so that the handler's locals upper-bound the locals anywhere in the protected code.
pub fn compute_frames(
    cfg: &ControlFlowGraph,
    entry: AbstractState,
    context: &MethodContext,
) -> Result<BTreeMap<Offset, AbstractState>, Error> {
    let mut solver = Solver::new(cfg, context);
    solver.in_states[0] = Some(entry);
    solver.enqueue(0);
    solver.run()?;

    let mut frames = BTreeMap::new();
    for (block, state) in cfg.blocks.iter().zip(solver.in_states) {
        if !block.is_merge_point {
            continue;
        }
        match state {
            Some(state) => {
                frames.insert(block.start_offset, state);
            }
            None => {
                return Err(Error::MalformedBytecode {
                    offset: block.start_offset,
                    kind: MalformedKind::UnreachableCode,
                })
            }
        }
    }
    Ok(frames)
}

struct Solver<'a, 'c> {
    cfg: &'a ControlFlowGraph,
    context: &'a MethodContext<'c>,

    /// State on entry to each block (`None` until the block is first reached)
    in_states: Vec<Option<AbstractState>>,

    /// Blocks whose entry state changed since they were last visited
    worklist: VecDeque<usize>,
    in_worklist: Vec<bool>,

    /// Number of times each block has been visited
    visits: Vec<usize>,
    total_visits: usize,
}

impl<'a, 'c> Solver<'a, 'c> {
    fn new(cfg: &'a ControlFlowGraph, context: &'a MethodContext<'c>) -> Solver<'a, 'c> {
        let block_count = cfg.blocks.len();
        Solver {
            cfg,
            context,
            in_states: vec![None; block_count],
            worklist: VecDeque::new(),
            in_worklist: vec![false; block_count],
            visits: vec![0; block_count],
            total_visits: 0,
        }
    }

    fn enqueue(&mut self, block_idx: usize) {
        if !self.in_worklist[block_idx] {
            self.in_worklist[block_idx] = true;
            self.worklist.push_back(block_idx);
        }
    }

    fn run(&mut self) -> Result<(), Error> {
        while let Some(block_idx) = self.worklist.pop_front() {
            self.in_worklist[block_idx] = false;
            self.visits[block_idx] += 1;
            self.total_visits += 1;
            if self.visits[block_idx] > self.context.settings.iteration_limit {
                return Err(Error::FixedPointDivergence {
                    iterations: self.total_visits,
                });
            }

            let mut state = match &self.in_states[block_idx] {
                Some(state) => state.clone(),
                None => continue,
            };
            self.visit_block(block_idx, &mut state)?;
        }
        Ok(())
    }

    /// Run through the instructions of a block and push the resulting state onwards
    fn visit_block(&mut self, block_idx: usize, state: &mut AbstractState) -> Result<(), Error> {
        let cfg = self.cfg;
        let method = self.context.method;
        let block = &cfg.blocks[block_idx];
        log::trace!(
            "Visiting block {:?}..{:?} (visit {})",
            block.start_offset,
            block.end_offset,
            self.visits[block_idx]
        );

        for insn_idx in block.instructions.clone() {
            let offset = cfg.offsets[insn_idx];

            for handler_idx in &block.exception_handlers {
                let handler = &method.exception_table[*handler_idx];
                if !handler.covers(offset) {
                    continue;
                }
                let handler_block = self.block_at(handler.handler_pc)?;
                let handler_state = state.handler_state(handler.exception_type());
                self.propagate(handler_block, handler_state)?;
            }

            state
                .execute(&method.instructions[insn_idx], offset, self.context)
                .map_err(|kind| Error::UnverifiableCode { offset, kind })?;
        }

        for succ in &block.successors {
            self.propagate(*succ, state.clone())?;
        }
        Ok(())
    }

    fn block_at(&self, offset: Offset) -> Result<usize, Error> {
        self.cfg.block_at(offset).ok_or(Error::MalformedBytecode {
            offset,
            kind: MalformedKind::InvalidBranchTarget(offset),
        })
    }

    /// Merge a state into the entry of a block, re-enqueuing the block if that changed anything
    fn propagate(&mut self, target: usize, mut incoming: AbstractState) -> Result<(), Error> {
        let cfg = self.cfg;
        let block = &cfg.blocks[target];
        let settings = self.context.settings;
        let method = self.context.method;

        if block.is_merge_point && settings.respect_local_scopes {
            if let Some(scopes) = &method.local_variables {
                incoming.restrict_to_scopes(block.start_offset, scopes, method.parameter_slots());
            }
        }

        let changed = match &mut self.in_states[target] {
            None => {
                self.in_states[target] = Some(incoming);
                true
            }
            Some(existing) => existing
                .merge_from(&incoming, self.context.hierarchy, settings.object_fallback)
                .map_err(|kind| Error::UnverifiableCode {
                    offset: block.start_offset,
                    kind,
                })?,
        };

        if changed {
            log::trace!("State at {:?} changed", block.start_offset);
            self.enqueue(target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{BranchInstruction, Instruction, OrdComparison};
    use crate::jvm::verifier::{NoHierarchy, VerificationType};
    use crate::jvm::{
        BinaryName, Method, MethodAccessFlags, Name, Settings, UnqualifiedName, VerifierErrorKind,
    };

    fn static_method(descriptor: &str, code: Vec<Instruction>) -> Method {
        let mut method = Method::new(
            BinaryName::from_str("Foo").unwrap(),
            UnqualifiedName::from_str("f").unwrap(),
            descriptor,
            MethodAccessFlags::STATIC,
        )
        .unwrap();
        method.instructions = code;
        method
    }

    fn frames_of(method: &Method, settings: &Settings) -> Result<BTreeMap<Offset, AbstractState>, Error> {
        let cfg = ControlFlowGraph::build(&method.instructions, &method.exception_table)?;
        let context = MethodContext::new(method, &cfg, &NoHierarchy, settings);
        compute_frames(&cfg, AbstractState::entry(method)?, &context)
    }

    #[test]
    fn counting_loop() {
        // 0: iconst_0
        // 1: istore_1
        // 2: iload_1
        // 3: iload_0
        // 4: if_icmpge 13
        // 7: iinc 1, 1
        // 10: goto 2
        // 13: return
        let mut method = static_method(
            "(I)V",
            vec![
                Instruction::IConst0,
                Instruction::IStore(1),
                Instruction::ILoad(1),
                Instruction::ILoad(0),
                Instruction::Branch(BranchInstruction::IfICmp(OrdComparison::GE, Offset(13))),
                Instruction::IInc(1, 1),
                Instruction::Branch(BranchInstruction::Goto(Offset(2))),
                Instruction::Branch(BranchInstruction::Return),
            ],
        );
        method.max_locals = 2;
        method.max_stack = 2;

        let frames = frames_of(&method, &Settings::new()).unwrap();
        let offsets: Vec<Offset> = frames.keys().copied().collect();
        assert_eq!(offsets, vec![Offset(2), Offset(13)]);
        for state in frames.values() {
            assert_eq!(
                state.locals,
                vec![VerificationType::Integer, VerificationType::Integer]
            );
            assert!(state.stack.is_empty());
        }
    }

    #[test]
    fn mismatched_stack_heights() {
        // 0: iload_0
        // 1: ifeq 8
        // 4: iconst_1
        // 5: goto 8
        // 8: return
        let mut method = static_method(
            "(I)V",
            vec![
                Instruction::ILoad(0),
                Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Offset(8))),
                Instruction::IConst1,
                Instruction::Branch(BranchInstruction::Goto(Offset(8))),
                Instruction::Branch(BranchInstruction::Return),
            ],
        );
        method.max_stack = 1;

        match frames_of(&method, &Settings::new()) {
            Err(Error::UnverifiableCode {
                offset: Offset(8),
                kind: VerifierErrorKind::StackHeightMismatch(_, _),
            }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn iteration_limit() {
        // 0: iconst_0
        // 1: istore_0
        // 2: nop
        // 3: aconst_null
        // 4: astore_0
        // 5: goto 2
        let mut method = static_method(
            "()V",
            vec![
                Instruction::IConst0,
                Instruction::IStore(0),
                Instruction::Nop,
                Instruction::AConstNull,
                Instruction::AStore(0),
                Instruction::Branch(BranchInstruction::Goto(Offset(2))),
            ],
        );
        method.max_stack = 1;
        method.max_locals = 1;

        // The loop header is visited a second time once the local widens to `top`
        let mut settings = Settings::new();
        settings.iteration_limit = 1;
        assert!(matches!(
            frames_of(&method, &settings),
            Err(Error::FixedPointDivergence { iterations: 3 })
        ));

        settings.iteration_limit = 2;
        let frames = frames_of(&method, &settings).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[&Offset(2)].locals, vec![VerificationType::Top]);
    }
}
