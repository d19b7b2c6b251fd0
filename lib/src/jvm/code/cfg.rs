use super::Instruction;
use crate::jvm::{Error, ExceptionHandler, MalformedKind};
use crate::util::Offset;
use std::ops::Range;

/// Largest code array a method can have
pub const MAX_CODE_LENGTH: usize = 65535;

/// Straight-line run of instructions
///
/// Only the last instruction in a block can branch, and only the first instruction can be
/// jumped to. Exception edges are the exception: any instruction in the block may throw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    /// Offset of the first instruction
    pub start_offset: Offset,

    /// Offset just past the last instruction
    pub end_offset: Offset,

    /// Indices of the instructions in the block
    pub instructions: Range<usize>,

    /// Indices of blocks reachable by falling through or jumping out of this block
    pub successors: Vec<usize>,

    /// Indices into the exception table of handlers covering at least one instruction here
    pub exception_handlers: Vec<usize>,

    /// Is this the start of an exception handler?
    pub is_exception_handler_entry: bool,

    /// Does the JVM require a frame at the start of this block?
    ///
    /// That is the case for jump targets, handler entries, and the instruction following an
    /// unconditional transfer of control.
    pub is_merge_point: bool,
}

/// Basic blocks of a method, in code order
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,

    /// Offset of every instruction
    pub offsets: Vec<Offset>,

    /// Length of the code array
    pub code_length: usize,

    /// Index of the block starting at a given offset
    block_starts: Vec<Option<usize>>,
}

impl ControlFlowGraph {
    /// Lay out instructions, validate jumps and handlers, and split the code into blocks
    pub fn build(
        instructions: &[Instruction],
        exception_table: &[ExceptionHandler],
    ) -> Result<ControlFlowGraph, Error> {
        if instructions.is_empty() {
            return Err(malformed(Offset(0), MalformedKind::EmptyCode));
        }

        // Compute offsets
        let mut offsets: Vec<Offset> = Vec::with_capacity(instructions.len());
        let mut code_length = 0;
        for instruction in instructions {
            offsets.push(Offset(code_length));
            code_length += instruction.width_at(Offset(code_length));
        }
        if code_length > MAX_CODE_LENGTH {
            return Err(malformed(
                Offset(0),
                MalformedKind::CodeTooLarge(code_length),
            ));
        }

        // Offset -> instruction index (`None` in the middle of an instruction)
        let mut instruction_at: Vec<Option<usize>> = vec![None; code_length + 1];
        for (idx, offset) in offsets.iter().enumerate() {
            instruction_at[offset.0] = Some(idx);
        }
        let is_boundary = |offset: Offset| -> bool {
            offset.0 < code_length && instruction_at[offset.0].is_some()
        };

        // Leaders are: entry, jump targets, handler entries, and the instruction after a branch
        let mut leader = vec![false; code_length + 1];
        let mut merge_point = vec![false; code_length + 1];
        let mut handler_entry = vec![false; code_length + 1];
        leader[0] = true;

        for (idx, instruction) in instructions.iter().enumerate() {
            let offset = offsets[idx];
            let next = offset.0 + instruction.width_at(offset);

            if let Some(branch) = instruction.branch() {
                let jump_targets = branch.jump_targets();
                for target in jump_targets.targets() {
                    let short_jump_ok = !jump_targets.is_short() || {
                        let delta = *target - offset;
                        i16::MIN as isize <= delta && delta <= i16::MAX as isize
                    };
                    if !is_boundary(*target) || !short_jump_ok {
                        return Err(malformed(
                            offset,
                            MalformedKind::InvalidBranchTarget(*target),
                        ));
                    }
                    leader[target.0] = true;
                    merge_point[target.0] = true;
                }

                leader[next] = true;
                if !branch.falls_through() {
                    merge_point[next] = true;
                }
            }

            if next == code_length && instruction.falls_through() {
                return Err(malformed(offset, MalformedKind::FallsOffEnd));
            }
        }

        for handler in exception_table {
            let lines_up = is_boundary(handler.start_pc)
                && (handler.end_pc.0 == code_length || is_boundary(handler.end_pc))
                && is_boundary(handler.handler_pc);
            if handler.start_pc == handler.end_pc {
                return Err(malformed(handler.start_pc, MalformedKind::EmptyHandlerRange));
            } else if handler.start_pc > handler.end_pc || !lines_up {
                return Err(malformed(
                    handler.start_pc,
                    MalformedKind::InvalidHandler {
                        start_pc: handler.start_pc,
                        end_pc: handler.end_pc,
                        handler_pc: handler.handler_pc,
                    },
                ));
            }
            leader[handler.handler_pc.0] = true;
            merge_point[handler.handler_pc.0] = true;
            handler_entry[handler.handler_pc.0] = true;
        }

        // Cut the code into blocks
        let leader_offsets: Vec<usize> = (0..code_length).filter(|o| leader[*o]).collect();
        let mut block_starts: Vec<Option<usize>> = vec![None; code_length + 1];
        let mut blocks: Vec<BasicBlock> = Vec::with_capacity(leader_offsets.len());
        for (i, &start) in leader_offsets.iter().enumerate() {
            let end = leader_offsets.get(i + 1).copied().unwrap_or(code_length);
            let instr_start = instruction_at[start].unwrap_or_default();
            let instr_end = instruction_at[end].unwrap_or(instructions.len());
            block_starts[start] = Some(blocks.len());
            blocks.push(BasicBlock {
                start_offset: Offset(start),
                end_offset: Offset(end),
                instructions: instr_start..instr_end,
                successors: vec![],
                exception_handlers: vec![],
                is_exception_handler_entry: handler_entry[start],
                is_merge_point: merge_point[start],
            });
        }

        // Fill in successors and handlers
        for block in &mut blocks {
            let last = &instructions[block.instructions.end - 1];
            let mut successors = vec![];
            if last.falls_through() {
                successors.extend(block_starts[block.end_offset.0]);
            }
            for target in last.jump_targets() {
                if let Some(succ) = block_starts[target.0] {
                    if !successors.contains(&succ) {
                        successors.push(succ);
                    }
                }
            }
            block.successors = successors;

            block.exception_handlers = exception_table
                .iter()
                .enumerate()
                .filter(|(_, handler)| {
                    handler.start_pc < block.end_offset && block.start_offset < handler.end_pc
                })
                .map(|(idx, _)| idx)
                .collect();
        }

        let cfg = ControlFlowGraph {
            blocks,
            offsets,
            code_length,
            block_starts,
        };

        let reachable = cfg.reachable(exception_table);
        for (block, reachable) in cfg.blocks.iter().zip(reachable) {
            if !reachable {
                return Err(malformed(block.start_offset, MalformedKind::UnreachableCode));
            }
        }

        Ok(cfg)
    }

    /// Index of the block starting at an offset
    pub fn block_at(&self, offset: Offset) -> Option<usize> {
        self.block_starts.get(offset.0).copied().flatten()
    }

    /// Blocks the JVM needs a frame for, in code order
    pub fn merge_points(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.blocks.iter().filter(|block| block.is_merge_point)
    }

    /// Which blocks can be reached from the entry, following jumps and exception edges
    pub fn reachable(&self, exception_table: &[ExceptionHandler]) -> Vec<bool> {
        let mut reachable = vec![false; self.blocks.len()];
        let mut stack = vec![0];
        reachable[0] = true;
        while let Some(idx) = stack.pop() {
            let block = &self.blocks[idx];
            let handler_blocks = block
                .exception_handlers
                .iter()
                .filter_map(|h| self.block_at(exception_table[*h].handler_pc));
            for succ in block.successors.iter().copied().chain(handler_blocks) {
                if !reachable[succ] {
                    reachable[succ] = true;
                    stack.push(succ);
                }
            }
        }
        reachable
    }
}

fn malformed(offset: Offset, kind: MalformedKind) -> Error {
    Error::MalformedBytecode { offset, kind }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{BranchInstruction, OrdComparison};

    fn branch(branch: BranchInstruction) -> Instruction {
        Instruction::Branch(branch)
    }

    #[test]
    fn diamond() {
        // 0: iload_0
        // 1: ifeq 8
        // 4: iconst_1
        // 5: goto 9
        // 8: iconst_0
        // 9: ireturn
        let code = vec![
            Instruction::ILoad(0),
            branch(BranchInstruction::If(OrdComparison::EQ, Offset(8))),
            Instruction::IConst1,
            branch(BranchInstruction::Goto(Offset(9))),
            Instruction::IConst0,
            branch(BranchInstruction::IReturn),
        ];
        let cfg = ControlFlowGraph::build(&code, &[]).unwrap();
        assert_eq!(cfg.code_length, 10);

        let starts: Vec<usize> = cfg.blocks.iter().map(|b| b.start_offset.0).collect();
        assert_eq!(starts, vec![0, 4, 8, 9]);
        assert_eq!(cfg.blocks[0].successors, vec![1, 2]);
        assert_eq!(cfg.blocks[1].successors, vec![3]);
        assert_eq!(cfg.blocks[2].successors, vec![3]);

        let merges: Vec<usize> = cfg.merge_points().map(|b| b.start_offset.0).collect();
        assert_eq!(merges, vec![8, 9]);
    }

    #[test]
    fn bad_branch_target() {
        let code = vec![
            Instruction::IConst0,
            branch(BranchInstruction::Goto(Offset(2))),
        ];
        match ControlFlowGraph::build(&code, &[]) {
            Err(Error::MalformedBytecode {
                kind: MalformedKind::InvalidBranchTarget(Offset(2)),
                ..
            }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn falling_off_the_end() {
        let code = vec![Instruction::IConst0, Instruction::Pop];
        match ControlFlowGraph::build(&code, &[]) {
            Err(Error::MalformedBytecode {
                offset: Offset(1),
                kind: MalformedKind::FallsOffEnd,
            }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_code() {
        assert!(matches!(
            ControlFlowGraph::build(&[], &[]),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::EmptyCode,
                ..
            })
        ));
    }

    #[test]
    fn unreachable_block() {
        // 0: return
        // 1: return
        let code = vec![
            branch(BranchInstruction::Return),
            branch(BranchInstruction::Return),
        ];
        assert!(matches!(
            ControlFlowGraph::build(&code, &[]),
            Err(Error::MalformedBytecode {
                offset: Offset(1),
                kind: MalformedKind::UnreachableCode,
            })
        ));
    }

    #[test]
    fn handler_ranges() {
        // 0: aconst_null
        // 1: athrow
        // 2: astore_0
        // 3: return
        let code = vec![
            Instruction::AConstNull,
            branch(BranchInstruction::AThrow),
            Instruction::AStore(0),
            branch(BranchInstruction::Return),
        ];
        let handler = |start, end, handler| ExceptionHandler {
            start_pc: Offset(start),
            end_pc: Offset(end),
            handler_pc: Offset(handler),
            catch_type: None,
        };

        let cfg = ControlFlowGraph::build(&code, &[handler(0, 2, 2)]).unwrap();
        let entry = &cfg.blocks[cfg.block_at(Offset(2)).unwrap()];
        assert!(entry.is_exception_handler_entry);
        assert!(entry.is_merge_point);
        assert_eq!(cfg.blocks[0].exception_handlers, vec![0]);

        assert!(matches!(
            ControlFlowGraph::build(&code, &[handler(0, 0, 2)]),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::EmptyHandlerRange,
                ..
            })
        ));
        assert!(matches!(
            ControlFlowGraph::build(&code, &[handler(0, 2, 7)]),
            Err(Error::MalformedBytecode {
                kind: MalformedKind::InvalidHandler { .. },
                ..
            })
        ));
    }
}
