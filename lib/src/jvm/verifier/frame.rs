use super::VerificationType;
use crate::jvm::class_file::StackMapFrame;
use crate::jvm::{Error, MalformedKind};
use crate::util::{Offset, OffsetVec};
use std::cmp::Ordering;
use std::convert::TryFrom;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Both are in entry form: one entry per value, with `long` and `double` counted once (their
/// offsets still account for two slots). Trailing `top` locals are never stored. This is the
/// shape the JVM uses when it compares stack map frames.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls> {
    /// Local variables in scope
    pub locals: OffsetVec<VerificationType<Cls>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls>>,
}

impl<Cls> Default for Frame<Cls> {
    fn default() -> Frame<Cls> {
        Frame {
            locals: OffsetVec::new(),
            stack: OffsetVec::new(),
        }
    }
}

impl<Cls: Clone + Eq> Frame<Cls> {
    /// Smallest stack map frame that gets from the previous frame to this one
    ///
    /// `chop`, `append` and `same` all need an empty stack and one list of locals to be a prefix
    /// of the other. `same_locals_1_stack_item` needs identical locals. Anything else is `full`.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame<Cls> {
        let locals: Vec<&VerificationType<Cls>> = self.locals.iter().map(|(_, _, t)| t).collect();
        let previous: Vec<&VerificationType<Cls>> =
            previous_frame.locals.iter().map(|(_, _, t)| t).collect();
        let shared = locals.len().min(previous.len());
        let prefix_matches = locals[..shared] == previous[..shared];

        match self.stack.len() {
            0 if prefix_matches => match locals.len().cmp(&previous.len()) {
                Ordering::Equal => return StackMapFrame::SameLocalsNoStack { offset_delta },
                Ordering::Less if previous.len() - shared <= 3 => {
                    return StackMapFrame::ChopLocalsNoStack {
                        offset_delta,
                        chopped_k: (previous.len() - shared) as u8,
                    }
                }
                Ordering::Greater if locals.len() - shared <= 3 => {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: locals[shared..].iter().map(|t| (*t).clone()).collect(),
                    }
                }
                _ => (),
            },
            1 if locals == previous => {
                if let Some(stack) = self.stack.last() {
                    return StackMapFrame::SameLocalsOneStack {
                        offset_delta,
                        stack: stack.clone(),
                    };
                }
            }
            _ => (),
        }

        StackMapFrame::Full {
            offset_delta,
            locals: locals.into_iter().cloned().collect(),
            stack: self.stack.iter().map(|(_, _, t)| t.clone()).collect(),
        }
    }

    /// Apply a stack map frame on top of the previous frame, the way the JVM does when it reads a
    /// `StackMapTable`
    pub fn apply(&self, frame: &StackMapFrame<Cls>) -> Result<Frame<Cls>, Error> {
        let mut next = Frame {
            locals: self.locals.clone(),
            stack: OffsetVec::new(),
        };
        match frame {
            StackMapFrame::SameLocalsNoStack { .. } => (),
            StackMapFrame::SameLocalsOneStack { stack, .. } => {
                next.stack.push(stack.clone());
            }
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                for _ in 0..*chopped_k {
                    if next.locals.pop().is_none() {
                        return Err(Error::MalformedStackMapTable(format!(
                            "cannot chop {} locals from a frame with {}",
                            chopped_k,
                            self.locals.len()
                        )));
                    }
                }
            }
            StackMapFrame::AppendLocalsNoStack { locals, .. } => {
                next.locals.extend(locals.iter().cloned());
            }
            StackMapFrame::Full { locals, stack, .. } => {
                next.locals = locals.iter().cloned().collect();
                next.stack = stack.iter().cloned().collect();
            }
        }
        Ok(next)
    }

    /// Replay a whole stack map table from the implicit entry frame
    ///
    /// Returns the offset and full frame described by each entry.
    pub fn reconstruct(
        entry: &Frame<Cls>,
        frames: &[StackMapFrame<Cls>],
    ) -> Result<Vec<(Offset, Frame<Cls>)>, Error> {
        let mut reconstructed: Vec<(Offset, Frame<Cls>)> = Vec::with_capacity(frames.len());
        let mut previous = entry.clone();
        let mut previous_offset: Option<Offset> = None;

        for frame in frames {
            let delta = frame.offset_delta() as usize;
            let offset = match previous_offset {
                None => Offset(delta),
                Some(prev) => Offset(prev.0 + delta + 1),
            };
            previous = previous.apply(frame)?;
            previous_offset = Some(offset);
            reconstructed.push((offset, previous.clone()));
        }

        Ok(reconstructed)
    }
}

impl<Cls> Frame<Cls> {
    pub fn map<C2, E>(
        &self,
        mut map_class: impl FnMut(&Cls) -> Result<C2, E>,
    ) -> Result<Frame<C2>, E> {
        Ok(Frame {
            locals: self
                .locals
                .iter()
                .map(|(_, _, t)| t.map(&mut map_class))
                .collect::<Result<_, _>>()?,
            stack: self
                .stack
                .iter()
                .map(|(_, _, t)| t.map(&mut map_class))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Turn the frames at merge points into the shortest stack map table entries
///
/// The entry frame is the implicit frame derived from the method signature, and `ordered` must
/// have strictly increasing offsets.
pub fn reduce<Cls: Clone + Eq>(
    entry: &Frame<Cls>,
    ordered: &[(Offset, Frame<Cls>)],
) -> Result<Vec<StackMapFrame<Cls>>, Error> {
    let mut stack_map_frames = Vec::with_capacity(ordered.len());
    let mut previous_frame = entry;
    let mut previous_offset: Option<Offset> = None;

    for (offset, frame) in ordered {
        let delta = match previous_offset {
            None => Some(offset.0),
            Some(prev) if prev < *offset => Some(offset.0 - prev.0 - 1),
            Some(_) => None,
        };
        let offset_delta = match delta.and_then(|delta| u16::try_from(delta).ok()) {
            Some(offset_delta) => offset_delta,
            None => {
                return Err(Error::MalformedBytecode {
                    offset: *offset,
                    kind: MalformedKind::DuplicateFrameOffset,
                })
            }
        };

        stack_map_frames.push(frame.stack_map_frame(offset_delta, previous_frame));
        previous_frame = frame;
        previous_offset = Some(*offset);
    }

    Ok(stack_map_frames)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::VType;
    use crate::jvm::{BinaryName, Name, RefType};

    fn object(name: &str) -> VType {
        VerificationType::Object(RefType::Object(BinaryName::from_str(name).unwrap()))
    }

    fn frame<const N: usize, const M: usize>(locals: [VType; N], stack: [VType; M]) -> Frame<RefType<BinaryName>> {
        Frame {
            locals: locals.into_iter().collect(),
            stack: stack.into_iter().collect(),
        }
    }

    #[test]
    fn frame_kinds() {
        let prev = frame([object("Foo"), VerificationType::Integer], []);

        assert_eq!(
            frame([object("Foo"), VerificationType::Integer], []).stack_map_frame(3, &prev),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );
        assert_eq!(
            frame([object("Foo"), VerificationType::Integer], [VerificationType::Long])
                .stack_map_frame(100, &prev),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 100,
                stack: VerificationType::Long,
            }
        );
        assert_eq!(
            frame([object("Foo")], []).stack_map_frame(0, &prev),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 0,
                chopped_k: 1,
            }
        );
        assert_eq!(
            frame(
                [
                    object("Foo"),
                    VerificationType::Integer,
                    VerificationType::Double,
                    VerificationType::Top,
                    VerificationType::Null,
                ],
                []
            )
            .stack_map_frame(1, &prev),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 1,
                locals: vec![
                    VerificationType::Double,
                    VerificationType::Top,
                    VerificationType::Null,
                ],
            }
        );

        // Four new locals is too many for `append`
        let four_more = frame(
            [
                object("Foo"),
                VerificationType::Integer,
                VerificationType::Integer,
                VerificationType::Integer,
                VerificationType::Integer,
                VerificationType::Integer,
            ],
            [],
        );
        assert!(matches!(
            four_more.stack_map_frame(1, &prev),
            StackMapFrame::Full { .. }
        ));

        // Different locals with one stack entry
        let changed = frame([object("Bar")], [VerificationType::Integer]);
        assert_eq!(
            changed.stack_map_frame(7, &prev),
            StackMapFrame::Full {
                offset_delta: 7,
                locals: vec![object("Bar")],
                stack: vec![VerificationType::Integer],
            }
        );

        // Chopping is only allowed if what remains is a prefix
        let not_prefix = frame([object("Bar")], []);
        assert!(matches!(
            not_prefix.stack_map_frame(1, &prev),
            StackMapFrame::Full { .. }
        ));
    }

    #[test]
    fn deltas() {
        let entry = frame([VerificationType::Integer], []);
        let ordered = vec![
            (Offset(5), frame([VerificationType::Integer], [])),
            (Offset(6), frame([VerificationType::Integer], [object("Foo")])),
            (Offset(20), frame([], [])),
        ];
        let frames = reduce(&entry, &ordered).unwrap();
        let deltas: Vec<u16> = frames.iter().map(|f| f.offset_delta()).collect();
        assert_eq!(deltas, vec![5, 0, 13]);

        let reconstructed = Frame::reconstruct(&entry, &frames).unwrap();
        assert_eq!(reconstructed, ordered);

        let out_of_order = vec![
            (Offset(6), frame([VerificationType::Integer], [])),
            (Offset(6), frame([VerificationType::Integer], [])),
        ];
        assert!(matches!(
            reduce(&entry, &out_of_order),
            Err(Error::MalformedBytecode {
                offset: Offset(6),
                kind: MalformedKind::DuplicateFrameOffset,
            })
        ));
    }

    #[test]
    fn wide_locals_count_once() {
        let entry = frame([VerificationType::Long], []);
        let with_double = frame([VerificationType::Long, VerificationType::Double], []);
        assert_eq!(with_double.locals.offset_len(), Offset(4));
        assert_eq!(
            with_double.stack_map_frame(0, &entry),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 0,
                locals: vec![VerificationType::Double],
            }
        );
        assert_eq!(
            entry.stack_map_frame(0, &with_double),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 0,
                chopped_k: 1,
            }
        );
    }

    #[test]
    fn chopping_too_much() {
        let entry = frame([VerificationType::Integer], []);
        let frames = vec![StackMapFrame::ChopLocalsNoStack {
            offset_delta: 0,
            chopped_k: 2,
        }];
        assert!(matches!(
            Frame::reconstruct(&entry, &frames),
            Err(Error::MalformedStackMapTable(_))
        ));
    }
}
