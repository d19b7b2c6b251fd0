use super::{AttributeLike, ClassConstantIndex, ClassInterner, Deserialize, Serialize};
use crate::jvm::verifier::{VType, VerificationType};
use crate::jvm::{BinaryName, Error, MalformedKind, RefType};
use crate::util::Offset;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{Error as IoError, ErrorKind};

/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame<ClassConstantIndex>>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl StackMapTable {
    /// Decode a `StackMapTable` attribute body (everything after `attribute_length`)
    pub fn parse(mut bytes: &[u8]) -> Result<StackMapTable, Error> {
        let frames = Vec::<StackMapFrame<ClassConstantIndex>>::deserialize(&mut bytes)
            .map_err(|err| Error::MalformedStackMapTable(err.to_string()))?;
        if !bytes.is_empty() {
            return Err(Error::MalformedStackMapTable(format!(
                "{} trailing bytes after the last frame",
                bytes.len()
            )));
        }
        Ok(StackMapTable(frames))
    }
}

/// One entry of a stack map table, relative to the frame before it
///
/// Whether the `_extended` encodings get used is decided from `offset_delta` when serializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame<Cls> {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: u16 },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        stack: VerificationType<Cls>,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<VerificationType<Cls>>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType<Cls>>,
        stack: Vec<VerificationType<Cls>>,
    },
}

impl<Cls> StackMapFrame<Cls> {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    /// Which of the class file encodings this frame uses
    pub fn kind(&self) -> FrameKind {
        let extended = self.offset_delta() > 63;
        match self {
            StackMapFrame::SameLocalsNoStack { .. } if extended => FrameKind::SameExtended,
            StackMapFrame::SameLocalsNoStack { .. } => FrameKind::Same,
            StackMapFrame::SameLocalsOneStack { .. } if extended => {
                FrameKind::SameLocals1StackItemExtended
            }
            StackMapFrame::SameLocalsOneStack { .. } => FrameKind::SameLocals1StackItem,
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => FrameKind::Chop(*chopped_k),
            StackMapFrame::AppendLocalsNoStack { locals, .. } => {
                FrameKind::Append(u8::try_from(locals.len()).unwrap_or(u8::MAX))
            }
            StackMapFrame::Full { .. } => FrameKind::Full,
        }
    }

    /// Entries of the frame: the new locals and stack, as far as this frame lists them
    pub fn entries(&self) -> (&[VerificationType<Cls>], &[VerificationType<Cls>]) {
        match self {
            StackMapFrame::SameLocalsNoStack { .. } | StackMapFrame::ChopLocalsNoStack { .. } => {
                (&[], &[])
            }
            StackMapFrame::SameLocalsOneStack { stack, .. } => (&[], std::slice::from_ref(stack)),
            StackMapFrame::AppendLocalsNoStack { locals, .. } => (locals, &[]),
            StackMapFrame::Full { locals, stack, .. } => (locals, stack),
        }
    }

    /// Rebuild a frame from its kind and entries
    ///
    /// Fails if the entries don't have the shape the kind requires.
    pub fn from_parts(
        kind: FrameKind,
        offset_delta: u16,
        locals: Vec<VerificationType<Cls>>,
        mut stack: Vec<VerificationType<Cls>>,
    ) -> Option<StackMapFrame<Cls>> {
        let frame = match kind {
            FrameKind::Same | FrameKind::SameExtended if locals.is_empty() && stack.is_empty() => {
                StackMapFrame::SameLocalsNoStack { offset_delta }
            }
            FrameKind::SameLocals1StackItem | FrameKind::SameLocals1StackItemExtended
                if locals.is_empty() && stack.len() == 1 =>
            {
                StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: stack.pop()?,
                }
            }
            FrameKind::Chop(chopped_k)
                if (1..=3).contains(&chopped_k) && locals.is_empty() && stack.is_empty() =>
            {
                StackMapFrame::ChopLocalsNoStack {
                    offset_delta,
                    chopped_k,
                }
            }
            FrameKind::Append(added_k)
                if (1..=3).contains(&added_k) && locals.len() == added_k as usize && stack.is_empty() =>
            {
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals,
                }
            }
            FrameKind::Full => StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            },
            _ => return None,
        };
        Some(frame)
    }

    pub fn map<C2, E>(
        &self,
        mut map_class: impl FnMut(&Cls) -> Result<C2, E>,
    ) -> Result<StackMapFrame<C2>, E> {
        Ok(match self {
            StackMapFrame::SameLocalsNoStack { offset_delta } => StackMapFrame::SameLocalsNoStack {
                offset_delta: *offset_delta,
            },
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => StackMapFrame::SameLocalsOneStack {
                offset_delta: *offset_delta,
                stack: stack.map(&mut map_class)?,
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => StackMapFrame::ChopLocalsNoStack {
                offset_delta: *offset_delta,
                chopped_k: *chopped_k,
            },
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => StackMapFrame::AppendLocalsNoStack {
                offset_delta: *offset_delta,
                locals: map_types(locals, &mut map_class)?,
            },
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => StackMapFrame::Full {
                offset_delta: *offset_delta,
                locals: map_types(locals, &mut map_class)?,
                stack: map_types(stack, &mut map_class)?,
            },
        })
    }
}

fn map_types<C, C2, E>(
    types: &[VerificationType<C>],
    map_class: &mut impl FnMut(&C) -> Result<C2, E>,
) -> Result<Vec<VerificationType<C2>>, E> {
    types.iter().map(|t| t.map(&mut *map_class)).collect()
}

/// The seven frame encodings of the class file format
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `same_frame`
    Same,

    /// `same_locals_1_stack_item_frame`
    SameLocals1StackItem,

    /// `same_locals_1_stack_item_frame_extended`
    SameLocals1StackItemExtended,

    /// `chop_frame`, removing 1 to 3 locals
    Chop(u8),

    /// `same_frame_extended`
    SameExtended,

    /// `append_frame`, adding 1 to 3 locals
    Append(u8),

    /// `full_frame`
    Full,
}

impl FrameKind {
    /// Tag byte that starts a frame of this kind
    ///
    /// For the two short forms, the offset delta is folded into the tag.
    pub fn tag(&self, offset_delta: u16) -> u8 {
        match self {
            FrameKind::Same => offset_delta as u8,
            FrameKind::SameLocals1StackItem => 64 + offset_delta as u8,
            FrameKind::SameLocals1StackItemExtended => 247,
            FrameKind::Chop(k) => 251 - k,
            FrameKind::SameExtended => 251,
            FrameKind::Append(k) => 251 + k,
            FrameKind::Full => 255,
        }
    }

    /// Kind of frame started by a tag byte, or `None` for the reserved tags 128-246
    pub fn from_tag(tag: u8) -> Option<FrameKind> {
        match tag {
            0..=63 => Some(FrameKind::Same),
            64..=127 => Some(FrameKind::SameLocals1StackItem),
            247 => Some(FrameKind::SameLocals1StackItemExtended),
            248..=250 => Some(FrameKind::Chop(251 - tag)),
            251 => Some(FrameKind::SameExtended),
            252..=254 => Some(FrameKind::Append(tag - 251)),
            255 => Some(FrameKind::Full),
            _ => None,
        }
    }

    /// Does the frame store its offset delta as a `u2` after the tag?
    pub fn has_explicit_delta(&self) -> bool {
        !matches!(self, FrameKind::Same | FrameKind::SameLocals1StackItem)
    }
}

impl Display for FrameKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FrameKind::Same => write!(f, "same"),
            FrameKind::SameLocals1StackItem => write!(f, "same_locals_1_stack_item"),
            FrameKind::SameLocals1StackItemExtended => {
                write!(f, "same_locals_1_stack_item_extended")
            }
            FrameKind::Chop(k) => write!(f, "chop {}", k),
            FrameKind::SameExtended => write!(f, "same_extended"),
            FrameKind::Append(k) => write!(f, "append {}", k),
            FrameKind::Full => write!(f, "full"),
        }
    }
}

impl Serialize for StackMapFrame<ClassConstantIndex> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let kind = self.kind();
        match kind {
            FrameKind::Chop(k) | FrameKind::Append(k) if !(1..=3).contains(&k) => {
                let msg = format!("{} frames must cover 1-3 locals", kind);
                return Err(IoError::new(ErrorKind::InvalidInput, msg));
            }
            _ => (),
        }

        let offset_delta = self.offset_delta();
        kind.tag(offset_delta).serialize(writer)?;
        if kind.has_explicit_delta() {
            offset_delta.serialize(writer)?;
        }

        match self {
            StackMapFrame::SameLocalsNoStack { .. } | StackMapFrame::ChopLocalsNoStack { .. } => (),
            StackMapFrame::SameLocalsOneStack { stack, .. } => stack.serialize(writer)?,
            StackMapFrame::AppendLocalsNoStack { locals, .. } => {
                for local in locals {
                    local.serialize(writer)?;
                }
            }
            StackMapFrame::Full { locals, stack, .. } => {
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for StackMapFrame<ClassConstantIndex> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let tag = u8::deserialize(reader)?;
        let kind = match FrameKind::from_tag(tag) {
            Some(kind) => kind,
            None => {
                let msg = format!("Reserved stack map frame tag {}", tag);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        };
        let offset_delta = match kind {
            FrameKind::Same => tag as u16,
            FrameKind::SameLocals1StackItem => tag as u16 - 64,
            _ => u16::deserialize(reader)?,
        };

        let mut locals: Vec<VerificationType<ClassConstantIndex>> = vec![];
        let mut stack: Vec<VerificationType<ClassConstantIndex>> = vec![];
        match kind {
            FrameKind::SameLocals1StackItem | FrameKind::SameLocals1StackItemExtended => {
                stack.push(VerificationType::deserialize(reader)?);
            }
            FrameKind::Append(k) => {
                for _ in 0..k {
                    locals.push(VerificationType::deserialize(reader)?);
                }
            }
            FrameKind::Full => {
                locals = Vec::deserialize(reader)?;
                stack = Vec::deserialize(reader)?;
            }
            FrameKind::Same | FrameKind::SameExtended | FrameKind::Chop(_) => (),
        }

        StackMapFrame::from_parts(kind, offset_delta, locals, stack).ok_or_else(|| {
            IoError::new(ErrorKind::InvalidData, "Inconsistent stack map frame")
        })
    }
}

/// Receiver of encoded stack map frames
///
/// Entries are verification types with classes still identified by name, so that a sink can
/// decide how they end up in the constant pool.
pub trait FrameSink {
    /// Called once, before any frame
    fn emit_frame_count(&mut self, count: u16) -> Result<(), Error>;

    /// Called for each frame, in order
    ///
    /// `locals` are the explicitly listed locals (the new ones for an `append`, all of them for a
    /// `full`) and `stack` is the listed stack.
    fn emit_frame(
        &mut self,
        kind: FrameKind,
        offset_delta: u16,
        locals: &[VType],
        stack: &[VType],
    ) -> Result<(), Error>;
}

/// Send a list of frames to a sink
pub fn write_stack_map_table<S: FrameSink>(
    frames: &[StackMapFrame<RefType<BinaryName>>],
    sink: &mut S,
) -> Result<(), Error> {
    let count = u16::try_from(frames.len()).map_err(|_| Error::MalformedBytecode {
        offset: Offset(0),
        kind: MalformedKind::CodeTooLarge(frames.len()),
    })?;
    sink.emit_frame_count(count)?;
    for frame in frames {
        let (locals, stack) = frame.entries();
        sink.emit_frame(frame.kind(), frame.offset_delta(), locals, stack)?;
    }
    Ok(())
}

/// Sink producing the body of a `StackMapTable` attribute
///
/// Classes are resolved to constant pool indices as they come in.
pub struct AttributeSink<'a, I: ClassInterner> {
    interner: &'a mut I,
    bytes: Vec<u8>,
}

impl<'a, I: ClassInterner> AttributeSink<'a, I> {
    pub fn new(interner: &'a mut I) -> AttributeSink<'a, I> {
        AttributeSink {
            interner,
            bytes: vec![],
        }
    }

    /// Attribute body written so far
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn resolve(&mut self, types: &[VType]) -> Result<Vec<VerificationType<ClassConstantIndex>>, Error> {
        let mut resolved = Vec::with_capacity(types.len());
        for typ in types {
            resolved.push(typ.map(|class| self.interner.intern_class(class))?);
        }
        Ok(resolved)
    }
}

impl<'a, I: ClassInterner> FrameSink for AttributeSink<'a, I> {
    fn emit_frame_count(&mut self, count: u16) -> Result<(), Error> {
        count.serialize(&mut self.bytes)?;
        Ok(())
    }

    fn emit_frame(
        &mut self,
        kind: FrameKind,
        offset_delta: u16,
        locals: &[VType],
        stack: &[VType],
    ) -> Result<(), Error> {
        let locals = self.resolve(locals)?;
        let stack = self.resolve(stack)?;
        let frame = StackMapFrame::from_parts(kind, offset_delta, locals, stack).ok_or_else(|| {
            Error::MalformedStackMapTable(format!("frame entries don't fit a {} frame", kind))
        })?;
        frame.serialize(&mut self.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ConstantIndex, ConstantsPool};

    fn class(idx: u16) -> VerificationType<ClassConstantIndex> {
        VerificationType::Object(ClassConstantIndex(ConstantIndex(idx)))
    }

    #[test]
    fn tags() {
        let frames = vec![
            StackMapFrame::SameLocalsNoStack { offset_delta: 5 },
            StackMapFrame::SameLocalsNoStack { offset_delta: 64 },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 3,
                stack: VerificationType::Integer,
            },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 300,
                stack: class(9),
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 0,
                chopped_k: 2,
            },
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 1,
                locals: vec![VerificationType::Long, VerificationType::Uninitialized(4)],
            },
            StackMapFrame::Full {
                offset_delta: 2,
                locals: vec![VerificationType::UninitializedThis],
                stack: vec![VerificationType::Null, VerificationType::Double],
            },
        ];
        let mut bytes = vec![];
        StackMapTable(frames.clone()).serialize(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            vec![
                0, 7, // number of frames
                5, // same
                251, 0, 64, // same_extended
                67, 1, // same_locals_1_stack_item int
                247, 1, 44, 7, 0, 9, // same_locals_1_stack_item_extended #9
                249, 0, 0, // chop 2
                253, 0, 1, 4, 8, 0, 4, // append long, uninitialized(4)
                255, 0, 2, 0, 1, 6, 0, 2, 5, 3, // full
            ]
        );

        let kinds: Vec<FrameKind> = frames.iter().map(|f| f.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::Same,
                FrameKind::SameExtended,
                FrameKind::SameLocals1StackItem,
                FrameKind::SameLocals1StackItemExtended,
                FrameKind::Chop(2),
                FrameKind::Append(2),
                FrameKind::Full,
            ]
        );

        assert_eq!(StackMapTable::parse(&bytes).unwrap(), StackMapTable(frames));
    }

    #[test]
    fn bad_bodies() {
        // reserved tag
        assert!(matches!(
            StackMapTable::parse(&[0, 1, 200]),
            Err(Error::MalformedStackMapTable(_))
        ));

        // truncated full frame
        assert!(matches!(
            StackMapTable::parse(&[0, 1, 255, 0, 2, 0, 1]),
            Err(Error::MalformedStackMapTable(_))
        ));

        // bad verification type tag
        assert!(matches!(
            StackMapTable::parse(&[0, 1, 64, 9]),
            Err(Error::MalformedStackMapTable(_))
        ));

        // trailing bytes
        assert!(matches!(
            StackMapTable::parse(&[0, 0, 0]),
            Err(Error::MalformedStackMapTable(_))
        ));

        let chop_4 = StackMapFrame::<ClassConstantIndex>::ChopLocalsNoStack {
            offset_delta: 0,
            chopped_k: 4,
        };
        assert!(chop_4.serialize(&mut vec![]).is_err());
    }

    #[test]
    fn attribute_sink_interns_classes() {
        let frames = vec![
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 10,
                locals: vec![VerificationType::Object(RefType::STRING)],
            },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 2,
                stack: VerificationType::Object(RefType::THROWABLE),
            },
            StackMapFrame::Full {
                offset_delta: 1,
                locals: vec![VerificationType::Object(RefType::STRING)],
                stack: vec![],
            },
        ];

        let mut pool = ConstantsPool::new();
        let mut sink = AttributeSink::new(&mut pool);
        write_stack_map_table(&frames, &mut sink).unwrap();
        let bytes = sink.into_bytes();

        let table = StackMapTable::parse(&bytes).unwrap();
        let resolved: Vec<StackMapFrame<RefType<BinaryName>>> = table
            .0
            .iter()
            .map(|frame| frame.map(|idx| pool.class_name(*idx).ok_or(())))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(resolved, frames);

        // `String` is interned once, `Throwable` once
        assert_eq!(pool.len(), 5);
    }
}
