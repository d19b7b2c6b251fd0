use super::{Attribute, AttributeLike, Deserialize, Serialize};
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::result::Result;

/// Class file constants pool builder
///
/// Stack map tables only ever refer to the pool through `CONSTANT_Class_info` entries (and the
/// attribute name), so only those and the `CONSTANT_Utf8_info` entries they need are supported.
/// The pool is append only.
#[derive(Debug)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    classes: HashMap<RefType<BinaryName>, ClassConstantIndex>,
    utf8s: HashMap<String, Utf8ConstantIndex>,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            classes: HashMap::new(),
            utf8s: HashMap::new(),
        }
    }

    /// Number of slots used, including the unusable slot 0 (this is `constant_pool_count`)
    pub fn len(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535 and indexing starts at 1.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        // Compute the offset at which this constant will be inserted
        let offset: u16 = self.constants.offset_len().0 as u16;

        // Detect if the next constant would overflow the pool
        if offset.checked_add(constant.width() as u16).is_none() {
            return Err(ConstantPoolOverflow { constant, offset });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset))
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant from the constant pool
    ///
    /// When making a `CONSTANT_Class_info`, reference types are almost always objects. However,
    /// verification types can also be arrays, in which case the name is the array descriptor.
    /// See [this section of the JVM specification][0] for more.
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4.1
    pub fn get_class(
        &mut self,
        class: &RefType<BinaryName>,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.classes.get(class) {
            Ok(*idx)
        } else {
            let name = self.get_utf8(class.class_constant_name())?;
            let constant = Constant::Class(name);
            let idx = ClassConstantIndex(self.push_constant(constant)?);
            self.classes.insert(class.clone(), idx);
            Ok(idx)
        }
    }

    /// Look up the string at a utf8 index
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Option<&str> {
        match self.constants.get_offset(Offset((index.0).0 as usize)).ok() {
            Some(Constant::Utf8(string)) => Some(string.as_str()),
            _ => None,
        }
    }

    /// Look up the type named by a class index
    pub fn class_name(&self, index: ClassConstantIndex) -> Option<RefType<BinaryName>> {
        match self.constants.get_offset(Offset((index.0).0 as usize)).ok() {
            Some(Constant::Class(name)) => {
                let name = self.utf8(*name)?;
                RefType::from_class_constant_name(name).ok()
            }
            _ => None,
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }
}

impl Default for ConstantsPool {
    fn default() -> ConstantsPool {
        ConstantsPool::new()
    }
}

/// Resolves class types to constant pool entries while frames are being written
pub trait ClassInterner {
    fn intern_class(
        &mut self,
        class: &RefType<BinaryName>,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow>;
}

impl ClassInterner for ConstantsPool {
    fn intern_class(
        &mut self,
        class: &RefType<BinaryName>,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        self.get_class(class)
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),
}

impl Width for Constant {
    fn width(&self) -> usize {
        1
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

impl Display for ClassConstantIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{}", (self.0).0)
    }
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for Utf8ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for ClassConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ClassConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ClassConstantIndex(ConstantIndex(u16::deserialize(reader)?)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::ParseDescriptor;

    #[test]
    fn classes_are_interned_once() {
        let mut pool = ConstantsPool::new();
        let string = pool.get_class(&RefType::STRING).unwrap();
        let array = pool
            .get_class(&RefType::parse("[Ljava/lang/String;").unwrap())
            .unwrap();
        assert_eq!(pool.get_class(&RefType::STRING).unwrap(), string);
        assert_ne!(string, array);

        // utf8 then class, for each of the two types
        assert_eq!(pool.len(), 5);
        assert_eq!(string, ClassConstantIndex(ConstantIndex(2)));
        assert_eq!(pool.class_name(string), Some(RefType::STRING));
        assert_eq!(
            pool.class_name(array),
            Some(RefType::parse("[Ljava/lang/String;").unwrap())
        );
        assert_eq!(pool.class_name(ClassConstantIndex(ConstantIndex(1))), None);
        assert_eq!(pool.class_name(ClassConstantIndex(ConstantIndex(42))), None);
    }
}
