use super::TypeHierarchy;
use crate::jvm::class_file::{ClassConstantIndex, Deserialize, Serialize};
use crate::jvm::{ArrayType, BaseType, BinaryName, FieldType, RefType};
use crate::util::Width;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Error, ErrorKind};

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls> {
    /// Unusable value: an unset local, the second half of a `long`/`double`, or the result of
    /// merging incompatible types
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called by `<init>` has not been called
    ///
    /// This is the offset of the `new` instruction from the start of the method body. The class
    /// being created is recovered from that instruction.
    Uninitialized(u16),
}

/// Verification types as used in the analysis, with classes identified by name
pub type VType = VerificationType<RefType<BinaryName>>;

impl<Cls> VerificationType<Cls> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    /// Is this a value which is not yet initialized (and so can't escape)?
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::UninitializedThis | VerificationType::Uninitialized(_)
        )
    }

    pub fn map<C2, E>(
        &self,
        map_class: impl FnOnce(&Cls) -> Result<C2, E>,
    ) -> Result<VerificationType<C2>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)?),
            VerificationType::Uninitialized(offset) => VerificationType::Uninitialized(*offset),
        })
    }
}

impl<C> From<FieldType<C>> for VerificationType<RefType<C>> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl<Cls> Width for VerificationType<Cls> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl VType {
    /// Least upper bound of two types
    ///
    ///   - identical types merge to themselves
    ///   - `null` merges into any reference type
    ///   - two class or array types merge to their closest common supertype
    ///   - anything else (different primitives, different uninitialized values, etc.) is `top`
    ///
    /// When the hierarchy can't relate two classes, the result is `java/lang/Object` if
    /// `object_fallback` is set and `top` otherwise. Arrays of unrelated classes with the same
    /// dimensions fall back to arrays of `java/lang/Object`.
    pub fn merge(&self, other: &VType, hierarchy: &dyn TypeHierarchy, object_fallback: bool) -> VType {
        match (self, other) {
            (t1, t2) if t1 == t2 => t1.clone(),
            (VerificationType::Null, obj @ VerificationType::Object(_))
            | (obj @ VerificationType::Object(_), VerificationType::Null) => obj.clone(),
            (VerificationType::Object(t1), VerificationType::Object(t2)) => {
                match hierarchy.common_supertype(t1, t2) {
                    Some(lub) => VerificationType::Object(lub),
                    None if object_fallback => {
                        log::debug!(
                            "No common superclass known for {:?} and {:?}, using Object",
                            t1,
                            t2
                        );
                        VerificationType::Object(fallback_supertype(t1, t2))
                    }
                    None => VerificationType::Top,
                }
            }
            _ => VerificationType::Top,
        }
    }
}

fn fallback_supertype(type1: &RefType<BinaryName>, type2: &RefType<BinaryName>) -> RefType<BinaryName> {
    match (type1, type2) {
        (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2))
            if arr1.additional_dimensions == arr2.additional_dimensions =>
        {
            RefType::ObjectArray(ArrayType {
                additional_dimensions: arr1.additional_dimensions,
                element_type: BinaryName::OBJECT,
            })
        }
        _ => RefType::OBJECT,
    }
}

impl Serialize for VerificationType<ClassConstantIndex> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for VerificationType<ClassConstantIndex> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            tag => {
                let msg = format!("Invalid verification type tag {}", tag);
                return Err(Error::new(ErrorKind::InvalidData, msg));
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::{ClassHierarchy, NoHierarchy};
    use crate::jvm::{Name, ParseDescriptor};

    fn object(name: &str) -> VType {
        VerificationType::Object(RefType::Object(BinaryName::from_str(name).unwrap()))
    }

    #[test]
    fn merge_identical() {
        let types = vec![
            VerificationType::Integer,
            VerificationType::Long,
            VerificationType::Null,
            VerificationType::UninitializedThis,
            VerificationType::Uninitialized(3),
            object("Foo"),
        ];
        for typ in types {
            assert_eq!(typ.merge(&typ, &NoHierarchy, true), typ);
        }
    }

    #[test]
    fn merge_is_commutative() {
        let hierarchy = ClassHierarchy::new();
        let types = vec![
            VerificationType::Top,
            VerificationType::Integer,
            VerificationType::Float,
            VerificationType::Null,
            VerificationType::Uninitialized(0),
            VerificationType::Uninitialized(7),
            object("java/lang/RuntimeException"),
            object("java/lang/Error"),
            object("Foo"),
        ];
        for t1 in &types {
            for t2 in &types {
                assert_eq!(
                    t1.merge(t2, &hierarchy, true),
                    t2.merge(t1, &hierarchy, true),
                    "{:?} and {:?}",
                    t1,
                    t2
                );
            }
        }
    }

    #[test]
    fn merge_null_into_objects() {
        let foo = object("Foo");
        assert_eq!(VerificationType::Null.merge(&foo, &NoHierarchy, true), foo);
        assert_eq!(foo.merge(&VerificationType::Null, &NoHierarchy, true), foo);
    }

    #[test]
    fn merge_mismatches_to_top() {
        let top = VerificationType::Top;
        let int = VerificationType::Integer;
        assert_eq!(int.merge(&VerificationType::Float, &NoHierarchy, true), top);
        assert_eq!(int.merge(&object("Foo"), &NoHierarchy, true), top);
        assert_eq!(
            VerificationType::Uninitialized(1).merge(
                &VerificationType::Uninitialized(4),
                &NoHierarchy,
                true
            ),
            top
        );
        assert_eq!(
            VerificationType::Null.merge(&VerificationType::UninitializedThis, &NoHierarchy, true),
            top
        );
    }

    #[test]
    fn merge_unrelated_classes() {
        let foo = object("Foo");
        let bar = object("Bar");
        assert_eq!(foo.merge(&bar, &NoHierarchy, true), object("java/lang/Object"));
        assert_eq!(foo.merge(&bar, &NoHierarchy, false), VerificationType::Top);

        let hierarchy = ClassHierarchy::new();
        assert_eq!(
            object("java/lang/RuntimeException").merge(&object("java/lang/Error"), &hierarchy, false),
            object("java/lang/Throwable")
        );
    }

    #[test]
    fn merge_unrelated_arrays() {
        let foos = VerificationType::Object(RefType::parse("[[LFoo;").unwrap());
        let bars = VerificationType::Object(RefType::parse("[[LBar;").unwrap());
        assert_eq!(
            foos.merge(&bars, &NoHierarchy, true),
            VerificationType::Object(RefType::parse("[[Ljava/lang/Object;").unwrap())
        );
        assert_eq!(foos.merge(&bars, &NoHierarchy, false), VerificationType::Top);

        let strings = VerificationType::Object(RefType::parse("[Ljava/lang/String;").unwrap());
        let integers = VerificationType::Object(RefType::parse("[Ljava/lang/Integer;").unwrap());
        assert_eq!(
            strings.merge(&integers, &ClassHierarchy::new(), false),
            VerificationType::Object(RefType::parse("[Ljava/lang/Object;").unwrap())
        );
    }

    #[test]
    fn widths() {
        assert_eq!(VerificationType::<()>::Long.width(), 2);
        assert_eq!(VerificationType::<()>::Double.width(), 2);
        assert_eq!(VerificationType::<()>::Top.width(), 1);
        assert_eq!(object("Foo").width(), 1);
    }
}
