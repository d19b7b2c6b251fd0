use crate::jvm::{ArrayType, BinaryName, Name, RefType};
use std::collections::{HashMap, HashSet};

/// What frame computation needs to know about classes outside of the method
///
/// Merging two class types requires their closest common superclass, which in turn requires
/// knowing superclasses. Interfaces don't participate: like the JVM verifier, anything merged
/// with an interface becomes `java/lang/Object`.
pub trait TypeHierarchy {
    /// Direct superclass of a class, if the class is known and has one
    fn superclass(&self, class: &BinaryName) -> Option<BinaryName>;

    /// Is the class known to be an interface?
    fn is_interface(&self, class: &BinaryName) -> bool;

    /// Closest common superclass of two classes, or `None` if it can't be determined
    fn common_superclass(&self, class1: &BinaryName, class2: &BinaryName) -> Option<BinaryName> {
        if class1 == class2 {
            return Some(class1.clone());
        }
        if class1 == &BinaryName::OBJECT
            || class2 == &BinaryName::OBJECT
            || self.is_interface(class1)
            || self.is_interface(class2)
        {
            return Some(BinaryName::OBJECT);
        }

        // Collect all of the superclasses of the first class
        let mut supers1: HashSet<BinaryName> = HashSet::new();
        let mut class = Some(class1.clone());
        while let Some(cls) = class {
            class = self.superclass(&cls);
            if !supers1.insert(cls) {
                break;
            }
        }
        let complete1 = supers1.contains(&BinaryName::OBJECT);

        // Walk up from the second class until we hit one of those
        let mut seen2: HashSet<BinaryName> = HashSet::new();
        let mut class = Some(class2.clone());
        while let Some(cls) = class {
            if supers1.contains(&cls) {
                return Some(cls);
            }
            class = self.superclass(&cls);
            if !seen2.insert(cls) {
                break;
            }
        }

        // Both chains reach `Object`, so that is the answer
        if complete1 && seen2.contains(&BinaryName::OBJECT) {
            Some(BinaryName::OBJECT)
        } else {
            None
        }
    }

    /// Closest common supertype of two reference types, or `None` if it can't be determined
    ///
    /// Arrays are `Object`s (and `Cloneable`/`Serializable`, which the verifier ignores), and
    /// arrays of references are covariant. Multi-dimensional arrays of primitives are arrays of
    /// objects one dimension down.
    fn common_supertype(
        &self,
        type1: &RefType<BinaryName>,
        type2: &RefType<BinaryName>,
    ) -> Option<RefType<BinaryName>> {
        if type1 == type2 {
            return Some(type1.clone());
        }
        match (type1, type2) {
            (RefType::Object(cls1), RefType::Object(cls2)) => {
                self.common_superclass(cls1, cls2).map(RefType::Object)
            }
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2))
                if arr1.additional_dimensions == arr2.additional_dimensions =>
            {
                let element_type =
                    self.common_superclass(&arr1.element_type, &arr2.element_type)?;
                Some(RefType::ObjectArray(ArrayType {
                    additional_dimensions: arr1.additional_dimensions,
                    element_type,
                }))
            }
            (RefType::Object(_), _) | (_, RefType::Object(_)) => Some(RefType::OBJECT),
            _ => {
                let dims = object_array_dimensions(type1).min(object_array_dimensions(type2));
                if dims == 0 {
                    Some(RefType::OBJECT)
                } else {
                    Some(RefType::ObjectArray(ArrayType {
                        additional_dimensions: dims - 1,
                        element_type: BinaryName::OBJECT,
                    }))
                }
            }
        }
    }
}

/// Number of dimensions along which the type is an array of objects
///
/// `[[LFoo;` is an `Object[][]`, but `[[I` is only an `Object[]`.
fn object_array_dimensions(ref_type: &RefType<BinaryName>) -> usize {
    match ref_type {
        RefType::Object(_) => 0,
        RefType::ObjectArray(arr) => arr.dimensions(),
        RefType::PrimitiveArray(arr) => arr.additional_dimensions,
    }
}

/// Hierarchy that knows nothing, so every pair of distinct classes merges to the fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHierarchy;

impl TypeHierarchy for NoHierarchy {
    fn superclass(&self, _class: &BinaryName) -> Option<BinaryName> {
        None
    }

    fn is_interface(&self, _class: &BinaryName) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct ClassInfo {
    superclass: Option<BinaryName>,
    is_interface: bool,
}

/// Hierarchy backed by a table of known classes
///
/// Starts out knowing `java/lang/Object` and the common `java.lang` exception and error types,
/// which covers the usual `catch` merges.
#[derive(Debug, Clone)]
pub struct ClassHierarchy {
    classes: HashMap<BinaryName, ClassInfo>,
}

impl ClassHierarchy {
    pub fn new() -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy {
            classes: HashMap::new(),
        };
        hierarchy.classes.insert(
            BinaryName::OBJECT,
            ClassInfo {
                superclass: None,
                is_interface: false,
            },
        );

        let known_classes: [(&'static str, &'static str); 22] = [
            ("java/lang/String", "java/lang/Object"),
            ("java/lang/Class", "java/lang/Object"),
            ("java/lang/Number", "java/lang/Object"),
            ("java/lang/Integer", "java/lang/Number"),
            ("java/lang/Long", "java/lang/Number"),
            ("java/lang/Float", "java/lang/Number"),
            ("java/lang/Double", "java/lang/Number"),
            ("java/lang/Throwable", "java/lang/Object"),
            ("java/lang/Exception", "java/lang/Throwable"),
            ("java/lang/Error", "java/lang/Throwable"),
            ("java/lang/AssertionError", "java/lang/Error"),
            ("java/lang/RuntimeException", "java/lang/Exception"),
            ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
            ("java/lang/ClassCastException", "java/lang/RuntimeException"),
            ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
            ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
            ("java/lang/NullPointerException", "java/lang/RuntimeException"),
            ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
            (
                "java/lang/ArrayIndexOutOfBoundsException",
                "java/lang/IndexOutOfBoundsException",
            ),
            ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
            ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
            ("java/io/IOException", "java/lang/Exception"),
        ];
        for (class, superclass) in known_classes {
            hierarchy.classes.insert(
                BinaryName::name(class),
                ClassInfo {
                    superclass: Some(BinaryName::name(superclass)),
                    is_interface: false,
                },
            );
        }

        let known_interfaces = [
            "java/lang/Cloneable",
            "java/io/Serializable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
            "java/lang/Runnable",
            "java/lang/AutoCloseable",
            "java/lang/Iterable",
        ];
        for interface in known_interfaces {
            hierarchy.add_interface(BinaryName::name(interface));
        }

        hierarchy
    }

    /// Register a class along with its direct superclass
    pub fn add_class(&mut self, class: BinaryName, superclass: BinaryName) {
        let info = ClassInfo {
            superclass: Some(superclass),
            is_interface: false,
        };
        self.classes.insert(class, info);
    }

    /// Register an interface
    pub fn add_interface(&mut self, interface: BinaryName) {
        let info = ClassInfo {
            superclass: Some(BinaryName::OBJECT),
            is_interface: true,
        };
        self.classes.insert(interface, info);
    }

    /// Is the class registered?
    pub fn contains(&self, class: &BinaryName) -> bool {
        self.classes.contains_key(class)
    }
}

impl Default for ClassHierarchy {
    fn default() -> ClassHierarchy {
        ClassHierarchy::new()
    }
}

impl TypeHierarchy for ClassHierarchy {
    fn superclass(&self, class: &BinaryName) -> Option<BinaryName> {
        self.classes
            .get(class)
            .and_then(|info| info.superclass.clone())
    }

    fn is_interface(&self, class: &BinaryName) -> bool {
        self.classes
            .get(class)
            .map_or(false, |info| info.is_interface)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{FieldType, ParseDescriptor};

    fn name(name: &str) -> BinaryName {
        BinaryName::from_str(name).unwrap()
    }

    fn ref_type(descriptor: &str) -> RefType<BinaryName> {
        RefType::parse(descriptor).unwrap()
    }

    #[test]
    fn exception_superclasses() {
        let hierarchy = ClassHierarchy::new();
        assert_eq!(
            hierarchy.common_superclass(
                &name("java/lang/ArrayIndexOutOfBoundsException"),
                &name("java/lang/IllegalStateException")
            ),
            Some(name("java/lang/RuntimeException"))
        );
        assert_eq!(
            hierarchy.common_superclass(&name("java/io/IOException"), &name("java/lang/Error")),
            Some(name("java/lang/Throwable"))
        );
        assert_eq!(
            hierarchy.common_superclass(&name("java/lang/String"), &name("java/lang/Integer")),
            Some(BinaryName::OBJECT)
        );
    }

    #[test]
    fn user_classes() {
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.add_class(name("Animal"), BinaryName::OBJECT);
        hierarchy.add_class(name("Dog"), name("Animal"));
        hierarchy.add_class(name("Cat"), name("Animal"));
        hierarchy.add_interface(name("Pet"));

        assert_eq!(
            hierarchy.common_superclass(&name("Dog"), &name("Cat")),
            Some(name("Animal"))
        );
        assert_eq!(
            hierarchy.common_superclass(&name("Dog"), &name("Animal")),
            Some(name("Animal"))
        );
        assert_eq!(
            hierarchy.common_superclass(&name("Dog"), &name("Pet")),
            Some(BinaryName::OBJECT)
        );

        // `Unknown` has no recorded superclass
        assert_eq!(hierarchy.common_superclass(&name("Dog"), &name("Unknown")), None);
    }

    #[test]
    fn nothing_known() {
        assert_eq!(NoHierarchy.common_superclass(&name("A"), &name("B")), None);
        assert_eq!(
            NoHierarchy.common_superclass(&name("A"), &BinaryName::OBJECT),
            Some(BinaryName::OBJECT)
        );
        assert_eq!(NoHierarchy.common_superclass(&name("A"), &name("A")), Some(name("A")));
    }

    #[test]
    fn arrays() {
        let hierarchy = ClassHierarchy::new();
        assert_eq!(
            hierarchy.common_supertype(
                &ref_type("[Ljava/lang/Integer;"),
                &ref_type("[Ljava/lang/Long;")
            ),
            Some(ref_type("[Ljava/lang/Number;"))
        );
        assert_eq!(
            hierarchy.common_supertype(&ref_type("[I"), &ref_type("[F")),
            Some(RefType::OBJECT)
        );
        assert_eq!(
            hierarchy.common_supertype(&ref_type("[[I"), &ref_type("[[F")),
            Some(ref_type("[Ljava/lang/Object;"))
        );
        assert_eq!(
            hierarchy.common_supertype(&ref_type("[[Ljava/lang/String;"), &ref_type("[LFoo;")),
            Some(ref_type("[Ljava/lang/Object;"))
        );
        assert_eq!(
            hierarchy.common_supertype(&ref_type("[I"), &RefType::STRING),
            Some(RefType::OBJECT)
        );
        assert_eq!(
            hierarchy.common_supertype(
                &RefType::array(FieldType::object(name("Foo"))),
                &ref_type("[LBar;")
            ),
            None
        );
    }
}
