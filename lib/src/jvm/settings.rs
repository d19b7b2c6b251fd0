/// Knobs for frame computation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Use local variable scopes (when a method has them) to forget locals at merge points
    ///
    /// Without scopes, every local that is assigned on all incoming paths stays live in the
    /// frame. With scopes, a non-parameter local whose slot has scopes but none covering a merge
    /// point is reset to `top` there first (eg. a `chop` right after a `synchronized` block drops
    /// the lock temporary). Slots missing from the scopes entirely are kept.
    pub respect_local_scopes: bool,

    /// Maximum number of times a single basic block may be re-analyzed
    ///
    /// The type lattice has a finite height, so hitting this means something is wrong.
    pub iteration_limit: usize,

    /// When the class hierarchy can't name a common superclass for two classes, merge them to
    /// `java/lang/Object` instead of `top`
    pub object_fallback: bool,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            respect_local_scopes: true,
            iteration_limit: 1000,
            object_fallback: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
