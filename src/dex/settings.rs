/// Limits that apply while building method bodies and laying out pools
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Maximum number of entries in the sections indexed by 16-bit fields
    ///
    /// Type, proto, field, and method ids are referenced from instructions through 16-bit
    /// indices, so a single dex file can hold at most `65536` of each. Callers building multi-dex
    /// output can `mark` the pool before interning a class, check `has_overflowed`, and `reset`
    /// to push the class into the next file.
    pub max_index_count: usize,

    /// Upper bound on full passes of branch relaxation before giving up
    pub relaxation_pass_limit: usize,
}

impl Settings {
    /// Index ceiling of the 16-bit indexed sections
    pub const MAX_16BIT_INDEX_COUNT: usize = 1 << 16;

    /// Default relaxation pass limit
    pub const DEFAULT_RELAXATION_PASS_LIMIT: usize = 1000;
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            max_index_count: Settings::MAX_16BIT_INDEX_COUNT,
            relaxation_pass_limit: Settings::DEFAULT_RELAXATION_PASS_LIMIT,
        }
    }
}
