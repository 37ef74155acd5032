//! Global string interning and symbol identity.
//!
//! The string table is process-wide: identifiers and short string literals are
//! deduplicated to [`Istr`] handles, and two interned handles compare equal by
//! pointer identity in O(1). The table is mutex-guarded so any number of
//! interpreter instances can share it; entries are never removed.
//!
//! Interned storage uses `Box::leak` to obtain `'static` string slices. The
//! leak is intentional: handles must stay valid (and at a stable address) for
//! the life of the process, which is exactly what the identity guarantee
//! requires. The table only accepts strings up to [`INTERN_THRESHOLD`] bytes;
//! longer strings live on the interpreter heap and compare by content.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::{LazyLock, Mutex},
};

use ahash::AHashMap;

/// Longest string (in bytes) the table will intern.
///
/// The front-end interns identifiers and literals below this threshold;
/// anything longer is allocated on the interpreter heap instead.
pub const INTERN_THRESHOLD: usize = 256;

/// Handle to an interned string.
///
/// Copyable and 16 bytes wide. Equality is pointer identity: the global table
/// guarantees one address per distinct content, so identical text always
/// yields an equal handle.
#[derive(Clone, Copy, Eq)]
pub struct Istr(&'static str);

impl Istr {
    /// Returns the interned text.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.0
    }

    /// Returns the length of the interned text in bytes.
    #[inline]
    #[must_use]
    pub fn len(self) -> usize {
        self.0.len()
    }

    /// Returns true for the interned empty string.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Istr {
    /// A detached empty handle, used only as a placeholder before real
    /// interning fills a field in.
    fn default() -> Self {
        Self("")
    }
}

impl PartialEq for Istr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // One table, one address per content: identity comparison is exact.
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr()) && self.0.len() == other.0.len()
    }
}

impl Hash for Istr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash the address, not the bytes. Istr-keyed maps are only ever
        // probed with Istr keys, and identity hashing keeps lookups O(1)
        // regardless of string length.
        (self.0.as_ptr() as usize).hash(state);
    }
}

impl PartialOrd for Istr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Istr {
    fn cmp(&self, other: &Self) -> Ordering {
        // Content order, so sorted output is deterministic across runs.
        self.0.cmp(other.0)
    }
}

impl fmt::Debug for Istr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0, f)
    }
}

impl fmt::Display for Istr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl serde::Serialize for Istr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

/// Interning statistics, maintained for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct InternStats {
    /// Total `intern` calls.
    pub total_interns: usize,
    /// Calls that found an existing entry.
    pub hits: usize,
    /// Calls that created a new entry.
    pub misses: usize,
    /// Distinct strings stored.
    pub unique_strings: usize,
    /// Total bytes of interned text.
    pub total_bytes: usize,
}

impl InternStats {
    /// Fraction of `intern` calls served from the table.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total_interns == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_interns as f64
        }
    }
}

struct TableInner {
    map: AHashMap<&'static str, &'static str>,
    stats: InternStats,
}

/// The process-wide intern table.
struct StringTable {
    inner: Mutex<TableInner>,
}

static TABLE: LazyLock<StringTable> = LazyLock::new(|| StringTable {
    inner: Mutex::new(TableInner {
        map: AHashMap::new(),
        stats: InternStats::default(),
    }),
});

/// Interns a string, returning the canonical handle.
///
/// Creates the entry on first sight. Identical content always returns an
/// identical handle, so `intern(s) == intern(s)` holds as pointer identity.
///
/// # Panics
/// Panics if `s` exceeds [`INTERN_THRESHOLD`]; callers enforce the length
/// policy before reaching the table.
pub fn intern(s: &str) -> Istr {
    assert!(
        s.len() <= INTERN_THRESHOLD,
        "intern: string of {len} bytes exceeds the {INTERN_THRESHOLD}-byte threshold",
        len = s.len()
    );
    intern_unbounded(s)
}

/// Interns a string of any length.
///
/// Property keys must be canonical handles so shape offsets and dictionary
/// slots agree on identity, so the key path bypasses the lexer's length
/// policy. Long keys are rare enough that the extra retained bytes do not
/// matter.
pub(crate) fn intern_unbounded(s: &str) -> Istr {
    let mut inner = TABLE.inner.lock().expect("string table poisoned");
    inner.stats.total_interns += 1;
    if let Some(&existing) = inner.map.get(s) {
        inner.stats.hits += 1;
        return Istr(existing);
    }
    let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
    inner.map.insert(leaked, leaked);
    inner.stats.misses += 1;
    inner.stats.unique_strings += 1;
    inner.stats.total_bytes += leaked.len();
    Istr(leaked)
}

/// Returns a snapshot of the interning statistics.
#[must_use]
pub fn intern_stats() -> InternStats {
    TABLE.inner.lock().expect("string table poisoned").stats
}

/// Resets the hit/miss counters.
///
/// Test hook only: entry identity is never reset, so handles obtained before
/// the reset stay valid and equal to handles obtained after.
pub fn reset_intern_stats() {
    let mut inner = TABLE.inner.lock().expect("string table poisoned");
    let unique = inner.stats.unique_strings;
    let bytes = inner.stats.total_bytes;
    inner.stats = InternStats {
        unique_strings: unique,
        total_bytes: bytes,
        ..InternStats::default()
    };
}

/// Pre-interned names the engine itself needs.
///
/// Resolving these once keeps hot paths free of table locking.
pub(crate) mod well_known {
    use std::sync::LazyLock;

    use super::{Istr, intern};

    macro_rules! known {
        ($($name:ident => $text:expr;)*) => {
            $(pub(crate) static $name: LazyLock<Istr> = LazyLock::new(|| intern($text));)*
        };
    }

    known! {
        LENGTH => "length";
        PROTOTYPE => "prototype";
        CONSTRUCTOR => "constructor";
        NAME => "name";
        MESSAGE => "message";
        STACK => "stack";
        CAUSE => "cause";
        VALUE => "value";
        DONE => "done";
        NEXT => "next";
        THEN => "then";
        STATUS => "status";
        REASON => "reason";
        FULFILLED => "fulfilled";
        REJECTED => "rejected";
        ANONYMOUS => "<anonymous>";
    }
}

/// Identity of a `Symbol` value.
///
/// Symbols are primitives distinguished purely by identity; the description
/// is carried for display. Identities are issued by a process-wide counter so
/// symbols can travel between interpreter instances like interned strings do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SymbolId(u32);

impl SymbolId {
    /// The well-known `Symbol.iterator`, used by the iteration protocol.
    pub const ITERATOR: Self = Self(0);
    /// The well-known `Symbol.asyncIterator`.
    pub const ASYNC_ITERATOR: Self = Self(1);

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

struct SymbolRegistry {
    descriptions: Mutex<Vec<Option<Box<str>>>>,
}

static SYMBOLS: LazyLock<SymbolRegistry> = LazyLock::new(|| SymbolRegistry {
    descriptions: Mutex::new(vec![
        Some("Symbol.iterator".into()),
        Some("Symbol.asyncIterator".into()),
    ]),
});

/// Creates a fresh symbol with an optional description.
pub fn new_symbol(description: Option<&str>) -> SymbolId {
    let mut descs = SYMBOLS.descriptions.lock().expect("symbol registry poisoned");
    let id = u32::try_from(descs.len()).expect("symbol registry full");
    descs.push(description.map(Into::into));
    SymbolId(id)
}

/// Returns a symbol's description, if it has one.
#[must_use]
pub fn symbol_description(id: SymbolId) -> Option<String> {
    let descs = SYMBOLS.descriptions.lock().expect("symbol registry poisoned");
    descs.get(id.index()).and_then(|d| d.as_deref().map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_identity() {
        let a = intern("identity-check");
        let b = intern("identity-check");
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str().as_ptr(), b.as_str().as_ptr()));
    }

    #[test]
    fn distinct_strings_get_distinct_handles() {
        let a = intern("alpha-handle");
        let b = intern("beta-handle");
        assert_ne!(a, b);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let before = intern_stats();
        intern("stats-probe-unique-string");
        intern("stats-probe-unique-string");
        let after = intern_stats();
        assert!(after.misses >= before.misses + 1);
        assert!(after.hits >= before.hits + 1);
        assert!(after.total_bytes > before.total_bytes);
    }

    #[test]
    fn symbols_are_identity_only() {
        let a = new_symbol(Some("desc"));
        let b = new_symbol(Some("desc"));
        assert_ne!(a, b);
        assert_eq!(symbol_description(a).as_deref(), Some("desc"));
        assert_eq!(symbol_description(SymbolId::ITERATOR).as_deref(), Some("Symbol.iterator"));
    }
}
