//! libIndexStore loader and the trait boundary the Index-Store Reader
//! drives.
//!
//! The underlying library delivers records through a callback that
//! returns a boolean "continue" flag. `DylibIndexStoreLibrary` wraps
//! that once at the FFI boundary and hands the Reader a plain `Vec`,
//! so nothing above this module deals with raw pointers or
//! trampolines.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::error::{Result, ScipIndexError};
use crate::store::records::{CompilerSymbolKind, RawOccurrence, RawRelation};

/// Producers the Index-Store Reader needs from the underlying store.
pub trait IndexStoreLibrary {
    /// One canonical (typically the defining) occurrence per known USR.
    fn canonical_occurrences(&self) -> Result<Vec<RawOccurrence>>;

    /// Every occurrence, at any role, of the given USR.
    fn occurrences_for_usr(&self, usr: &str) -> Result<Vec<RawOccurrence>>;
}

/// Toolchain-conventional locations searched for the native library,
/// newest first.
pub fn default_library_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from(
            "/Applications/Xcode.app/Contents/Developer/Toolchains/XcodeDefault.xctoolchain/usr/lib/libIndexStore.dylib",
        ),
        PathBuf::from("/usr/lib/libIndexStore.dylib"),
        PathBuf::from("/usr/lib/swift/libIndexStore.so"),
    ]
}

type CreateStoreFn = unsafe extern "C" fn(path: *const c_char) -> *mut c_void;
type DisposeStoreFn = unsafe extern "C" fn(store: *mut c_void);
type OccurrenceVisitor = unsafe extern "C" fn(ctx: *mut c_void, occurrence: *const FfiOccurrence) -> bool;
type ApplyCanonicalFn =
    unsafe extern "C" fn(store: *mut c_void, ctx: *mut c_void, visitor: OccurrenceVisitor) -> bool;
type ApplyForUsrFn = unsafe extern "C" fn(
    store: *mut c_void,
    usr: *const c_char,
    ctx: *mut c_void,
    visitor: OccurrenceVisitor,
) -> bool;

/// C-layout mirror of one occurrence record, as the real
/// `indexstore_occurrence_*` accessors would hand it across the FFI
/// boundary. Left deliberately minimal: the loader is out of scope
/// beyond this interface.
#[repr(C)]
struct FfiOccurrence {
    usr: *const c_char,
    name: *const c_char,
    kind: u32,
    absolute_path: *const c_char,
    line: u32,
    utf8_column: u32,
    roles: u32,
}

/// Library-backed `IndexStoreLibrary`. Owns the `dlopen`'d handle and
/// its resolved entry points for the lifetime of an indexing run.
pub struct DylibIndexStoreLibrary {
    _library: Library,
    store: *mut c_void,
    apply_canonical: ApplyCanonicalFn,
    apply_for_usr: ApplyForUsrFn,
    dispose_store: DisposeStoreFn,
}

impl DylibIndexStoreLibrary {
    /// Search `candidates` in order, `dlopen`ing the first that loads,
    /// then create a store handle rooted at `data_store_path`.
    pub fn load(candidates: &[PathBuf], data_store_path: &Path) -> Result<Self> {
        let library = candidates
            .iter()
            .find_map(|path| unsafe { Library::new(path).ok() })
            .ok_or_else(|| ScipIndexError::LibraryNotFound {
                candidates: candidates.to_vec(),
            })?;

        let (create_store, apply_canonical, apply_for_usr, dispose_store) = unsafe {
            let create_store: Symbol<CreateStoreFn> = library
                .get(b"indexstore_store_create")
                .map_err(|_| ScipIndexError::LibraryNotFound {
                    candidates: candidates.to_vec(),
                })?;
            let apply_canonical: Symbol<ApplyCanonicalFn> = library
                .get(b"indexstore_store_apply_canonical_occurrences")
                .map_err(|_| ScipIndexError::LibraryNotFound {
                    candidates: candidates.to_vec(),
                })?;
            let apply_for_usr: Symbol<ApplyForUsrFn> = library
                .get(b"indexstore_store_apply_occurrences_for_usr")
                .map_err(|_| ScipIndexError::LibraryNotFound {
                    candidates: candidates.to_vec(),
                })?;
            let dispose_store: Symbol<DisposeStoreFn> = library
                .get(b"indexstore_store_dispose")
                .map_err(|_| ScipIndexError::LibraryNotFound {
                    candidates: candidates.to_vec(),
                })?;
            (
                *create_store,
                *apply_canonical,
                *apply_for_usr,
                *dispose_store,
            )
        };

        let path_cstr = path_to_cstring(data_store_path)?;
        let store = unsafe { create_store(path_cstr.as_ptr()) };
        if store.is_null() {
            return Err(ScipIndexError::IndexStoreNotFound {
                derived_data: data_store_path.to_path_buf(),
                searched: vec![data_store_path.to_path_buf()],
            });
        }

        Ok(Self {
            _library: library,
            store,
            apply_canonical,
            apply_for_usr,
            dispose_store,
        })
    }

    fn collect<F>(&self, run: F) -> Vec<RawOccurrence>
    where
        F: FnOnce(*mut c_void, OccurrenceVisitor),
    {
        let mut out: Vec<RawOccurrence> = Vec::new();
        let ctx: *mut c_void = &mut out as *mut Vec<RawOccurrence> as *mut c_void;
        run(ctx, trampoline);
        out
    }
}

impl Drop for DylibIndexStoreLibrary {
    fn drop(&mut self) {
        unsafe { (self.dispose_store)(self.store) };
    }
}

unsafe extern "C" fn trampoline(ctx: *mut c_void, occurrence: *const FfiOccurrence) -> bool {
    let out = &mut *(ctx as *mut Vec<RawOccurrence>);
    if let Some(record) = ffi_occurrence_to_raw(&*occurrence) {
        out.push(record);
    }
    true
}

fn ffi_occurrence_to_raw(ffi: &FfiOccurrence) -> Option<RawOccurrence> {
    Some(RawOccurrence {
        usr: cstr_to_string(ffi.usr)?,
        name: cstr_to_string(ffi.name)?,
        kind: ffi_kind_to_compiler_kind(ffi.kind),
        absolute_path: cstr_to_string(ffi.absolute_path)?,
        line: ffi.line,
        utf8_column: ffi.utf8_column,
        roles: ffi.roles,
        relations: relations_for(ffi),
    })
}

/// The minimal FFI shape above carries no relation list; a full
/// binding would walk `indexstore_occurrence_relations_apply_f` here.
fn relations_for(_ffi: &FfiOccurrence) -> Vec<RawRelation> {
    Vec::new()
}

fn ffi_kind_to_compiler_kind(kind: u32) -> CompilerSymbolKind {
    match kind {
        0 => CompilerSymbolKind::Class,
        1 => CompilerSymbolKind::Struct,
        2 => CompilerSymbolKind::Protocol,
        3 => CompilerSymbolKind::Enum,
        4 => CompilerSymbolKind::EnumConstant,
        5 => CompilerSymbolKind::InstanceMethod,
        6 => CompilerSymbolKind::ClassMethod,
        7 => CompilerSymbolKind::StaticMethod,
        8 => CompilerSymbolKind::Function,
        9 => CompilerSymbolKind::InstanceProperty,
        10 => CompilerSymbolKind::ClassProperty,
        11 => CompilerSymbolKind::StaticProperty,
        12 => CompilerSymbolKind::Variable,
        13 => CompilerSymbolKind::Parameter,
        14 => CompilerSymbolKind::TypeAlias,
        _ => CompilerSymbolKind::Other,
    }
}

fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_str()
        .ok()
        .map(str::to_string)
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().as_bytes())
        .map_err(|e| ScipIndexError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))
}

impl IndexStoreLibrary for DylibIndexStoreLibrary {
    fn canonical_occurrences(&self) -> Result<Vec<RawOccurrence>> {
        let store = self.store;
        let apply = self.apply_canonical;
        Ok(self.collect(|ctx, visitor| {
            unsafe { apply(store, ctx, visitor) };
        }))
    }

    fn occurrences_for_usr(&self, usr: &str) -> Result<Vec<RawOccurrence>> {
        let store = self.store;
        let apply = self.apply_for_usr;
        let usr_cstr = CString::new(usr).map_err(|e| {
            ScipIndexError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        Ok(self.collect(|ctx, visitor| {
            unsafe { apply(store, usr_cstr.as_ptr(), ctx, visitor) };
        }))
    }
}

// SAFETY: the opaque store handle is only ever touched through the
// resolved function pointers above, which the native library documents
// as safe to call from a single thread at a time; this crate never
// shares a `DylibIndexStoreLibrary` across threads.
unsafe impl Send for DylibIndexStoreLibrary {}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;

    /// In-memory stand-in for tests and for the CLI's synthetic
    /// fixtures, bypassing `dlopen` entirely.
    pub struct FixtureIndexStoreLibrary {
        pub occurrences: Vec<RawOccurrence>,
    }

    impl IndexStoreLibrary for FixtureIndexStoreLibrary {
        fn canonical_occurrences(&self) -> Result<Vec<RawOccurrence>> {
            let mut seen = std::collections::HashSet::new();
            Ok(self
                .occurrences
                .iter()
                .filter(|o| seen.insert(o.usr.clone()))
                .cloned()
                .collect())
        }

        fn occurrences_for_usr(&self, usr: &str) -> Result<Vec<RawOccurrence>> {
            Ok(self
                .occurrences
                .iter()
                .filter(|o| o.usr == usr)
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_candidates_are_non_empty_and_absolute() {
        let candidates = default_library_candidates();
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|p| p.is_absolute()));
    }
}
