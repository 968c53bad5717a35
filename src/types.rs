//! Runtime type descriptors, as far as the exception machinery needs them:
//! an equality check to match catch clauses, and a printable name for the
//! unhandled-exception report.

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Identifies the runtime type of a thrown value.
pub trait TypeDescriptor: fmt::Display {
    fn equals(&self, other: &Self) -> bool;
}

/// A length-prefixed array as laid out by generated code.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct YSlice<T> {
    pub len: u64,
    pub ptr: *const T,
}

impl<T> YSlice<T> {
    pub const fn empty() -> Self {
        YSlice {
            len: 0,
            ptr: core::ptr::null(),
        }
    }

    pub fn from_slice(slice: &[T]) -> Self {
        YSlice {
            len: slice.len() as u64,
            ptr: slice.as_ptr(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must point to `len` initialized elements that outlive `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        core::slice::from_raw_parts(self.ptr, self.len as usize)
    }
}

/// The type descriptor generated code passes around.
///
/// `hash` is a stable identity for the type, `name` its fully qualified
/// name in UTF-32 code points.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TypeInfo {
    pub hash: u64,
    pub name: YSlice<u32>,
}

impl TypeInfo {
    pub fn name_chars(&self) -> impl Iterator<Item = char> + '_ {
        // SAFETY: type descriptors are emitted as constants by the compiler.
        let code_points = unsafe { self.name.as_slice() };
        code_points
            .iter()
            .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn structurally_equal(&self, other: &TypeInfo) -> bool {
        self.hash == other.hash && self.name_chars().eq(other.name_chars())
    }
}

/// Signature of the language's own `core::typeinfo::equals`.
pub type TypeEquals = extern "C" fn(TypeInfo, TypeInfo) -> bool;

static TYPE_EQUALS: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Registers the comparator used for [`TypeInfo`]. Until one is registered
/// descriptors compare by hash and name.
pub fn set_type_equals(equals: Option<TypeEquals>) {
    let ptr = equals.map_or(core::ptr::null_mut(), |f| f as *mut ());
    TYPE_EQUALS.store(ptr, Ordering::Release);
}

fn type_equals() -> Option<TypeEquals> {
    let ptr = TYPE_EQUALS.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        // SAFETY: only ever stored from a `TypeEquals` in `set_type_equals`.
        Some(unsafe { core::mem::transmute::<*mut (), TypeEquals>(ptr) })
    }
}

impl TypeDescriptor for TypeInfo {
    fn equals(&self, other: &Self) -> bool {
        match type_equals() {
            Some(equals) => equals(*self, *other),
            None => self.structurally_equal(other),
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name_chars().try_for_each(|c| fmt::Write::write_char(f, c))
    }
}
