// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod coroutine;
pub mod fail;
pub mod limits;
pub mod logging;
pub mod queue;
pub mod scheduler;

pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod stack;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    convert::{
        AsMut,
        AsRef,
    },
    ops::{
        Deref,
        DerefMut,
    },
    ptr::NonNull,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The SharedObject wraps an object that will be shared across coroutines.
pub struct SharedObject<T>(Rc<T>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }

    /// Checks whether two shared objects point to the same underlying allocation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.0, &other.0)
    }

    /// Returns the address of the underlying allocation.
    pub(crate) fn as_nonnull(this: &Self) -> NonNull<T> {
        // Safety: an Rc allocation is never null.
        unsafe { NonNull::new_unchecked(Rc::as_ptr(&this.0) as *mut T) }
    }

    /// Consumes this handle and leaks its reference as a raw pointer. The reference must later be reconstituted with
    /// [SharedObject::from_raw], otherwise the underlying allocation is never freed.
    pub(crate) fn into_raw(this: Self) -> NonNull<T> {
        // Safety: an Rc allocation is never null.
        unsafe { NonNull::new_unchecked(Rc::into_raw(this.0) as *mut T) }
    }

    /// Reconstitutes a handle previously leaked with [SharedObject::into_raw].
    ///
    /// # Safety
    /// The pointer must come from [SharedObject::into_raw] and each leaked reference may be reconstituted only once.
    pub(crate) unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self(Rc::from_raw(ptr.as_ptr()))
    }

    #[cfg(test)]
    pub(crate) fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.0)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Dereferences a shared object for use.
impl<T> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a mutable reference to a shared object for use. This breaks Rust's ownership model because it allows
/// more than one mutable dereference of a shared object at a time. Strand requires this because multiple coroutines
/// hold references to shared objects at the same time; however, the runtime also ensures that only one coroutine runs
/// at a time. Due to this design, Rust's static borrow checker is not able to ensure memory safety and we have chosen
/// not to use the dynamic borrow checker. Instead, shared objects should be used judiciously across coroutines with
/// the understanding that the shared object may change/be mutated whenever the coroutine yields.
impl<T> DerefMut for SharedObject<T> {
    fn deref_mut<'a>(&'a mut self) -> &'a mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

/// Returns a reference to the interior object, which is borrowed for directly accessing the value. Generally deref
/// should be used unless you absolutely need to borrow the reference.
impl<T> AsRef<T> for SharedObject<T> {
    fn as_ref(&self) -> &T {
        self.0.as_ref()
    }
}

/// Returns a mutable reference to the interior object. Similar to DerefMut, this breaks Rust's ownership properties
/// and should be considered unsafe. However, it is safe to use if and only if we only run one coroutine at a time.
impl<T> AsMut<T> for SharedObject<T> {
    fn as_mut<'a>(&'a mut self) -> &'a mut T {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
