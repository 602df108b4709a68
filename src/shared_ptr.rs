#![allow(dead_code, unused_imports)]
use allocator_api2::alloc::{ Allocator, Global };
use std::{
    fmt::{ Debug, Display },
    mem::ManuallyDrop,
    ops::Deref,
    ptr::{ self, NonNull }
};
use crate::control::{ CombinedBlock, ControlBlock, DefaultDelete, Deleter, DirectBlock };
use crate::weak_ptr::WeakPtr;

// std::shared_ptr
// https://en.cppreference.com/w/cpp/memory/shared_ptr
//
// Strong-owning handle over a control block. The pointee pointer is cached in
// the handle so dereferencing never goes through the block; the block is the
// authority for counts and teardown.
pub struct SharedPtr<T: ?Sized> {
    pub(crate) cb: Option<NonNull<dyn ControlBlock>>,
    pub(crate) ptr: Option<NonNull<T>>
}

impl<T: ?Sized> SharedPtr<T> {
    pub fn new() -> Self { Self { cb: None, ptr: None } }

    /// Returns a reference to the pointee without any null check. Calling
    /// this on an empty handle is the caller's bug.
    pub fn get(&self) -> &T { unsafe { self.ptr.unwrap_unchecked().as_ref() } }

    /// Mutable counterpart of [`get`](Self::get). Same precondition, and the
    /// caller must also guarantee no other handle is reading the pointee.
    pub fn get_mut(&mut self) -> &mut T { unsafe { self.ptr.unwrap_unchecked().as_mut() } }

    pub fn use_count(&self) -> usize {
        match self.cb {
            Some(cb) => unsafe { cb.as_ref() }.counts().uses,
            None => 0
        }
    }

    pub fn weak_count(&self) -> usize {
        match self.cb {
            Some(cb) => unsafe { cb.as_ref() }.counts().weaks,
            None => 0
        }
    }

    pub fn unique(&self) -> bool { self.use_count() == 1 }

    /// Drops this handle's ownership, leaving it empty. The pointee is
    /// destroyed here iff this was the last strong owner.
    pub fn reset(&mut self) { *self = Self::new(); }

    pub fn downgrade(&self) -> WeakPtr<T> {
        if let Some(cb) = self.cb {
            unsafe { (*cb.as_ptr()).counts_mut().weaks += 1 };
        }
        WeakPtr { cb: self.cb, ptr: self.ptr }
    }

    /// Re-points the handle at something reachable from the current pointee,
    /// keeping the same ownership group: an unsizing coercion
    /// (`|v| v as &dyn Trait`) or a field projection (`|v| &v.field`).
    /// The closure shape guarantees the view stays inside the live object.
    pub fn cast<U, F>(this: Self, op: F) -> SharedPtr<U>
    where U: ?Sized,
          F: for<'a> FnOnce(&'a T) -> &'a U
    {
        let this = ManuallyDrop::new(this);
        match this.ptr {
            Some(p) => SharedPtr { cb: this.cb, ptr: Some(NonNull::from(op(unsafe { p.as_ref() }))) },
            None => SharedPtr { cb: this.cb, ptr: None }
        }
    }
}

impl<T> SharedPtr<T>
where T: ?Sized + 'static
{
    /// Takes ownership of a separately-allocated pointee. A null `ptr` is
    /// allowed and produces an owning group around a null pointee.
    pub fn from_ptr(ptr: *mut T) -> Self { Self::from_ptr_in(ptr, DefaultDelete, Global) }

    pub fn from_ptr_with<D>(ptr: *mut T, deleter: D) -> Self
    where D: Deleter<T> + 'static
    {
        Self::from_ptr_in(ptr, deleter, Global)
    }

    pub fn from_ptr_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where D: Deleter<T> + 'static,
          A: Allocator + 'static
    {
        let block = DirectBlock::allocate(ptr, deleter, alloc);
        Self {
            cb: Some(unsafe { NonNull::new_unchecked(block.as_ptr() as *mut dyn ControlBlock) }),
            ptr: NonNull::new(ptr)
        }
    }
}

impl<T> SharedPtr<T> {
    /// Raw pointee address: the cached pointer when present, the block's own
    /// pointee address as fallback, null for an empty handle.
    pub fn get_ptr(&self) -> *mut T {
        match self.ptr {
            Some(p) => p.as_ptr(),
            None => match self.cb {
                Some(cb) => unsafe { cb.as_ref() }.pointee_addr() as *mut T,
                None => ptr::null_mut()
            }
        }
    }

    /// Drops the current ownership and re-seeds the handle as the single
    /// strong owner of `ptr` with the default deleter and allocator.
    pub fn reset_ptr(&mut self, ptr: *mut T)
    where T: 'static
    {
        *self = Self::from_ptr(ptr);
    }
}

/// Constructs the pointee inside the control block's own allocation and
/// returns the first strong owner for it.
pub fn make_shared<T>(value: T) -> SharedPtr<T>
where T: 'static
{
    allocate_shared(Global, value)
}

pub fn allocate_shared<T, A>(alloc: A, value: T) -> SharedPtr<T>
where T: 'static,
      A: Allocator + 'static
{
    let block = CombinedBlock::allocate(alloc, value);
    SharedPtr {
        cb: Some(unsafe { NonNull::new_unchecked(block.as_ptr() as *mut dyn ControlBlock) }),
        ptr: Some(CombinedBlock::value_ptr(block))
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(cb) = self.cb {
            unsafe { (*cb.as_ptr()).counts_mut().uses += 1 };
        }
        Self { cb: self.cb, ptr: self.ptr }
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(cb) = self.cb {
            let cb = cb.as_ptr();
            unsafe {
                // a handle dropped from inside the pointee's destructor sees
                // uses == 0 and leaves teardown to the outer frame
                if (*cb).counts().uses == 0 { return; }
                (*cb).counts_mut().uses -= 1;
                if (*cb).counts().uses == 0 {
                    // weaks is read before destruction: if the pointee's
                    // destructor drops the last WeakPtr, that WeakPtr
                    // releases the storage and this frame must not
                    let weaks = (*cb).counts().weaks;
                    (*cb).destroy_pointee();
                    if weaks == 0 {
                        (*cb).release_storage();
                    }
                }
            }
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    fn default() -> Self { Self::new() }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;
    fn deref(&self) -> &T { self.get() }
}

impl<T> Debug for SharedPtr<T>
where T: ?Sized + Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.cb, self.ptr) {
            (Some(_), Some(p)) => write!(f, "SharedPtr {{ data: {:?}, strong: {}, weak: {} }}",
                unsafe { p.as_ref() }, self.use_count(), self.weak_count()),
            (Some(_), None) => write!(f, "SharedPtr {{ data: null, strong: {}, weak: {} }}",
                self.use_count(), self.weak_count()),
            _ => write!(f, "SharedPtr {{ empty }}")
        }
    }
}

impl<T> Display for SharedPtr<T>
where T: ?Sized + Display
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ptr {
            Some(p) if self.cb.is_some() => write!(f, "{}", unsafe { p.as_ref() }),
            _ => write!(f, "null")
        }
    }
}
