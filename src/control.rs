#![allow(dead_code, unused_imports)]
use allocator_api2::alloc::Allocator;
use std::{
    alloc::Layout,
    mem::MaybeUninit,
    ptr::{ self, NonNull }
};

// Bookkeeping shared by every control block layout.
// uses: strong owners keeping the pointee alive
// weaks: observers keeping only this block's storage alive
pub(crate) struct RefCounts {
    pub uses: usize,
    pub weaks: usize
}

impl RefCounts {
    fn new() -> Self { Self { uses: 1, weaks: 0 } }
}

// One contract over both physical layouts, so the handle types never need to
// know whether the pointee shares the block's allocation.
pub(crate) trait ControlBlock {
    fn counts(&self) -> &RefCounts;
    fn counts_mut(&mut self) -> &mut RefCounts;
    fn pointee_addr(&self) -> *mut u8;
    // must run at most once, only after the last strong owner is gone
    unsafe fn destroy_pointee(&mut self);
    // frees the block's own storage; nothing may touch the block afterwards
    unsafe fn release_storage(&mut self);
}

// std::default_delete
pub struct DefaultDelete;

/// Cleanup policy invoked on the stored pointer when the last strong owner
/// disappears. Any `FnMut(*mut T)` qualifies.
pub trait Deleter<T: ?Sized> {
    unsafe fn delete(&mut self, ptr: *mut T);
}

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: *mut T) {
        unsafe { drop(Box::from_raw(ptr)) }
    }
}

impl<T, F> Deleter<T> for F
where T: ?Sized,
      F: FnMut(*mut T)
{
    unsafe fn delete(&mut self, ptr: *mut T) { self(ptr) }
}

// Layout for a pointee that was allocated separately: the block stores the
// caller's pointer together with the deleter and allocator it was given.
pub(crate) struct DirectBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    counts: RefCounts,
    ptr: Option<NonNull<T>>,
    deleter: D,
    alloc: A
}

impl<T, D, A> DirectBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    pub(crate) fn allocate(ptr: *mut T, deleter: D, alloc: A) -> NonNull<Self> {
        let raw = alloc.allocate(Layout::new::<Self>()).unwrap().as_ptr() as *mut Self;
        unsafe {
            raw.write(Self { counts: RefCounts::new(), ptr: NonNull::new(ptr), deleter, alloc });
            NonNull::new_unchecked(raw)
        }
    }
}

impl<T, D, A> ControlBlock for DirectBlock<T, D, A>
where T: ?Sized,
      D: Deleter<T>,
      A: Allocator
{
    fn counts(&self) -> &RefCounts { &self.counts }
    fn counts_mut(&mut self) -> &mut RefCounts { &mut self.counts }

    fn pointee_addr(&self) -> *mut u8 {
        match self.ptr {
            Some(p) => p.as_ptr().cast(),
            None => ptr::null_mut()
        }
    }

    unsafe fn destroy_pointee(&mut self) {
        // take() clears the slot first, the deleter can never run twice
        if let Some(p) = self.ptr.take() {
            unsafe { self.deleter.delete(p.as_ptr()) };
        }
    }

    unsafe fn release_storage(&mut self) {
        unsafe {
            let alloc = ptr::read(&self.alloc);
            ptr::drop_in_place(&mut self.deleter);
            alloc.deallocate(NonNull::new_unchecked((self as *mut Self).cast()), Layout::new::<Self>());
        }
    }
}

// Layout for the make_shared path: the pointee is a member of the block, so
// one allocation covers both and stays mapped until the last observer leaves.
pub(crate) struct CombinedBlock<T, A>
where A: Allocator
{
    counts: RefCounts,
    alloc: A,
    value: MaybeUninit<T>
}

impl<T, A> CombinedBlock<T, A>
where A: Allocator
{
    pub(crate) fn allocate(alloc: A, value: T) -> NonNull<Self> {
        let raw = alloc.allocate(Layout::new::<Self>()).unwrap().as_ptr() as *mut Self;
        unsafe {
            raw.write(Self { counts: RefCounts::new(), alloc, value: MaybeUninit::new(value) });
            NonNull::new_unchecked(raw)
        }
    }

    pub(crate) fn value_ptr(this: NonNull<Self>) -> NonNull<T> {
        unsafe { NonNull::new_unchecked((&raw mut (*this.as_ptr()).value).cast::<T>()) }
    }
}

impl<T, A> ControlBlock for CombinedBlock<T, A>
where A: Allocator
{
    fn counts(&self) -> &RefCounts { &self.counts }
    fn counts_mut(&mut self) -> &mut RefCounts { &mut self.counts }

    fn pointee_addr(&self) -> *mut u8 { self.value.as_ptr() as *mut u8 }

    unsafe fn destroy_pointee(&mut self) {
        unsafe { ptr::drop_in_place(self.value.as_mut_ptr()) };
    }

    unsafe fn release_storage(&mut self) {
        unsafe {
            let alloc = ptr::read(&self.alloc);
            alloc.deallocate(NonNull::new_unchecked((self as *mut Self).cast()), Layout::new::<Self>());
        }
    }
}
