#![allow(dead_code, unused_imports)]
use std::{
    fmt::{ Debug, Display },
    ptr::NonNull
};
use crate::control::ControlBlock;
use crate::shared_ptr::SharedPtr;

// std::weak_ptr
// https://en.cppreference.com/w/cpp/memory/weak_ptr
//
// Non-owning observer over a control block. Holds the pointee pointer only as
// type information for lock(); it is never dereferenced while the pointee may
// already be gone. Keeps the block's storage alive, not the pointee.
pub struct WeakPtr<T: ?Sized> {
    pub(crate) cb: Option<NonNull<dyn ControlBlock>>,
    pub(crate) ptr: Option<NonNull<T>>
}

impl<T: ?Sized> WeakPtr<T> {
    pub fn new() -> Self { Self { cb: None, ptr: None } }

    pub fn expired(&self) -> bool {
        match self.cb {
            Some(cb) => unsafe { cb.as_ref() }.counts().uses == 0,
            None => true
        }
    }

    /// Promotes to a strong owner while the pointee is still alive, or
    /// returns an empty handle. This is the only path from weak to strong.
    pub fn lock(&self) -> SharedPtr<T> {
        match self.cb {
            Some(cb) if unsafe { cb.as_ref() }.counts().uses > 0 => {
                unsafe { (*cb.as_ptr()).counts_mut().uses += 1 };
                SharedPtr { cb: self.cb, ptr: self.ptr }
            }
            _ => SharedPtr::new()
        }
    }

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

    /// Weak counterpart of [`SharedPtr::cast`]. Promotes, re-points the view,
    /// and demotes again; an already-expired observer yields an empty one,
    /// since there is no live pointee to project through.
    pub fn cast<U, F>(this: Self, op: F) -> WeakPtr<U>
    where U: ?Sized,
          F: for<'a> FnOnce(&'a T) -> &'a U
    {
        let strong = this.lock();
        if strong.cb.is_none() { return WeakPtr::new(); }
        SharedPtr::cast(strong, op).downgrade()
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(cb) = self.cb {
            unsafe { (*cb.as_ptr()).counts_mut().weaks += 1 };
        }
        Self { cb: self.cb, ptr: self.ptr }
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(cb) = self.cb {
            let cb = cb.as_ptr();
            unsafe {
                let counts = (*cb).counts_mut();
                if counts.weaks > 0 { counts.weaks -= 1; }
                // the last observer of an already-destroyed pointee owns the
                // storage release
                if counts.weaks == 0 && counts.uses == 0 {
                    (*cb).release_storage();
                }
            }
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Debug for WeakPtr<T>
where T: ?Sized + Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ptr {
            Some(p) if !self.expired() => write!(f, "WeakPtr {{ data: {:?}, strong: {}, weak: {} }}",
                unsafe { p.as_ref() }, self.use_count(), self.weak_count()),
            _ => write!(f, "WeakPtr {{ expired }}")
        }
    }
}

impl<T> Display for WeakPtr<T>
where T: ?Sized + Display
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ptr {
            Some(p) if !self.expired() => write!(f, "{}", unsafe { p.as_ref() }),
            _ => write!(f, "None")
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::WeakPtr;
    use crate::shared_ptr::{ allocate_shared, make_shared };
    use crate::shared_ptr::tests::{ CountingAlloc, DropTally, Shape, Square };
    use std::{
        cell::Cell,
        error::Error,
        rc::Rc
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    #[test]
    fn downgrade_tracks_observers() -> TestReturn {
        let p = make_shared(200);
        let w = p.downgrade();
        assert!(p.use_count() == 1, "Downgrade must not add a strong owner");
        assert!(p.weak_count() == 1, "Downgrade should add one observer");
        let w2 = w.clone();
        assert!(p.weak_count() == 2, "Cloned observer should be counted");
        drop(w2);
        assert!(p.weak_count() == 1, "Dropped observer should be uncounted");
        drop(w);
        assert!(p.weak_count() == 0, "All observers gone");
        Ok(())
    }

    #[test]
    fn expired_after_last_strong_owner() -> TestReturn {
        let mut p = make_shared(300);
        let w = p.downgrade();
        assert!(!w.expired(), "Observer of a live group is not expired");
        p.reset();
        assert!(w.expired(), "Observer must expire with the last strong owner");
        assert!(w.use_count() == 0, "Expired observer reports zero owners");
        assert!(w.lock().get_ptr().is_null(), "Locking an expired observer yields an empty handle");
        Ok(())
    }

    #[test]
    fn lock_promotes_while_alive() -> TestReturn {
        let p = make_shared(7);
        let w = p.downgrade();
        let before = p.use_count();
        let locked = w.lock();
        assert!(locked.use_count() == before + 1, "Lock should add exactly one owner");
        assert!(locked.get_ptr() == p.get_ptr(), "Lock should yield the same pointee");
        assert!(*locked == 7, "Promoted handle should read the pointee");
        Ok(())
    }

    #[test]
    fn weak_does_not_keep_pointee_alive() -> TestReturn {
        let drops = Rc::new(Cell::new(0usize));
        let p = make_shared(DropTally::new(drops.clone()));
        let w = p.downgrade();
        drop(p);
        assert!(drops.get() == 1, "Pointee must die with its last strong owner");
        assert!(w.expired(), "Observer should see the death");
        Ok(())
    }

    #[test]
    fn surviving_observer_releases_storage() -> TestReturn {
        let alloc = CountingAlloc::new();
        let stats = alloc.stats();
        let w;
        {
            let p = allocate_shared(alloc, 11);
            w = p.downgrade();
        }
        assert!(stats.allocated.get() == 1, "Combined group costs one allocation");
        assert!(stats.deallocated.get() == 0, "Observer must keep the block storage mapped");
        drop(w);
        assert!(stats.deallocated.get() == 1, "Last observer returns the block storage");
        Ok(())
    }

    #[test]
    fn empty_observer() -> TestReturn {
        let w: WeakPtr<i32> = WeakPtr::new();
        assert!(w.expired(), "Default observer is expired");
        assert!(w.use_count() == 0, "Default observer has no owners");
        assert!(w.lock().use_count() == 0, "Locking a default observer yields an empty handle");
        Ok(())
    }

    #[test]
    fn cast_follows_the_group() -> TestReturn {
        let p = make_shared(Square);
        let w = p.downgrade();
        let ws: WeakPtr<dyn Shape> = WeakPtr::cast(w.clone(), |v| v as &dyn Shape);
        assert!(p.weak_count() == 2, "Cast observer stays in the same group");
        assert!(ws.lock().sides() == 4, "Cast observer should lock into a usable view");
        assert!(p.use_count() == 1, "Temporary promotion must be undone");
        drop(p);
        assert!(ws.expired(), "Cast observer expires with the group");
        let dead: WeakPtr<dyn Shape> = WeakPtr::cast(w, |v| v as &dyn Shape);
        assert!(dead.expired(), "Casting an expired observer yields an empty one");
        assert!(dead.lock().use_count() == 0, "An empty observer cannot be promoted");
        Ok(())
    }

    #[test]
    fn pointee_destructor_may_drop_the_last_observer() -> TestReturn {
        struct SelfRef {
            me: Option<WeakPtr<SelfRef>>
        }
        let alloc = CountingAlloc::new();
        let stats = alloc.stats();
        {
            let mut p = allocate_shared(alloc, SelfRef { me: None });
            let w = p.downgrade();
            p.get_mut().me = Some(w);
        }
        // the destructor of SelfRef dropped the last observer, which released
        // the storage; the dropping SharedPtr must not release it again
        assert!(stats.allocated.get() == 1, "Group costs one allocation");
        assert!(stats.deallocated.get() == 1, "Storage released exactly once");
        Ok(())
    }
}
