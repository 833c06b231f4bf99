use std::{cell::Cell, fmt, ptr::NonNull};

use crate::{block::Block, Strong};

/// A weak pointer to an allocation. It never keeps the value alive, only the counters.
///
/// A `Weak` is linked to an allocation only while it is useful: creating one from a `Strong`
/// whose value is already gone yields an empty `Weak`, and a failed [`lock`][Weak::lock] unlinks
/// it on the spot.
pub struct Weak<T>
where
    T: ?Sized,
{
    ptr: Cell<Option<NonNull<T>>>,
    block: Cell<Option<NonNull<Block>>>,
}

impl<T> Drop for Weak<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        self.unlink();
    }
}

impl<T> fmt::Debug for Weak<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("Weak");
        let strong = self.lock();
        if let Some(value) = strong.get() {
            f.field(&value);
        }
        f.finish()
    }
}

impl<T> Weak<T>
where
    T: ?Sized,
{
    /// Creates an empty `Weak`.
    pub const fn new() -> Self {
        Weak {
            ptr: Cell::new(None),
            block: Cell::new(None),
        }
    }

    /// See [`Strong::downgrade`].
    pub(crate) fn new_from(strong: &Strong<T>) -> Self {
        let (ptr, block) = strong.parts();
        Weak::link(ptr, block)
    }

    fn link(ptr: Option<NonNull<T>>, block: Option<NonNull<Block>>) -> Self {
        match block {
            Some(b) if unsafe { b.as_ref() }.has_shared_references() => {
                unsafe { b.as_ref() }.add_weak();
                Weak {
                    ptr: Cell::new(ptr),
                    block: Cell::new(Some(b)),
                }
            }
            _ => Weak::new(),
        }
    }

    fn unlink(&self) {
        self.ptr.set(None);
        if let Some(block) = self.block.take() {
            unsafe { Block::release_weak(block) };
        }
    }

    /// Creates a strong pointer to the allocation. Returns an empty `Strong` if the value is
    /// gone, in which case this `Weak` lets go of the allocation as well.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::{Strong, Weak};
    /// let s = Strong::new(5);
    /// let w = Weak::from(&s);
    ///
    /// assert!(*w.lock() == 5);
    ///
    /// drop(s);
    /// assert!(w.lock().is_null());
    /// assert!(w.expired());
    /// ```
    pub fn lock(&self) -> Strong<T> {
        let Some(block) = self.block.get() else {
            return Strong::null();
        };

        let b = unsafe { block.as_ref() };
        if !b.has_shared_references() {
            self.unlink();
            return Strong::null();
        }

        b.add_shared();
        Strong::from_parts(self.ptr.get(), Some(block))
    }

    /// Like [`Weak::lock`], but returns `None` instead of a `Strong` without a value.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let strong = self.lock();
        if strong.is_null() {
            None
        } else {
            Some(strong)
        }
    }

    /// True if the value is gone or this `Weak` was never linked.
    pub fn expired(&self) -> bool {
        self.block
            .get()
            .map_or(true, |b| !unsafe { b.as_ref() }.has_shared_references())
    }

    /// Lets go of the allocation.
    pub fn reset(&mut self) {
        self.unlink();
    }

    /// A `Weak` to something reachable from the value, sharing this one's allocation. See
    /// [`Strong::project`]. The value has to be alive for `f` to look at it, so an expired
    /// `Weak` projects to an empty one.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::{Strong, Weak};
    /// let s = Strong::new((1, 2));
    /// let w = Weak::from(&s);
    /// let second = w.project(|pair| &pair.1);
    ///
    /// assert!(*second.lock() == 2);
    /// assert!(second.ptr_eq(&w));
    /// ```
    pub fn project<U, F>(&self, f: F) -> Weak<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        self.lock().project(f).downgrade()
    }

    /// True if both are linked to the same allocation.
    pub fn ptr_eq<U>(&self, other: &Weak<U>) -> bool
    where
        U: ?Sized,
    {
        self.block.get() == other.block.get()
    }

    #[cfg(any(test, feature = "introspection"))]
    pub fn strong_count(&self) -> u32 {
        self.block
            .get()
            .map_or(0, |b| unsafe { b.as_ref() }.strong())
    }

    #[cfg(any(test, feature = "introspection"))]
    pub fn weak_count(&self) -> u32 {
        self.block.get().map_or(0, |b| unsafe { b.as_ref() }.weak())
    }
}

impl<T> Clone for Weak<T>
where
    T: ?Sized,
{
    /// Links the copy only if the value is still alive.
    fn clone(&self) -> Self {
        Weak::link(self.ptr.get(), self.block.get())
    }
}

impl<T> Default for Weak<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Weak::new()
    }
}

impl<T> From<&Strong<T>> for Weak<T>
where
    T: ?Sized,
{
    fn from(value: &Strong<T>) -> Self {
        Weak::new_from(value)
    }
}
