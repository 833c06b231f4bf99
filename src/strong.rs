use std::{
    any::Any, cmp::Ordering, fmt, hash::Hash, marker::PhantomData, mem, ops::Deref, ptr,
    ptr::NonNull,
};

use crate::{
    block::Block,
    config::check,
    pair::{Pair, PairLayout},
    Allocator, Error, ObserveSelf, Weak, HEAP,
};

/// A reference counted pointer, similar to [`Rc`].
///
/// A `Strong` is either empty or one of the owners of a value. The value is dropped when the
/// last `Strong` sharing it goes away. [`Weak`] pointers to the same value can outlive it.
///
/// Values are placed in one of two ways:
/// - [`Strong::new`] and the other `new_*` constructors put the counters and the value into a
///   single allocation.
/// - [`Strong::from_box`] takes over an existing `Box` and allocates the counters separately.
///
/// The counters are not atomic, so `Strong` is neither `Send` nor `Sync`.
///
/// [`Rc`]: std::rc::Rc
pub struct Strong<T>
where
    T: ?Sized,
{
    ptr: Option<NonNull<T>>,
    block: Option<NonNull<Block>>,
    _marker: PhantomData<T>,
}

impl<T> Drop for Strong<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> fmt::Debug for Strong<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(null)"),
        }
    }
}

impl<T> fmt::Pointer for Strong<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T> Strong<T> {
    /// Creates a new allocation holding both the value and its counters.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::new(5);
    /// assert!(*s == 5);
    /// assert!(s.use_count() == 1);
    /// ```
    pub fn new(value: T) -> Self {
        Self::new_with_in(|| value, &HEAP)
    }

    /// Like [`Strong::new`], but returns an error instead of aborting when memory runs out.
    pub fn try_new(value: T) -> Result<Self, Error> {
        Self::try_new_with_in(|| value, &HEAP)
    }

    /// Like [`Strong::new`], taking memory from `allocator`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::{Strong, HEAP};
    /// let s = Strong::new_in(String::from("a"), &HEAP);
    /// assert!(*s == "a");
    /// ```
    pub fn new_in(value: T, allocator: &'static dyn Allocator) -> Self {
        Self::new_with_in(|| value, allocator)
    }

    pub fn try_new_in(value: T, allocator: &'static dyn Allocator) -> Result<Self, Error> {
        Self::try_new_with_in(|| value, allocator)
    }

    /// Allocates first, then builds the value in place by calling `f`.
    ///
    /// If `f` panics the allocation is released before the panic continues.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::new_with(|| vec![1, 2, 3]);
    /// assert!(s.len() == 3);
    /// ```
    pub fn new_with<F>(f: F) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::new_with_in(f, &HEAP)
    }

    pub fn new_with_in<F>(f: F, allocator: &'static dyn Allocator) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::try_new_with_in(f, allocator).unwrap_or_else(|e| e.raise())
    }

    /// The fallible form of every co-allocating constructor. `f` is not called if the
    /// allocation fails.
    pub fn try_new_with_in<F>(f: F, allocator: &'static dyn Allocator) -> Result<Self, Error>
    where
        F: FnOnce() -> T,
    {
        let layout = PairLayout::of::<Block, T>()?;
        let guard = PairGuard {
            pair: Pair::allocate(layout, allocator)?,
            allocator,
        };

        // only the value's construction can unwind; the block is written after it
        let payload = guard.pair.second().cast::<T>();
        unsafe { payload.as_ptr().write(f()) };

        let pair = guard.disarm();
        let block = unsafe { Block::inline::<T>(pair, allocator) };

        Ok(Strong::from_parts(Some(payload), Some(block)))
    }

    /// Takes over a boxed value. The counters get an allocation of their own.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::from_box(Box::new(7));
    /// assert!(*s == 7);
    /// ```
    pub fn from_box(value: Box<T>) -> Self {
        Self::try_from_box_in(value, &HEAP).unwrap_or_else(|e| e.raise())
    }

    /// Like [`Strong::from_box`], allocating the counters from `allocator`. If that fails the
    /// value is dropped.
    pub fn try_from_box_in(value: Box<T>, allocator: &'static dyn Allocator) -> Result<Self, Error> {
        let (block, ptr) = Block::standalone(value, allocator)?;

        Ok(Strong::from_parts(Some(ptr), Some(block)))
    }

    /// Takes ownership of a pointer obtained from [`Box::into_raw`]. A null pointer gives an
    /// empty `Strong`.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must come from `Box::into_raw` and must not be owned by anything else.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = unsafe { Strong::from_raw(Box::into_raw(Box::new(3))) };
    /// assert!(*s == 3);
    ///
    /// let n = unsafe { Strong::<i32>::from_raw(std::ptr::null_mut()) };
    /// assert!(n.is_null());
    /// ```
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        if ptr.is_null() {
            Strong::null()
        } else {
            Strong::from_box(Box::from_raw(ptr))
        }
    }

    /// Releases the current value, then takes over `value`.
    pub fn reset_to(&mut self, value: Box<T>) {
        self.reset();
        *self = Strong::from_box(value);
    }

    /// Gets a mutable reference to the value if no other `Strong` or [`Weak`] shares the
    /// allocation.
    ///
    /// Rust has no read-only qualifier to cast away: mutability belongs to the borrow, and this
    /// is the only way to borrow mutably through a `Strong`. Returns `None` for a `Strong`
    /// obtained through [`Strong::project`] that points somewhere other than the start of the
    /// value. Values wired through [`ObserveSelf`] always hold a weak reference to themselves
    /// and never qualify.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let mut s = Strong::new(1);
    /// *s.get_mut().unwrap() += 1;
    /// assert!(*s == 2);
    ///
    /// let _c = s.clone();
    /// assert!(s.get_mut().is_none());
    /// ```
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let block = unsafe { self.block?.as_ref() };
        let ptr = self.ptr?;

        if block.strong() == 1 && block.weak() == 0 && ptr.cast::<u8>() == block.payload() {
            // rebuilt from the block so the pointer carries the allocation's write access
            Some(unsafe { &mut *block.payload().cast::<T>().as_ptr() })
        } else {
            None
        }
    }

    /// Gets a mutable reference to the value without looking at the counters.
    ///
    /// # Safety
    ///
    /// While the returned reference is alive, the value must not be reached in any other way:
    /// not through another `Strong`, a locked [`Weak`], or a reference taken from either. The
    /// `Strong` must point at the start of the value, not at a part of it reached through
    /// [`Strong::project`].
    ///
    /// # Panics
    ///
    /// Panics if there is no value.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let mut s = Strong::new(1);
    /// let c = s.clone();
    /// unsafe { *s.get_mut_unchecked() += 1 };
    /// assert!(*c == 2);
    /// ```
    pub unsafe fn get_mut_unchecked(&mut self) -> &mut T {
        let (Some(ptr), Some(block)) = (self.ptr, self.block) else {
            panic!("dereferenced a null Strong");
        };

        let payload = block.as_ref().payload();
        check!(
            ptr.cast::<u8>() == payload,
            "mutable access through a projected Strong"
        );
        &mut *payload.cast::<T>().as_ptr()
    }

    /// Gets a raw pointer to the value, or null.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr() as *const T)
    }
}

impl<T> Strong<T>
where
    T: ObserveSelf,
{
    /// [`Strong::new`] for a value that observes itself. See [`ObserveSelf`].
    pub fn new_observed(value: T) -> Self {
        Strong::new(value).observed()
    }

    /// [`Strong::from_box`] for a value that observes itself.
    pub fn from_box_observed(value: Box<T>) -> Self {
        Strong::from_box(value).observed()
    }

    /// Points the value's [`SelfSlot`][crate::SelfSlot] at this allocation, unless it already
    /// points somewhere. Does nothing for an empty `Strong`.
    pub fn observed(self) -> Self {
        if let Some(value) = self.get() {
            value.self_slot().wire(&self);
        }
        self
    }
}

impl<T> Strong<T>
where
    T: ?Sized,
{
    /// Creates an empty `Strong`. No memory is allocated.
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::<str>::null();
    /// assert!(s.is_null());
    /// assert!(s.use_count() == 0);
    /// ```
    pub const fn null() -> Self {
        Strong {
            ptr: None,
            block: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<Block>>) -> Self {
        Strong {
            ptr,
            block,
            _marker: PhantomData,
        }
    }

    pub(crate) fn parts(&self) -> (Option<NonNull<T>>, Option<NonNull<Block>>) {
        (self.ptr, self.block)
    }

    /// Gets a reference to the value, or `None` if there is none.
    ///
    /// A `Strong` can share an allocation and still have no value: see
    /// [`Strong::checked_cast`].
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|p| unsafe { p.as_ref() })
    }

    /// Number of `Strong` pointers sharing this allocation, including `self`. Zero for an empty
    /// `Strong`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s1 = Strong::new(5);
    /// let s2 = s1.clone();
    /// assert!(s1.use_count() == 2);
    ///
    /// drop(s2);
    /// assert!(s1.unique());
    /// ```
    pub fn use_count(&self) -> u32 {
        self.block.map_or(0, |b| unsafe { b.as_ref() }.strong())
    }

    pub fn unique(&self) -> bool {
        self.use_count() == 1
    }

    /// True if there is no value to dereference.
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Releases this pointer's share and leaves it empty.
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let mut s = Strong::new(5);
    /// s.reset();
    /// assert!(s.is_null());
    /// ```
    pub fn reset(&mut self) {
        self.ptr = None;
        if let Some(block) = self.block.take() {
            unsafe { Block::release_shared(block) };
        }
    }

    /// Moves the share out, leaving an empty `Strong` behind.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Creates a new weak pointer to the allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::new(5);
    /// let w = s.downgrade();
    ///
    /// assert!(*w.lock() == 5);
    /// drop(s);
    /// assert!(w.lock().is_null());
    /// ```
    pub fn downgrade(&self) -> Weak<T> {
        Weak::new_from(self)
    }

    /// Shares the allocation with a `Strong` to something reachable from the value, such as a
    /// field or the value itself as a trait object. This is the counterpart of an upcast.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// use std::fmt::Display;
    ///
    /// fn first(pair: &(i32, String)) -> &(dyn Display + 'static) {
    ///     &pair.0
    /// }
    ///
    /// let s = Strong::new((1, String::from("b")));
    /// let second = s.project(|pair| &pair.1);
    /// let shown = s.project(first);
    ///
    /// assert!(*second == "b");
    /// assert!(shown.to_string() == "1");
    /// assert!(s.use_count() == 3);
    /// ```
    ///
    /// The value must not borrow anything, otherwise the result could outlive the borrow:
    ///
    /// ```compile_fail
    /// # use ncrc::Strong;
    /// let escaped: Strong<Vec<u64>>;
    /// {
    ///     let local = vec![1, 2, 3];
    ///     let outer = Strong::new(&local);
    ///     escaped = outer.project(|r| *r);
    /// }
    /// assert!(escaped[0] == 1);
    /// ```
    pub fn project<U, F>(&self, f: F) -> Strong<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let ptr = self.get().map(|value| NonNull::from(f(value)));
        self.share(ptr)
    }

    /// Shares the allocation with a `Strong` to whatever `f` finds in the value. When `f` finds
    /// nothing the result has no value but still counts as an owner: test it with
    /// [`Strong::is_null`], and note that [`Strong::use_count`] stays raised until it is
    /// dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::new(Some(4));
    /// let hit = s.checked_cast(|v| v.as_ref());
    /// assert!(*hit == 4);
    ///
    /// let n = Strong::new(None::<i32>);
    /// let miss = n.checked_cast(|v| v.as_ref());
    /// assert!(miss.is_null());
    /// assert!(n.use_count() == 2);
    /// ```
    pub fn checked_cast<U, F>(&self, f: F) -> Strong<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> Option<&U>,
    {
        let ptr = self.get().and_then(f).map(NonNull::from);
        self.share(ptr)
    }

    fn share<U>(&self, ptr: Option<NonNull<U>>) -> Strong<U>
    where
        U: ?Sized,
    {
        if let Some(block) = self.block {
            unsafe { block.as_ref() }.add_shared();
        }
        Strong::from_parts(ptr, self.block)
    }

    /// True if both point to the same allocation, whatever their values.
    pub fn ptr_eq<U>(&self, other: &Strong<U>) -> bool
    where
        U: ?Sized,
    {
        self.block == other.block
    }

    fn addr(&self) -> *const () {
        self.ptr
            .map_or(ptr::null(), |p| p.cast::<()>().as_ptr() as *const ())
    }

    #[cfg(any(test, feature = "introspection"))]
    pub fn strong_count(&self) -> u32 {
        self.use_count()
    }

    #[cfg(any(test, feature = "introspection"))]
    pub fn weak_count(&self) -> u32 {
        self.block.map_or(0, |b| unsafe { b.as_ref() }.weak())
    }
}

impl<T> Strong<T>
where
    T: Any,
{
    /// Erases the value's type. Undo with [`Strong::downcast`].
    pub fn into_any(self) -> Strong<dyn Any> {
        fn erase<T: Any>(value: &T) -> &(dyn Any + 'static) {
            value
        }

        self.project(erase::<T>)
    }
}

impl Strong<dyn Any> {
    /// Shares the allocation with a `Strong<U>` if the value is a `U`, otherwise with a `Strong`
    /// that has no value. See [`Strong::checked_cast`].
    ///
    /// # Examples
    ///
    /// ```
    /// # use ncrc::Strong;
    /// let s = Strong::new(5_u8).into_any();
    /// assert!(*s.downcast::<u8>() == 5);
    /// assert!(s.downcast::<u16>().is_null());
    /// ```
    pub fn downcast<U>(&self) -> Strong<U>
    where
        U: Any,
    {
        self.checked_cast(|value| value.downcast_ref::<U>())
    }
}

impl<T> Clone for Strong<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        self.share(self.ptr)
    }
}

impl<T> Default for Strong<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Strong::null()
    }
}

impl<T> Deref for Strong<T>
where
    T: ?Sized,
{
    type Target = T;

    /// # Panics
    ///
    /// Panics if there is no value.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced a null Strong"),
        }
    }
}

impl<T> From<Box<T>> for Strong<T> {
    fn from(value: Box<T>) -> Self {
        Strong::from_box(value)
    }
}

impl<T, U> PartialEq<Strong<U>> for Strong<T>
where
    T: ?Sized,
    U: ?Sized,
{
    fn eq(&self, other: &Strong<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T, U> PartialEq<*const U> for Strong<T>
where
    T: ?Sized,
    U: ?Sized,
{
    fn eq(&self, other: &*const U) -> bool {
        self.addr() == other.cast::<()>()
    }
}

impl<T, U> PartialEq<Strong<T>> for *const U
where
    T: ?Sized,
    U: ?Sized,
{
    fn eq(&self, other: &Strong<T>) -> bool {
        self.cast::<()>() == other.addr()
    }
}

impl<T> Eq for Strong<T> where T: ?Sized {}

impl<T, U> PartialOrd<Strong<U>> for Strong<T>
where
    T: ?Sized,
    U: ?Sized,
{
    fn partial_cmp(&self, other: &Strong<U>) -> Option<Ordering> {
        Some(Ord::cmp(&self.addr(), &other.addr()))
    }
}

impl<T, U> PartialOrd<*const U> for Strong<T>
where
    T: ?Sized,
    U: ?Sized,
{
    fn partial_cmp(&self, other: &*const U) -> Option<Ordering> {
        Some(Ord::cmp(&self.addr(), &other.cast::<()>()))
    }
}

impl<T, U> PartialOrd<Strong<T>> for *const U
where
    T: ?Sized,
    U: ?Sized,
{
    fn partial_cmp(&self, other: &Strong<T>) -> Option<Ordering> {
        Some(Ord::cmp(&self.cast::<()>(), &other.addr()))
    }
}

impl<T> Ord for Strong<T>
where
    T: ?Sized,
{
    fn cmp(&self, other: &Self) -> Ordering {
        Ord::cmp(&self.addr(), &other.addr())
    }
}

impl<T> Hash for Strong<T>
where
    T: ?Sized,
{
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Hash::hash(&self.addr(), state)
    }
}

/// Frees a fresh [`Pair`] unless disarmed, so a panicking constructor does not leak it.
struct PairGuard {
    pair: Pair,
    allocator: &'static dyn Allocator,
}

impl PairGuard {
    fn disarm(self) -> Pair {
        let pair = self.pair;
        mem::forget(self);
        pair
    }
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        unsafe { self.pair.deallocate(self.allocator) };
    }
}
