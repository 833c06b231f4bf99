use std::{cell::OnceCell, fmt};

use crate::{Strong, Weak};

/// Lets a value hand out [`Strong`] pointers to itself from its own methods.
///
/// The value embeds a [`SelfSlot`], which is wired to the allocation once the value is placed
/// under a `Strong` through one of the constructors with a `T: ObserveSelf` bound
/// ([`Strong::new_observed`], [`Strong::from_box_observed`]) or through [`Strong::observed`].
/// Until then, including inside the code that builds the value, [`observe_self`] returns an
/// empty `Strong`. It also returns an empty `Strong` while the value is being dropped.
///
/// ```
/// # use ncrc::{ObserveSelf, SelfSlot, Strong};
/// struct Node {
///     slot: SelfSlot<Node>,
///     name: &'static str,
/// }
///
/// impl ObserveSelf for Node {
///     fn self_slot(&self) -> &SelfSlot<Self> {
///         &self.slot
///     }
/// }
///
/// let n = Strong::new_observed(Node { slot: SelfSlot::new(), name: "a" });
/// let again = n.observe_self();
///
/// assert!(again.name == "a");
/// assert!(n.use_count() == 2);
/// ```
///
/// [`observe_self`]: ObserveSelf::observe_self
pub trait ObserveSelf: Sized {
    fn self_slot(&self) -> &SelfSlot<Self>;

    fn observe_self(&self) -> Strong<Self> {
        self.self_slot().lock()
    }

    fn observe_self_weak(&self) -> Weak<Self> {
        self.self_slot().weak()
    }
}

/// The back reference of an [`ObserveSelf`] value. It is set at most once and holds a weak
/// reference, so it never keeps its owner alive.
pub struct SelfSlot<T> {
    weak: OnceCell<Weak<T>>,
}

impl<T> SelfSlot<T> {
    pub const fn new() -> Self {
        SelfSlot {
            weak: OnceCell::new(),
        }
    }

    /// Points the slot at `strong`'s allocation, if it is not set yet.
    pub(crate) fn wire(&self, strong: &Strong<T>) {
        if self.weak.get().is_none() {
            let _ = self.weak.set(strong.downgrade());
        }
    }

    pub fn is_wired(&self) -> bool {
        self.weak.get().is_some()
    }

    fn lock(&self) -> Strong<T> {
        self.weak.get().map_or_else(Strong::null, Weak::lock)
    }

    fn weak(&self) -> Weak<T> {
        self.weak.get().map_or_else(Weak::new, Weak::clone)
    }
}

impl<T> Default for SelfSlot<T> {
    fn default() -> Self {
        SelfSlot::new()
    }
}

impl<T> fmt::Debug for SelfSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfSlot")
            .field("wired", &self.is_wired())
            .finish()
    }
}
