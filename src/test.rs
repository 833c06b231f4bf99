use crate::{
    config::{self, Config, SOFT_LIMIT},
    live_blocks, Allocator, Error, ObserveSelf, SelfSlot, Strong, Weak, HEAP,
};
use std::{
    alloc::Layout,
    any::Any,
    cell::{Cell, RefCell},
    mem::drop,
    panic,
    ptr::NonNull,
    rc::Rc,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Counts its own drops into a shared cell.
struct Tracked {
    drops: Rc<Cell<u32>>,
    value: u32,
}

impl Tracked {
    fn new(value: u32) -> (Self, Rc<Cell<u32>>) {
        let drops = Rc::new(Cell::new(0));
        let tracked = Tracked {
            drops: Rc::clone(&drops),
            value,
        };
        (tracked, drops)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[derive(Default)]
struct Counting {
    allocs: Cell<u32>,
    deallocs: Cell<u32>,
    fail: Cell<bool>,
}

unsafe impl Allocator for Counting {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        if self.fail.get() {
            return Err(Error::out_of_memory(layout));
        }
        self.allocs.set(self.allocs.get() + 1);
        HEAP.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocs.set(self.deallocs.get() + 1);
        HEAP.deallocate(ptr, layout)
    }
}

fn counting() -> &'static Counting {
    Box::leak(Box::default())
}

#[test]
fn t001() {
    let base = live_blocks();
    let (tracked, drops) = Tracked::new(1);

    let a = Strong::from_box(Box::new(tracked));
    assert!(a.use_count() == 1);
    assert!(live_blocks() == base + 1);

    let b = a.clone();
    assert!(a.use_count() == 2 && b.use_count() == 2);

    drop(b);
    assert!(a.use_count() == 1);
    assert!(a.value == 1);

    drop(a);
    assert!(drops.get() == 1);
    assert!(live_blocks() == base);
}

#[test]
fn t002() {
    let base = live_blocks();
    let (tracked, drops) = Tracked::new(2);

    let mut a = Strong::new(tracked);
    let w = a.downgrade();
    assert!(w.weak_count() == 1 && w.strong_count() == 1);

    a.reset();
    assert!(drops.get() == 1);
    assert!(w.strong_count() == 0 && w.weak_count() == 1);
    assert!(live_blocks() == base + 1);

    // a failed lock unlinks, which releases the block
    assert!(w.lock().is_null());
    assert!(w.weak_count() == 0);
    assert!(live_blocks() == base);
}

#[test]
fn t003() {
    let alloc = counting();
    {
        let s = Strong::new_in(String::from("one"), alloc);
        let c = s.clone();
        let _w = Weak::from(&c);
        assert!(alloc.allocs.get() == 1);
        assert!(*s == "one");
    }
    assert!(alloc.allocs.get() == 1 && alloc.deallocs.get() == 1);

    {
        let s = Strong::try_from_box_in(Box::new(5), alloc).unwrap();
        assert!(*s == 5);
    }
    assert!(alloc.allocs.get() == 2 && alloc.deallocs.get() == 2);
}

#[test]
fn t004() {
    trait Shape {
        fn area(&self) -> u32;
    }

    struct Square(u32);

    impl Shape for Square {
        fn area(&self) -> u32 {
            self.0 * self.0
        }
    }

    fn as_shape(square: &Square) -> &(dyn Shape + 'static) {
        square
    }

    let base = live_blocks();
    let any = Strong::new(Square(3)).into_any();

    let miss = any.downcast::<String>();
    assert!(miss.is_null());
    assert!(miss.get().is_none());
    assert!(any.use_count() == 2);
    assert!(miss.use_count() == 2);

    drop(miss);
    assert!(any.use_count() == 1);

    let hit = any.downcast::<Square>();
    assert!(!hit.is_null());
    assert!(hit.area() == 9);

    let shape: Strong<dyn Shape> = hit.project(as_shape);
    assert!(shape.area() == 9);
    assert!(any.use_count() == 3);
    assert!(shape == hit && hit == any);

    drop((any, hit, shape));
    assert!(live_blocks() == base);
}

#[test]
fn t005() {
    // a value whose destructor tries to resurrect itself
    struct Phoenix {
        me: RefCell<Weak<Phoenix>>,
        saw: Rc<Cell<Option<bool>>>,
    }

    impl Drop for Phoenix {
        fn drop(&mut self) {
            let again = self.me.borrow().lock();
            self.saw.set(Some(again.is_null()));
        }
    }

    let base = live_blocks();
    for boxed in [false, true] {
        let saw = Rc::new(Cell::new(None));
        let phoenix = Phoenix {
            me: RefCell::new(Weak::new()),
            saw: Rc::clone(&saw),
        };

        let s = if boxed {
            Strong::from_box(Box::new(phoenix))
        } else {
            Strong::new(phoenix)
        };
        *s.me.borrow_mut() = s.downgrade();
        assert!(s.weak_count() == 1);

        drop(s);
        assert!(saw.get() == Some(true));
        assert!(live_blocks() == base);
    }
}

#[test]
fn t006() {
    #[repr(align(64))]
    struct Wide([u8; 5]);

    #[repr(align(4096))]
    struct Page(u8);

    let mut keep = Vec::new();
    for i in 0..64 {
        let w = Strong::new(Wide([i; 5]));
        assert!(w.as_ptr() as usize % 64 == 0);
        assert!(w.0[4] == i);
        keep.push(w);
    }

    let p = Strong::new(Page(7));
    assert!(p.as_ptr() as usize % 4096 == 0);
    assert!(p.0 == 7);
}

#[test]
fn t007() {
    init();
    let alloc = counting();
    alloc.fail.set(true);

    let mut called = false;
    let r = Strong::try_new_with_in(
        || {
            called = true;
            1
        },
        alloc,
    );
    assert!(matches!(r, Err(Error::OutOfMemory { .. })));
    assert!(!called);

    let (tracked, drops) = Tracked::new(3);
    let r = Strong::try_from_box_in(Box::new(tracked), alloc);
    assert!(matches!(r, Err(Error::OutOfMemory { .. })));
    assert!(drops.get() == 1);

    let e = Strong::try_new_in(0_u64, alloc).unwrap_err();
    assert!(e.to_string().starts_with("Out of memory"));
}

#[test]
fn t008() {
    let alloc = counting();
    let base = live_blocks();

    let r = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        Strong::<String>::new_with_in(|| panic!("construction failed"), alloc)
    }));

    assert!(r.is_err());
    assert!(alloc.allocs.get() == 1 && alloc.deallocs.get() == 1);
    assert!(live_blocks() == base);
}

#[test]
fn t009() {
    let empty = Strong::<u32>::null();
    let w = Weak::from(&empty);
    assert!(w.expired());
    assert!(w.weak_count() == 0);

    let s = Strong::new(1_u32);
    let mut w1 = s.downgrade();
    let w2 = w1.clone();
    assert!(s.weak_count() == 2);
    assert!(w1.ptr_eq(&w2));
    assert!(w1.upgrade().map(|s| *s) == Some(1));

    w1.reset();
    assert!(s.weak_count() == 1);

    drop(s);
    assert!(w2.expired());

    // a copy of an expired weak pointer is never linked
    let w3 = w2.clone();
    assert!(w3.weak_count() == 0);
    assert!(w2.weak_count() == 1);
    assert!(w2.upgrade().is_none());
    assert!(w2.weak_count() == 0);
}

#[test]
fn t010() {
    let a = Strong::new(10);
    let b = a.clone();
    let c = Strong::new(10);
    let null = Strong::<i32>::null();

    assert!(a == b);
    assert!(a != c);
    assert!(null == Strong::<u8>::null());
    assert!(null == std::ptr::null::<i32>());
    assert!(std::ptr::null::<i32>() == null);
    assert!(a == a.as_ptr());
    assert!(a.as_ptr() == b);
    assert!(a != std::ptr::null::<i32>());
    assert!(a.ptr_eq(&b) && !a.ptr_eq(&c));

    assert!(null < a && a > null);
    assert!(null <= Strong::<u8>::null());
    assert!(std::ptr::null::<i32>() < a);
    assert!(a > std::ptr::null::<u8>());
    let erased: Strong<dyn Any> = b.clone().into_any();
    assert!(erased <= a && erased >= a);

    let mut v = vec![c.clone(), a.clone(), null.clone()];
    v.sort();
    assert!(v[0].is_null());
}

#[test]
fn t011() {
    let (first, first_drops) = Tracked::new(1);
    let (second, second_drops) = Tracked::new(2);

    let mut s = Strong::new(first);
    let keep = s.clone();
    s.reset_to(Box::new(second));
    assert!(first_drops.get() == 0);
    assert!(keep.use_count() == 1);
    assert!(s.value == 2);

    let mut t: Strong<Tracked> = Strong::null();
    t.clone_from(&s);
    assert!(s.use_count() == 2);

    let moved = t.take();
    assert!(t.is_null() && t.use_count() == 0);
    assert!(moved.use_count() == 2);

    drop((s, moved));
    assert!(second_drops.get() == 1);
    drop(keep);
    assert!(first_drops.get() == 1);

    let n = unsafe { Strong::<Tracked>::from_raw(std::ptr::null_mut()) };
    assert!(n.is_null() && n.use_count() == 0);
}

#[test]
fn t012() {
    struct Node {
        slot: SelfSlot<Node>,
        seen_at_birth: Cell<bool>,
        dropped_with_self: Rc<Cell<Option<bool>>>,
    }

    impl ObserveSelf for Node {
        fn self_slot(&self) -> &SelfSlot<Self> {
            &self.slot
        }
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.dropped_with_self
                .set(Some(self.observe_self().is_null()));
        }
    }

    let base = live_blocks();
    let dropped = Rc::new(Cell::new(None));

    let n = Strong::new_with(|| {
        let node = Node {
            slot: SelfSlot::new(),
            seen_at_birth: Cell::new(false),
            dropped_with_self: Rc::clone(&dropped),
        };
        node.seen_at_birth.set(!node.observe_self().is_null());
        node
    })
    .observed();
    assert!(!n.seen_at_birth.get());
    assert!(n.slot.is_wired());

    let again = n.observe_self();
    assert!(again == n);
    assert!(n.use_count() == 2);
    assert!(n.weak_count() == 1);

    let w = n.observe_self_weak();
    assert!(w.ptr_eq(&n.downgrade()));

    drop((n, again, w));
    assert!(dropped.get() == Some(true));
    assert!(live_blocks() == base);
}

#[test]
fn t013() {
    #[derive(Default)]
    struct Leaf {
        slot: SelfSlot<Leaf>,
    }

    impl ObserveSelf for Leaf {
        fn self_slot(&self) -> &SelfSlot<Self> {
            &self.slot
        }
    }

    let plain = Strong::new(Leaf::default());
    assert!(plain.observe_self().is_null());

    let boxed = Strong::<Leaf>::from_box_observed(Box::default());
    assert!(boxed.observe_self() == boxed);

    // wiring through a cast, and never twice
    let any: Strong<dyn Any> = plain.into_any();
    let leaf = any.downcast::<Leaf>().observed();
    assert!(leaf.observe_self().ptr_eq(&any));

    let other = Strong::new_observed(Leaf::default());
    other.slot.wire(&boxed);
    assert!(other.observe_self() == other);
}

#[test]
fn t014() {
    let mut s = Strong::new(vec![1]);
    s.get_mut().unwrap().push(2);
    assert!(*s == [1, 2]);

    let w = s.downgrade();
    assert!(s.get_mut().is_none());
    drop(w);

    let second = s.project(|v| &v[1]);
    assert!(s.get_mut().is_none());
    drop(s);

    // the only owner left does not point at the start of the value
    let mut second = second;
    assert!(second.unique());
    assert!(second.get_mut().is_none());
    assert!(*second == 2);
}

#[test]
fn t015() {
    let s = Strong::new(5_i64);
    let mut strongs = Vec::new();
    let mut weaks = Vec::new();
    for _ in 0..100 {
        strongs.push(s.clone());
        weaks.push(s.downgrade());
    }
    assert!(s.strong_count() == 101);
    assert!(s.weak_count() == 100);

    drop(strongs);
    assert!(s.strong_count() == 1);
    drop(s);
    assert!(weaks.iter().all(Weak::expired));
    assert!(weaks[0].weak_count() == 100);
}

#[test]
fn t016() {
    let s = Strong::new(String::from("x"));
    let w = s.downgrade();

    assert!(format!("{:?}", s) == "\"x\"");
    assert!(format!("{:?}", w) == "Weak(\"x\")");
    assert!(format!("{:?}", Strong::<u8>::null()) == "(null)");

    drop(s);
    assert!(format!("{:?}", w) == "Weak");
}

#[test]
fn t017() {
    let s = Strong::new((String::from("a"), 7_u32));
    let w = s.downgrade();

    let second = w.project(|pair| &pair.1);
    assert!(*second.lock() == 7);
    assert!(second.ptr_eq(&w));
    assert!(s.use_count() == 1 && s.weak_count() == 2);

    drop(s);
    assert!(second.expired());

    // nothing to look at once the value is gone
    let first = w.project(|pair| &pair.0);
    assert!(first.weak_count() == 0);
    assert!(w.weak_count() == 0);
    assert!(second.weak_count() == 1);
}

#[test]
fn t018() {
    let mut s = Strong::new(vec![1]);
    let c = s.clone();
    let w = c.downgrade();

    unsafe { s.get_mut_unchecked() }.push(2);
    assert!(*c == [1, 2]);
    assert!(*w.lock() == [1, 2]);
}

#[test]
#[should_panic(expected = "projected")]
fn t019() {
    let s = Strong::new((1, 2));
    let mut second = s.project(|pair| &pair.1);
    unsafe { *second.get_mut_unchecked() = 3 };
}

#[test]
#[should_panic(expected = "likely leaked")]
fn t020() {
    let s = Strong::new(0_u8);
    let mut clones = Vec::with_capacity(SOFT_LIMIT as usize);
    for _ in 0..SOFT_LIMIT {
        clones.push(s.clone());
    }
}

#[test]
fn t021() {
    let config = Config::get();
    assert!(config.debug_checks && config.introspection);
    assert!(
        config
            == Config {
                debug_checks: config::DEBUG_CHECKS,
                introspection: config::INTROSPECTION,
            }
    );
}
