//! Binary min-heap with a contextful comparator and position tracking.
//!
//! The hole-based sift implementation follows the Rust standard library's
//! `BinaryHeap`. The extra `BinaryHeapCtx` parameter lets the element order
//! depend on external state (e.g., a wrapping time origin) and lets the
//! owner observe every element relocation, which is how watchdogs keep
//! their heap positions up to date.
use arrayvec::ArrayVec;
use core::{mem::ManuallyDrop, ops, ptr};

/// A minimal growable-array interface implemented by the heap storage.
pub trait VecLike: ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut {
    /// The constant default (empty) value.
    const DEFAULT: Self;
    type Element;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn pop(&mut self) -> Option<Self::Element>;
    fn push(&mut self, x: Self::Element);
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    const DEFAULT: Self = Self::new_const();
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
}

#[cfg(test)]
impl<T> VecLike for Vec<T> {
    const DEFAULT: Self = Vec::new();
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
}

/// Context type for [`BinaryHeap`]'s operations.
pub trait BinaryHeapCtx<Element> {
    /// Return `true` iff `x < y`.
    fn lt(&mut self, x: &Element, y: &Element) -> bool;

    /// Called when the element `e` is moved to the new position `new_index`.
    fn on_move(&mut self, e: &mut Element, new_index: usize) {
        let _ = (e, new_index);
    }
}

impl<T: Ord> BinaryHeapCtx<T> for () {
    fn lt(&mut self, x: &T, y: &T) -> bool {
        *x < *y
    }
}

/// Min-heap operations on a [`VecLike`] storage.
pub trait BinaryHeap: VecLike {
    /// Remove the least item from the heap and return it.
    fn heap_pop(&mut self, ctx: impl BinaryHeapCtx<Self::Element>) -> Option<Self::Element>;

    /// Remove the item at the specified position and return it.
    fn heap_remove(
        &mut self,
        i: usize,
        ctx: impl BinaryHeapCtx<Self::Element>,
    ) -> Option<Self::Element>;

    /// Push an item onto the heap and return its position.
    fn heap_push(&mut self, item: Self::Element, ctx: impl BinaryHeapCtx<Self::Element>) -> usize;
}

impl<T: VecLike> BinaryHeap for T {
    fn heap_pop(&mut self, ctx: impl BinaryHeapCtx<Self::Element>) -> Option<Self::Element> {
        self.heap_remove(0, ctx)
    }

    fn heap_remove(
        &mut self,
        i: usize,
        mut ctx: impl BinaryHeapCtx<Self::Element>,
    ) -> Option<Self::Element> {
        if i >= self.len() {
            return None;
        }

        let mut item = self.pop().unwrap();
        let slice = &mut **self;
        if i < slice.len() {
            // Fill the vacated position with the former last element, then
            // restore the heap invariant around it
            core::mem::swap(&mut slice[i], &mut item);
            ctx.on_move(&mut slice[i], i);

            let sift_toward_root = i > 0 && ctx.lt(&slice[i], &slice[(i - 1) / 2]);

            // Safety: `i` points to an element within `slice`
            unsafe {
                if sift_toward_root {
                    sift_up(slice, i, ctx);
                } else {
                    sift_down(slice, i, ctx);
                }
            }
        }
        Some(item)
    }

    fn heap_push(&mut self, item: Self::Element, ctx: impl BinaryHeapCtx<Self::Element>) -> usize {
        let i = self.len();
        self.push(item);

        let slice = &mut **self;
        assert!(i < slice.len());

        // Safety: `i` points to an element within `slice`
        unsafe { sift_up(slice, i, ctx) }
    }
}

/// A position in `data` whose element has been moved out, plus that element.
/// The sifts move elements into the hole one at a time and only write the
/// carried element back once, when the hole reaches its final position.
struct Hole<'a, T> {
    data: &'a mut [T],
    element: ManuallyDrop<T>,
    pos: usize,
}

impl<'a, T> Hole<'a, T> {
    /// # Safety
    ///
    /// `pos` must be within `data`.
    unsafe fn new(data: &'a mut [T], pos: usize) -> Self {
        debug_assert!(pos < data.len());
        // Safety: `pos` is in bounds; the element is written back in `drop`
        let element = unsafe { ptr::read(data.get_unchecked(pos)) };
        Self {
            data,
            element: ManuallyDrop::new(element),
            pos,
        }
    }

    fn element(&self) -> &T {
        &self.element
    }

    fn element_mut(&mut self) -> &mut T {
        &mut self.element
    }

    /// # Safety
    ///
    /// `index` must be within `data` and distinct from the hole position.
    unsafe fn get(&self, index: usize) -> &T {
        debug_assert!(index != self.pos);
        unsafe { self.data.get_unchecked(index) }
    }

    /// # Safety
    ///
    /// Same as [`Self::get`].
    unsafe fn get_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index != self.pos);
        unsafe { self.data.get_unchecked_mut(index) }
    }

    /// Move the element at `index` into the hole; the hole moves to `index`.
    ///
    /// # Safety
    ///
    /// Same as [`Self::get`].
    unsafe fn move_to(&mut self, index: usize) {
        debug_assert!(index != self.pos);
        unsafe {
            let src: *const T = self.data.get_unchecked(index);
            let dst: *mut T = self.data.get_unchecked_mut(self.pos);
            ptr::copy_nonoverlapping(src, dst, 1);
        }
        self.pos = index;
    }
}

impl<T> Drop for Hole<'_, T> {
    fn drop(&mut self) {
        // Fill the hole back with the carried element
        unsafe {
            let pos = self.pos;
            ptr::copy_nonoverlapping(&*self.element, self.data.get_unchecked_mut(pos), 1);
        }
    }
}

/// Move the element at `pos` toward the root until its parent is not greater.
/// Returns the final position.
///
/// # Safety
///
/// `pos` must point to an element within `this`.
unsafe fn sift_up<Element>(
    this: &mut [Element],
    pos: usize,
    mut ctx: impl BinaryHeapCtx<Element>,
) -> usize {
    unsafe {
        let mut hole = Hole::new(this, pos);

        while hole.pos > 0 {
            let parent = (hole.pos - 1) / 2;
            if !ctx.lt(hole.element(), hole.get(parent)) {
                break;
            }

            let prev_pos = hole.pos;
            hole.move_to(parent);

            // `[prev_pos]` is now filled with the element moved from `[parent]`
            ctx.on_move(hole.get_mut(prev_pos), prev_pos);
        }

        let pos = hole.pos;
        ctx.on_move(hole.element_mut(), pos);
        pos
    }
}

/// Move the element at `pos` toward the leaves while a child is smaller.
///
/// # Safety
///
/// `pos` must point to an element within `this`.
unsafe fn sift_down<Element>(this: &mut [Element], pos: usize, mut ctx: impl BinaryHeapCtx<Element>) {
    let end = this.len();
    unsafe {
        let mut hole = Hole::new(this, pos);
        let mut child = 2 * hole.pos + 1;
        while child < end {
            let right = child + 1;
            // Compare with the lesser of the two children
            if right < end && !ctx.lt(hole.get(child), hole.get(right)) {
                child = right;
            }

            if !ctx.lt(hole.get(child), hole.element()) {
                break;
            }

            let prev_pos = hole.pos;
            hole.move_to(child);

            // `[prev_pos]` is now filled with the element moved from `[child]`
            ctx.on_move(hole.get_mut(prev_pos), prev_pos);

            child = 2 * hole.pos + 1;
        }

        let pos = hole.pos;
        ctx.on_move(hole.element_mut(), pos);
    }
}
