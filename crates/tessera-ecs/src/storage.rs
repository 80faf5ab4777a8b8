//! Component storage - type-erased column storage for tables.
//!
//! Each column stores components of a single type in a contiguous array,
//! enabling cache-friendly iteration. Rows are removed by swapping the last
//! row into the hole, so a column never has gaps.

use std::{alloc::Layout, ptr::NonNull};

use crate::component::ComponentInfo;

/// A column of components of a single type.
///
/// Stores components in a contiguous, type-erased array.
/// Manages its own memory allocation and deallocation.
pub struct Column {
    /// Pointer to the data array.
    data: NonNull<u8>,
    /// Number of components stored.
    len: usize,
    /// Allocated capacity (in number of components).
    capacity: usize,
    /// Component type information.
    info: ComponentInfo,
}

// SAFETY: Column manages its own memory and the Component bound ensures
// the stored type is Send + Sync
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a new empty column for the given component type.
    #[must_use]
    pub fn new(info: ComponentInfo) -> Self {
        Self {
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
            info,
        }
    }

    /// Create a column with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(info: ComponentInfo, capacity: usize) -> Self {
        let mut column = Self::new(info);
        if capacity > 0 {
            column.grow(capacity);
        }
        column
    }

    /// Get the number of components stored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the column is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the component info.
    #[must_use]
    pub const fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Push a component onto the column by copying its bytes.
    ///
    /// # Safety
    ///
    /// - `value` must point to a valid instance of the column's component type.
    /// - Ownership of the value moves into the column; the caller must not
    ///   drop or use the source afterwards.
    pub unsafe fn push_raw(&mut self, value: *const u8) {
        self.reserve(1);

        // SAFETY: We just reserved space, so self.len is a valid index
        let dst = unsafe { self.get_unchecked_raw(self.len) };

        // SAFETY: dst is valid, value is valid, and they don't overlap
        unsafe {
            std::ptr::copy_nonoverlapping(value, dst, self.info.size());
        }

        self.len += 1;
    }

    /// Push a default-constructed component.
    pub fn push_default(&mut self) {
        self.reserve(1);

        // SAFETY: We just reserved space; the slot is uninitialized
        unsafe {
            let dst = self.get_unchecked_raw(self.len);
            self.info.construct(dst);
        }

        self.len += 1;
    }

    /// Push a typed component onto the column.
    ///
    /// # Panics
    ///
    /// Panics if `T` doesn't match the column's component type (in debug builds).
    pub fn push<T: 'static>(&mut self, value: T) {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::push");

        let value = std::mem::ManuallyDrop::new(value);
        // SAFETY: We verified the type matches and the value is not dropped here
        unsafe {
            self.push_raw(std::ptr::from_ref(&*value).cast());
        }
    }

    /// Relocate row `row` of `src` to the end of this column.
    ///
    /// The row is swap-removed from `src` without being dropped.
    ///
    /// # Safety
    ///
    /// - `row` must be less than `src.len()`.
    /// - Both columns must store the same component type.
    pub unsafe fn move_from(&mut self, src: &mut Column, row: usize) {
        debug_assert_eq!(self.info.type_id(), src.info.type_id());

        // SAFETY: Caller ensures row is valid and types match
        unsafe {
            self.push_raw(src.get_unchecked_raw(row));
            src.swap_remove_forget(row);
        }
    }

    /// Remove the component at `index` without dropping it.
    /// Swaps with the last element for O(1) removal.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, and the value at `index` must have
    /// been moved out by the caller.
    pub unsafe fn swap_remove_forget(&mut self, index: usize) {
        debug_assert!(index < self.len, "Index out of bounds in swap_remove");

        self.len -= 1;

        if index < self.len {
            // SAFETY: both indices are within the old length and distinct
            unsafe {
                let last = self.get_unchecked_raw(self.len);
                let hole = self.get_unchecked_raw(index);
                std::ptr::copy_nonoverlapping(last, hole, self.info.size());
            }
        }
    }

    /// Remove and drop the component at the given index.
    /// Swaps with the last element for O(1) removal.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`.
    pub unsafe fn swap_remove_drop(&mut self, index: usize) {
        debug_assert!(index < self.len, "Index out of bounds in swap_remove_drop");

        // SAFETY: Caller ensures index is valid; the value is dropped once
        unsafe {
            self.info.drop_in_place(self.get_unchecked_raw(index));
            self.swap_remove_forget(index);
        }
    }

    /// Drop the value at `index` and move `value` into its place.
    ///
    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `value` must point to a valid instance of the column's type whose
    ///   ownership moves into the column.
    pub unsafe fn replace_raw(&mut self, index: usize, value: *const u8) {
        debug_assert!(index < self.len);

        // SAFETY: Caller ensures index and value are valid
        unsafe {
            let dst = self.get_unchecked_raw(index);
            self.info.drop_in_place(dst);
            std::ptr::copy_nonoverlapping(value, dst, self.info.size());
        }
    }

    /// Get a raw pointer to the component at the given index.
    ///
    /// # Safety
    ///
    /// `index` must be at most `len`, and below `capacity`.
    #[must_use]
    pub unsafe fn get_unchecked_raw(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len || (index == self.len && self.len < self.capacity));
        // SAFETY: Caller ensures index is valid
        unsafe { self.data.as_ptr().add(index * self.info.size()) }
    }

    /// Get a reference to the component at the given index.
    ///
    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `T` must match the column's component type.
    #[must_use]
    pub unsafe fn get_unchecked<T: 'static>(&self, index: usize) -> &T {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::get");
        // SAFETY: Caller ensures index is valid and type matches
        unsafe { &*self.get_unchecked_raw(index).cast::<T>() }
    }

    /// Get a mutable reference to the component at the given index.
    ///
    /// # Safety
    ///
    /// - `index` must be less than `len`.
    /// - `T` must match the column's component type.
    #[must_use]
    pub unsafe fn get_unchecked_mut<T: 'static>(&mut self, index: usize) -> &mut T {
        debug_assert!(self.info.is::<T>(), "Type mismatch in Column::get_mut");
        // SAFETY: Caller ensures index is valid, type matches, and &mut self
        // rules out aliasing
        unsafe { &mut *self.get_unchecked_raw(index).cast::<T>() }
    }

    /// View the column as a typed slice. Returns `None` on type mismatch.
    #[must_use]
    pub fn as_slice<T: 'static>(&self) -> Option<&[T]> {
        if !self.info.is::<T>() {
            return None;
        }
        if self.len == 0 {
            // `data` is only aligned once allocated
            return Some(&[]);
        }
        // SAFETY: type checked above; the first `len` elements are initialized
        Some(unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<T>(), self.len) })
    }

    /// Reserve capacity for at least `additional` more components.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len.saturating_add(additional);

        if required <= self.capacity {
            return;
        }

        self.grow(required);
    }

    /// Grow the column to at least `min_capacity`.
    fn grow(&mut self, min_capacity: usize) {
        if self.info.size() == 0 {
            // Zero-sized types don't need allocation
            self.capacity = usize::MAX;
            return;
        }

        // Growth strategy: double capacity, but at least 4 elements
        let new_capacity = self.capacity.saturating_mul(2).max(min_capacity).max(4);
        let new_layout = Self::array_layout(&self.info, new_capacity);

        // SAFETY: We handle both new allocation and reallocation
        let new_data = unsafe {
            if self.capacity == 0 {
                std::alloc::alloc(new_layout)
            } else {
                let old_layout = Self::array_layout(&self.info, self.capacity);
                std::alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size())
            }
        };

        let Some(data) = NonNull::new(new_data) else {
            std::alloc::handle_alloc_error(new_layout);
        };
        self.data = data;
        self.capacity = new_capacity;
    }

    /// Clear all components, dropping them.
    pub fn clear(&mut self) {
        if self.info.needs_drop() {
            for i in 0..self.len {
                // SAFETY: i is valid index and points to an initialized component
                unsafe { self.info.drop_in_place(self.get_unchecked_raw(i)) };
            }
        }
        self.len = 0;
    }

    /// Calculate the array layout for `count` components.
    fn array_layout(info: &ComponentInfo, count: usize) -> Layout {
        match Layout::from_size_align(info.size().saturating_mul(count), info.align()) {
            Ok(layout) => layout,
            Err(_) => panic!("column layout overflow for {}", info.name()),
        }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();

        if self.capacity > 0 && self.info.size() > 0 {
            let layout = Self::array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with this layout
            unsafe {
                std::alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}
