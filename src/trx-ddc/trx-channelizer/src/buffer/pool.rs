// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

struct PoolInner<T> {
    free: Mutex<Vec<Vec<T>>>,
    max_free: usize,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

impl<T> PoolInner<T> {
    fn release(&self, buffer: Vec<T>) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_free {
                free.push(buffer);
            }
        }
    }
}

/// Pool of reusable `Vec<T>` storage.
///
/// Buffers handed out by [`acquire`](Self::acquire) go back to the pool when
/// the [`PooledBuffer`] is dropped. Wrap it in an `Arc` to share it between
/// consumers: the buffer is recycled once, when the last clone goes away.
pub struct BufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Default> BufferPool<T> {
    /// `max_free` bounds how many idle buffers are retained.
    pub fn new(max_free: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_free,
                allocated: AtomicUsize::new(0),
                recycled: AtomicUsize::new(0),
            }),
        }
    }

    /// A buffer of `len` default-initialised elements, reused when possible.
    pub fn acquire(&self, len: usize) -> PooledBuffer<T> {
        let reused = self.inner.free.lock().ok().and_then(|mut free| free.pop());
        let data = match reused {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(len, T::default());
                buffer
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                vec![T::default(); len]
            }
        };
        PooledBuffer {
            data,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Idle buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.inner.free.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Buffers allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Buffers returned over the pool's lifetime.
    pub fn recycled(&self) -> usize {
        self.inner.recycled.load(Ordering::Relaxed)
    }
}

/// Storage borrowed from a [`BufferPool`].
pub struct PooledBuffer<T> {
    data: Vec<T>,
    pool: Weak<PoolInner<T>>,
}

impl<T> PooledBuffer<T> {
    /// A buffer that is not tied to any pool.
    pub fn detached(data: Vec<T>) -> Self {
        Self {
            data,
            pool: Weak::new(),
        }
    }
}

impl<T> Deref for PooledBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}
