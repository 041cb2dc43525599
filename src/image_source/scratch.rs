//! # 临时字符缓冲池
//!
//! 百分号转义解码需要一块与输入等长的临时字符缓冲。缓冲从池中租用，
//! 由 `ScratchBuffer` 的 `Drop` 归还，成功、失败、提前返回都会走同一条归还路径。

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

/// 池中最多保留的缓冲数量。
const MAX_RETAINED_BUFFERS: usize = 8;
/// 超过该容量的缓冲用完直接释放，不回池。
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// 进程级共享缓冲池。
pub(crate) static SHARED_POOL: Lazy<ScratchPool> = Lazy::new(ScratchPool::new);

pub(crate) struct ScratchPool {
    buffers: Mutex<Vec<String>>,
    outstanding: AtomicUsize,
}

impl ScratchPool {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// 租用一块至少 `min_capacity` 字节的空缓冲。
    pub(crate) fn rent(&self, min_capacity: usize) -> ScratchBuffer<'_> {
        let reused = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let mut buffer = reused.unwrap_or_default();
        buffer.reserve(min_capacity);
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        ScratchBuffer {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// 当前尚未归还的缓冲数量。
    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn retained(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn give_back(&self, mut buffer: String) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        if buffer.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }

        buffer.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < MAX_RETAINED_BUFFERS {
            buffers.push(buffer);
        }
    }
}

/// 租用中的缓冲，离开作用域时自动归还。
pub(crate) struct ScratchBuffer<'a> {
    pool: &'a ScratchPool,
    buffer: Option<String>,
}

impl Deref for ScratchBuffer<'_> {
    type Target = String;

    fn deref(&self) -> &String {
        // 只有 Drop 会取走缓冲
        self.buffer.as_ref().unwrap_or_else(|| unreachable!("scratch buffer taken before drop"))
    }
}

impl DerefMut for ScratchBuffer<'_> {
    fn deref_mut(&mut self) -> &mut String {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!("scratch buffer taken before drop"))
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rented_buffer_is_returned_on_drop() {
        let pool = ScratchPool::new();
        {
            let mut buffer = pool.rent(32);
            assert!(buffer.capacity() >= 32);
            buffer.push_str("hello");
            assert_eq!(pool.outstanding(), 1);
        }

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.retained(), 1);

        let reused = pool.rent(4);
        assert!(reused.is_empty(), "returned buffers are cleared");
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let pool = ScratchPool::new();
        drop(pool.rent(MAX_RETAINED_CAPACITY + 1));

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.retained(), 0);
    }

    #[test]
    fn pool_keeps_a_bounded_number_of_buffers() {
        let pool = ScratchPool::new();
        let rented: Vec<_> = (0..MAX_RETAINED_BUFFERS + 3).map(|_| pool.rent(8)).collect();
        assert_eq!(pool.outstanding(), MAX_RETAINED_BUFFERS + 3);
        drop(rented);

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.retained(), MAX_RETAINED_BUFFERS);
    }
}
