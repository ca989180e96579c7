use std::sync::{Mutex, MutexGuard, PoisonError};

/// Memory held back so a severe failure has room to be handled
///
/// When a worker hits a severe error it releases one block before reporting,
/// then the controller pauses the crawl. Blocks are restored with
/// [`MemoryReserve::replenish`] when the crawl resumes.
#[derive(Debug)]
pub struct MemoryReserve {
    blocks: Mutex<Vec<Vec<u8>>>,
    count: usize,
    block_bytes: usize,
}

impl MemoryReserve {
    pub fn new(count: usize, block_bytes: usize) -> Self {
        let reserve = Self {
            blocks: Mutex::new(Vec::with_capacity(count)),
            count,
            block_bytes,
        };
        reserve.replenish();
        reserve
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frees one block; returns false if none were left
    pub fn release_one(&self) -> bool {
        let released = self.lock().pop().is_some();
        if released {
            tracing::warn!("Released one reserve memory block");
        }
        released
    }

    /// Restores the reserve to its configured size
    pub fn replenish(&self) {
        let mut blocks = self.lock();
        while blocks.len() < self.count {
            blocks.push(vec![0u8; self.block_bytes]);
        }
    }

    pub fn available(&self) -> usize {
        self.lock().len()
    }
}
