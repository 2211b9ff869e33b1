//! Coarse heap lock
//!
//! Interpreter threads share one [`ObjectMemory`] through [`SharedMemory`].
//! Every operation, including collection and flatten/restore, runs with the
//! lock held, so no thread observes the graph mid-cycle.

use super::ObjectMemory;
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::stats::CollectionSummary;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cloneable handle to a memory behind one mutex
#[derive(Debug, Clone)]
pub struct SharedMemory {
    inner: Arc<Mutex<ObjectMemory>>,
}

impl SharedMemory {
    pub fn new(config: MemoryConfig) -> Result<Self> {
        Ok(Self::from_memory(ObjectMemory::new(config)?))
    }

    pub fn from_memory(memory: ObjectMemory) -> Self {
        Self {
            inner: Arc::new(Mutex::new(memory)),
        }
    }

    /// Acquire the heap lock
    pub fn lock(&self) -> MutexGuard<'_, ObjectMemory> {
        self.inner.lock()
    }

    /// Acquire the heap lock if no other thread holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ObjectMemory>> {
        self.inner.try_lock()
    }

    /// Run `f` with the lock held
    pub fn with<R>(&self, f: impl FnOnce(&mut ObjectMemory) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn collect(&self) -> Result<CollectionSummary> {
        self.inner.lock().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CollectionKind;
    use std::thread;

    #[test]
    fn test_threads_serialize_on_lock() {
        let shared = SharedMemory::new(MemoryConfig::default()).unwrap();
        let list = shared.with(|m| {
            let dir = m.allocate_collection(CollectionKind::Directory).unwrap();
            m.set_global("list", dir).unwrap();
            dir
        });

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        shared.with(|m| {
                            let v = m.allocate_string("v").unwrap();
                            m.directory_put_str(list, &format!("{}-{}", t, i), v).unwrap();
                        });
                        if i % 10 == 0 {
                            shared.collect().unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let memory = shared.lock();
        assert_eq!(memory.collection_len(list).unwrap(), 100);
        assert!(memory.directory_get_str(list, "3-24").unwrap().is_some());
    }
}
