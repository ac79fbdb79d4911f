//! 作业系统与临时分配器（原生侧）

use std::sync::Arc;

use super::heap::{self, native_object, NativeFault};

pub struct NativeJobSystem {
    pub pool: Arc<rayon::ThreadPool>,
    pub max_jobs: u32,
    pub max_barriers: u32,
}

native_object!(NativeJobSystem, "JobSystemThreadPool");

/// 创建线程池；`num_threads` 为 0 时由 rayon 决定。失败返回 0。
pub fn create_job_system(max_jobs: u32, max_barriers: u32, num_threads: usize) -> u64 {
    let built = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("physics-worker-{}", i))
        .build();
    match built {
        Ok(pool) => {
            log::debug!("[作业系统] 线程数 {}", pool.current_num_threads());
            heap::alloc(NativeJobSystem {
                pool: Arc::new(pool),
                max_jobs,
                max_barriers,
            })
        }
        Err(e) => {
            log::error!("[作业系统] 创建线程池失败: {}", e);
            0
        }
    }
}

pub fn pool(job_system_va: u64) -> Result<Arc<rayon::ThreadPool>, NativeFault> {
    heap::with::<NativeJobSystem, _>(job_system_va, |j| Arc::clone(&j.pool))
}

pub fn num_threads(job_system_va: u64) -> Result<usize, NativeFault> {
    heap::with::<NativeJobSystem, _>(job_system_va, |j| j.pool.current_num_threads())
}

pub fn max_jobs(job_system_va: u64) -> Result<u32, NativeFault> {
    heap::with::<NativeJobSystem, _>(job_system_va, |j| j.max_jobs)
}

/// 临时分配器：步进期间的暂存内存预算
pub struct NativeTempAllocator {
    /// `usize::MAX` 表示不限容量
    pub capacity: usize,
}

native_object!(NativeTempAllocator, "TempAllocator");

pub fn create_temp_allocator(capacity: usize) -> u64 {
    heap::alloc(NativeTempAllocator { capacity })
}

pub fn create_temp_allocator_malloc() -> u64 {
    heap::alloc(NativeTempAllocator { capacity: usize::MAX })
}

pub fn capacity(allocator_va: u64) -> Result<usize, NativeFault> {
    heap::with::<NativeTempAllocator, _>(allocator_va, |a| a.capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_system_runs_on_its_pool() {
        let va = create_job_system(64, 8, 2);
        assert_ne!(va, 0);
        assert_eq!(num_threads(va).unwrap(), 2);
        let name = pool(va)
            .unwrap()
            .install(|| std::thread::current().name().map(str::to_owned));
        assert!(name.unwrap().starts_with("physics-worker-"));
        heap::free(va).unwrap();
    }

    #[test]
    fn test_temp_allocator_capacity() {
        let va = create_temp_allocator(1024);
        assert_eq!(capacity(va).unwrap(), 1024);
        heap::free(va).unwrap();
        let unbounded = create_temp_allocator_malloc();
        assert_eq!(capacity(unbounded).unwrap(), usize::MAX);
        heap::free(unbounded).unwrap();
    }
}
