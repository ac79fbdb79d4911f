//! 作业系统与临时分配器

use crate::config::get_config;
use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::NativeWrapper;
use crate::native::job;
use crate::{BridgeError, Result};

/// 作业数与屏障数的默认上限
pub const MAX_PHYSICS_JOBS: u32 = 2048;
pub const MAX_PHYSICS_BARRIERS: u32 = 8;

native_wrapper!(
    /// 步进使用的线程池
    JobSystemThreadPool,
    "JobSystemThreadPool",
    free_object
);

impl JobSystemThreadPool {
    /// `num_threads` 为 0 时由 rayon 按核数决定
    pub fn new(max_jobs: u32, max_barriers: u32, num_threads: usize) -> Result<Self> {
        if max_jobs == 0 || max_barriers == 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "job system needs at least one job and one barrier (got {} / {})",
                max_jobs, max_barriers
            )));
        }
        let va = job::create_job_system(max_jobs, max_barriers, num_threads);
        if va == 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "cannot start {} worker threads",
                num_threads
            )));
        }
        Ok(Self::adopt(va))
    }

    /// 线程数取自配置
    pub fn with_defaults() -> Result<Self> {
        Self::new(MAX_PHYSICS_JOBS, MAX_PHYSICS_BARRIERS, get_config().job_threads)
    }

    pub fn num_threads(&self) -> Result<usize> {
        Ok(job::num_threads(self.va()?)?)
    }

    pub fn max_jobs(&self) -> Result<u32> {
        Ok(job::max_jobs(self.va()?)?)
    }
}

native_wrapper!(
    /// 步进期间的暂存内存预算；不足时步进结果带上 `MANIFOLD_CACHE_FULL`
    TempAllocatorImpl,
    "TempAllocator",
    free_object
);

impl TempAllocatorImpl {
    pub fn new(capacity_bytes: usize) -> Self {
        Self::adopt(job::create_temp_allocator(capacity_bytes))
    }

    pub fn with_default_capacity() -> Self {
        Self::new(get_config().temp_allocator_bytes)
    }

    /// 不限容量
    pub fn malloc() -> Self {
        Self::adopt(job::create_temp_allocator_malloc())
    }

    pub fn capacity(&self) -> Result<usize> {
        Ok(job::capacity(self.va()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_system_threads() {
        let jobs = JobSystemThreadPool::new(64, 4, 2).unwrap();
        assert_eq!(jobs.num_threads().unwrap(), 2);
        assert_eq!(jobs.max_jobs().unwrap(), 64);
        assert!(matches!(
            JobSystemThreadPool::new(0, 4, 1),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_temp_allocator_capacity() {
        assert_eq!(TempAllocatorImpl::new(4096).capacity().unwrap(), 4096);
        assert_eq!(TempAllocatorImpl::malloc().capacity().unwrap(), usize::MAX);
        let allocator = TempAllocatorImpl::new(16);
        allocator.close().unwrap();
        assert!(allocator.capacity().is_err());
    }
}
