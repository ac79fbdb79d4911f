//! 桥接层配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 桥接层配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // ========== 诊断 ==========
    /// 是否对每次原生分配/释放输出 trace 日志，默认 false
    pub trace_allocations: bool,
    /// 关闭运行时时是否清扫泄漏的所有权记录，默认 true
    pub sweep_leaks_on_shutdown: bool,

    // ========== 模拟参数 ==========
    /// 新建物理系统的默认重力 (x, y, z)，默认 (0, -9.81, 0)
    pub default_gravity: [f32; 3],
    /// 求解器迭代次数，默认 8
    pub solver_iterations: usize,
    /// 内部 PGS 迭代次数，默认 1
    pub pgs_iterations: usize,

    // ========== 资源 ==========
    /// 作业系统默认线程数，0 表示由 rayon 决定
    pub job_threads: usize,
    /// 临时分配器默认容量（字节），默认 10 MiB
    pub temp_allocator_bytes: usize,
    /// 每个刚体在一次步进中估算占用的临时内存（字节）
    pub bytes_per_body: usize,
    /// 每个接触流形在一次步进中估算占用的临时内存（字节）
    pub bytes_per_manifold: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            // ====== 诊断 ======
            // 打开后日志量很大，只在排查句柄泄漏/重复释放时使用
            trace_allocations: false,
            sweep_leaks_on_shutdown: true,

            // ====== 模拟参数 ======
            default_gravity: [0.0, -9.81, 0.0],
            // 越大 → 约束越精确，但更慢
            solver_iterations: 8,
            pgs_iterations: 1,

            // ====== 资源 ======
            job_threads: 0,
            temp_allocator_bytes: 10 * 1024 * 1024,
            bytes_per_body: 256,
            bytes_per_manifold: 512,
        }
    }
}

/// 全局配置实例
static BRIDGE_CONFIG: Lazy<RwLock<BridgeConfig>> = Lazy::new(|| {
    RwLock::new(BridgeConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> BridgeConfig {
    match BRIDGE_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: BridgeConfig) {
    match BRIDGE_CONFIG.write() {
        Ok(mut current) => *current = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(BridgeConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = BridgeConfig::default();
        assert!(config.default_gravity[1] < 0.0);
        assert!(config.solver_iterations > 0);
        assert!(config.temp_allocator_bytes > config.bytes_per_manifold);
    }
}
