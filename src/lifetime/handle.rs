//! 原生句柄

use std::fmt;

/// 原生对象地址；0 表示没有对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn new(va: u64) -> Self {
        NativeHandle(va)
    }

    pub fn va(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for NativeHandle {
    fn from(va: u64) -> Self {
        NativeHandle(va)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(NativeHandle::NULL.is_null());
        assert!(NativeHandle::default().is_null());
        assert!(!NativeHandle::new(0x40).is_null());
        assert_eq!(NativeHandle::from(0x40).to_string(), "0x40");
    }
}
