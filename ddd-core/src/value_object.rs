//! 值对象（Value Object）
//!
//! 目前仅包含乐观锁使用的版本号 `Version`。
//!

use serde::{Deserialize, Serialize};
use std::fmt;

/// 聚合版本号（乐观锁）
///
/// `0` 表示尚未持久化；每次成功提交一次变更，版本号恰好加一。
///
/// ```
/// use ddd_core::value_object::Version;
///
/// let v0 = Version::new();
/// assert!(v0.is_new());
///
/// let v1 = v0.next();
/// assert_eq!(v1.value(), 1);
/// assert!(v1 > v0);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(usize);

impl Version {
    /// 初始版本（尚未持久化）
    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn from_value(value: usize) -> Self {
        Self(value)
    }

    /// 下一个版本号
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn value(&self) -> usize {
        self.0
    }

    /// 是否为初始版本
    pub fn is_new(&self) -> bool {
        self.0 == 0
    }

    /// 是否已经持久化过（版本大于零）
    pub fn is_created(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<usize> for Version {
    fn from(value: usize) -> Self {
        Self::from_value(value)
    }
}

impl From<Version> for usize {
    fn from(version: Version) -> Self {
        version.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_version_is_not_created() {
        let v = Version::new();
        assert_eq!(v.value(), 0);
        assert!(v.is_new());
        assert!(!v.is_created());
        assert_eq!(v, Version::default());
    }

    #[test]
    fn next_increments_by_exactly_one() {
        let v = Version::from_value(10);
        assert_eq!(v.next().value(), 11);
        assert_eq!(Version::new().next().next().next().value(), 3);
    }

    #[test]
    fn ordering_follows_value() {
        assert!(Version::from_value(2) > Version::from_value(1));
        assert!(Version::from_value(0) < Version::from_value(2));
    }

    #[test]
    fn display_and_conversions() {
        assert_eq!(Version::from_value(5).to_string(), "v5");
        let v: Version = 42.into();
        let n: usize = v.into();
        assert_eq!(n, 42);
    }

    #[test]
    fn serializes_as_plain_number() {
        let v = Version::from_value(42);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "42");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
