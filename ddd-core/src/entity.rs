//! 实体（Entity）基础抽象
//!
//! 为聚合提供统一的标识（Id）与版本（乐观锁）能力。版本号由持久化层维护：
//! 聚合自身只负责保存它，提交成功后由工作单元写回新版本。
//!
use crate::value_object::Version;
use std::{fmt::Display, str::FromStr};

/// 具备唯一标识与版本的实体抽象
pub trait Entity: Send + Sync {
    /// 实体标识类型，要求可解析、可显示与可克隆
    type Id: FromStr + Clone + Display + Send + Sync + 'static;

    /// 使用给定标识创建实体（初始版本为 0）
    fn new(id: Self::Id) -> Self;

    /// 获取实体标识
    fn id(&self) -> &Self::Id;

    /// 获取当前版本
    fn version(&self) -> Version;

    /// 写回持久化后的版本号
    fn set_version(&mut self, version: Version);
}
