//! 标识符契约：属性/区域地址，以及请求层面的两套 ID（客户端 `managerRequestId`
//! 与服务内部 `serviceRequestId`）。
//!
//! # 设计动机（Why）
//! - `managerRequestId` 由调用方提供，不保证跨客户端唯一；把它和后端真正感知的
//!   `serviceRequestId` 分成两个不可互换的类型，编译期即可防止调用点误用其中一个
//!   代替另一个。
//! - `PropertyId`/`AreaId` 底层都是裸 `i32`，但承载的语义（类型标签、分组、区域位
//!   掩码）完全不同，用新类型包裹可以避免把区域位掩码误当作属性 ID 传参。

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// 32 位属性标识符。高位编码值类型、分组与区域类型，低位是不透明标识。
///
/// 本类型本身不解释位布局——位掩码的定义属于具体后端/领域服务，这里只提供一个
/// 不可与 `AreaId` 混淆的新类型包装。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub i32);

impl PropertyId {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

impl From<i32> for PropertyId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// 32 位区域标识符。`0` 表示全局（单实例）区域；非零值是后端枚举出的物理区域位掩码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(pub i32);

impl AreaId {
    pub const GLOBAL: AreaId = AreaId(0);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// 是否为全局（非分区）区域。
    pub const fn is_global(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

impl From<i32> for AreaId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// 客户端提供的请求标识。不保证跨客户端唯一，仅用于客户端侧回调关联；绝不会被
/// 转发给后端。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ManagerRequestId(pub u64);

impl fmt::Display for ManagerRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mgr#{}", self.0)
    }
}

/// PropertyService 内部铸造的请求标识，单调递增且在实例生命周期内不会重用。
/// 只有这个 ID 会被传给后端。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRequestId(pub u64);

impl fmt::Display for ServiceRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc#{}", self.0)
    }
}

/// `ServiceRequestId` 的单调生成器。
///
/// # 契约（What）
/// - `next()` 返回的值严格递增，从不重复，即使跨线程并发调用；
/// - 内部用一个 `AtomicU64`，`fetch_add` 保证原子性，无需额外加锁。
#[derive(Debug, Default)]
pub struct ServiceRequestIdGenerator {
    next: AtomicU64,
}

impl ServiceRequestIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// 铸造下一个唯一的 `serviceRequestId`。
    pub fn next(&self) -> ServiceRequestId {
        ServiceRequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_request_ids_are_monotonic_and_unique() {
        let gen = ServiceRequestIdGenerator::new();
        let mut seen = std::collections::HashSet::new();
        let mut last = 0u64;
        for _ in 0..1000 {
            let id = gen.next();
            assert!(id.0 > last);
            assert!(seen.insert(id.0));
            last = id.0;
        }
    }

    #[test]
    fn area_id_zero_is_global() {
        assert!(AreaId::GLOBAL.is_global());
        assert!(AreaId::new(0).is_global());
        assert!(!AreaId::new(1 << 4).is_global());
    }
}
