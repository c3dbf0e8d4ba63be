//! 属性配置模型：访问权限、变更模式与分区配置。

use crate::ids::{AreaId, PropertyId};

/// 属性或某一区域的访问权限。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    None,
    Read,
    Write,
    ReadWrite,
}

impl Access {
    /// 该权限是否允许读取（`Read` 或 `ReadWrite`）。
    pub const fn is_readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// 该权限是否允许写入（`Write` 或 `ReadWrite`）。
    pub const fn is_writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// 属性的变更模式：静态、事件触发或连续采样。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeMode {
    /// 永不变化，不可订阅。
    Static,
    /// 事件驱动，无固定采样率。
    OnChange,
    /// 以 `[minSampleRateHz, maxSampleRateHz]` 连续采样。
    Continuous,
}

impl ChangeMode {
    pub const fn is_subscribable(self) -> bool {
        !matches!(self, ChangeMode::Static)
    }

    pub const fn is_continuous(self) -> bool {
        matches!(self, ChangeMode::Continuous)
    }
}

/// 某个属性在单个区域上的配置覆盖。
///
/// # 契约（What）
/// - `access`：若为 `None`，继承属性级别的访问权限（由 Hub 在 `priority_init` 阶段
///   完成展开）；
/// - `*_bounds`：数值类型的可选上下限，非数值属性留空。
#[derive(Clone, Debug, PartialEq)]
pub struct AreaConfig {
    pub area_id: AreaId,
    pub access: Access,
    pub int32_bounds: Option<(i32, i32)>,
    pub int64_bounds: Option<(i64, i64)>,
    pub float_bounds: Option<(f32, f32)>,
}

impl AreaConfig {
    pub fn new(area_id: AreaId, access: Access) -> Self {
        Self {
            area_id,
            access,
            int32_bounds: None,
            int64_bounds: None,
            float_bounds: None,
        }
    }
}

/// 属性的静态配置，Hub 在初始化时一次性拉取，此后不可变。
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyConfig {
    pub prop_id: PropertyId,
    pub access: Access,
    pub change_mode: ChangeMode,
    pub area_configs: Vec<AreaConfig>,
    pub config_array: Vec<i32>,
    pub config_string: String,
    pub min_sample_rate_hz: f32,
    pub max_sample_rate_hz: f32,
}

impl PropertyConfig {
    /// 属性声明的所有区域 ID；若没有分区配置，约定为 `{0}`。
    pub fn area_ids(&self) -> Vec<AreaId> {
        if self.area_configs.is_empty() {
            vec![AreaId::GLOBAL]
        } else {
            self.area_configs.iter().map(|c| c.area_id).collect()
        }
    }

    /// 查找给定区域的配置覆盖。
    pub fn area_config(&self, area_id: AreaId) -> Option<&AreaConfig> {
        self.area_configs.iter().find(|c| c.area_id == area_id)
    }

    /// 计算某个区域的有效访问权限：区域覆盖若非 `None` 则生效，否则继承属性级别权限。
    pub fn effective_access(&self, area_id: AreaId) -> Access {
        match self.area_config(area_id) {
            Some(cfg) if !matches!(cfg.access, Access::None) => cfg.access,
            _ => self.access,
        }
    }

    /// 将请求速率夹紧到 `[minSampleRateHz, maxSampleRateHz]`，并对非连续属性强制为
    /// `0`（ON_CHANGE 属性没有采样率这个概念）。
    ///
    /// 调用方必须先拒绝负值（`ArgumentError`）——这里只处理 `requested_hz == 0.0`
    /// （使用 `maxSampleRateHz`）和正常夹紧两种情况，不再把负值当成 0 处理。
    pub fn clamp_rate_hz(&self, requested_hz: f32) -> f32 {
        if !self.change_mode.is_continuous() {
            return 0.0;
        }
        let hz = if requested_hz == 0.0 {
            self.max_sample_rate_hz
        } else {
            requested_hz
        };
        hz.clamp(self.min_sample_rate_hz, self.max_sample_rate_hz)
    }
}
