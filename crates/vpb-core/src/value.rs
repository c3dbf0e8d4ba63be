//! 属性值的标签化联合类型，以及承载它的 [`PropertyValue`] 容器。
//!
//! # 设计背景（Why）
//! - 车辆属性天然是异构的（整型数组、浮点数组、字节串、混合结构体……）；用带标签的
//!   sum type 表达这种异构性，所有访问都经由返回正确变体或转换错误的存取器完成。

use crate::ids::{AreaId, PropertyId};

/// 属性值的负载，按后端声明的类型标签逐一对应。
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Bytes(Vec<u8>),
    StringValue(String),
    Mixed(MixedPayload),
}

/// `Mixed` 类型属性同时携带多种基础类型字段的组合负载。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MixedPayload {
    pub int32_values: Vec<i32>,
    pub int64_values: Vec<i64>,
    pub float_values: Vec<f32>,
    pub byte_values: Vec<u8>,
    pub string_value: String,
}

impl Payload {
    /// 读取单一 `i32` 标量负载（例如布尔属性，以 `0`/`1` 编码）。
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Payload::Int32(values) => values.first().copied(),
            _ => None,
        }
    }

    /// 读取 `i32` 向量负载中给定下标的元素。
    pub fn int32_at(&self, index: usize) -> Option<i32> {
        match self {
            Payload::Int32(values) => values.get(index).copied(),
            _ => None,
        }
    }

    /// 读取单一 `f32` 标量负载。
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Payload::Float(values) => values.first().copied(),
            _ => None,
        }
    }

    /// 读取 `f32` 向量负载中给定下标的元素。
    pub fn float_at(&self, index: usize) -> Option<f32> {
        match self {
            Payload::Float(values) => values.get(index).copied(),
            _ => None,
        }
    }

    /// 读取单一 `i64` 标量负载。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int64(values) => values.first().copied(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::StringValue(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// 属性值在本次读取/写入/事件中的可用性。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyStatus {
    Available,
    Unavailable,
    Error,
}

/// `(propId, areaId, timestamp_ns, status, payload)` 元组。
///
/// 相等性在全部字段上做结构比较，用于 wait-for-update 协议中“事件值是否等于目标值”
/// 的判断——那里只比较 `payload`，而这里的 `PartialEq` 派生覆盖全部字段，调用方需要
/// 显式只比较 `.payload` 字段而非整个 `PropertyValue`。
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyValue {
    pub prop_id: PropertyId,
    pub area_id: AreaId,
    pub timestamp_ns: u64,
    pub status: PropertyStatus,
    pub payload: Payload,
}

impl PropertyValue {
    pub fn new(
        prop_id: PropertyId,
        area_id: AreaId,
        timestamp_ns: u64,
        status: PropertyStatus,
        payload: Payload,
    ) -> Self {
        Self {
            prop_id,
            area_id,
            timestamp_ns,
            status,
            payload,
        }
    }

    /// 构造一个只携带 `(propId, areaId)` 的请求壳，用于 `get_async` 批次的元素——
    /// 后端只需要知道要读哪个槽位，其余字段留空。
    pub fn request_shell(prop_id: PropertyId, area_id: AreaId) -> Self {
        Self {
            prop_id,
            area_id,
            timestamp_ns: 0,
            status: PropertyStatus::Unavailable,
            payload: Payload::Int32(Vec::new()),
        }
    }

    /// 结构性比较两个值的负载是否相等，用作 wait-for-update 协议的完成判据。
    pub fn payload_matches(&self, target: &PropertyValue) -> bool {
        self.prop_id == target.prop_id
            && self.area_id == target.area_id
            && self.payload == target.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_ignores_timestamp_and_status() {
        let a = PropertyValue::new(
            PropertyId::new(1),
            AreaId::GLOBAL,
            100,
            PropertyStatus::Available,
            Payload::Int32(vec![1]),
        );
        let b = PropertyValue::new(
            PropertyId::new(1),
            AreaId::GLOBAL,
            200,
            PropertyStatus::Available,
            Payload::Int32(vec![1]),
        );
        assert!(a.payload_matches(&b));
    }

    #[test]
    fn payload_mismatch_on_different_value() {
        let a = PropertyValue::new(
            PropertyId::new(1),
            AreaId::GLOBAL,
            100,
            PropertyStatus::Available,
            Payload::Int32(vec![1]),
        );
        let b = PropertyValue::new(
            PropertyId::new(1),
            AreaId::GLOBAL,
            100,
            PropertyStatus::Available,
            Payload::Int32(vec![0]),
        );
        assert!(!a.payload_matches(&b));
    }
}
