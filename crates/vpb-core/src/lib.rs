//! `vpb-core`：车辆属性代理的共享数据模型与错误分类。
//!
//! # 定位（Why）
//! - 上游（后端适配层）与下游（Hub、PropertyService）必须共用同一套 `PropertyId` /
//!   `AreaId` / `PropertyValue` / `PropertyConfig` 表示，避免各层各自发明转换逻辑；
//! - 将错误分类（`VpbError`、`ClientErrorCode`）与后端状态码（`BackendStatus`）下沉到
//!   本 crate，使得 Hub、重试驱动与 PropertyService 三处都能复用同一张翻译表。
//!
//! # 结构（What）
//! - [`ids`]：`PropertyId`、`AreaId`、`ManagerRequestId`、`ServiceRequestId` 及其生成器；
//! - [`value`]：[`Payload`]、[`PropertyValue`]、[`PropertyStatus`]；
//! - [`config`]：[`PropertyConfig`]、[`AreaConfig`]、[`Access`]、[`ChangeMode`]；
//! - [`rate`]：[`RateInfo`] 及其带容差的相等性比较；
//! - [`error`]：[`VpbError`]、[`ClientErrorCode`]、[`BackendStatus`]、[`BackendError`]。

pub mod config;
pub mod error;
pub mod ids;
pub mod rate;
pub mod value;

pub use config::{Access, AreaConfig, ChangeMode, PropertyConfig};
pub use error::{
    BackendError, BackendStatus, ClientErrorCode, VpbError, VpbResult, translate_backend_status,
};
pub use ids::{AreaId, ManagerRequestId, PropertyId, ServiceRequestId, ServiceRequestIdGenerator};
pub use rate::RateInfo;
pub use value::{Payload, PropertyStatus, PropertyValue};
