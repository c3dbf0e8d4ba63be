//! 错误分类与后端状态码。
//!
//! # 设计背景（Why）
//! - 用 `thiserror` 派生宏承载跨层错误：稳定错误码、可选底层原因、结构化上下文都
//!   用生态惯用的写法表达，而不是手写一套 `Error` trait。
//! - `BackendStatus`/`BackendError` 与 `VpbError` 故意分开：前者是后端适配层的原始
//!   词汇表，后者是重试驱动与错误翻译表消费后的结果，只有这两处允许在两者之间
//!   转换。

use crate::ids::{AreaId, PropertyId};

/// 后端适配层可能返回的状态码。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendStatus {
    Ok,
    TryAgain,
    InvalidArg,
    NotAvailable,
    NotAvailableDisabled,
    NotAvailableSpeedLow,
    NotAvailableSpeedHigh,
    NotAvailablePoorVisibility,
    NotAvailableSafety,
    AccessDenied,
    InternalError,
}

impl BackendStatus {
    /// 是否属于任一 `NOT_AVAILABLE_*` 变体。
    pub const fn is_not_available_family(self) -> bool {
        matches!(
            self,
            BackendStatus::NotAvailable
                | BackendStatus::NotAvailableDisabled
                | BackendStatus::NotAvailableSpeedLow
                | BackendStatus::NotAvailableSpeedHigh
                | BackendStatus::NotAvailablePoorVisibility
                | BackendStatus::NotAvailableSafety
        )
    }
}

/// 后端调用失败时携带的状态码与供应商自定义辅助码。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendError {
    pub status: BackendStatus,
    pub vendor_code: i32,
}

impl BackendError {
    pub const fn new(status: BackendStatus, vendor_code: i32) -> Self {
        Self {
            status,
            vendor_code,
        }
    }
}

impl core::fmt::Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} (vendor_code={})", self.status, self.vendor_code)
    }
}

/// 客户端最终看到的错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientErrorCode {
    TryAgain,
    InvalidArg,
    PropertyNotAvailable,
    AccessDenied,
    Timeout,
    Unknown,
}

/// 把后端状态码翻译为客户端错误码的精确映射表。
///
/// 这是个全覆盖的穷尽匹配，刻意不留 `_ => ...` 兜底分支之外的隐式默认：新增
/// `BackendStatus` 变体时编译器会在这里报错，提醒同步补充映射。
pub fn translate_backend_status(status: BackendStatus) -> ClientErrorCode {
    match status {
        BackendStatus::TryAgain => ClientErrorCode::TryAgain,
        BackendStatus::InvalidArg => ClientErrorCode::InvalidArg,
        BackendStatus::NotAvailable
        | BackendStatus::NotAvailableDisabled
        | BackendStatus::NotAvailableSpeedLow
        | BackendStatus::NotAvailableSpeedHigh
        | BackendStatus::NotAvailablePoorVisibility
        | BackendStatus::NotAvailableSafety => ClientErrorCode::PropertyNotAvailable,
        BackendStatus::AccessDenied => ClientErrorCode::AccessDenied,
        BackendStatus::Ok | BackendStatus::InternalError => ClientErrorCode::Unknown,
    }
}

/// 分类后的错误分类枚举，贯穿 Hub、重试驱动与 PropertyService。
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VpbError {
    /// 不支持的 propId、未拥有的订阅、畸形负载、负的更新速率等。
    #[error("argument error for propId={prop_id:?} areaId={area_id:?}: {reason}")]
    ArgumentError {
        prop_id: Option<PropertyId>,
        area_id: Option<AreaId>,
        reason: String,
    },

    /// `TRY_AGAIN`，重试驱动内部处理；若重试耗尽才会向上传播。
    #[error("backend transient failure after retry budget exhausted: {last}")]
    BackendTransient { last: BackendError },

    /// `INVALID_ARG`、`ACCESS_DENIED`、`NOT_AVAILABLE*` 等，映射后向调用方返回。
    #[error("backend permanent failure: {backend}")]
    BackendPermanent { backend: BackendError },

    /// 重试驱动截止时间到期（同步路径）或 pending-request 池超时触发（异步路径）。
    #[error("operation timed out")]
    Timeout,

    /// 不应到达的内部错误：配置缺失、无法转换的值类型等，必须被记录。
    #[error("internal error: {reason}")]
    InternalError { reason: String },
}

impl VpbError {
    pub fn argument(reason: impl Into<String>) -> Self {
        VpbError::ArgumentError {
            prop_id: None,
            area_id: None,
            reason: reason.into(),
        }
    }

    pub fn argument_for(
        prop_id: PropertyId,
        area_id: Option<AreaId>,
        reason: impl Into<String>,
    ) -> Self {
        VpbError::ArgumentError {
            prop_id: Some(prop_id),
            area_id,
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        VpbError::InternalError {
            reason: reason.into(),
        }
    }

    /// 把本错误映射为客户端可见的错误码；非后端类错误统一归为 `Unknown`/`Timeout`。
    pub fn client_error_code(&self) -> ClientErrorCode {
        match self {
            VpbError::BackendTransient { .. } => ClientErrorCode::TryAgain,
            VpbError::BackendPermanent { backend } => translate_backend_status(backend.status),
            VpbError::Timeout => ClientErrorCode::Timeout,
            VpbError::ArgumentError { .. } => ClientErrorCode::InvalidArg,
            VpbError::InternalError { .. } => ClientErrorCode::Unknown,
        }
    }
}

pub type VpbResult<T> = Result<T, VpbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_available_family_all_translate_to_property_not_available() {
        for status in [
            BackendStatus::NotAvailable,
            BackendStatus::NotAvailableDisabled,
            BackendStatus::NotAvailableSpeedLow,
            BackendStatus::NotAvailableSpeedHigh,
            BackendStatus::NotAvailablePoorVisibility,
            BackendStatus::NotAvailableSafety,
        ] {
            assert_eq!(
                translate_backend_status(status),
                ClientErrorCode::PropertyNotAvailable
            );
        }
    }

    #[test]
    fn try_again_and_invalid_arg_and_access_denied_map_directly() {
        assert_eq!(
            translate_backend_status(BackendStatus::TryAgain),
            ClientErrorCode::TryAgain
        );
        assert_eq!(
            translate_backend_status(BackendStatus::InvalidArg),
            ClientErrorCode::InvalidArg
        );
        assert_eq!(
            translate_backend_status(BackendStatus::AccessDenied),
            ClientErrorCode::AccessDenied
        );
    }

    #[test]
    fn everything_else_maps_to_unknown() {
        assert_eq!(
            translate_backend_status(BackendStatus::InternalError),
            ClientErrorCode::Unknown
        );
    }
}
