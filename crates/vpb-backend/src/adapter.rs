//! 后端适配器契约：把"车辆后端"收敛成单一、可替换的协作者。
//!
//! # 设计取舍（Trade-offs）
//! - `get`/`set`/`subscribe`/`unsubscribe`/`poll_all_configs` 建模为 `async fn`
//!   （借助 `async-trait`），即便真实实现多半只是阻塞线程池调用——这让假后端与
//!   未来的真实实现都能统一实现同一 trait，而不强制调用方关心具体执行模型。
//! - `get_async`/`set_async`/`cancel` 不是 `async fn`：它们必须立即返回，不得阻塞
//!   调用者超过一次锁获取的时长，结果通过 [`BackendEvent`] 在后端专属线程上异步
//!   投递，而不是返回的 Future。

use async_trait::async_trait;
use tokio::sync::mpsc;
use vpb_core::{AreaId, BackendError, PropertyConfig, PropertyId, PropertyValue, ServiceRequestId};

/// 对 `backend.subscribe(options[])` 单次调用中一个选项的描述。
#[derive(Clone, Debug, PartialEq)]
pub struct SubscribeOption {
    pub prop_id: PropertyId,
    pub area_ids: Vec<AreaId>,
    pub sample_rate_hz: f32,
    pub variable_update_rate: bool,
    pub resolution: f32,
}

/// `get_async`/`set_async` 批次中的一个请求：后端只需要知道"要操作哪个值，
/// 完成时用哪个 `serviceRequestId` 回报"。
#[derive(Clone, Debug, PartialEq)]
pub struct AsyncValueRequest {
    pub service_request_id: ServiceRequestId,
    pub value: PropertyValue,
}

/// 后端在其专属线程上投递的全部异步通知。
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    /// 属性变更事件批次（按到达顺序分发）。
    PropertyChanged(Vec<PropertyValue>),
    /// 属性写入失败事件批次。
    PropertySetError(Vec<(PropertyId, AreaId, BackendError)>),
    /// 一次 `get_async` 请求的结果。
    AsyncGetResult(ServiceRequestId, Result<PropertyValue, BackendError>),
    /// 一次 `set_async` 请求的结果。
    AsyncSetResult(ServiceRequestId, Result<(), BackendError>),
}

pub type BackendEventSender = mpsc::UnboundedSender<BackendEvent>;
pub type BackendEventReceiver = mpsc::UnboundedReceiver<BackendEvent>;

/// 构造一对后端事件通道端点：适配器实现持有发送端，Hub 持有接收端。
pub fn backend_event_channel() -> (BackendEventSender, BackendEventReceiver) {
    mpsc::unbounded_channel()
}

/// 车辆后端的单一抽象。
///
/// # 契约（What）
/// - 所有方法都可能以 [`BackendError`] 失败，状态码取自 [`vpb_core::BackendStatus`] 的子集；
/// - `subscribe` 对已订阅属性的再次调用会原子地替换其订阅选项；
/// - `get_async`/`set_async` 必须立即返回，结果稍后通过事件通道投递；
/// - 实现者必须可以安全地被任意线程并发调用。
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// 同步读取一个属性值，可能阻塞。
    async fn get(&self, request: PropertyValue) -> Result<PropertyValue, BackendError>;

    /// 同步写入一个属性值。
    async fn set(&self, value: PropertyValue) -> Result<(), BackendError>;

    /// 订阅一组属性；若其中某个属性已订阅，原子地替换其选项。
    async fn subscribe(&self, options: &[SubscribeOption]) -> Result<(), BackendError>;

    /// 取消订阅某个属性（全部区域）。
    async fn unsubscribe(&self, prop_id: PropertyId) -> Result<(), BackendError>;

    /// 发起一批异步读取；调用立即返回，结果经由事件通道以
    /// [`BackendEvent::AsyncGetResult`] 投递。
    fn get_async(&self, batch: Vec<AsyncValueRequest>);

    /// 发起一批异步写入；结果以 [`BackendEvent::AsyncSetResult`] 投递。
    fn set_async(&self, batch: Vec<AsyncValueRequest>);

    /// 取消一批仍在途的异步请求（按 `serviceRequestId`）。
    fn cancel(&self, ids: &[ServiceRequestId]);

    /// 拉取全部属性的静态配置（Hub 初始化时调用一次）。
    async fn poll_all_configs(&self) -> Result<Vec<PropertyConfig>, BackendError>;
}
