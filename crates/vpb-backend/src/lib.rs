//! `vpb-backend`：后端适配层契约与重试驱动。
//!
//! # 定位（Why）
//! - 把"车辆后端"收敛成单一、可替换的协作者（[`BackendAdapter`]），让 Hub 把它当作
//!   一个受互斥锁保护的协作对象，测试时可用假后端无痛替换。
//! - 重试驱动（[`retry`]）包一层统一的"重试/超时/错误翻译"语义在同步调用外面，
//!   Hub 的 `get`/`set` passthrough 与 PropertyService 的异步重试都复用它。

pub mod adapter;
pub mod retry;

pub use adapter::{
    AsyncValueRequest, BackendAdapter, BackendEvent, BackendEventReceiver, BackendEventSender,
    SubscribeOption, backend_event_channel,
};
pub use retry::{RetryDriver, RetryOutcome, RetryPolicy};
