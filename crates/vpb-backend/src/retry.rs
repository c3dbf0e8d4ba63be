//! 重试驱动：把单次同步后端调用包一层有界重试。
//!
//! # 设计背景（Why）
//! - 只有 `TRY_AGAIN`（或传输层的瞬时失败）值得重试；`INVALID_ARG` 必须立即变成
//!   永久错误，其余错误码直接透传——把这条策略集中在一处，避免每个调用点各自
//!   实现一套重试循环（并各自犯错）。
//! - 两种终止模式（按耗时终止 vs 按次数终止）哪种更合适取决于调用方，选型权交给
//!   调用方构造的 [`RetryPolicy`]。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use vpb_core::{BackendError, BackendStatus, PropertyStatus, PropertyValue, VpbError};

/// 重试策略：按耗时终止或按次数终止。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryPolicy {
    /// 只要 `elapsed < max_duration` 就继续重试，每次重试前睡眠 `sleep_between`。
    Duration {
        max_duration: Duration,
        sleep_between: Duration,
    },
    /// 重试直到尝试次数达到 `max_retries`（含首次调用）。
    Count {
        max_retries: u32,
        sleep_between: Duration,
    },
}

impl RetryPolicy {
    /// 常用的默认值：睡眠间隔 100ms，总重试预算 2000ms。
    pub const fn default_duration() -> Self {
        RetryPolicy::Duration {
            max_duration: Duration::from_millis(2000),
            sleep_between: Duration::from_millis(100),
        }
    }
}

/// 一次重试驱动调用的结果：要么拿到值，要么拿到已分类的 [`VpbError`]。
pub type RetryOutcome<T> = Result<T, VpbError>;

/// 包裹单个后端调用的重试执行器。
#[derive(Clone, Copy, Debug)]
pub struct RetryDriver {
    policy: RetryPolicy,
}

impl RetryDriver {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// 对任意返回 `Result<T, BackendError>` 的后端调用应用重试策略。
    ///
    /// # 契约（What）
    /// - `TRY_AGAIN` 触发重试，直到耗尽耗时/次数预算，此时返回
    ///   [`VpbError::BackendTransient`]，携带最后一次观测到的底层错误；
    /// - `INVALID_ARG` 立即转换为 [`VpbError::ArgumentError`]；
    /// - 其他错误码立即以 [`VpbError::BackendPermanent`] 透传；
    /// - 成功时直接返回 `Ok(value)`。
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error: Option<BackendError> = None;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.status == BackendStatus::TryAgain => {
                    tracing::debug!(attempt, elapsed = ?started.elapsed(), "retrying after TRY_AGAIN");
                    last_error = Some(err);
                    if !self.should_retry_again(attempt, started.elapsed()) {
                        tracing::warn!(attempt, "retry budget exhausted");
                        return Err(VpbError::BackendTransient {
                            last: last_error.expect("set above"),
                        });
                    }
                    tokio::time::sleep(self.sleep_between()).await;
                }
                Err(err) if err.status == BackendStatus::InvalidArg => {
                    return Err(VpbError::ArgumentError {
                        prop_id: None,
                        area_id: None,
                        reason: format!("backend rejected argument: {err}"),
                    });
                }
                Err(err) => return Err(VpbError::BackendPermanent { backend: err }),
            }
        }
    }

    /// `get` 专用包装：若后端以 `OK` 返回但值处于 `UNAVAILABLE` 状态（相当于
    /// "空值"读取），归一化为 `NOT_AVAILABLE`，让调用方只需处理一种"不可用"语义。
    pub async fn run_get<F, Fut>(&self, op: F) -> RetryOutcome<PropertyValue>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PropertyValue, BackendError>>,
    {
        let value = self.run(op).await?;
        if value.status == PropertyStatus::Unavailable {
            return Err(VpbError::BackendPermanent {
                backend: BackendError::new(BackendStatus::NotAvailable, 0),
            });
        }
        Ok(value)
    }

    fn should_retry_again(&self, attempt: u32, elapsed: Duration) -> bool {
        match self.policy {
            RetryPolicy::Duration { max_duration, .. } => elapsed < max_duration,
            RetryPolicy::Count { max_retries, .. } => attempt < max_retries,
        }
    }

    fn sleep_between(&self) -> Duration {
        match self.policy {
            RetryPolicy::Duration { sleep_between, .. } => sleep_between,
            RetryPolicy::Count { sleep_between, .. } => sleep_between,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vpb_core::{AreaId, Payload, PropertyId};

    fn ok_value() -> PropertyValue {
        PropertyValue::new(
            PropertyId::new(1),
            AreaId::GLOBAL,
            1,
            PropertyStatus::Available,
            Payload::Int32(vec![1]),
        )
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let driver = RetryDriver::new(RetryPolicy::default_duration());
        let calls = AtomicU32::new(0);
        let result = driver
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BackendError>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_on_try_again_then_succeeds() {
        let driver = RetryDriver::new(RetryPolicy::Count {
            max_retries: 5,
            sleep_between: Duration::from_millis(1),
        });
        let calls = AtomicU32::new(0);
        let result = driver
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BackendError::new(BackendStatus::TryAgain, 0))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_count_budget_and_surfaces_try_again() {
        let driver = RetryDriver::new(RetryPolicy::Count {
            max_retries: 3,
            sleep_between: Duration::from_millis(1),
        });
        let result: RetryOutcome<i32> = driver
            .run(|| async { Err(BackendError::new(BackendStatus::TryAgain, 9)) })
            .await;
        match result {
            Err(VpbError::BackendTransient { last }) => {
                assert_eq!(last.status, BackendStatus::TryAgain);
                assert_eq!(last.vendor_code, 9);
            }
            other => panic!("expected BackendTransient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_arg_is_permanent_and_not_retried() {
        let driver = RetryDriver::new(RetryPolicy::default_duration());
        let calls = AtomicU32::new(0);
        let result: RetryOutcome<i32> = driver
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::new(BackendStatus::InvalidArg, 0)) }
            })
            .await;
        assert!(matches!(result, Err(VpbError::ArgumentError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_errors_propagate_immediately() {
        let driver = RetryDriver::new(RetryPolicy::default_duration());
        let result: RetryOutcome<i32> = driver
            .run(|| async { Err(BackendError::new(BackendStatus::AccessDenied, 0)) })
            .await;
        assert!(matches!(
            result,
            Err(VpbError::BackendPermanent {
                backend: BackendError {
                    status: BackendStatus::AccessDenied,
                    ..
                }
            })
        ));
    }

    #[tokio::test]
    async fn get_null_value_normalizes_to_not_available() {
        let driver = RetryDriver::new(RetryPolicy::default_duration());
        let result = driver
            .run_get(|| async {
                let mut v = ok_value();
                v.status = PropertyStatus::Unavailable;
                Ok(v)
            })
            .await;
        assert!(matches!(
            result,
            Err(VpbError::BackendPermanent {
                backend: BackendError {
                    status: BackendStatus::NotAvailable,
                    ..
                }
            })
        ));
    }
}
