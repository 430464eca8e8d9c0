//! # 重连控制
//!
//! 出错或停滞时按线性退避安排一次“重新加载并播放”，次数受上限约束：
//! 第 `n` 次（从 0 计）的延迟为 `base_delay × (n + 1)`。
//!
//! 流结束（ended）走另一条路径：不论计数多少，总是在 `ended_delay` 后安排一次重连，
//! 且不修改计数。
//!
//! 任意时刻最多只有一个待触发的重连。新的安排会替换旧的，用户主动播放会取消它。

use std::time::Duration;

use tokio::time::Instant;

/// 重连策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 退避基准延迟
    pub base_delay: Duration,
    /// 出错重连次数上限
    pub max_retries: u32,
    /// 流结束后重连的固定延迟
    pub ended_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            max_retries: 3,
            ended_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// 计数为 `attempt`（自增前）时的延迟
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

/// 触发重连的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryReason {
    Error,
    Stalled,
    Ended,
}

/// 已安排的重连
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRetry {
    pub deadline: Instant,
    pub reason: RetryReason,
}

/// 出错或停滞后的处理结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { attempt: u32, delay: Duration },
    Exhausted,
}

#[derive(Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    count: u32,
    pending: Option<PendingRetry>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            count: 0,
            pending: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn pending(&self) -> Option<PendingRetry> {
        self.pending
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    /// 出错或停滞
    ///
    /// 计数未达上限时先自增再安排；达到上限时取消已安排的重连并返回 `Exhausted`。
    /// 上限为 3 时第 1 到 3 次失败都会安排重连，第 4 次失败才结束重试。
    pub fn on_failure(&mut self, reason: RetryReason, now: Instant) -> RetryDecision {
        if self.count >= self.policy.max_retries {
            self.pending = None;
            return RetryDecision::Exhausted;
        }
        let delay = self.policy.delay(self.count);
        self.count += 1;
        self.pending = Some(PendingRetry {
            deadline: now + delay,
            reason,
        });
        RetryDecision::Scheduled {
            attempt: self.count,
            delay,
        }
    }

    /// 流结束，无条件安排一次重连
    pub fn on_ended(&mut self, now: Instant) -> Duration {
        let delay = self.policy.ended_delay;
        self.pending = Some(PendingRetry {
            deadline: now + delay,
            reason: RetryReason::Ended,
        });
        delay
    }

    /// 取出已到期的重连
    pub fn take_due(&mut self, now: Instant) -> Option<PendingRetry> {
        match self.pending {
            Some(p) if p.deadline <= now => self.pending.take(),
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// 用户主动播放：清零计数并取消已安排的重连
    pub fn reset(&mut self) {
        self.count = 0;
        self.pending = None;
    }
}
