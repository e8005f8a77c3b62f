//! 会话监管：取消与超时
//!
//! 进程级持有根 CancellationToken，每个查询拿到子 token；超时是取消的特例，到期后触发同一个 token。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    /// 用户 Cancel / Ctrl+C 时触发
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 取消所有进行中的查询
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个查询）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// 创建带截止时间的子 token：到期后自动取消
    pub fn child_token_with_deadline(&self, deadline: Duration) -> CancellationToken {
        let token = self.cancel_token.child_token();
        cancel_after(token.clone(), deadline);
        token
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 到期后触发取消；token 提前被取消时计时任务随之退出
pub fn cancel_after(token: CancellationToken, deadline: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline_ms = deadline.as_millis() as u64, "deadline exceeded, cancelling");
                token.cancel();
            }
        }
    });
}
