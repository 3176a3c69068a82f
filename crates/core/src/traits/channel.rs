use crate::{errors::DispatchResult, models::DispatchMessage};

/// Worker连接的出站方向
///
/// 传输层负责实现，`send` 只把消息放入连接的发送队列，不能等待网络往返。
pub trait WorkerChannel: Send + Sync {
    /// 投递一条消息到Worker，队列已满或连接已断开时返回错误
    fn send(&self, message: DispatchMessage) -> DispatchResult<()>;

    /// 连接是否已经关闭
    fn is_closed(&self) -> bool;
}
