#[cfg(test)]
pub mod mocks {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Utc};
    use mockall::mock;

    use worklog_core::{
        Capability, CapabilitySet, DispatchError, DispatchMessage, DispatchResult,
        WorkerChannel, WorkerRegistration,
    };

    mock! {
        pub Channel {}

        impl WorkerChannel for Channel {
            fn send(&self, message: DispatchMessage) -> DispatchResult<()>;
            fn is_closed(&self) -> bool;
        }
    }

    /// 记录所有发送消息的通道，可切换为发送失败
    #[derive(Default)]
    pub struct RecordingChannel {
        sent: Mutex<Vec<DispatchMessage>>,
        failing: Mutex<bool>,
    }

    impl RecordingChannel {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        pub fn sent(&self) -> Vec<DispatchMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl WorkerChannel for RecordingChannel {
        fn send(&self, message: DispatchMessage) -> DispatchResult<()> {
            if *self.failing.lock().unwrap() {
                return Err(DispatchError::ChannelClosed);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    pub fn registration(worker_id: &str, capabilities: &[Capability]) -> WorkerRegistration {
        let caps: CapabilitySet = capabilities.iter().copied().collect();
        WorkerRegistration::new(format!("{worker_id}-name"), caps).with_id(worker_id)
    }

    pub fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }
}
