use crate::engine::DataChannelHandle;
use crate::error::SendError;
use crate::peer::types::ChannelState;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Watches one data channel: greets the peer once the channel opens and
/// latches as soon as any message arrives.
///
/// The channel handle is attached after construction with [`bind`](Self::bind).
/// Messages that arrive before that are still recorded.
pub struct ChannelObserver {
    name: String,
    greeting: String,
    greet_on_open: bool,
    channel: Mutex<Option<Arc<dyn DataChannelHandle>>>,
    state: Mutex<ChannelState>,
    greeted: AtomicBool,
    message_received: AtomicBool,
    last_message: Mutex<Option<String>>,
    send_failures: AtomicUsize,
    progress: Arc<Notify>,
}

impl ChannelObserver {
    pub fn new(name: impl Into<String>, greet_on_open: bool, progress: Arc<Notify>) -> Self {
        let name = name.into();
        Self {
            greeting: format!("Hello from {}!", name),
            name,
            greet_on_open,
            channel: Mutex::new(None),
            state: Mutex::new(ChannelState::Connecting),
            greeted: AtomicBool::new(false),
            message_received: AtomicBool::new(false),
            last_message: Mutex::new(None),
            send_failures: AtomicUsize::new(0),
            progress,
        }
    }

    /// Attaches the channel and registers with the engine. If the channel is
    /// already open the greeting goes out now.
    pub async fn bind(self: &Arc<Self>, channel: Arc<dyn DataChannelHandle>) {
        info!(endpoint = %self.name, label = %channel.label(), "Data channel attached");
        *self.channel.lock() = Some(channel.clone());
        channel.register_observer(self.clone());

        let state = channel.state();
        if state == ChannelState::Open {
            self.on_state_change(state).await;
        }
    }

    pub async fn on_state_change(&self, state: ChannelState) {
        info!(endpoint = %self.name, ?state, "Data channel state");
        *self.state.lock() = state;
        match state {
            ChannelState::Open => self.greet().await,
            // the handle holds this observer through its callbacks
            ChannelState::Closed => {
                self.channel.lock().take();
            }
            _ => {}
        }
        self.progress.notify_waiters();
    }

    pub fn on_message(&self, data: &[u8]) {
        let message = String::from_utf8_lossy(data).into_owned();
        info!(endpoint = %self.name, %message, "Received");
        *self.last_message.lock() = Some(message);
        self.message_received.store(true, Ordering::Release);
        self.progress.notify_waiters();
    }

    async fn greet(&self) {
        if !self.greet_on_open {
            return;
        }
        let Some(channel) = self.channel.lock().clone() else {
            debug!(endpoint = %self.name, "Channel open before bind, greeting deferred");
            return;
        };
        if self.greeted.swap(true, Ordering::AcqRel) {
            return;
        }

        match channel.send(Bytes::from(self.greeting.clone())).await {
            Ok(()) => info!(endpoint = %self.name, message = %self.greeting, "Sent"),
            Err(source) => {
                let error = SendError {
                    label: channel.label().to_string(),
                    source,
                };
                warn!(endpoint = %self.name, %error, "Failed to send message");
                self.send_failures.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        self.channel.lock().is_some()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn has_received_message(&self) -> bool {
        self.message_received.load(Ordering::Acquire)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().clone()
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn has_greeted(&self) -> bool {
        self.greeted.load(Ordering::Acquire)
    }

    pub fn send_failures(&self) -> usize {
        self.send_failures.load(Ordering::Acquire)
    }
}
