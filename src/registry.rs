//! Channel registry: connection identity and retry state live here, with a
//! lifetime independent of the UI component tree. UI code holds only the
//! handles this registry returns, so rapid mount/unmount cycles cannot cause
//! connection flapping.

use std::sync::{Arc, Mutex};

use crate::channel::{ChannelHandle, ChannelOptions, MessageHandler};
use crate::config::ChannelConfig;
use crate::transport::{Connect, WsConnect};

struct RegistryState {
    active: Option<Arc<ChannelHandle>>,
    generation: u64,
}

/// Owns the single active channel and applies the reuse rule.
pub struct ChannelRegistry<C: Connect = WsConnect> {
    config: ChannelConfig,
    connector: Arc<C>,
    state: Mutex<RegistryState>,
}

impl ChannelRegistry<WsConnect> {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, WsConnect::new())
    }
}

impl<C: Connect> ChannelRegistry<C> {
    /// Registry over a caller-supplied connector. The seam used by tests to
    /// inject a fake transport.
    pub fn with_connector(config: ChannelConfig, connector: C) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            state: Mutex::new(RegistryState {
                active: None,
                generation: 0,
            }),
        }
    }

    /// Open a channel for `logical_path`.
    ///
    /// While an existing channel for the exact same path is Connected and
    /// stable, the call attaches the new `on_message` and fallback callbacks
    /// to it and returns the same handle; no new transport is created, so
    /// the subprotocols negotiated by the original open stay in effect. Any
    /// other prior channel is torn down first. An empty path yields an inert
    /// Disconnected handle.
    pub fn open(
        &self,
        logical_path: &str,
        on_message: Arc<MessageHandler>,
        options: ChannelOptions,
    ) -> Arc<ChannelHandle> {
        let mut state = self.state.lock().expect("registry lock poisoned");

        if let Some(active) = &state.active {
            if active.logical_path() == logical_path && active.is_stable() {
                tracing::debug!(logical_path, "reusing stable channel");
                active.replace_consumer(on_message, options.on_fallback);
                return Arc::clone(active);
            }
        }

        if let Some(previous) = state.active.take() {
            tracing::debug!(path = previous.logical_path(), "tearing down prior channel");
            previous.close();
        }

        state.generation += 1;
        let handle = if logical_path.trim().is_empty() {
            Arc::new(ChannelHandle::inert(logical_path.to_string()))
        } else {
            Arc::new(ChannelHandle::spawn(
                self.config.clone(),
                Arc::clone(&self.connector),
                logical_path,
                on_message,
                options,
                state.generation,
            ))
        };
        state.active = Some(Arc::clone(&handle));
        handle
    }

    /// Handle for the currently active channel, if any.
    pub fn active(&self) -> Option<Arc<ChannelHandle>> {
        self.state
            .lock()
            .expect("registry lock poisoned")
            .active
            .clone()
    }

    /// Tear down the active channel.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("registry lock poisoned");
        if let Some(active) = state.active.take() {
            active.close();
        }
    }
}

impl<C: Connect> Drop for ChannelRegistry<C> {
    fn drop(&mut self) {
        self.close();
    }
}
