//! Active timer channels keyed by task id.
//!
//! At most one channel exists per task. The registry is owned by whoever
//! drives the event loop, so the invariant holds through `register` and
//! `unregister` alone; nothing here is shared across threads.

use std::collections::HashMap;

use tracing::debug;

use crate::channel::{ChannelEvent, ChannelId, ChannelMessage, TimerChannel};
use crate::task::TaskId;

#[derive(Debug, Default)]
pub struct TimerRegistry {
    channels: HashMap<TaskId, TimerChannel>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `channel` for its task. An existing channel for the same task
    /// is closed and evicted first, and handed back to the caller.
    pub fn register(&mut self, channel: TimerChannel) -> Option<TimerChannel> {
        let task_id = channel.task_id();
        let evicted = self.channels.remove(&task_id).map(|mut previous| {
            debug!(task_id, channel = %previous.id(), "replacing timer channel");
            previous.close();
            previous
        });
        self.channels.insert(task_id, channel);
        evicted
    }

    /// Closes and removes the channel for `task_id`. Returns whether one was
    /// registered.
    pub fn unregister(&mut self, task_id: TaskId) -> bool {
        match self.channels.remove(&task_id) {
            Some(mut channel) => {
                channel.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TimerChannel> {
        self.channels.get(&task_id)
    }

    /// Whether `channel` is still the registered channel for `task_id`.
    pub fn is_current(&self, task_id: TaskId, channel: ChannelId) -> bool {
        self.channels
            .get(&task_id)
            .is_some_and(|c| c.id() == channel)
    }

    /// Applies a message from a channel worker.
    ///
    /// Messages from channels that were replaced or unregistered are dropped,
    /// as is anything the channel's state machine refuses. A channel that
    /// reaches a terminal state is removed. Returns the event to render.
    pub fn dispatch(&mut self, message: ChannelMessage) -> Option<ChannelEvent> {
        let ChannelMessage {
            task_id,
            channel,
            event,
        } = message;

        let Some(current) = self.channels.get_mut(&task_id) else {
            debug!(task_id, %channel, ?event, "dropping event for unregistered task");
            return None;
        };
        if current.id() != channel {
            debug!(task_id, %channel, ?event, "dropping event from stale channel");
            return None;
        }
        if !current.apply(&event) {
            debug!(task_id, %channel, ?event, "channel refused event");
            return None;
        }
        if current.status().is_terminal() {
            self.channels.remove(&task_id);
        }
        Some(event)
    }

    /// Closes every channel.
    pub fn close_all(&mut self) {
        for (_, mut channel) in self.channels.drain() {
            channel.close();
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.channels.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, ChannelStatus};
    use tokio::sync::oneshot::error::TryRecvError;

    fn message(channel: &TimerChannel, event: ChannelEvent) -> ChannelMessage {
        ChannelMessage {
            task_id: channel.task_id(),
            channel: channel.id(),
            event,
        }
    }

    #[test]
    fn second_register_closes_first_exactly_once() {
        let mut registry = TimerRegistry::new();
        let (first, mut first_rx) = TimerChannel::detached(1, 60);
        let (second, mut second_rx) = TimerChannel::detached(1, 45);
        let first_id = first.id();
        let second_id = second.id();

        assert!(registry.register(first).is_none());
        let evicted = registry.register(second).expect("first channel evicted");

        assert_eq!(evicted.id(), first_id);
        assert_eq!(evicted.status(), ChannelStatus::Closed);
        assert_eq!(first_rx.try_recv(), Ok(()));
        assert_eq!(first_rx.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(second_rx.try_recv(), Err(TryRecvError::Empty));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).map(|c| c.id()), Some(second_id));
    }

    #[test]
    fn unregister_is_safe_when_absent() {
        let mut registry = TimerRegistry::new();
        assert!(!registry.unregister(9));

        let (channel, mut rx) = TimerChannel::detached(9, 10);
        registry.register(channel);
        assert!(registry.unregister(9));
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(registry.get(9).is_none());
        assert!(!registry.unregister(9));
    }

    #[test]
    fn stale_channel_events_are_dropped() {
        let mut registry = TimerRegistry::new();
        let (old, _old_rx) = TimerChannel::detached(4, 30);
        let stale = message(&old, ChannelEvent::Tick(29));
        registry.register(old);
        let (new, _new_rx) = TimerChannel::detached(4, 20);
        let fresh = message(&new, ChannelEvent::Opened { remaining: 20 });
        registry.register(new);

        assert_eq!(registry.dispatch(stale), None);
        assert_eq!(
            registry.dispatch(fresh),
            Some(ChannelEvent::Opened { remaining: 20 })
        );
    }

    #[test]
    fn events_after_unregister_are_dropped() {
        let mut registry = TimerRegistry::new();
        let (channel, _rx) = TimerChannel::detached(5, 30);
        let opened = message(&channel, ChannelEvent::Opened { remaining: 30 });
        let late = message(&channel, ChannelEvent::Tick(28));
        registry.register(channel);
        assert!(registry.dispatch(opened).is_some());

        registry.unregister(5);
        assert_eq!(registry.dispatch(late), None);
    }

    #[test]
    fn finished_purges_and_ignores_later_ticks() {
        let mut registry = TimerRegistry::new();
        let (channel, _rx) = TimerChannel::detached(6, 3);
        let events = [
            ChannelEvent::Opened { remaining: 3 },
            ChannelEvent::Tick(2),
            ChannelEvent::Finished,
            ChannelEvent::Tick(1),
        ]
        .map(|e| message(&channel, e));
        registry.register(channel);

        let rendered: Vec<_> = events
            .into_iter()
            .filter_map(|m| registry.dispatch(m))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ChannelEvent::Opened { remaining: 3 },
                ChannelEvent::Tick(2),
                ChannelEvent::Finished,
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn errored_channels_are_purged() {
        let mut registry = TimerRegistry::new();
        let (channel, _rx) = TimerChannel::detached(7, 3);
        let failed = message(
            &channel,
            ChannelEvent::Failed(ChannelError::ConnectionTimeout(
                std::time::Duration::from_secs(5),
            )),
        );
        registry.register(channel);
        assert!(registry.dispatch(failed).is_some());
        assert!(registry.get(7).is_none());
    }

    #[test]
    fn close_all_closes_every_channel() {
        let mut registry = TimerRegistry::new();
        let (a, mut a_rx) = TimerChannel::detached(1, 10);
        let (b, mut b_rx) = TimerChannel::detached(2, 10);
        registry.register(a);
        registry.register(b);

        registry.close_all();
        assert!(registry.is_empty());
        assert_eq!(a_rx.try_recv(), Ok(()));
        assert_eq!(b_rx.try_recv(), Ok(()));
    }
}
