use karaoke_player_models::{Command, FinalState, PlayerState};
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

/// Every message that crosses the window boundary, tagged by topic.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "topic", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    StateSync(PlayerState),
    Command(Command),
    TimeUpdate(f64),
    DurationUpdate(f64),
    RequestState,
    FinalState(FinalState),
    VideoLoaded,
    VideoEnded,
    Reattached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StateSync,
    Command,
    TimeUpdate,
    DurationUpdate,
    RequestState,
    FinalState,
    VideoLoaded,
    VideoEnded,
    Reattached,
}

impl Topic {
    /// Topics published by the detached window or its lifecycle, consumed by the primary.
    pub const UPSTREAM: &'static [Topic] = &[
        Topic::TimeUpdate,
        Topic::DurationUpdate,
        Topic::RequestState,
        Topic::FinalState,
        Topic::VideoLoaded,
        Topic::VideoEnded,
        Topic::Reattached,
    ];

    pub const DOWNSTREAM: &'static [Topic] = &[Topic::StateSync, Topic::Command];

    pub const ALL: &'static [Topic] = &[
        Topic::StateSync,
        Topic::Command,
        Topic::TimeUpdate,
        Topic::DurationUpdate,
        Topic::RequestState,
        Topic::FinalState,
        Topic::VideoLoaded,
        Topic::VideoEnded,
        Topic::Reattached,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::StateSync => "state-sync",
            Topic::Command => "command",
            Topic::TimeUpdate => "time-update",
            Topic::DurationUpdate => "duration-update",
            Topic::RequestState => "request-state",
            Topic::FinalState => "final-state",
            Topic::VideoLoaded => "video-loaded",
            Topic::VideoEnded => "video-ended",
            Topic::Reattached => "reattached",
        }
    }
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::StateSync(_) => Topic::StateSync,
            Event::Command(_) => Topic::Command,
            Event::TimeUpdate(_) => Topic::TimeUpdate,
            Event::DurationUpdate(_) => Topic::DurationUpdate,
            Event::RequestState => Topic::RequestState,
            Event::FinalState(_) => Topic::FinalState,
            Event::VideoLoaded => Topic::VideoLoaded,
            Event::VideoEnded => Topic::VideoEnded,
            Event::Reattached => Topic::Reattached,
        }
    }
}

/// Process-wide publish/subscribe bus shared by both windows.
///
/// Delivery is best-effort: a subscriber only sees events published after it
/// subscribed, and a subscriber that falls more than `capacity` events behind
/// loses the oldest ones.
#[derive(Debug)]
pub struct EventChannel {
    tx: Sender<Event>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget. Nobody listening is not an error.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        if self.tx.send(event).is_err() {
            trace!(topic = topic.name(), "no subscribers, event dropped");
        }
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        Subscription {
            receiver: self.tx.subscribe(),
            topics: topics.to_vec(),
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(Topic::ALL)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Registration on the bus for a set of topics. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<Event>,
    topics: Vec<Topic>,
}

impl Subscription {
    /// Next event on one of the subscribed topics. `None` once the bus is gone.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.topics.contains(&event.topic()) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind, events lost");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.topics.contains(&event.topic()) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind, events lost");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Everything already delivered, in order.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Ends the registration explicitly.
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let channel = EventChannel::new(8);
        assert_eq!(channel.subscriber_count(), 0);

        channel.publish(Event::RequestState);
        channel.publish(Event::TimeUpdate(1.0));
    }

    #[test]
    fn subscription_only_sees_its_topics() {
        let channel = EventChannel::new(8);
        let mut downstream = channel.subscribe(Topic::DOWNSTREAM);

        channel.publish(Event::TimeUpdate(2.0));
        channel.publish(Event::Command(karaoke_player_models::Command::pause()));
        channel.publish(Event::VideoLoaded);

        assert_eq!(
            downstream.drain(),
            vec![Event::Command(karaoke_player_models::Command::pause())]
        );
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let channel = EventChannel::new(8);
        channel.publish(Event::VideoEnded);

        let mut late = channel.subscribe_all();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn unsubscribe_releases_the_receiver() {
        let channel = EventChannel::new(8);
        let subscription = channel.subscribe_all();
        assert_eq!(channel.subscriber_count(), 1);

        subscription.unsubscribe();
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn lagging_subscriber_keeps_newest_events() {
        let channel = EventChannel::new(2);
        let mut subscription = channel.subscribe_all();

        for time in 0..5 {
            channel.publish(Event::TimeUpdate(time as f64));
        }

        assert_eq!(
            subscription.drain(),
            vec![Event::TimeUpdate(3.0), Event::TimeUpdate(4.0)]
        );
    }

    #[test]
    fn topic_names_match_wire_tags() {
        let events = [
            Event::StateSync(PlayerState::default()),
            Event::Command(karaoke_player_models::Command::play()),
            Event::TimeUpdate(0.0),
            Event::DurationUpdate(1.0),
            Event::RequestState,
            Event::FinalState(FinalState::default()),
            Event::VideoLoaded,
            Event::VideoEnded,
            Event::Reattached,
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["topic"], event.topic().name());
        }
    }
}
