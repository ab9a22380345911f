//! Message subscriptions keyed by message name.
//!
//! The proxy hands every decoded message to [`MessageHandler::dispatch`].
//! Anyone holding a [`Subscription`] for that name gets a copy, so code
//! outside the relay loop can watch for replies without blocking it.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use lludp_protocol::Message;
use tokio::sync::mpsc;

use crate::CircuitError;

type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

struct Subscriber {
    predicate: Option<Predicate>,
    sender: mpsc::UnboundedSender<Message>,
}

impl Subscriber {
    fn accepts(&self, message: &Message) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(message))
    }
}

/// Fan-out of decoded messages to subscribers.
#[derive(Default)]
pub struct MessageHandler {
    subscribers: HashMap<String, Vec<Subscriber>>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every message named `name` from now on.
    pub fn subscribe(&mut self, name: impl Into<String>) -> Subscription {
        self.add(name.into(), None)
    }

    /// Receives messages named `name` that `predicate` accepts.
    pub fn subscribe_filtered<F>(&mut self, name: impl Into<String>, predicate: F) -> Subscription
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.add(name.into(), Some(Box::new(predicate)))
    }

    fn add(&mut self, name: String, predicate: Option<Predicate>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscribers = self.subscribers.entry(name.clone()).or_default();
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.push(Subscriber { predicate, sender });
        Subscription { name, receiver }
    }

    /// Waits for the first message named `name` that `predicate` accepts.
    ///
    /// The subscription is taken out immediately, so a message dispatched
    /// after this call returns but before the future is polled is still
    /// seen. The returned future does not borrow the handler.
    ///
    /// # Errors
    /// [`CircuitError::Timeout`] if nothing matches in time, and
    /// [`CircuitError::HandlerClosed`] if the handler is dropped first.
    pub fn wait_for<N, F>(
        &mut self,
        name: N,
        predicate: F,
        timeout: Duration,
    ) -> impl Future<Output = Result<Message, CircuitError>> + Send + use<N, F>
    where
        N: Into<String>,
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe_filtered(name, predicate);
        async move {
            let received = tokio::time::timeout(timeout, subscription.recv()).await;
            match received {
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(CircuitError::HandlerClosed),
                Err(_) => Err(CircuitError::Timeout(subscription.name)),
            }
        }
    }

    /// Sends a copy of `message` to every live subscriber that accepts it.
    ///
    /// Returns how many subscribers got it. Subscribers whose
    /// [`Subscription`] was dropped are removed here.
    pub fn dispatch(&mut self, message: &Message) -> usize {
        let Some(subscribers) = self.subscribers.get_mut(message.name()) else {
            return 0;
        };
        subscribers.retain(|s| !s.sender.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.accepts(message)) {
            if subscriber.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        if subscribers.is_empty() {
            self.subscribers.remove(message.name());
        }
        delivered
    }

    /// True if anything is listening for `name`.
    pub fn wants(&self, name: &str) -> bool {
        self.subscribers
            .get(name)
            .is_some_and(|subs| subs.iter().any(|s| !s.sender.is_closed()))
    }

    /// Live subscribers for `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers
            .get(name)
            .map_or(0, |subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("names", &self.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    name: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// Message name this subscription listens for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next matching message, or `None` once the handler is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Next matching message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}
