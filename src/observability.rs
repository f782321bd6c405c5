use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("foundry_chat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("foundry_chat.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("foundry_chat.client.request_duration_seconds");
pub(crate) static CLIENT_RUN_POLLS: Counter = Counter::new("foundry_chat.client.run_polls");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("foundry_chat.stream.events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("foundry_chat.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("foundry_chat.stream.bytes");

pub(crate) static THREADS_CREATED: Counter = Counter::new("foundry_chat.session.threads_created");
pub(crate) static THREAD_CREATION_ERRORS: Counter =
    Counter::new("foundry_chat.session.thread_creation_errors");

pub(crate) static TURNS_STARTED: Counter = Counter::new("foundry_chat.relay.turns_started");
pub(crate) static TURNS_COMPLETED: Counter = Counter::new("foundry_chat.relay.turns_completed");
pub(crate) static TURNS_FAILED: Counter = Counter::new("foundry_chat.relay.turns_failed");
pub(crate) static TURNS_REJECTED: Counter = Counter::new("foundry_chat.relay.turns_rejected");
pub(crate) static TURN_FRAGMENTS: Counter = Counter::new("foundry_chat.relay.fragments");
pub(crate) static TURN_FIRST_FRAGMENT: Moments =
    Moments::new("foundry_chat.relay.first_fragment_seconds");
pub(crate) static TURN_DURATION: Moments = Moments::new("foundry_chat.relay.turn_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
    collector.register_counter(&CLIENT_RUN_POLLS);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&THREADS_CREATED);
    collector.register_counter(&THREAD_CREATION_ERRORS);

    collector.register_counter(&TURNS_STARTED);
    collector.register_counter(&TURNS_COMPLETED);
    collector.register_counter(&TURNS_FAILED);
    collector.register_counter(&TURNS_REJECTED);
    collector.register_counter(&TURN_FRAGMENTS);
    collector.register_moments(&TURN_FIRST_FRAGMENT);
    collector.register_moments(&TURN_DURATION);
}
