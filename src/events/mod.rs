//! Event registry and timers
//!
//! Suspended promises are woken by name: callers arm [`SuspensionTrigger`]s
//! in the [`EventRegistry`] and anyone may deliver events with
//! [`EventRegistry::trigger_event`]. Timeouts are plain `timer.expired`
//! events scheduled by the [`TimerService`].

pub mod registry;
pub mod timer;
pub mod trigger;

pub use registry::{EventCallback, EventRegistry, FiredEvent, TriggerId};
pub use timer::{TimerService, TIMER_EXPIRED_EVENT, TIMER_ID_POINTER};
pub use trigger::{Predicate, SuspensionTrigger, TriggerCondition};
