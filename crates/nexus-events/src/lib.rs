//! Nexus Events - the in-process publish/subscribe bus
//!
//! Carries state-change and health notifications between all other
//! components. Delivery is at-least-once per subscriber; events from a
//! single origin arrive in publish order. A slow subscriber never blocks a
//! publisher: its oldest undelivered events are dropped and a
//! `SubscriberOverflow` diagnostic is published in their place.

#![deny(unsafe_code)]

pub mod bus;
pub mod filter;

pub use bus::{EventBus, Subscription};
pub use filter::EventFilter;
