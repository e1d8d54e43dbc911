//! Strongly-typed identifiers.
//!
//! Runtime handles are generational: the issuing session, an arena slot index
//! and the generation the slot had when the handle was minted. Handles have no
//! public constructor, so only a runtime can produce a valid one. A handle to a
//! destroyed slot never aliases whatever reuses that slot later, and a handle
//! from one session never resolves in another.

use std::fmt;

/// Arena-backed handle: session, slot index and slot generation.
pub(crate) trait Handle: Copy {
    fn from_parts(session: u32, index: u32, generation: u32) -> Self;
    fn session(&self) -> u32;
    fn slot(&self) -> u32;
    fn slot_generation(&self) -> u32;
}

/// Macro to define a generational handle newtype.
///
/// Generates: struct, crate-private `new()`, [`Handle`], Display.
macro_rules! define_handle {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            session: u32,
            index: u32,
            generation: u32,
        }

        impl $name {
            pub(crate) fn new(session: u32, index: u32, generation: u32) -> Self {
                Self {
                    session,
                    index,
                    generation,
                }
            }
        }

        impl Handle for $name {
            fn from_parts(session: u32, index: u32, generation: u32) -> Self {
                Self::new(session, index, generation)
            }

            fn session(&self) -> u32 {
                self.session
            }

            fn slot(&self) -> u32 {
                self.index
            }

            fn slot_generation(&self) -> u32 {
                self.generation
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!($prefix, "#{}.{}@{}"),
                    self.index, self.generation, self.session
                )
            }
        }
    };
}

define_handle!(EventId, "event");
define_handle!(QueueId, "queue");

/// Transport-assigned subscription identifier.
///
/// Unlike runtime handles these are minted by a [`Transport`](crate::transport::Transport)
/// implementation, which owns their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display_and_equality() {
        let a = EventId::new(1, 3, 1);
        let b = EventId::new(1, 3, 2);
        let c = EventId::new(2, 3, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "event#3.1@1");
        assert_eq!(QueueId::new(4, 0, 0).to_string(), "queue#0.0@4");
        assert_eq!(SubscriptionId::new(7).to_string(), "sub#7");
    }
}
