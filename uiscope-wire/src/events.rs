// Asynchronous event handling
//
// Events arrive from the target to notify about breakpoints, thread
// lifecycle, and VM death.

use crate::codec::{read_i32, read_u64, read_u8};
use crate::commands::event_kinds;
use crate::protocol::WireResult;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: i32,
    pub details: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Unknown {
        kind: u8,
    },
}

/// Parse a composite event packet body.
pub fn parse_event_packet(data: &[u8]) -> WireResult<EventSet> {
    let mut buf = data;

    let suspend_policy = read_u8(&mut buf)?;
    let event_count = read_i32(&mut buf)?;

    let mut events = Vec::with_capacity(event_count as usize);

    for _ in 0..event_count {
        let kind = read_u8(&mut buf)?;
        let request_id = read_i32(&mut buf)?;

        let details = match kind {
            event_kinds::BREAKPOINT => {
                let thread = read_u64(&mut buf)?;
                let location = read_location(&mut buf)?;
                EventKind::Breakpoint { thread, location }
            }
            event_kinds::VM_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::VmStart { thread }
            }
            event_kinds::VM_DEATH => EventKind::VmDeath,
            event_kinds::THREAD_START => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadStart { thread }
            }
            event_kinds::THREAD_DEATH => {
                let thread = read_u64(&mut buf)?;
                EventKind::ThreadDeath { thread }
            }
            _ => {
                debug!("unsupported event kind: {}", kind);
                // Unknown events may carry a body we cannot skip; stop here
                // rather than misparse the rest of the set.
                events.push(Event {
                    kind,
                    request_id,
                    details: EventKind::Unknown { kind },
                });
                break;
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

fn read_location(buf: &mut &[u8]) -> WireResult<Location> {
    let type_tag = read_u8(buf)?;
    let class_id = read_u64(buf)?;
    let method_id = read_u64(buf)?;
    let index = read_u64(buf)?;

    Ok(Location {
        type_tag,
        class_id,
        method_id,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_breakpoint_event() {
        let mut data = Vec::new();
        data.push(1u8); // suspend policy: event thread
        data.extend_from_slice(&1i32.to_be_bytes()); // one event
        data.push(event_kinds::BREAKPOINT);
        data.extend_from_slice(&42i32.to_be_bytes()); // request id
        data.extend_from_slice(&0x99u64.to_be_bytes()); // thread
        data.push(1); // location: class type tag
        data.extend_from_slice(&7u64.to_be_bytes());
        data.extend_from_slice(&8u64.to_be_bytes());
        data.extend_from_slice(&0u64.to_be_bytes());

        let set = parse_event_packet(&data).unwrap();
        assert_eq!(set.suspend_policy, 1);
        assert_eq!(set.events.len(), 1);
        assert_eq!(set.events[0].request_id, 42);
        match &set.events[0].details {
            EventKind::Breakpoint { thread, location } => {
                assert_eq!(*thread, 0x99);
                assert_eq!(location.class_id, 7);
                assert_eq!(location.method_id, 8);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
