// EventRequest command implementations
//
// Breakpoint arm/disarm with location and thread filters.

use crate::codec::read_i32;
use crate::commands::{command_sets, event_commands, event_kinds, modifier_kinds};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{Location, ThreadId};

/// Suspend policy for events
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

impl WireConnection {
    /// Arm a breakpoint (EventRequest.Set). An optional thread filter
    /// restricts the event to one thread. Returns the request id.
    pub async fn set_breakpoint(
        &self,
        location: &Location,
        thread_filter: Option<ThreadId>,
        suspend_policy: SuspendPolicy,
    ) -> WireResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::SET);

        packet.data.push(event_kinds::BREAKPOINT);
        packet.data.push(suspend_policy as u8);

        let modifier_count = 1 + thread_filter.is_some() as i32;
        packet.data.extend_from_slice(&modifier_count.to_be_bytes());

        if let Some(thread_id) = thread_filter {
            packet.data.push(modifier_kinds::THREAD_ONLY);
            packet.data.extend_from_slice(&thread_id.to_be_bytes());
        }

        packet.data.push(modifier_kinds::LOCATION_ONLY);
        packet.data.push(location.type_tag);
        packet.data.extend_from_slice(&location.class_id.to_be_bytes());
        packet
            .data
            .extend_from_slice(&location.method_id.to_be_bytes());
        packet.data.extend_from_slice(&location.index.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// Disarm a breakpoint by request id (EventRequest.Clear).
    pub async fn clear_breakpoint(&self, request_id: i32) -> WireResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(id, command_sets::EVENT_REQUEST, event_commands::CLEAR);

        packet.data.push(event_kinds::BREAKPOINT);
        packet.data.extend_from_slice(&request_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}
