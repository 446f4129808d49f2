// StackFrame command implementations

use crate::codec::{read_i32, read_tagged_value};
use crate::commands::{command_sets, stack_frame_commands};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{FrameId, ThreadId, Value};

/// Variable slot request for GetValues
#[derive(Debug, Clone)]
pub struct VariableSlot {
    pub slot: i32,
    pub sig_byte: u8,
}

impl WireConnection {
    /// Get values of variable slots in a frame (StackFrame.GetValues).
    pub async fn frame_values(
        &self,
        thread_id: ThreadId,
        frame_id: FrameId,
        slots: &[VariableSlot],
    ) -> WireResult<Vec<Value>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::STACK_FRAME,
            stack_frame_commands::GET_VALUES,
        );

        packet.data.extend_from_slice(&thread_id.to_be_bytes());
        packet.data.extend_from_slice(&frame_id.to_be_bytes());
        packet
            .data
            .extend_from_slice(&(slots.len() as i32).to_be_bytes());
        for slot in slots {
            packet.data.extend_from_slice(&slot.slot.to_be_bytes());
            packet.data.push(slot.sig_byte);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let values_count = read_i32(&mut data)?;
        let mut values = Vec::with_capacity(values_count as usize);

        for _ in 0..values_count {
            values.push(read_tagged_value(&mut data)?);
        }

        Ok(values)
    }
}
