// ThreadReference command implementations
//
// Suspension control and stack inspection for target threads.

use crate::codec::{read_i32, read_string, read_u64, read_u8};
use crate::commands::{command_sets, thread_commands};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{FrameId, Location, ThreadId, SUSPEND_STATUS_SUSPENDED};
use serde::{Deserialize, Serialize};

/// Stack frame information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub location: Location,
}

/// Thread status reply
#[derive(Debug, Clone, Copy)]
pub struct ThreadStatus {
    pub thread_status: i32,
    pub suspend_status: i32,
}

impl ThreadStatus {
    pub fn is_suspended(&self) -> bool {
        self.suspend_status & SUSPEND_STATUS_SUSPENDED != 0
    }
}

impl WireConnection {
    /// Get a thread's name (ThreadReference.Name).
    pub async fn thread_name(&self, thread_id: ThreadId) -> WireResult<String> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::NAME);

        packet.data.extend_from_slice(&thread_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Suspend one thread (ThreadReference.Suspend).
    pub async fn thread_suspend(&self, thread_id: ThreadId) -> WireResult<()> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::SUSPEND);

        packet.data.extend_from_slice(&thread_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Resume one thread (ThreadReference.Resume).
    pub async fn thread_resume(&self, thread_id: ThreadId) -> WireResult<()> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::RESUME);

        packet.data.extend_from_slice(&thread_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Get a thread's run and suspend status (ThreadReference.Status).
    pub async fn thread_status(&self, thread_id: ThreadId) -> WireResult<ThreadStatus> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::STATUS);

        packet.data.extend_from_slice(&thread_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let thread_status = read_i32(&mut data)?;
        let suspend_status = read_i32(&mut data)?;

        Ok(ThreadStatus {
            thread_status,
            suspend_status,
        })
    }

    /// Get stack frames (ThreadReference.Frames). Start 0 is the top frame;
    /// length -1 means all frames.
    pub async fn frames(
        &self,
        thread_id: ThreadId,
        start_frame: i32,
        length: i32,
    ) -> WireResult<Vec<Frame>> {
        let id = self.next_id();
        let mut packet =
            CommandPacket::new(id, command_sets::THREAD_REFERENCE, thread_commands::FRAMES);

        packet.data.extend_from_slice(&thread_id.to_be_bytes());
        packet.data.extend_from_slice(&start_frame.to_be_bytes());
        packet.data.extend_from_slice(&length.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let frames_count = read_i32(&mut data)?;
        let mut frames = Vec::with_capacity(frames_count as usize);

        for _ in 0..frames_count {
            let frame_id = read_u64(&mut data)?;

            let type_tag = read_u8(&mut data)?;
            let class_id = read_u64(&mut data)?;
            let method_id = read_u64(&mut data)?;
            let index = read_u64(&mut data)?;

            frames.push(Frame {
                frame_id,
                location: Location {
                    type_tag,
                    class_id,
                    method_id,
                    index,
                },
            });
        }

        Ok(frames)
    }

    /// Get a thread's suspend count (ThreadReference.SuspendCount).
    pub async fn suspend_count(&self, thread_id: ThreadId) -> WireResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::THREAD_REFERENCE,
            thread_commands::SUSPEND_COUNT,
        );

        packet.data.extend_from_slice(&thread_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }
}
