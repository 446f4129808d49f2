// VirtualMachine command implementations

use crate::codec::{put_string, read_i32, read_string, read_u64, read_u8};
use crate::commands::{command_sets, vm_commands};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{ReferenceTypeId, StringId, ThreadId};
use serde::{Deserialize, Serialize};

/// Target VM version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub protocol_major: i32,
    pub protocol_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

/// Class match from ClassesBySignature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub ref_type_tag: u8, // 1=class, 2=interface, 3=array
    pub type_id: ReferenceTypeId,
    pub status: i32,
}

impl WireConnection {
    /// Get target VM version information (VirtualMachine.Version).
    pub async fn vm_version(&self) -> WireResult<VmVersion> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::VERSION);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let description = read_string(&mut data)?;
        let protocol_major = read_i32(&mut data)?;
        let protocol_minor = read_i32(&mut data)?;
        let vm_version = read_string(&mut data)?;
        let vm_name = read_string(&mut data)?;

        Ok(VmVersion {
            description,
            protocol_major,
            protocol_minor,
            vm_version,
            vm_name,
        })
    }

    /// Find loaded classes by JNI signature
    /// (VirtualMachine.ClassesBySignature). Signature format:
    /// "Lcom/example/MyClass;" for classes, "[B" for byte arrays.
    pub async fn classes_by_signature(&self, signature: &str) -> WireResult<Vec<ClassInfo>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::VIRTUAL_MACHINE,
            vm_commands::CLASSES_BY_SIGNATURE,
        );

        put_string(&mut packet.data, signature);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let classes_count = read_i32(&mut data)?;
        let mut classes = Vec::with_capacity(classes_count as usize);

        for _ in 0..classes_count {
            let ref_type_tag = read_u8(&mut data)?;
            let type_id = read_u64(&mut data)?;
            let status = read_i32(&mut data)?;

            classes.push(ClassInfo {
                ref_type_tag,
                type_id,
                status,
            });
        }

        Ok(classes)
    }

    /// Get all live threads (VirtualMachine.AllThreads).
    pub async fn all_threads(&self) -> WireResult<Vec<ThreadId>> {
        let id = self.next_id();
        let packet = CommandPacket::new(id, command_sets::VIRTUAL_MACHINE, vm_commands::ALL_THREADS);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let threads_count = read_i32(&mut data)?;
        let mut threads = Vec::with_capacity(threads_count as usize);

        for _ in 0..threads_count {
            threads.push(read_u64(&mut data)?);
        }

        Ok(threads)
    }

    /// Create a string mirror in the target (VirtualMachine.CreateString).
    pub async fn create_string(&self, value: &str) -> WireResult<StringId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::VIRTUAL_MACHINE,
            vm_commands::CREATE_STRING,
        );

        put_string(&mut packet.data, value);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_u64(&mut data)
    }
}
