// ClassType command implementations
//
// Superclass walking, static field writes, and static method invocation.

use crate::codec::{put_tagged_value, put_untagged_value, read_tagged_value, read_u64, read_u8};
use crate::commands::{class_type_commands, command_sets};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{ClassId, FieldId, MethodId, ObjectId, ThreadId, Value};

/// Result of a method invocation: the return value plus the thrown
/// exception object (zero when the call completed normally).
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub value: Value,
    pub exception: ObjectId,
}

impl WireConnection {
    /// Get the direct superclass of a class (ClassType.Superclass).
    /// Returns zero for java.lang.Object.
    pub async fn superclass_of(&self, class_id: ClassId) -> WireResult<ClassId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::CLASS_TYPE,
            class_type_commands::SUPERCLASS,
        );

        packet.data.extend_from_slice(&class_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_u64(&mut data)
    }

    /// Write static field values (ClassType.SetValues). Values are untagged
    /// on the wire; the field type is known to the target.
    pub async fn set_static_values(
        &self,
        class_id: ClassId,
        values: &[(FieldId, Value)],
    ) -> WireResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::CLASS_TYPE,
            class_type_commands::SET_VALUES,
        );

        packet.data.extend_from_slice(&class_id.to_be_bytes());
        packet
            .data
            .extend_from_slice(&(values.len() as i32).to_be_bytes());
        for (field_id, value) in values {
            packet.data.extend_from_slice(&field_id.to_be_bytes());
            put_untagged_value(&mut packet.data, value);
        }

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Invoke a static method (ClassType.InvokeMethod). The invoking thread
    /// must be suspended by an event or suspend command.
    pub async fn invoke_static(
        &self,
        class_id: ClassId,
        thread_id: ThreadId,
        method_id: MethodId,
        args: &[Value],
        options: i32,
    ) -> WireResult<InvokeResult> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::CLASS_TYPE,
            class_type_commands::INVOKE_METHOD,
        );

        packet.data.extend_from_slice(&class_id.to_be_bytes());
        packet.data.extend_from_slice(&thread_id.to_be_bytes());
        packet.data.extend_from_slice(&method_id.to_be_bytes());
        packet
            .data
            .extend_from_slice(&(args.len() as i32).to_be_bytes());
        for arg in args {
            put_tagged_value(&mut packet.data, arg);
        }
        packet.data.extend_from_slice(&options.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let value = read_tagged_value(&mut data)?;
        let _exception_tag = read_u8(&mut data)?;
        let exception = read_u64(&mut data)?;

        Ok(InvokeResult { value, exception })
    }
}
