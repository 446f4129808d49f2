// ObjectReference command implementations

use crate::classtype::InvokeResult;
use crate::codec::{put_tagged_value, read_i32, read_tagged_value, read_u64, read_u8};
use crate::commands::{command_sets, object_reference_commands};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{ClassId, FieldId, MethodId, ObjectId, ReferenceTypeId, ThreadId, Value};

impl WireConnection {
    /// Get the reference type of an object (ObjectReference.ReferenceType).
    pub async fn reference_type_of(&self, object_id: ObjectId) -> WireResult<ReferenceTypeId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::REFERENCE_TYPE,
        );

        packet.data.extend_from_slice(&object_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let _type_tag = read_u8(&mut data)?;
        read_u64(&mut data)
    }

    /// Get instance field values (ObjectReference.GetValues).
    pub async fn field_values(
        &self,
        object_id: ObjectId,
        field_ids: &[FieldId],
    ) -> WireResult<Vec<Value>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::GET_VALUES,
        );

        packet.data.extend_from_slice(&object_id.to_be_bytes());
        packet
            .data
            .extend_from_slice(&(field_ids.len() as i32).to_be_bytes());
        for field_id in field_ids {
            packet.data.extend_from_slice(&field_id.to_be_bytes());
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

    /// Invoke an instance method (ObjectReference.InvokeMethod). The
    /// invoking thread must be suspended by an event or suspend command.
    pub async fn invoke_method(
        &self,
        object_id: ObjectId,
        thread_id: ThreadId,
        class_id: ClassId,
        method_id: MethodId,
        args: &[Value],
        options: i32,
    ) -> WireResult<InvokeResult> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::INVOKE_METHOD,
        );

        packet.data.extend_from_slice(&object_id.to_be_bytes());
        packet.data.extend_from_slice(&thread_id.to_be_bytes());
        packet.data.extend_from_slice(&class_id.to_be_bytes());
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

    /// Prevent the target from garbage-collecting an object
    /// (ObjectReference.DisableCollection).
    pub async fn disable_collection(&self, object_id: ObjectId) -> WireResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::DISABLE_COLLECTION,
        );

        packet.data.extend_from_slice(&object_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }

    /// Re-enable collection of an object
    /// (ObjectReference.EnableCollection).
    pub async fn enable_collection(&self, object_id: ObjectId) -> WireResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::ENABLE_COLLECTION,
        );

        packet.data.extend_from_slice(&object_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}
