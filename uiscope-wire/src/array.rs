// ArrayType / ArrayReference command implementations
//
// Remote array mirrors and bulk region transfer. Large buffers (pixel
// data, class bytes) move as single regions, never element-by-element.

use crate::codec::{read_i32, read_tagged_value, read_u64, read_u8, read_value_by_tag};
use crate::commands::{array_reference_commands, array_type_commands, command_sets};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireError, WireResult};
use crate::types::{tags, ArrayId, ArrayTypeId, ObjectId, Value, ValueData};

impl WireConnection {
    /// Create a new array in the target (ArrayType.NewInstance).
    pub async fn new_array(&self, array_type: ArrayTypeId, length: i32) -> WireResult<ArrayId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_TYPE,
            array_type_commands::NEW_INSTANCE,
        );

        packet.data.extend_from_slice(&array_type.to_be_bytes());
        packet.data.extend_from_slice(&length.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        let _tag = read_u8(&mut data)?;
        read_u64(&mut data)
    }

    /// Get an array's length (ArrayReference.Length).
    pub async fn array_length(&self, array_id: ArrayId) -> WireResult<i32> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_REFERENCE,
            array_reference_commands::LENGTH,
        );

        packet.data.extend_from_slice(&array_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// Fetch an array region (ArrayReference.GetValues). Primitive regions
    /// arrive untagged after the region tag; object regions arrive tagged.
    pub async fn array_values(
        &self,
        array_id: ArrayId,
        first_index: i32,
        length: i32,
    ) -> WireResult<Vec<Value>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_REFERENCE,
            array_reference_commands::GET_VALUES,
        );

        packet.data.extend_from_slice(&array_id.to_be_bytes());
        packet.data.extend_from_slice(&first_index.to_be_bytes());
        packet.data.extend_from_slice(&length.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let region_tag = read_u8(&mut data)?;
        let count = read_i32(&mut data)?;
        let mut values = Vec::with_capacity(count as usize);

        let object_region = matches!(
            region_tag,
            tags::OBJECT
                | tags::STRING
                | tags::THREAD
                | tags::THREAD_GROUP
                | tags::CLASS_LOADER
                | tags::CLASS_OBJECT
                | tags::ARRAY
        );

        for _ in 0..count {
            if object_region {
                values.push(read_tagged_value(&mut data)?);
            } else {
                let data_value = read_value_by_tag(region_tag, &mut data)?;
                values.push(Value {
                    tag: region_tag,
                    data: data_value,
                });
            }
        }

        Ok(values)
    }

    /// Fetch an int[] region as raw i32s (pixel buffers, packed records).
    pub async fn int_array_values(
        &self,
        array_id: ArrayId,
        first_index: i32,
        length: i32,
    ) -> WireResult<Vec<i32>> {
        let values = self.array_values(array_id, first_index, length).await?;
        values
            .into_iter()
            .map(|v| match v.data {
                ValueData::Int(i) => Ok(i),
                other => Err(WireError::Protocol(format!(
                    "expected int array element, got {:?}",
                    other
                ))),
            })
            .collect()
    }

    /// Fetch an object array region as raw ids (component handles).
    pub async fn object_array_values(&self, array_id: ArrayId) -> WireResult<Vec<ObjectId>> {
        let length = self.array_length(array_id).await?;
        let values = self.array_values(array_id, 0, length).await?;
        values
            .into_iter()
            .map(|v| match v.data {
                ValueData::Object(id) => Ok(id),
                other => Err(WireError::Protocol(format!(
                    "expected object array element, got {:?}",
                    other
                ))),
            })
            .collect()
    }

    /// Write a byte[] region in one command (ArrayReference.SetValues).
    pub async fn set_byte_array(
        &self,
        array_id: ArrayId,
        first_index: i32,
        bytes: &[u8],
    ) -> WireResult<()> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::ARRAY_REFERENCE,
            array_reference_commands::SET_VALUES,
        );

        packet.data.extend_from_slice(&array_id.to_be_bytes());
        packet.data.extend_from_slice(&first_index.to_be_bytes());
        packet
            .data
            .extend_from_slice(&(bytes.len() as i32).to_be_bytes());
        packet.data.extend_from_slice(bytes);

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        Ok(())
    }
}
