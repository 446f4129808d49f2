// ReferenceType command implementations
//
// Reflection over remote classes: signatures, loaders, fields, methods.

use crate::codec::{read_i32, read_string, read_u64};
use crate::commands::{command_sets, reference_type_commands};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::{ClassLoaderId, FieldId, MethodId, ReferenceTypeId};
use serde::{Deserialize, Serialize};

/// Method information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

/// Field information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

// Modifier bits used when filtering reflection results
pub const ACC_STATIC: i32 = 0x0008;

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & ACC_STATIC != 0
    }
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & ACC_STATIC != 0
    }
}

impl WireConnection {
    /// Get the JNI signature of a reference type (ReferenceType.Signature).
    pub async fn type_signature(&self, ref_type_id: ReferenceTypeId) -> WireResult<String> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::SIGNATURE,
        );

        packet.data.extend_from_slice(&ref_type_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Get the class loader of a reference type (ReferenceType.ClassLoader).
    /// A zero id means the bootstrap loader.
    pub async fn class_loader_of(&self, ref_type_id: ReferenceTypeId) -> WireResult<ClassLoaderId> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::CLASS_LOADER,
        );

        packet.data.extend_from_slice(&ref_type_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_u64(&mut data)
    }

    /// Get declared fields of a reference type (ReferenceType.Fields).
    pub async fn fields_of(&self, ref_type_id: ReferenceTypeId) -> WireResult<Vec<FieldInfo>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::FIELDS,
        );

        packet.data.extend_from_slice(&ref_type_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let fields_count = read_i32(&mut data)?;
        let mut fields = Vec::with_capacity(fields_count as usize);

        for _ in 0..fields_count {
            let field_id = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let mod_bits = read_i32(&mut data)?;

            fields.push(FieldInfo {
                field_id,
                name,
                signature,
                mod_bits,
            });
        }

        Ok(fields)
    }

    /// Get declared methods of a reference type (ReferenceType.Methods).
    pub async fn methods_of(&self, ref_type_id: ReferenceTypeId) -> WireResult<Vec<MethodInfo>> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::REFERENCE_TYPE,
            reference_type_commands::METHODS,
        );

        packet.data.extend_from_slice(&ref_type_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();

        let methods_count = read_i32(&mut data)?;
        let mut methods = Vec::with_capacity(methods_count as usize);

        for _ in 0..methods_count {
            let method_id = read_u64(&mut data)?;
            let name = read_string(&mut data)?;
            let signature = read_string(&mut data)?;
            let mod_bits = read_i32(&mut data)?;

            methods.push(MethodInfo {
                method_id,
                name,
                signature,
                mod_bits,
            });
        }

        Ok(methods)
    }
}
