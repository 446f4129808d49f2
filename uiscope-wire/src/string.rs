// StringReference command implementations

use crate::codec::read_string;
use crate::commands::{command_sets, string_reference_commands};
use crate::connection::WireConnection;
use crate::protocol::{CommandPacket, WireResult};
use crate::types::StringId;

impl WireConnection {
    /// Read the value of a remote String object (StringReference.Value).
    pub async fn string_value(&self, string_id: StringId) -> WireResult<String> {
        let id = self.next_id();
        let mut packet = CommandPacket::new(
            id,
            command_sets::STRING_REFERENCE,
            string_reference_commands::VALUE,
        );

        packet.data.extend_from_slice(&string_id.to_be_bytes());

        let reply = self.send_command(packet).await?;
        reply.check_error()?;

        let mut data = reply.data();
        read_string(&mut data)
    }
}
