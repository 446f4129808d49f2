// Agent payload archive
//
// The helper classes injected into the target ship as an opaque archive
// with a name/version contract: magic "UISA", a format version, then
// length-prefixed (name, bytes) records. Class names are dot-qualified.

use crate::error::{EngineError, EngineResult};
use crate::service::ServiceKind;

pub const PAYLOAD_MAGIC: &[u8; 4] = b"UISA";
pub const PAYLOAD_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone)]
pub struct PayloadClass {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct PayloadArchive {
    classes: Vec<PayloadClass>,
}

impl PayloadArchive {
    pub fn new(classes: Vec<PayloadClass>) -> Self {
        Self { classes }
    }

    /// Parse an archive from raw bytes.
    pub fn parse(data: &[u8]) -> EngineResult<Self> {
        let mut buf = data;

        if buf.len() < 6 || &buf[..4] != PAYLOAD_MAGIC {
            return Err(EngineError::Retrieval(
                "agent payload archive has a bad magic".to_string(),
            ));
        }
        buf = &buf[4..];

        let version = u16::from_be_bytes([buf[0], buf[1]]);
        if version != PAYLOAD_FORMAT_VERSION {
            return Err(EngineError::Retrieval(format!(
                "agent payload archive version {} is not supported",
                version
            )));
        }
        buf = &buf[2..];

        let mut classes = Vec::new();
        while !buf.is_empty() {
            if buf.len() < 2 {
                return Err(truncated());
            }
            let name_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            buf = &buf[2..];
            if buf.len() < name_len {
                return Err(truncated());
            }
            let name = std::str::from_utf8(&buf[..name_len])
                .map_err(|_| {
                    EngineError::Retrieval("agent payload class name is not UTF-8".to_string())
                })?
                .to_string();
            buf = &buf[name_len..];

            if buf.len() < 4 {
                return Err(truncated());
            }
            let data_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            buf = &buf[4..];
            if buf.len() < data_len {
                return Err(truncated());
            }
            let bytes = buf[..data_len].to_vec();
            buf = &buf[data_len..];

            classes.push(PayloadClass { name, bytes });
        }

        Ok(Self { classes })
    }

    /// Serialize the archive (agent build tooling and tests).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(PAYLOAD_MAGIC);
        out.extend_from_slice(&PAYLOAD_FORMAT_VERSION.to_be_bytes());
        for class in &self.classes {
            out.extend_from_slice(&(class.name.len() as u16).to_be_bytes());
            out.extend_from_slice(class.name.as_bytes());
            out.extend_from_slice(&(class.bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&class.bytes);
        }
        out
    }

    /// Classes belonging to one service kind, by package prefix.
    pub fn classes_for(&self, kind: ServiceKind) -> impl Iterator<Item = &PayloadClass> {
        let prefix = kind.class_prefix();
        self.classes.iter().filter(move |c| c.name.starts_with(prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

fn truncated() -> EngineError {
    EngineError::Retrieval("agent payload archive is truncated".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PayloadArchive {
        PayloadArchive::new(vec![
            PayloadClass {
                name: "uiscope.agent.awt.AwtAgent".to_string(),
                bytes: vec![0xCA, 0xFE, 0xBA, 0xBE, 1, 2, 3],
            },
            PayloadClass {
                name: "uiscope.agent.fx.FxAgent".to_string(),
                bytes: vec![0xCA, 0xFE, 0xBA, 0xBE, 9],
            },
        ])
    }

    #[test]
    fn test_roundtrip() {
        let archive = sample();
        let back = PayloadArchive::parse(&archive.encode()).unwrap();
        assert_eq!(back.classes.len(), 2);
        assert_eq!(back.classes[0].name, "uiscope.agent.awt.AwtAgent");
        assert_eq!(back.classes[0].bytes, vec![0xCA, 0xFE, 0xBA, 0xBE, 1, 2, 3]);
    }

    #[test]
    fn test_kind_filter() {
        let archive = sample();
        let awt: Vec<_> = archive.classes_for(ServiceKind::Awt).collect();
        assert_eq!(awt.len(), 1);
        assert_eq!(awt[0].name, "uiscope.agent.awt.AwtAgent");

        let fx: Vec<_> = archive.classes_for(ServiceKind::Fx).collect();
        assert_eq!(fx.len(), 1);
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        assert!(PayloadArchive::parse(b"NOPE").is_err());

        let mut encoded = sample().encode();
        encoded.truncate(encoded.len() - 2);
        assert!(PayloadArchive::parse(&encoded).is_err());
    }
}
