// Scripted mock target for engine integration tests
//
// Speaks the wire protocol over an in-memory duplex pipe: answers the
// command sequences the engine issues during service upload and
// synchronization handshakes, fires breakpoint events when the access
// gate opens, and can drop the connection at the gate to simulate a
// mid-handshake disconnect.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use uiscope_wire::WireConnection;

/// The simulated toolkit dispatch thread.
pub const TID: u64 = 0x1000;

const ANCHOR_CLASS: u64 = 100;
const LOADER: u64 = 77;
const LOADER_CLASS: u64 = 200;
const DEFINE_METHOD: u64 = 10;
const BYTE_ARRAY_TYPE: u64 = 300;
const MIRROR_ARRAY: u64 = 400;
const MIRROR_STRING: u64 = 500;
const AGENT_CLASS_OBJECT: u64 = 600;
const MARKER_CLASS: u64 = 700;

const METHOD_ACCESS_LOOP: u64 = 11;
const METHOD_VERSION: u64 = 12;
const FIELD_ACCESS_GRANTED: u64 = 21;
const FIELD_PREFERRED_THREAD: u64 = 22;

const ACC_STATIC: i32 = 0x0008;

#[derive(Debug, Clone, Copy, Default)]
pub struct MockOptions {
    /// Drop the connection right after acknowledging the access-grant
    /// write, before the synchronization breakpoint can fire.
    pub drop_on_access_grant: bool,
}

pub struct Mock {
    pub define_count: Arc<AtomicUsize>,
}

pub async fn start_mock(options: MockOptions) -> (Arc<WireConnection>, Mock) {
    let (client, server) = tokio::io::duplex(1 << 16);
    let define_count = Arc::new(AtomicUsize::new(0));

    tokio::spawn(run_mock(server, options, define_count.clone()));

    let connection = WireConnection::over(client)
        .await
        .expect("mock handshake failed");
    (Arc::new(connection), Mock { define_count })
}

async fn run_mock(stream: DuplexStream, options: MockOptions, define_count: Arc<AtomicUsize>) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Handshake
    let mut hs = [0u8; 14];
    if reader.read_exact(&mut hs).await.is_err() {
        return;
    }
    if writer.write_all(b"JDWP-Handshake").await.is_err() {
        return;
    }

    let mut defined = false;
    let mut armed: Option<i32> = None;
    let mut next_request: i32 = 42;
    let mut event_id: u32 = 0x7F00_0000;

    loop {
        let Some((id, command_set, command, body)) = read_command(&mut reader).await else {
            return;
        };
        let mut cur = Cursor::new(&body);

        let mut fire_request: Option<i32> = None;
        let mut close_after = false;

        let reply: Vec<u8> = match (command_set, command) {
            // VirtualMachine.ClassesBySignature
            (1, 2) => {
                let signature = cur.string();
                match signature.as_str() {
                    "Luiscope/agent/awt/AwtAgent;" => {
                        if defined {
                            classes_reply(&[(1, MARKER_CLASS)])
                        } else {
                            classes_reply(&[])
                        }
                    }
                    "Ljava/awt/Component;" => classes_reply(&[(1, ANCHOR_CLASS)]),
                    "[B" => classes_reply(&[(3, BYTE_ARRAY_TYPE)]),
                    _ => classes_reply(&[]),
                }
            }
            // VirtualMachine.AllThreads
            (1, 4) => {
                let mut out = Vec::new();
                put_i32(&mut out, 1);
                put_u64(&mut out, TID);
                out
            }
            // VirtualMachine.CreateString
            (1, 11) => {
                let mut out = Vec::new();
                put_u64(&mut out, MIRROR_STRING);
                out
            }
            // ReferenceType.ClassLoader
            (2, 2) => {
                let mut out = Vec::new();
                put_u64(&mut out, LOADER);
                out
            }
            // ReferenceType.Fields
            (2, 4) => {
                let ref_id = cur.u64();
                if ref_id == MARKER_CLASS {
                    fields_reply(&[
                        (FIELD_ACCESS_GRANTED, "accessGranted", "Z"),
                        (FIELD_PREFERRED_THREAD, "preferredThread", "Ljava/lang/Thread;"),
                    ])
                } else {
                    fields_reply(&[])
                }
            }
            // ReferenceType.Methods
            (2, 5) => {
                let ref_id = cur.u64();
                if ref_id == LOADER_CLASS {
                    methods_reply(&[(
                        DEFINE_METHOD,
                        "defineClass",
                        "(Ljava/lang/String;[BII)Ljava/lang/Class;",
                    )])
                } else if ref_id == MARKER_CLASS {
                    methods_reply(&[
                        (METHOD_ACCESS_LOOP, "awtAccess", "()V"),
                        (METHOD_VERSION, "version", "()I"),
                        (13, "dumpHierarchy", "(Ljava/lang/Object;)[Ljava/lang/Object;"),
                        (14, "startAccessLoop", "()V"),
                        (15, "stopAccessLoop", "()V"),
                        (16, "addLoggingListener", "(Ljava/lang/Object;Ljava/lang/String;)V"),
                        (17, "removeLoggingListener", "(Ljava/lang/Object;Ljava/lang/String;)V"),
                        (18, "deliverEvent", "(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V"),
                        (19, "startHierarchyListener", "()Ljava/lang/String;"),
                        (20, "stopHierarchyListener", "()V"),
                    ])
                } else {
                    methods_reply(&[])
                }
            }
            // ClassType.Superclass
            (3, 1) => {
                let mut out = Vec::new();
                put_u64(&mut out, 0);
                out
            }
            // ClassType.SetValues
            (3, 2) => {
                let _class = cur.u64();
                let _count = cur.i32();
                let field = cur.u64();
                if field == FIELD_ACCESS_GRANTED {
                    let granted = cur.u8() != 0;
                    if granted {
                        if options.drop_on_access_grant {
                            close_after = true;
                        } else {
                            fire_request = armed;
                        }
                    }
                }
                Vec::new()
            }
            // ClassType.InvokeMethod
            (3, 3) => {
                let _class = cur.u64();
                let _thread = cur.u64();
                let method = cur.u64();
                if method == METHOD_VERSION {
                    let mut out = Vec::new();
                    out.push(73); // 'I'
                    put_i32(&mut out, 1);
                    out.push(76); // 'L'
                    put_u64(&mut out, 0);
                    out
                } else {
                    void_invoke_reply()
                }
            }
            // ArrayType.NewInstance
            (4, 1) => {
                let mut out = Vec::new();
                out.push(91); // '['
                put_u64(&mut out, MIRROR_ARRAY);
                out
            }
            // ObjectReference.ReferenceType
            (9, 1) => {
                let object = cur.u64();
                let mut out = Vec::new();
                out.push(1);
                put_u64(&mut out, if object == LOADER { LOADER_CLASS } else { 999 });
                out
            }
            // ObjectReference.InvokeMethod
            (9, 6) => {
                let _object = cur.u64();
                let _thread = cur.u64();
                let _class = cur.u64();
                let method = cur.u64();
                if method == DEFINE_METHOD {
                    define_count.fetch_add(1, Ordering::SeqCst);
                    defined = true;
                    let mut out = Vec::new();
                    out.push(99); // 'c' class object
                    put_u64(&mut out, AGENT_CLASS_OBJECT);
                    out.push(76);
                    put_u64(&mut out, 0);
                    out
                } else {
                    void_invoke_reply()
                }
            }
            // ObjectReference.DisableCollection / EnableCollection
            (9, 7) | (9, 8) => Vec::new(),
            // ThreadReference.Name
            (11, 1) => {
                let mut out = Vec::new();
                put_string(&mut out, "AWT-EventQueue-0");
                out
            }
            // ThreadReference.Suspend / Resume
            (11, 2) | (11, 3) => Vec::new(),
            // ThreadReference.Status: always running, so protected
            // regions must go through the breakpoint handshake once the
            // service exists.
            (11, 4) => {
                let mut out = Vec::new();
                put_i32(&mut out, 1);
                put_i32(&mut out, 0);
                out
            }
            // ThreadReference.SuspendCount
            (11, 12) => {
                let mut out = Vec::new();
                put_i32(&mut out, 1);
                out
            }
            // ArrayReference.SetValues
            (13, 3) => Vec::new(),
            // EventRequest.Set
            (15, 1) => {
                let request = next_request;
                next_request += 1;
                armed = Some(request);
                let mut out = Vec::new();
                put_i32(&mut out, request);
                out
            }
            // EventRequest.Clear
            (15, 2) => {
                armed = None;
                Vec::new()
            }
            _ => {
                // Unknown command: error NOT_IMPLEMENTED
                if write_reply(&mut writer, id, 99, &[]).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if write_reply(&mut writer, id, 0, &reply).await.is_err() {
            return;
        }

        if let Some(request) = fire_request {
            event_id += 1;
            if write_breakpoint_event(&mut writer, event_id, request).await.is_err() {
                return;
            }
        }

        if close_after {
            return;
        }
    }
}

async fn read_command(
    reader: &mut ReadHalf<DuplexStream>,
) -> Option<(u32, u8, u8, Vec<u8>)> {
    let mut header = [0u8; 11];
    reader.read_exact(&mut header).await.ok()?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let command_set = header[9];
    let command = header[10];

    let mut body = vec![0u8; length - 11];
    reader.read_exact(&mut body).await.ok()?;

    Some((id, command_set, command, body))
}

async fn write_reply(
    writer: &mut WriteHalf<DuplexStream>,
    id: u32,
    error_code: u16,
    body: &[u8],
) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(11 + body.len());
    put_u32(&mut out, (11 + body.len()) as u32);
    put_u32(&mut out, id);
    out.push(0x80);
    out.extend_from_slice(&error_code.to_be_bytes());
    out.extend_from_slice(body);
    writer.write_all(&out).await?;
    writer.flush().await
}

async fn write_breakpoint_event(
    writer: &mut WriteHalf<DuplexStream>,
    id: u32,
    request: i32,
) -> std::io::Result<()> {
    let mut body = Vec::new();
    body.push(1); // suspend policy: event thread
    put_i32(&mut body, 1); // one event
    body.push(2); // breakpoint
    put_i32(&mut body, request);
    put_u64(&mut body, TID);
    body.push(1); // location: class type tag
    put_u64(&mut body, MARKER_CLASS);
    put_u64(&mut body, METHOD_ACCESS_LOOP);
    put_u64(&mut body, 0);

    let mut out = Vec::with_capacity(11 + body.len());
    put_u32(&mut out, (11 + body.len()) as u32);
    put_u32(&mut out, id);
    out.push(0x00); // command packet
    out.push(64); // event command set
    out.push(100); // composite event
    out.extend_from_slice(&body);
    writer.write_all(&out).await?;
    writer.flush().await
}

fn classes_reply(classes: &[(u8, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    put_i32(&mut out, classes.len() as i32);
    for (tag, id) in classes {
        out.push(*tag);
        put_u64(&mut out, *id);
        put_i32(&mut out, 7); // verified | prepared | initialized
    }
    out
}

fn methods_reply(methods: &[(u64, &str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    put_i32(&mut out, methods.len() as i32);
    for (id, name, signature) in methods {
        put_u64(&mut out, *id);
        put_string(&mut out, name);
        put_string(&mut out, signature);
        put_i32(&mut out, ACC_STATIC);
    }
    out
}

fn fields_reply(fields: &[(u64, &str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    put_i32(&mut out, fields.len() as i32);
    for (id, name, signature) in fields {
        put_u64(&mut out, *id);
        put_string(&mut out, name);
        put_string(&mut out, signature);
        put_i32(&mut out, ACC_STATIC);
    }
    out
}

fn void_invoke_reply() -> Vec<u8> {
    let mut out = Vec::new();
    out.push(86); // 'V'
    out.push(76); // 'L'
    put_u64(&mut out, 0);
    out
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }

    fn i32(&mut self) -> i32 {
        let v = i32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_be_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn string(&mut self) -> String {
        let len = self.i32() as usize;
        let s = String::from_utf8_lossy(&self.data[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        s
    }
}
