//! MQTT 3.1.1 control packets.
//!
//! Only the subset a subscribing client needs is implemented: connection setup, subscription
//! management, inbound QoS 0/1 publishes and keepalive. Packets arrive over WebSocket binary
//! frames, which may split or merge packets, so decoding goes through `PacketBuffer`.

use super::EventError;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;
const MAX_REMAINING_LENGTH: usize = 268_435_455;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const UNSUBSCRIBE: u8 = 10;
const UNSUBACK: u8 = 11;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

/// SUBACK return code for a rejected filter.
pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        keep_alive: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    Publish {
        topic: String,
        qos: u8,
        packet_id: Option<u16>,
        retain: bool,
        dup: bool,
        payload: Vec<u8>,
    },
    PubAck {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, u8)>,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    Unsubscribe {
        packet_id: u16,
        filters: Vec<String>,
    },
    UnsubAck {
        packet_id: u16,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Serialize into a complete packet (fixed header included).
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let header = match self {
            Packet::Connect {
                client_id,
                keep_alive,
                clean_session,
            } => {
                put_str(&mut body, PROTOCOL_NAME);
                body.push(PROTOCOL_LEVEL);
                body.push(if *clean_session { CLEAN_SESSION } else { 0 });
                body.extend_from_slice(&keep_alive.to_be_bytes());
                put_str(&mut body, client_id);
                CONNECT << 4
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*return_code);
                CONNACK << 4
            }
            Packet::Publish {
                topic,
                qos,
                packet_id,
                retain,
                dup,
                payload,
            } => {
                put_str(&mut body, topic);
                if *qos > 0 {
                    body.extend_from_slice(&packet_id.unwrap_or(0).to_be_bytes());
                }
                body.extend_from_slice(payload);
                (PUBLISH << 4) | (u8::from(*dup) << 3) | ((qos & 0x03) << 1) | u8::from(*retain)
            }
            Packet::PubAck { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                PUBACK << 4
            }
            Packet::Subscribe { packet_id, filters } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                for (filter, qos) in filters {
                    put_str(&mut body, filter);
                    body.push(*qos);
                }
                (SUBSCRIBE << 4) | 0x02
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                body.extend_from_slice(return_codes);
                SUBACK << 4
            }
            Packet::Unsubscribe { packet_id, filters } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                for filter in filters {
                    put_str(&mut body, filter);
                }
                (UNSUBSCRIBE << 4) | 0x02
            }
            Packet::UnsubAck { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                UNSUBACK << 4
            }
            Packet::PingReq => PINGREQ << 4,
            Packet::PingResp => PINGRESP << 4,
            Packet::Disconnect => DISCONNECT << 4,
        };

        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(header);
        put_remaining_length(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete packet, otherwise the packet
    /// and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, EventError> {
        let Some(&header) = buf.first() else {
            return Ok(None);
        };
        let Some((remaining, len_bytes)) = read_remaining_length(&buf[1..])? else {
            return Ok(None);
        };
        let start = 1 + len_bytes;
        let end = start + remaining;
        if buf.len() < end {
            return Ok(None);
        }

        let mut reader = Reader::new(&buf[start..end]);
        let packet_type = header >> 4;
        let flags = header & 0x0F;

        let packet = match packet_type {
            CONNECT => {
                let protocol = reader.string()?;
                if protocol != PROTOCOL_NAME {
                    return Err(protocol_error(format!("unsupported protocol {}", protocol)));
                }
                let _level = reader.u8()?;
                let connect_flags = reader.u8()?;
                let keep_alive = reader.u16()?;
                let client_id = reader.string()?;
                Packet::Connect {
                    client_id,
                    keep_alive,
                    clean_session: connect_flags & CLEAN_SESSION != 0,
                }
            }
            CONNACK => Packet::ConnAck {
                session_present: reader.u8()? & 0x01 != 0,
                return_code: reader.u8()?,
            },
            PUBLISH => {
                let qos = (flags >> 1) & 0x03;
                if qos > 2 {
                    return Err(protocol_error("invalid QoS 3 on PUBLISH"));
                }
                let topic = reader.string()?;
                let packet_id = if qos > 0 { Some(reader.u16()?) } else { None };
                Packet::Publish {
                    topic,
                    qos,
                    packet_id,
                    retain: flags & 0x01 != 0,
                    dup: flags & 0x08 != 0,
                    payload: reader.rest().to_vec(),
                }
            }
            PUBACK => Packet::PubAck {
                packet_id: reader.u16()?,
            },
            SUBSCRIBE => {
                let packet_id = reader.u16()?;
                let mut filters = Vec::new();
                while !reader.is_empty() {
                    let filter = reader.string()?;
                    let qos = reader.u8()?;
                    filters.push((filter, qos));
                }
                Packet::Subscribe { packet_id, filters }
            }
            SUBACK => Packet::SubAck {
                packet_id: reader.u16()?,
                return_codes: reader.rest().to_vec(),
            },
            UNSUBSCRIBE => {
                let packet_id = reader.u16()?;
                let mut filters = Vec::new();
                while !reader.is_empty() {
                    filters.push(reader.string()?);
                }
                Packet::Unsubscribe { packet_id, filters }
            }
            UNSUBACK => Packet::UnsubAck {
                packet_id: reader.u16()?,
            },
            PINGREQ => Packet::PingReq,
            PINGRESP => Packet::PingResp,
            DISCONNECT => Packet::Disconnect,
            other => {
                return Err(protocol_error(format!("unsupported packet type {}", other)));
            }
        };

        Ok(Some((packet, end)))
    }
}

/// Accumulates frame bytes and yields complete packets.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    pending: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Take the next complete packet, if the buffer holds one.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, EventError> {
        match Packet::decode(&self.pending)? {
            Some((packet, used)) => {
                self.pending.drain(..used);
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn protocol_error(message: impl Into<String>) -> EventError {
    EventError::Protocol(message.into())
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
}

fn put_remaining_length(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Variable-length "remaining length" field; `None` if more bytes are needed.
fn read_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, EventError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(protocol_error("remaining length exceeds four bytes"));
        }
        value += (*byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            if value > MAX_REMAINING_LENGTH {
                return Err(protocol_error("remaining length too large"));
            }
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(protocol_error("remaining length exceeds four bytes"));
    }
    Ok(None)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EventError> {
        if self.pos + n > self.buf.len() {
            return Err(protocol_error("packet truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, EventError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, EventError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self) -> Result<String, EventError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| protocol_error("string is not valid UTF-8"))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_matches_reference_bytes() {
        let packet = Packet::Connect {
            client_id: "ab".to_string(),
            keep_alive: 30,
            clean_session: true,
        };
        assert_eq!(
            packet.encode(),
            vec![
                0x10, 14, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x1E, 0x00, 0x02,
                b'a', b'b'
            ]
        );
    }

    #[test]
    fn subscribe_sets_reserved_flags() {
        let packet = Packet::Subscribe {
            packet_id: 1,
            filters: vec![("a/+".to_string(), 1)],
        };
        assert_eq!(
            packet.encode(),
            vec![0x82, 8, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'+', 0x01]
        );
        assert_eq!(Packet::PingReq.encode(), vec![0xC0, 0x00]);
        assert_eq!(Packet::Disconnect.encode(), vec![0xE0, 0x00]);
    }

    #[test]
    fn decodes_broker_packets() {
        let (connack, used) = Packet::decode(&[0x20, 0x02, 0x00, 0x00]).unwrap().unwrap();
        assert_eq!(used, 4);
        assert_eq!(
            connack,
            Packet::ConnAck {
                session_present: false,
                return_code: 0
            }
        );

        let (suback, _) = Packet::decode(&[0x90, 0x03, 0x00, 0x07, 0x01]).unwrap().unwrap();
        assert_eq!(
            suback,
            Packet::SubAck {
                packet_id: 7,
                return_codes: vec![1]
            }
        );

        // QoS 1 publish on "a/b", packet id 5, payload "{}"
        let bytes = [0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x05, b'{', b'}'];
        let (publish, _) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(
            publish,
            Packet::Publish {
                topic: "a/b".to_string(),
                qos: 1,
                packet_id: Some(5),
                retain: false,
                dup: false,
                payload: b"{}".to_vec(),
            }
        );
    }

    #[test]
    fn large_payload_uses_multi_byte_length() {
        let packet = Packet::Publish {
            topic: "t".to_string(),
            qos: 0,
            packet_id: None,
            retain: false,
            dup: false,
            payload: vec![b'x'; 200],
        };
        let bytes = packet.encode();
        // 2 (topic length) + 1 (topic) + 200 = 203 = 0xCB 0x01
        assert_eq!(&bytes[..3], &[0x30, 0xCB, 0x01]);
        let (decoded, used) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn buffer_handles_split_and_merged_frames() {
        let mut buffer = PacketBuffer::new();
        let mut bytes = Packet::PingResp.encode();
        bytes.extend(Packet::UnsubAck { packet_id: 3 }.encode());

        buffer.extend(&bytes[..3]);
        assert_eq!(buffer.next_packet().unwrap(), Some(Packet::PingResp));
        assert_eq!(buffer.next_packet().unwrap(), None);

        buffer.extend(&bytes[3..]);
        assert_eq!(
            buffer.next_packet().unwrap(),
            Some(Packet::UnsubAck { packet_id: 3 })
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Packet::decode(&[0x20, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]).is_err());
        assert!(Packet::decode(&[0xF0, 0x00]).is_err());
        assert!(Packet::decode(&[0x90, 0x01, 0x00]).is_err());
    }
}
