//! SNMP v1/v2c GET报文的BER编解码
//!
//! 只实现采集所需的最小子集：GetRequest的编码与Response的解码。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("报文被截断")]
    Truncated,
    #[error("意外的标签: 0x{0:02x}")]
    UnexpectedTag(u8),
    #[error("无效的长度编码")]
    InvalidLength,
    #[error("无效的OID")]
    InvalidOid,
}

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;
const TAG_GET_REQUEST: u8 = 0xa0;
const TAG_GET_RESPONSE: u8 = 0xa2;

/// 变量绑定的取值
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// 空值（含v2c的三种异常标记）
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            SnmpValue::Null
                | SnmpValue::NoSuchObject
                | SnmpValue::NoSuchInstance
                | SnmpValue::EndOfMibView
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v) => Some(*v as i64),
            SnmpValue::Gauge32(v) => Some(*v as i64),
            SnmpValue::TimeTicks(v) => Some(*v as i64),
            SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SnmpValue::Integer(v) => u64::try_from(*v).ok(),
            SnmpValue::Counter32(v) => Some(*v as u64),
            SnmpValue::Gauge32(v) => Some(*v as u64),
            SnmpValue::TimeTicks(v) => Some(*v as u64),
            SnmpValue::Counter64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_display_string(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => {
                Some(String::from_utf8_lossy(bytes).trim().to_string())
            }
            SnmpValue::ObjectIdentifier(oid) => Some(oid.clone()),
            SnmpValue::IpAddress(octets) => Some(format!(
                "{}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            )),
            SnmpValue::Integer(v) => Some(v.to_string()),
            SnmpValue::Counter32(v) => Some(v.to_string()),
            SnmpValue::Gauge32(v) => Some(v.to_string()),
            SnmpValue::TimeTicks(v) => Some(v.to_string()),
            SnmpValue::Counter64(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

/// 解码后的Response PDU
#[derive(Debug, Clone)]
pub struct SnmpResponse {
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(String, SnmpValue)>,
}

/// 点分OID字符串转数值形式
pub fn parse_oid(oid: &str) -> Result<Vec<u32>, CodecError> {
    let parts: Result<Vec<u32>, _> = oid.split('.').map(|p| p.parse::<u32>()).collect();
    match parts {
        Ok(parts) if parts.len() >= 2 => Ok(parts),
        _ => Err(CodecError::InvalidOid),
    }
}

fn write_len(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        let mut bytes = Vec::new();
        let mut rest = len;
        while rest > 0 {
            bytes.push((rest & 0xff) as u8);
            rest >>= 8;
        }
        bytes.reverse();
        buf.push(0x80 | bytes.len() as u8);
        buf.extend_from_slice(&bytes);
    }
}

fn write_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    write_len(buf, content.len());
    buf.extend_from_slice(content);
}

fn write_integer(buf: &mut Vec<u8>, value: i64) {
    let mut bytes = value.to_be_bytes().to_vec();
    // 去掉冗余的前导字节，保留符号位
    while bytes.len() > 1 {
        let first = bytes[0];
        let second = bytes[1];
        if (first == 0x00 && second & 0x80 == 0) || (first == 0xff && second & 0x80 != 0) {
            bytes.remove(0);
        } else {
            break;
        }
    }
    write_tlv(buf, TAG_INTEGER, &bytes);
}

fn encode_oid_content(oid: &[u32]) -> Vec<u8> {
    let mut content = Vec::new();
    content.push((oid[0] * 40 + oid[1]) as u8);
    for &sub in &oid[2..] {
        let mut chunks = Vec::new();
        let mut rest = sub;
        loop {
            chunks.push((rest & 0x7f) as u8);
            rest >>= 7;
            if rest == 0 {
                break;
            }
        }
        chunks.reverse();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            content.push(if i == last { chunk } else { chunk | 0x80 });
        }
    }
    content
}

fn encode_pdu(
    pdu_tag: u8,
    version: i64,
    community: &str,
    request_id: i32,
    varbinds: &[(Vec<u32>, Option<&SnmpValue>)],
) -> Vec<u8> {
    let mut varbind_list = Vec::new();
    for (oid, value) in varbinds {
        let mut varbind = Vec::new();
        write_tlv(&mut varbind, TAG_OID, &encode_oid_content(oid));
        match value {
            None | Some(SnmpValue::Null) => write_tlv(&mut varbind, TAG_NULL, &[]),
            Some(SnmpValue::Integer(v)) => write_integer(&mut varbind, *v),
            Some(SnmpValue::OctetString(bytes)) => {
                write_tlv(&mut varbind, TAG_OCTET_STRING, bytes)
            }
            Some(SnmpValue::Counter32(v)) => {
                write_unsigned(&mut varbind, TAG_COUNTER32, *v as u64)
            }
            Some(SnmpValue::Gauge32(v)) => write_unsigned(&mut varbind, TAG_GAUGE32, *v as u64),
            Some(SnmpValue::TimeTicks(v)) => {
                write_unsigned(&mut varbind, TAG_TIMETICKS, *v as u64)
            }
            Some(SnmpValue::Counter64(v)) => write_unsigned(&mut varbind, TAG_COUNTER64, *v),
            Some(SnmpValue::IpAddress(octets)) => {
                write_tlv(&mut varbind, TAG_IP_ADDRESS, octets)
            }
            Some(SnmpValue::ObjectIdentifier(oid_str)) => {
                let parsed = parse_oid(oid_str).unwrap_or_else(|_| vec![0, 0]);
                write_tlv(&mut varbind, TAG_OID, &encode_oid_content(&parsed));
            }
            Some(SnmpValue::NoSuchObject) => write_tlv(&mut varbind, TAG_NO_SUCH_OBJECT, &[]),
            Some(SnmpValue::NoSuchInstance) => {
                write_tlv(&mut varbind, TAG_NO_SUCH_INSTANCE, &[])
            }
            Some(SnmpValue::EndOfMibView) => write_tlv(&mut varbind, TAG_END_OF_MIB_VIEW, &[]),
        }
        let mut wrapped = Vec::new();
        write_tlv(&mut wrapped, TAG_SEQUENCE, &varbind);
        varbind_list.extend(wrapped);
    }

    let mut varbind_seq = Vec::new();
    write_tlv(&mut varbind_seq, TAG_SEQUENCE, &varbind_list);

    let mut pdu = Vec::new();
    write_integer(&mut pdu, request_id as i64);
    write_integer(&mut pdu, 0); // error-status
    write_integer(&mut pdu, 0); // error-index
    pdu.extend_from_slice(&varbind_seq);

    let mut message = Vec::new();
    write_integer(&mut message, version);
    write_tlv(&mut message, TAG_OCTET_STRING, community.as_bytes());
    write_tlv(&mut message, pdu_tag, &pdu);

    let mut out = Vec::new();
    write_tlv(&mut out, TAG_SEQUENCE, &message);
    out
}

fn write_unsigned(buf: &mut Vec<u8>, tag: u8, value: u64) {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 && bytes[1] & 0x80 == 0 {
        bytes.remove(0);
    }
    // 无符号值最高位为1时需要补零字节
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    write_tlv(buf, tag, &bytes);
}

/// 编码GetRequest报文，version取0(v1)或1(v2c)
pub fn encode_get_request(
    version: i64,
    community: &str,
    request_id: i32,
    oids: &[Vec<u32>],
) -> Vec<u8> {
    let varbinds: Vec<(Vec<u32>, Option<&SnmpValue>)> =
        oids.iter().map(|oid| (oid.clone(), None)).collect();
    encode_pdu(TAG_GET_REQUEST, version, community, request_id, &varbinds)
}

/// 编码Response报文，供测试与设备模拟器使用
pub fn encode_get_response(
    version: i64,
    community: &str,
    request_id: i32,
    varbinds: &[(Vec<u32>, SnmpValue)],
) -> Vec<u8> {
    let borrowed: Vec<(Vec<u32>, Option<&SnmpValue>)> = varbinds
        .iter()
        .map(|(oid, value)| (oid.clone(), Some(value)))
        .collect();
    encode_pdu(TAG_GET_RESPONSE, version, community, request_id, &borrowed)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self.buf.get(self.pos).ok_or(CodecError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 {
            return Err(CodecError::InvalidLength);
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.read_byte()? as usize;
        }
        Ok(len)
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), CodecError> {
        let tag = self.read_byte()?;
        let len = self.read_len()?;
        let end = self.pos.checked_add(len).ok_or(CodecError::InvalidLength)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect_tlv(&mut self, expected: u8) -> Result<&'a [u8], CodecError> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(CodecError::UnexpectedTag(tag));
        }
        Ok(content)
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }
}

fn decode_integer(content: &[u8]) -> i64 {
    if content.is_empty() {
        return 0;
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in content {
        value = (value << 8) | byte as i64;
    }
    value
}

fn decode_unsigned(content: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &byte in content {
        value = (value << 8) | byte as u64;
    }
    value
}

fn decode_oid(content: &[u8]) -> Result<String, CodecError> {
    if content.is_empty() {
        return Err(CodecError::InvalidOid);
    }
    let mut parts = vec![(content[0] / 40) as u32, (content[0] % 40) as u32];
    let mut current: u32 = 0;
    for &byte in &content[1..] {
        current = (current << 7) | (byte & 0x7f) as u32;
        if byte & 0x80 == 0 {
            parts.push(current);
            current = 0;
        }
    }
    Ok(parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("."))
}

fn decode_value(tag: u8, content: &[u8]) -> SnmpValue {
    match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_integer(content)),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => match decode_oid(content) {
            Ok(oid) => SnmpValue::ObjectIdentifier(oid),
            Err(_) => SnmpValue::Null,
        },
        TAG_IP_ADDRESS => {
            if content.len() == 4 {
                SnmpValue::IpAddress([content[0], content[1], content[2], content[3]])
            } else {
                SnmpValue::Null
            }
        }
        TAG_COUNTER32 => SnmpValue::Counter32(decode_unsigned(content) as u32),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_unsigned(content) as u32),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_unsigned(content) as u32),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        _ => SnmpValue::Null,
    }
}

/// 解码Response报文
pub fn decode_response(buf: &[u8]) -> Result<SnmpResponse, CodecError> {
    let mut outer = Reader::new(buf);
    let message = outer.expect_tlv(TAG_SEQUENCE)?;

    let mut reader = Reader::new(message);
    let _version = decode_integer(reader.expect_tlv(TAG_INTEGER)?);
    let _community = reader.expect_tlv(TAG_OCTET_STRING)?;
    let pdu = reader.expect_tlv(TAG_GET_RESPONSE)?;

    let mut pdu_reader = Reader::new(pdu);
    let request_id = decode_integer(pdu_reader.expect_tlv(TAG_INTEGER)?) as i32;
    let error_status = decode_integer(pdu_reader.expect_tlv(TAG_INTEGER)?);
    let error_index = decode_integer(pdu_reader.expect_tlv(TAG_INTEGER)?);
    let varbind_list = pdu_reader.expect_tlv(TAG_SEQUENCE)?;

    let mut varbinds = Vec::new();
    let mut list_reader = Reader::new(varbind_list);
    while list_reader.has_remaining() {
        let varbind = list_reader.expect_tlv(TAG_SEQUENCE)?;
        let mut vb_reader = Reader::new(varbind);
        let oid = decode_oid(vb_reader.expect_tlv(TAG_OID)?)?;
        let (tag, content) = vb_reader.read_tlv()?;
        varbinds.push((oid, decode_value(tag, content)));
    }

    Ok(SnmpResponse {
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

/// 解码Request报文中的OID列表，供测试与设备模拟器使用
pub fn decode_request_oids(buf: &[u8]) -> Result<(i32, Vec<String>), CodecError> {
    let mut outer = Reader::new(buf);
    let message = outer.expect_tlv(TAG_SEQUENCE)?;

    let mut reader = Reader::new(message);
    let _version = decode_integer(reader.expect_tlv(TAG_INTEGER)?);
    let _community = reader.expect_tlv(TAG_OCTET_STRING)?;
    let pdu = reader.expect_tlv(TAG_GET_REQUEST)?;

    let mut pdu_reader = Reader::new(pdu);
    let request_id = decode_integer(pdu_reader.expect_tlv(TAG_INTEGER)?) as i32;
    let _error_status = pdu_reader.expect_tlv(TAG_INTEGER)?;
    let _error_index = pdu_reader.expect_tlv(TAG_INTEGER)?;
    let varbind_list = pdu_reader.expect_tlv(TAG_SEQUENCE)?;

    let mut oids = Vec::new();
    let mut list_reader = Reader::new(varbind_list);
    while list_reader.has_remaining() {
        let varbind = list_reader.expect_tlv(TAG_SEQUENCE)?;
        let mut vb_reader = Reader::new(varbind);
        oids.push(decode_oid(vb_reader.expect_tlv(TAG_OID)?)?);
    }
    Ok((request_id, oids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oid() {
        assert_eq!(
            parse_oid("1.3.6.1.2.1.1.5.0").unwrap(),
            vec![1, 3, 6, 1, 2, 1, 1, 5, 0]
        );
        assert!(parse_oid("abc").is_err());
        assert!(parse_oid("1").is_err());
    }

    #[test]
    fn test_oid_roundtrip() {
        let oid = vec![1, 3, 6, 1, 4, 1, 2021, 11, 9, 0];
        let content = encode_oid_content(&oid);
        assert_eq!(decode_oid(&content).unwrap(), "1.3.6.1.4.1.2021.11.9.0");
    }

    #[test]
    fn test_request_encode_decode() {
        let oids = vec![parse_oid("1.3.6.1.2.1.1.5.0").unwrap()];
        let packet = encode_get_request(1, "public", 42, &oids);
        let (request_id, decoded) = decode_request_oids(&packet).unwrap();
        assert_eq!(request_id, 42);
        assert_eq!(decoded, vec!["1.3.6.1.2.1.1.5.0".to_string()]);
    }

    #[test]
    fn test_response_roundtrip() {
        let varbinds = vec![
            (
                parse_oid("1.3.6.1.2.1.1.5.0").unwrap(),
                SnmpValue::OctetString(b"router1".to_vec()),
            ),
            (
                parse_oid("1.3.6.1.2.1.1.3.0").unwrap(),
                SnmpValue::TimeTicks(360_000),
            ),
            (
                parse_oid("1.3.6.1.4.1.2021.4.5.0").unwrap(),
                SnmpValue::Integer(8_388_608),
            ),
            (
                parse_oid("1.3.6.1.2.1.2.2.1.10.1").unwrap(),
                SnmpValue::Counter32(3_000_000_000),
            ),
        ];
        let packet = encode_get_response(1, "public", 7, &varbinds);
        let response = decode_response(&packet).unwrap();
        assert_eq!(response.request_id, 7);
        assert_eq!(response.error_status, 0);
        assert_eq!(response.varbinds.len(), 4);
        assert_eq!(
            response.varbinds[0],
            (
                "1.3.6.1.2.1.1.5.0".to_string(),
                SnmpValue::OctetString(b"router1".to_vec())
            )
        );
        assert_eq!(response.varbinds[1].1.as_u64(), Some(360_000));
        assert_eq!(response.varbinds[3].1.as_u64(), Some(3_000_000_000));
    }

    #[test]
    fn test_negative_integer_roundtrip() {
        let mut buf = Vec::new();
        write_integer(&mut buf, -300);
        let mut reader = Reader::new(&buf);
        let content = reader.expect_tlv(TAG_INTEGER).unwrap();
        assert_eq!(decode_integer(content), -300);
    }

    #[test]
    fn test_truncated_packet() {
        let oids = vec![parse_oid("1.3.6.1.2.1.1.1.0").unwrap()];
        let packet = encode_get_request(1, "public", 1, &oids);
        assert!(decode_response(&packet[..packet.len() / 2]).is_err());
    }

    #[test]
    fn test_null_value_flags() {
        assert!(SnmpValue::Null.is_null());
        assert!(SnmpValue::NoSuchObject.is_null());
        assert!(!SnmpValue::Integer(0).is_null());
    }
}
