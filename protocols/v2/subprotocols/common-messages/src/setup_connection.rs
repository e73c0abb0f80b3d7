use binary_sv2::{Decodable, Encodable, Error, Reader, Str0255};
use core::convert::TryFrom;
use core::fmt;

/// Sv2 (sub)protocol selected by a [`SetupConnection`] message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    MiningProtocol = 0,
    JobDeclarationProtocol = 1,
    TemplateDistributionProtocol = const_sv2::SV2_TEMPLATE_DISTRIBUTION_PROTOCOL_DISCRIMINANT,
}

impl TryFrom<u8> for Protocol {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Protocol::MiningProtocol),
            1 => Ok(Protocol::JobDeclarationProtocol),
            2 => Ok(Protocol::TemplateDistributionProtocol),
            other => Err(Error::InvalidDiscriminant(other)),
        }
    }
}

impl Encodable for Protocol {
    fn encoded_size(&self) -> usize {
        1
    }
    fn encode(&self, dst: &mut Vec<u8>) {
        dst.push(*self as u8);
    }
}

impl Decodable for Protocol {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Protocol::try_from(reader.read_u8()?)
    }
}

/// First message a downstream sends on a freshly established (and, on
/// encrypted links, freshly handshaked) connection.
///
/// Downstreams that do not wish to provide telemetry should leave
/// `device_id` empty; `vendor` is expected to identify the software or
/// hardware talking to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupConnection {
    /// Protocol to be used for the connection.
    pub protocol: Protocol,
    /// Minimum protocol version supported by the downstream.
    pub min_version: u16,
    /// Maximum protocol version supported by the downstream.
    pub max_version: u16,
    /// Optional feature flags. The Template Distribution protocol defines
    /// none; the field is carried but ignored.
    pub flags: u32,
    /// Hostname or IP the downstream believes it connected to.
    pub endpoint_host: Str0255,
    pub endpoint_port: u16,
    pub vendor: Str0255,
    pub hardware_version: Str0255,
    pub firmware: Str0255,
    pub device_id: Str0255,
}

impl SetupConnection {
    /// Version negotiation: picks the highest version both sides support,
    /// `None` if the ranges do not intersect.
    pub fn get_version(&self, min_version: u16, max_version: u16) -> Option<u16> {
        if self.min_version > max_version || min_version > self.max_version {
            None
        } else {
            Some(self.max_version.min(max_version))
        }
    }
}

impl fmt::Display for SetupConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SetupConnection(protocol: {}, min_version: {}, max_version: {}, flags: 0x{:08x}, endpoint: {}:{}, vendor: {}, device_id: {})",
            self.protocol as u8,
            self.min_version,
            self.max_version,
            self.flags,
            self.endpoint_host.as_utf8_or_hex(),
            self.endpoint_port,
            self.vendor.as_utf8_or_hex(),
            self.device_id.as_utf8_or_hex(),
        )
    }
}

impl Encodable for SetupConnection {
    fn encoded_size(&self) -> usize {
        self.protocol.encoded_size()
            + 2
            + 2
            + 4
            + self.endpoint_host.encoded_size()
            + 2
            + self.vendor.encoded_size()
            + self.hardware_version.encoded_size()
            + self.firmware.encoded_size()
            + self.device_id.encoded_size()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.protocol.encode(dst);
        self.min_version.encode(dst);
        self.max_version.encode(dst);
        self.flags.encode(dst);
        self.endpoint_host.encode(dst);
        self.endpoint_port.encode(dst);
        self.vendor.encode(dst);
        self.hardware_version.encode(dst);
        self.firmware.encode(dst);
        self.device_id.encode(dst);
    }
}

impl Decodable for SetupConnection {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            protocol: Protocol::decode(reader)?,
            min_version: u16::decode(reader)?,
            max_version: u16::decode(reader)?,
            flags: u32::decode(reader)?,
            endpoint_host: Str0255::decode(reader)?,
            endpoint_port: u16::decode(reader)?,
            vendor: Str0255::decode(reader)?,
            hardware_version: Str0255::decode(reader)?,
            firmware: Str0255::decode(reader)?,
            device_id: Str0255::decode(reader)?,
        })
    }
}

/// Accepts a [`SetupConnection`] request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetupConnectionSuccess {
    /// Version selected for the rest of the connection's life.
    pub used_version: u16,
    /// Feature flags supported by the upstream.
    pub flags: u32,
}

impl fmt::Display for SetupConnectionSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SetupConnectionSuccess(used_version: {}, flags: 0x{:08x})",
            self.used_version, self.flags
        )
    }
}

impl Encodable for SetupConnectionSuccess {
    fn encoded_size(&self) -> usize {
        6
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.used_version.encode(dst);
        self.flags.encode(dst);
    }
}

impl Decodable for SetupConnectionSuccess {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            used_version: u16::decode(reader)?,
            flags: u32::decode(reader)?,
        })
    }
}

/// Rejects a [`SetupConnection`] request.
///
/// Error codes used by the Template Provider:
/// - `unsupported-protocol`
/// - `protocol-version-mismatch`
/// - `unexpected-message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupConnectionError {
    /// Flags causing the rejection, 0 unless the error is flag related.
    pub flags: u32,
    pub error_code: Str0255,
}

impl fmt::Display for SetupConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SetupConnectionError(flags: 0x{:08x}, error_code: {})",
            self.flags,
            self.error_code.as_utf8_or_hex()
        )
    }
}

impl Encodable for SetupConnectionError {
    fn encoded_size(&self) -> usize {
        4 + self.error_code.encoded_size()
    }

    fn encode(&self, dst: &mut Vec<u8>) {
        self.flags.encode(dst);
        self.error_code.encode(dst);
    }
}

impl Decodable for SetupConnectionError {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            flags: u32::decode(reader)?,
            error_code: Str0255::decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binary_sv2::to_bytes;
    use core::convert::TryInto;

    // The SetupConnection a stock JDC sends, byte for byte.
    const SETUP_CONNECTION_BYTES: [u8; 82] = [
        0x02, // protocol
        0x02, 0x00, // min_version
        0x02, 0x00, // max_version
        0x01, 0x00, 0x00, 0x00, // flags
        0x07, 0x30, 0x2e, 0x30, 0x2e, 0x30, 0x2e, 0x30, // endpoint_host
        0x61, 0x21, // endpoint_port
        0x07, 0x42, 0x69, 0x74, 0x6d, 0x61, 0x69, 0x6e, // vendor
        0x08, 0x53, 0x39, 0x69, 0x20, 0x31, 0x33, 0x2e, 0x35, // hardware_version
        0x1c, 0x62, 0x72, 0x61, 0x69, 0x69, 0x6e, 0x73, 0x2d, 0x6f, 0x73, 0x2d, 0x32, 0x30,
        0x31, 0x38, 0x2d, 0x30, 0x39, 0x2d, 0x32, 0x32, 0x2d, 0x31, 0x2d, 0x68, 0x61, 0x73,
        0x68, // firmware
        0x10, 0x73, 0x6f, 0x6d, 0x65, 0x2d, 0x64, 0x65, 0x76, 0x69, 0x63, 0x65, 0x2d, 0x75,
        0x75, 0x69, 0x64, // device_id
    ];

    #[test]
    fn decode_reference_setup_connection() {
        let msg = SetupConnection::from_bytes(&SETUP_CONNECTION_BYTES).unwrap();
        assert_eq!(msg.protocol, Protocol::TemplateDistributionProtocol);
        assert_eq!(msg.min_version, 2);
        assert_eq!(msg.max_version, 2);
        assert_eq!(msg.flags, 1);
        assert_eq!(msg.endpoint_host.as_utf8_or_hex(), "0.0.0.0");
        assert_eq!(msg.endpoint_port, 0x2161);
        assert_eq!(msg.vendor.as_utf8_or_hex(), "Bitmain");
        assert_eq!(msg.hardware_version.as_utf8_or_hex(), "S9i 13.5");
        assert_eq!(msg.firmware.as_utf8_or_hex(), "braiins-os-2018-09-22-1-hash");
        assert_eq!(msg.device_id.as_utf8_or_hex(), "some-device-uuid");

        // And back out unchanged.
        assert_eq!(to_bytes(&msg), SETUP_CONNECTION_BYTES.to_vec());
    }

    #[test]
    fn decode_rejects_trailing_garbage() {
        let mut bytes = SETUP_CONNECTION_BYTES.to_vec();
        bytes.push(0xff);
        assert!(matches!(
            SetupConnection::from_bytes(&bytes),
            Err(Error::LeftoverBytes(1))
        ));
    }

    #[test]
    fn unknown_protocol_discriminant_is_rejected() {
        let mut bytes = SETUP_CONNECTION_BYTES.to_vec();
        bytes[0] = 0x05;
        assert!(matches!(
            SetupConnection::from_bytes(&bytes),
            Err(Error::InvalidDiscriminant(5))
        ));
    }

    #[test]
    fn version_negotiation() {
        let mut msg = SetupConnection::from_bytes(&SETUP_CONNECTION_BYTES).unwrap();
        assert_eq!(msg.get_version(2, 2), Some(2));
        msg.min_version = 3;
        msg.max_version = 4;
        assert_eq!(msg.get_version(2, 2), None);
    }

    #[test]
    fn setup_connection_success_is_six_bytes() {
        let msg = SetupConnectionSuccess {
            used_version: 2,
            flags: 0,
        };
        let bytes = to_bytes(&msg);
        assert_eq!(bytes.len(), 6);
        assert_eq!(SetupConnectionSuccess::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn setup_connection_error_round_trip() {
        let msg = SetupConnectionError {
            flags: 0,
            error_code: "protocol-version-mismatch".try_into().unwrap(),
        };
        let bytes = to_bytes(&msg);
        assert_eq!(SetupConnectionError::from_bytes(&bytes).unwrap(), msg);
    }
}
