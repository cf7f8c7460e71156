//! Integration tests for the USB-UIRT wire protocol
//!
//! Covers:
//! - Command frames and response verification as a device would exchange them
//! - Receive stream reassembly across FTDI packet boundaries
//! - Code normalization properties

use protocol::command::{parse_config_response, parse_version_response};
use protocol::ftdi::strip_status_headers;
use protocol::{Command, FirmwareDate, FirmwareInfo, IrCode, ProtocolError, UirFramer, checksum};
use std::time::{Duration, Instant};

mod commands {
    use super::*;

    #[test]
    fn test_every_command_frame_sums_to_zero() {
        for cmd in [
            Command::GetVersion,
            Command::GetConfig,
            Command::SetConfig(0x00),
            Command::SetConfig(0x07),
            Command::SetConfig(0xff),
        ] {
            let frame = cmd.encode();
            let sum = frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(sum, 0, "frame for {:?} does not sum to zero", cmd);
            assert_eq!(frame[0], cmd.opcode());
        }
    }

    #[test]
    fn test_device_version_reply() {
        let info = FirmwareInfo {
            firmware_version: 0x0208,
            protocol_version: 0x0101,
            date: FirmwareDate {
                day: 1,
                month: 12,
                year: 2010,
            },
        };
        let payload = info.to_payload();
        let mut reply = payload.to_vec();
        reply.push(checksum(&payload));

        let parsed = parse_version_response(&reply).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.version_string(), "2.8");
    }

    #[test]
    fn test_corrupted_config_reply() {
        let reply = [0x07, checksum(&[0x07]).wrapping_add(1)];
        assert!(matches!(
            parse_config_response(&reply),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }
}

mod receive_stream {
    use super::*;

    #[test]
    fn test_codes_spanning_ftdi_packets() {
        // 8-byte packets: 2 status bytes + 6 data bytes, but the code straddles
        let raw = [
            0x31, 0x60, 0x11, 0x22, 0x33, 0x44, // first four bytes of code A
            0x31, 0x60, 0x55, 0x66, 0xa1, 0xa2, 0xa3, 0xa4, // rest of A + start of B
            0x31, 0x60, 0xa5, 0xa6, // rest of B
        ];

        let mut framer = UirFramer::new();
        let t0 = Instant::now();
        let mut codes = Vec::new();
        for (i, packet) in [&raw[..6], &raw[6..14], &raw[14..]].into_iter().enumerate() {
            let data = strip_status_headers(packet, 8);
            codes.extend(framer.push(&data, t0 + Duration::from_millis(i as u64)));
        }

        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(codes, vec!["112233445566", "A1A2A3A4A5A6"]);
    }
}

mod code_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: hex-encoding bytes and parsing the text back is lossless
        #[test]
        fn prop_bytes_survive_normalization(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
            let code = IrCode::from_bytes(&bytes);
            let reparsed = IrCode::parse(&code.to_string().to_lowercase()).unwrap();
            prop_assert_eq!(reparsed.to_bytes(), bytes);
        }

        /// Property: whitespace between pairs never changes the canonical code
        #[test]
        fn prop_whitespace_is_insignificant(
            bytes in proptest::collection::vec(any::<u8>(), 1..32),
            sep in prop::sample::select(vec![" ", "  ", "\t", "\r\n"]),
        ) {
            let plain = IrCode::from_bytes(&bytes);
            let spaced: Vec<&str> = plain.pairs().collect();
            let spaced = spaced.join(sep);
            prop_assert_eq!(IrCode::parse(&spaced).unwrap(), plain);
        }
    }
}
