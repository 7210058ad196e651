//! Random access response MAC PDU, TS 38.321 6.1.5 and 6.2.3.

use nr_core::{BitBuffer, PduParseErr, Rnti, let_field};

/// Size of a MAC RAR following an E/T/RAPID subheader
pub const MAC_RAR_BYTES: usize = 7;

/// Backoff parameter values in ms, TS 38.321 Table 7.2-1. Indices 14 and 15 are reserved.
const BACKOFF_MS: [u32; 14] = [5, 10, 20, 30, 40, 60, 80, 120, 160, 240, 320, 480, 960, 1920];

/// UL grant of a MAC RAR, TS 38.213 Table 8.2-1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RarGrant {
    pub freq_hopping: bool,
    /// 14 bit PUSCH frequency resource allocation
    pub fdra: u16,
    pub tdra: u8,
    pub mcs: u8,
    pub tpc: u8,
    pub csi_request: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacRar {
    pub rapid: u8,
    pub timing_advance: u16,
    pub grant: RarGrant,
    pub tc_rnti: Rnti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RarSubPdu {
    Backoff { bi: u8 },
    /// RAPID only, acknowledging an SI request
    RapidOnly { rapid: u8 },
    Rar(MacRar),
}

/// Backoff indicator to ms. Reserved values map to the largest defined backoff.
pub fn backoff_ms(bi: u8) -> u32 {
    BACKOFF_MS[(bi as usize).min(BACKOFF_MS.len() - 1)]
}

fn read_rar(buf: &mut BitBuffer, rapid: u8) -> Result<MacRar, PduParseErr> {
    let_field!(buf, _r, 1);
    let_field!(buf, timing_advance, 12);
    let_field!(buf, freq_hopping, 1);
    let_field!(buf, fdra, 14);
    let_field!(buf, tdra, 4);
    let_field!(buf, mcs, 4);
    let_field!(buf, tpc, 3);
    let_field!(buf, csi_request, 1);
    let_field!(buf, tc_rnti, 16);
    Ok(MacRar {
        rapid,
        timing_advance: timing_advance as u16,
        grant: RarGrant {
            freq_hopping: freq_hopping == 1,
            fdra: fdra as u16,
            tdra: tdra as u8,
            mcs: mcs as u8,
            tpc: tpc as u8,
            csi_request: csi_request == 1,
        },
        tc_rnti: tc_rnti as Rnti,
    })
}

/// Walks the subPDUs of a RAR MAC PDU until the E bit ends the list or only padding is left.
/// `si_rapids` lists preambles the network acknowledges without a MAC RAR.
pub fn parse_rar_pdu(pdu: &[u8], si_rapids: &[u8]) -> Result<Vec<RarSubPdu>, PduParseErr> {
    let mut buf = BitBuffer::from_bytes(pdu);
    let mut out = Vec::new();

    while buf.get_len_remaining() >= 8 {
        let_field!(buf, ext, 1);
        let_field!(buf, t, 1);
        if t == 0 {
            let_field!(buf, _r, 2);
            let_field!(buf, bi, 4);
            out.push(RarSubPdu::Backoff { bi: bi as u8 });
        } else {
            let_field!(buf, rapid, 6);
            let rapid = rapid as u8;
            if si_rapids.contains(&rapid) {
                out.push(RarSubPdu::RapidOnly { rapid });
            } else {
                out.push(RarSubPdu::Rar(read_rar(&mut buf, rapid)?));
            }
        }
        if ext == 0 {
            break;
        }
    }
    tracing::trace!("parsed {} RAR subPDUs from {} bytes", out.len(), pdu.len());
    Ok(out)
}

/// Serializes subPDUs into a RAR MAC PDU, padded to `tb_size` bytes
pub fn build_rar_pdu(subpdus: &[RarSubPdu], tb_size: usize) -> Vec<u8> {
    let mut buf = BitBuffer::new_autoexpand(tb_size * 8);
    for (i, sub) in subpdus.iter().enumerate() {
        let ext = (i + 1 < subpdus.len()) as u64;
        buf.write_bits(ext, 1);
        match sub {
            RarSubPdu::Backoff { bi } => {
                buf.write_bits(0, 3);
                buf.write_bits(*bi as u64 & 0xf, 4);
            }
            RarSubPdu::RapidOnly { rapid } => {
                buf.write_bits(1, 1);
                buf.write_bits(*rapid as u64 & 0x3f, 6);
            }
            RarSubPdu::Rar(rar) => {
                buf.write_bits(1, 1);
                buf.write_bits(rar.rapid as u64 & 0x3f, 6);
                buf.write_bits(0, 1);
                buf.write_bits(rar.timing_advance as u64 & 0xfff, 12);
                buf.write_bits(rar.grant.freq_hopping as u64, 1);
                buf.write_bits(rar.grant.fdra as u64 & 0x3fff, 14);
                buf.write_bits(rar.grant.tdra as u64 & 0xf, 4);
                buf.write_bits(rar.grant.mcs as u64 & 0xf, 4);
                buf.write_bits(rar.grant.tpc as u64 & 0x7, 3);
                buf.write_bits(rar.grant.csi_request as u64, 1);
                buf.write_bits(rar.tc_rnti as u64, 16);
            }
        }
    }
    let mut bytes = buf.into_bytes();
    if bytes.len() < tb_size {
        bytes.resize(tb_size, 0);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_core::debug;

    fn rar(rapid: u8, tc_rnti: Rnti) -> MacRar {
        MacRar {
            rapid,
            timing_advance: 0x123,
            grant: RarGrant { freq_hopping: false, fdra: 0x2abc, tdra: 3, mcs: 5, tpc: 4, csi_request: true },
            tc_rnti,
        }
    }

    #[test]
    fn test_backoff_then_two_rars() {
        debug::setup_logging_verbose();
        let subs = [RarSubPdu::Backoff { bi: 5 }, RarSubPdu::Rar(rar(12, 0x4601)), RarSubPdu::Rar(rar(40, 0x4602))];
        let pdu = build_rar_pdu(&subs, 32);
        assert_eq!(pdu.len(), 32);
        // BI subheader: E=1 T=0 R=00 BI=0101
        assert_eq!(pdu[0], 0b1000_0101);
        assert_eq!(parse_rar_pdu(&pdu, &[]).unwrap(), subs.to_vec());
    }

    #[test]
    fn test_last_subpdu_stops_before_padding() {
        debug::setup_logging_verbose();
        let pdu = build_rar_pdu(&[RarSubPdu::Rar(rar(7, 0x1000))], 20);
        let subs = parse_rar_pdu(&pdu, &[]).unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_rapid_only_subpdu() {
        debug::setup_logging_verbose();
        let subs = [RarSubPdu::RapidOnly { rapid: 60 }, RarSubPdu::Rar(rar(3, 0x2000))];
        let pdu = build_rar_pdu(&subs, 16);
        assert_eq!(parse_rar_pdu(&pdu, &[60]).unwrap(), subs.to_vec());
    }

    #[test]
    fn test_truncated_rar() {
        debug::setup_logging_verbose();
        let pdu = build_rar_pdu(&[RarSubPdu::Rar(rar(7, 0x1000))], 0);
        assert_eq!(pdu.len(), 1 + MAC_RAR_BYTES);
        assert!(matches!(parse_rar_pdu(&pdu[..5], &[]), Err(PduParseErr::BufferEnded { .. })));
    }

    #[test]
    fn test_backoff_table() {
        assert_eq!(backoff_ms(0), 5);
        assert_eq!(backoff_ms(13), 1920);
        assert_eq!(backoff_ms(15), 1920);
    }
}
