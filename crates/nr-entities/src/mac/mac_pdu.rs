//! MAC PDU subheaders and control elements, TS 38.321 6.1.2 and 6.1.3.

use core::fmt;

use nr_core::{BitBuffer, Lcid, LcgId, PduParseErr, Rnti, let_field};

/// LCID values for UL-SCH, TS 38.321 Table 6.2.1-2
pub mod ul_lcid {
    /// CCCH of 64 bits
    pub const CCCH_64: u8 = 0;
    /// CCCH of 48 bits
    pub const CCCH_48: u8 = 52;
    pub const CRNTI: u8 = 58;
    pub const SHORT_TRUNCATED_BSR: u8 = 59;
    pub const LONG_TRUNCATED_BSR: u8 = 60;
    pub const SHORT_BSR: u8 = 61;
    pub const LONG_BSR: u8 = 62;
    pub const PADDING: u8 = 63;
}

/// LCID values for DL-SCH, TS 38.321 Table 6.2.1-1
pub mod dl_lcid {
    pub const LONG_DRX_COMMAND: u8 = 59;
    pub const DRX_COMMAND: u8 = 60;
    pub const TIMING_ADVANCE: u8 = 61;
    pub const CONTENTION_RESOLUTION_ID: u8 = 62;
    pub const PADDING: u8 = 63;
}

/// Highest LCID carrying a logical channel SDU
pub const MAX_SDU_LCID: u8 = 32;

/// Subheader size for an SDU of `len` bytes
pub fn sdu_subheader_len(len: usize) -> usize {
    if len < 256 { 2 } else { 3 }
}

/// Largest SDU fitting in `space` bytes including its subheader
pub fn max_sdu_len(space: usize) -> usize {
    match space {
        0..=2 => 0,
        3..=257 => space - 2,
        // 258 leaves 255 after a 3 byte subheader, still 256 with a 2 byte one
        _ => space - 3,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UlMacCe {
    Crnti(Rnti),
    ShortBsr { lcg: LcgId, index: u8 },
    ShortTruncatedBsr { lcg: LcgId, index: u8 },
    /// One 8-bit index per LCG set in `lcg_bitmap`, ascending LCG order
    LongBsr { lcg_bitmap: u8, indices: Vec<u8> },
    LongTruncatedBsr { lcg_bitmap: u8, indices: Vec<u8> },
}

impl UlMacCe {
    pub fn lcid(&self) -> u8 {
        match self {
            UlMacCe::Crnti(_) => ul_lcid::CRNTI,
            UlMacCe::ShortBsr { .. } => ul_lcid::SHORT_BSR,
            UlMacCe::ShortTruncatedBsr { .. } => ul_lcid::SHORT_TRUNCATED_BSR,
            UlMacCe::LongBsr { .. } => ul_lcid::LONG_BSR,
            UlMacCe::LongTruncatedBsr { .. } => ul_lcid::LONG_TRUNCATED_BSR,
        }
    }

    /// Bytes including the subheader
    pub fn encoded_len(&self) -> usize {
        match self {
            UlMacCe::Crnti(_) => 3,
            UlMacCe::ShortBsr { .. } | UlMacCe::ShortTruncatedBsr { .. } => 2,
            UlMacCe::LongBsr { indices, .. } | UlMacCe::LongTruncatedBsr { indices, .. } => 2 + 1 + indices.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UlSubPdu {
    Sdu { lcid: Lcid, data: Vec<u8> },
    /// CCCH SDU of 48 or 64 bits, sent in Msg3 without a length field
    Ccch(Vec<u8>),
    Ce(UlMacCe),
}

impl UlSubPdu {
    pub fn encoded_len(&self) -> usize {
        match self {
            UlSubPdu::Sdu { data, .. } => sdu_subheader_len(data.len()) + data.len(),
            UlSubPdu::Ccch(data) => 1 + data.len(),
            UlSubPdu::Ce(ce) => ce.encoded_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DlSubPdu {
    Sdu { lcid: Lcid, data: Vec<u8> },
    ContentionResolutionId([u8; 6]),
    TimingAdvance { tag_id: u8, ta: u8 },
    DrxCommand,
    LongDrxCommand,
}

impl fmt::Display for DlSubPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DlSubPdu::Sdu { lcid, data } => write!(f, "SDU lcid {} len {}", lcid, data.len()),
            DlSubPdu::ContentionResolutionId(id) => write!(f, "UE contention resolution identity {:02x?}", id),
            DlSubPdu::TimingAdvance { tag_id, ta } => write!(f, "timing advance tag {} ta {}", tag_id, ta),
            DlSubPdu::DrxCommand => write!(f, "DRX command"),
            DlSubPdu::LongDrxCommand => write!(f, "long DRX command"),
        }
    }
}

fn write_fixed_subheader(buf: &mut BitBuffer, lcid: u8) {
    buf.write_bits(0, 2);
    buf.write_bits(lcid as u64, 6);
}

fn write_var_subheader(buf: &mut BitBuffer, lcid: u8, len: usize) {
    buf.write_bits(0, 1);
    if len < 256 {
        buf.write_bits(0, 1);
        buf.write_bits(lcid as u64, 6);
        buf.write_bits(len as u64, 8);
    } else {
        buf.write_bits(1, 1);
        buf.write_bits(lcid as u64, 6);
        buf.write_bits(len as u64, 16);
    }
}

/// Reads the R/F/LCID/L remainder after the LCID, returning L
fn read_length(buf: &mut BitBuffer, f: u64) -> Result<usize, PduParseErr> {
    let bits = if f == 1 { 16 } else { 8 };
    Ok(buf.read_field(bits, "length")? as usize)
}

/// Serializes `subpdus` into a transport block of `tb_size` bytes, padding the remainder.
/// Panics if the subPDUs do not fit, which the caller rules out when sizing them.
pub fn build_ul_pdu(subpdus: &[UlSubPdu], tb_size: usize) -> Vec<u8> {
    let mut buf = BitBuffer::new_autoexpand(tb_size * 8);
    for sub in subpdus {
        match sub {
            UlSubPdu::Sdu { lcid, data } => {
                write_var_subheader(&mut buf, *lcid, data.len());
                buf.write_bytes(data);
            }
            UlSubPdu::Ccch(data) => {
                let lcid = if data.len() == 6 { ul_lcid::CCCH_48 } else { ul_lcid::CCCH_64 };
                write_fixed_subheader(&mut buf, lcid);
                buf.write_bytes(data);
            }
            UlSubPdu::Ce(ce) => match ce {
                UlMacCe::Crnti(rnti) => {
                    write_fixed_subheader(&mut buf, ce.lcid());
                    buf.write_bits(*rnti as u64, 16);
                }
                UlMacCe::ShortBsr { lcg, index } | UlMacCe::ShortTruncatedBsr { lcg, index } => {
                    write_fixed_subheader(&mut buf, ce.lcid());
                    buf.write_bits(*lcg as u64 & 0x7, 3);
                    buf.write_bits(*index as u64 & 0x1f, 5);
                }
                UlMacCe::LongBsr { lcg_bitmap, indices } | UlMacCe::LongTruncatedBsr { lcg_bitmap, indices } => {
                    write_var_subheader(&mut buf, ce.lcid(), 1 + indices.len());
                    buf.write_bits(*lcg_bitmap as u64, 8);
                    buf.write_bytes(indices);
                }
            },
        }
    }

    let used = buf.get_len().div_ceil(8);
    assert!(used <= tb_size, "MAC PDU of {} bytes exceeds transport block of {}", used, tb_size);
    if used < tb_size {
        write_fixed_subheader(&mut buf, ul_lcid::PADDING);
        buf.write_zeroes((tb_size - used - 1) * 8);
    }
    buf.into_bytes()
}

/// Parses an UL MAC PDU, stopping at the padding subheader
pub fn parse_ul_pdu(pdu: &[u8]) -> Result<Vec<UlSubPdu>, PduParseErr> {
    let mut buf = BitBuffer::from_bytes(pdu);
    let mut out = Vec::new();
    while buf.get_len_remaining() >= 8 {
        let_field!(buf, _r, 1);
        let_field!(buf, f, 1);
        let_field!(buf, lcid, 6);
        let lcid = lcid as u8;
        let sub = match lcid {
            ul_lcid::PADDING => break,
            0..=MAX_SDU_LCID if lcid != ul_lcid::CCCH_64 => {
                let len = read_length(&mut buf, f)?;
                UlSubPdu::Sdu { lcid, data: buf.read_bytes(len, "sdu")? }
            }
            ul_lcid::CCCH_64 => UlSubPdu::Ccch(buf.read_bytes(8, "ccch")?),
            ul_lcid::CCCH_48 => UlSubPdu::Ccch(buf.read_bytes(6, "ccch")?),
            ul_lcid::CRNTI => UlSubPdu::Ce(UlMacCe::Crnti(buf.read_field(16, "c-rnti")? as Rnti)),
            ul_lcid::SHORT_BSR | ul_lcid::SHORT_TRUNCATED_BSR => {
                let_field!(buf, lcg, 3);
                let_field!(buf, index, 5);
                let (lcg, index) = (lcg as u8, index as u8);
                UlSubPdu::Ce(if lcid == ul_lcid::SHORT_BSR {
                    UlMacCe::ShortBsr { lcg, index }
                } else {
                    UlMacCe::ShortTruncatedBsr { lcg, index }
                })
            }
            ul_lcid::LONG_BSR | ul_lcid::LONG_TRUNCATED_BSR => {
                let len = read_length(&mut buf, f)?;
                if len == 0 {
                    return Err(PduParseErr::InvalidValue { field: "long bsr length", value: 0 });
                }
                let lcg_bitmap = buf.read_field(8, "lcg bitmap")? as u8;
                let indices = buf.read_bytes(len - 1, "buffer size")?;
                UlSubPdu::Ce(if lcid == ul_lcid::LONG_BSR {
                    UlMacCe::LongBsr { lcg_bitmap, indices }
                } else {
                    UlMacCe::LongTruncatedBsr { lcg_bitmap, indices }
                })
            }
            _ => return Err(PduParseErr::InvalidValue { field: "ul lcid", value: lcid as u64 }),
        };
        out.push(sub);
    }
    Ok(out)
}

/// Parses a DL MAC PDU, stopping at the padding subheader
pub fn parse_dl_pdu(pdu: &[u8]) -> Result<Vec<DlSubPdu>, PduParseErr> {
    let mut buf = BitBuffer::from_bytes(pdu);
    let mut out = Vec::new();
    while buf.get_len_remaining() >= 8 {
        let_field!(buf, _r, 1);
        let_field!(buf, f, 1);
        let_field!(buf, lcid, 6);
        let lcid = lcid as u8;
        let sub = match lcid {
            dl_lcid::PADDING => break,
            0..=MAX_SDU_LCID => {
                let len = read_length(&mut buf, f)?;
                DlSubPdu::Sdu { lcid, data: buf.read_bytes(len, "sdu")? }
            }
            dl_lcid::CONTENTION_RESOLUTION_ID => {
                let bytes = buf.read_bytes(6, "contention resolution identity")?;
                let mut id = [0u8; 6];
                id.copy_from_slice(&bytes);
                DlSubPdu::ContentionResolutionId(id)
            }
            dl_lcid::TIMING_ADVANCE => {
                let_field!(buf, tag_id, 2);
                let_field!(buf, ta, 6);
                DlSubPdu::TimingAdvance { tag_id: tag_id as u8, ta: ta as u8 }
            }
            dl_lcid::DRX_COMMAND => DlSubPdu::DrxCommand,
            dl_lcid::LONG_DRX_COMMAND => DlSubPdu::LongDrxCommand,
            _ => {
                tracing::warn!("dl lcid {} not supported, dropping rest of PDU", lcid);
                return Err(PduParseErr::NotImplemented { field: Some("dl lcid") });
            }
        };
        out.push(sub);
    }
    Ok(out)
}

/// Serializes a DL MAC PDU, as the network would
pub fn build_dl_pdu(subpdus: &[DlSubPdu], tb_size: usize) -> Vec<u8> {
    let mut buf = BitBuffer::new_autoexpand(tb_size * 8);
    for sub in subpdus {
        match sub {
            DlSubPdu::Sdu { lcid, data } => {
                write_var_subheader(&mut buf, *lcid, data.len());
                buf.write_bytes(data);
            }
            DlSubPdu::ContentionResolutionId(id) => {
                write_fixed_subheader(&mut buf, dl_lcid::CONTENTION_RESOLUTION_ID);
                buf.write_bytes(id);
            }
            DlSubPdu::TimingAdvance { tag_id, ta } => {
                write_fixed_subheader(&mut buf, dl_lcid::TIMING_ADVANCE);
                buf.write_bits(*tag_id as u64 & 0x3, 2);
                buf.write_bits(*ta as u64 & 0x3f, 6);
            }
            DlSubPdu::DrxCommand => write_fixed_subheader(&mut buf, dl_lcid::DRX_COMMAND),
            DlSubPdu::LongDrxCommand => write_fixed_subheader(&mut buf, dl_lcid::LONG_DRX_COMMAND),
        }
    }
    let used = buf.get_len().div_ceil(8);
    if used < tb_size {
        write_fixed_subheader(&mut buf, dl_lcid::PADDING);
        buf.write_zeroes((tb_size - used - 1) * 8);
    }
    buf.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_core::debug;

    #[test]
    fn test_sdu_subheader_sizes() {
        assert_eq!(max_sdu_len(2), 0);
        assert_eq!(max_sdu_len(10), 8);
        assert_eq!(max_sdu_len(257), 255);
        assert_eq!(max_sdu_len(258), 255);
        assert_eq!(max_sdu_len(1000), 997);
        assert_eq!(sdu_subheader_len(255), 2);
        assert_eq!(sdu_subheader_len(256), 3);
    }

    #[test]
    fn test_ul_pdu_layout() {
        debug::setup_logging_verbose();
        let subs = vec![
            UlSubPdu::Ce(UlMacCe::Crnti(0x4601)),
            UlSubPdu::Sdu { lcid: 4, data: vec![0xaa; 5] },
            UlSubPdu::Ce(UlMacCe::ShortBsr { lcg: 1, index: 17 }),
        ];
        let pdu = build_ul_pdu(&subs, 20);
        assert_eq!(pdu.len(), 20);
        assert_eq!(&pdu[..3], &[58, 0x46, 0x01]);
        // R/F/LCID/L for lcid 4, 5 bytes
        assert_eq!(&pdu[3..5], &[4, 5]);
        assert_eq!(&pdu[10..12], &[61, (1 << 5) | 17]);
        assert_eq!(pdu[12], 63);
        assert_eq!(parse_ul_pdu(&pdu).unwrap(), subs);
    }

    #[test]
    fn test_long_sdu_uses_16_bit_length() {
        debug::setup_logging_verbose();
        let subs = vec![UlSubPdu::Sdu { lcid: 1, data: vec![7; 300] }];
        let pdu = build_ul_pdu(&subs, 303);
        assert_eq!(&pdu[..3], &[0x41, 0x01, 0x2c]);
        assert_eq!(parse_ul_pdu(&pdu).unwrap(), subs);
    }

    #[test]
    fn test_long_bsr_and_msg3_ccch() {
        debug::setup_logging_verbose();
        let subs = vec![
            UlSubPdu::Ccch(vec![1, 2, 3, 4, 5, 6]),
            UlSubPdu::Ce(UlMacCe::LongBsr { lcg_bitmap: 0b0000_0101, indices: vec![100, 3] }),
        ];
        assert_eq!(subs[1].encoded_len(), 5);
        let pdu = build_ul_pdu(&subs, 12);
        assert_eq!(pdu[0], 52);
        assert_eq!(parse_ul_pdu(&pdu).unwrap(), subs);
    }

    #[test]
    #[should_panic(expected = "exceeds transport block")]
    fn test_oversized_pdu_panics() {
        build_ul_pdu(&[UlSubPdu::Sdu { lcid: 1, data: vec![0; 10] }], 8);
    }

    #[test]
    fn test_dl_pdu_with_contention_resolution() {
        debug::setup_logging_verbose();
        let subs = vec![
            DlSubPdu::ContentionResolutionId([1, 2, 3, 4, 5, 6]),
            DlSubPdu::TimingAdvance { tag_id: 0, ta: 31 },
            DlSubPdu::Sdu { lcid: 1, data: vec![9; 12] },
        ];
        let pdu = build_dl_pdu(&subs, 40);
        assert_eq!(parse_dl_pdu(&pdu).unwrap(), subs);
    }

    #[test]
    fn test_dl_truncated_sdu() {
        debug::setup_logging_verbose();
        let pdu = build_dl_pdu(&[DlSubPdu::Sdu { lcid: 2, data: vec![1; 20] }], 22);
        assert!(matches!(parse_dl_pdu(&pdu[..10]), Err(PduParseErr::BufferEnded { .. })));
    }
}
