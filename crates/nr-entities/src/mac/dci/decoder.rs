//! Table-driven extraction of DCI fields. One layout per DciKind, widths from DciSizes.

use nr_core::{BitBuffer, PduParseErr, RntiType};
use nr_saps::phy_mac::DciFormatGroup;

use super::{DciFields, DciKind, DciSizes};
use crate::mac::errors::MacError;

/// Works out which layout applies to a payload received in `group` with an RNTI of
/// `rnti_type`, from the RNTI, the format identifier bit and, for 1_0, the PDCCH order
/// marker.
pub fn classify(rnti_type: RntiType, group: DciFormatGroup, payload: &BitBuffer, sizes: &DciSizes) -> Result<DciKind, MacError> {
    let identifier = || payload.peek_bits_at(0, 1).ok_or(PduParseErr::BufferEnded { field: Some("identifier") });

    match (group, rnti_type) {
        (_, RntiType::P) => Err(MacError::NotImplemented { what: "DCI scrambled with P-RNTI" }),
        (DciFormatGroup::Fallback, RntiType::Ra) => Ok(DciKind::Dl10Ra),
        (DciFormatGroup::Fallback, RntiType::Si) => Ok(DciKind::Dl10Si),
        (DciFormatGroup::Fallback, RntiType::C | RntiType::Tc) => {
            if identifier()? == 0 {
                return Ok(DciKind::Ul00);
            }
            if rnti_type == RntiType::C {
                // An all-ones frequency assignment turns 1_0 into a PDCCH order
                let w = sizes.width(DciKind::Dl10, super::DciField::Fdra);
                let fdra = payload.peek_bits_at(1, w).ok_or(PduParseErr::BufferEnded { field: Some("fdra") })?;
                if w > 0 && fdra == (1u64 << w) - 1 {
                    return Ok(DciKind::PdcchOrder);
                }
            }
            Ok(DciKind::Dl10)
        }
        (DciFormatGroup::NonFallback, RntiType::C) => {
            Ok(if identifier()? == 1 { DciKind::Dl11 } else { DciKind::Ul01 })
        }
        (DciFormatGroup::NonFallback, _) => Err(MacError::FalseDci { field: "rnti type for format 0_1/1_1", value: 0 }),
    }
}

/// Reads the fields of `kind` from `payload`
pub fn decode(kind: DciKind, sizes: &DciSizes, payload: &BitBuffer) -> Result<DciFields, MacError> {
    let needed = sizes.fields_size(kind);
    if payload.get_len() < needed {
        return Err(PduParseErr::InconsistentLength { expected: needed, found: payload.get_len() }.into());
    }

    let mut fields = DciFields::new(kind);
    let mut pos = 0;
    for field in kind.layout() {
        let w = sizes.width(kind, *field);
        if w == 0 {
            continue;
        }
        let v = payload.peek_bits_at(pos, w).ok_or(PduParseErr::BufferEnded { field: None })?;
        fields.set(*field, v as u32);
        pos += w;
    }
    tracing::trace!("decoded {:?}", fields);
    Ok(fields)
}

/// Packs `fields` into a payload of the transmitted size. Values are cut to their field width.
pub fn encode(sizes: &DciSizes, fields: &DciFields) -> BitBuffer {
    let kind = fields.kind;
    let mut buf = BitBuffer::new(sizes.payload_size(kind));
    for field in kind.layout() {
        let w = sizes.width(kind, *field);
        if w == 0 {
            continue;
        }
        let mask = if w >= 64 { u64::MAX } else { (1u64 << w) - 1 };
        buf.write_bits(fields.get(*field) as u64 & mask, w);
    }
    buf.seek(0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::dci::DciField;
    use nr_config::UeMacConfig;
    use nr_core::debug;
    use nr_saps::phy_mac::{CoresetType, SearchSpaceType};

    fn css_sizes() -> DciSizes {
        DciSizes::new(&UeMacConfig::default(), SearchSpaceType::Common, CoresetType::Coreset0)
    }

    #[test]
    fn test_dl10_fields_in_order() {
        debug::setup_logging_verbose();
        let sizes = css_sizes();
        // identifier 1, fdra 11 bits, then tdra .. k1
        let mut payload = BitBuffer::new_autoexpand(39);
        payload.write_bits(1, 1);
        payload.write_bits(0x123, 11);
        payload.write_bits(3, 4); // tdra
        payload.write_bits(0, 1); // vrb
        payload.write_bits(9, 5); // mcs
        payload.write_bits(1, 1); // ndi
        payload.write_bits(2, 2); // rv
        payload.write_bits(5, 4); // harq
        payload.write_bits(1, 2); // dai
        payload.write_bits(3, 2); // tpc
        payload.write_bits(4, 3); // pri
        payload.write_bits(6, 3); // k1
        payload.write_zeroes(1);
        payload.seek(0);

        let kind = classify(RntiType::C, DciFormatGroup::Fallback, &payload, &sizes).unwrap();
        assert_eq!(kind, DciKind::Dl10);
        let f = decode(kind, &sizes, &payload).unwrap();
        assert_eq!(f.get(DciField::Fdra), 0x123);
        assert_eq!(f.get(DciField::Tdra), 3);
        assert_eq!(f.get(DciField::Mcs), 9);
        assert_eq!(f.get(DciField::Ndi), 1);
        assert_eq!(f.get(DciField::Rv), 2);
        assert_eq!(f.get(DciField::HarqPid), 5);
        assert_eq!(f.get(DciField::Dai), 1);
        assert_eq!(f.get(DciField::Tpc), 3);
        assert_eq!(f.get(DciField::Pri), 4);
        assert_eq!(f.get(DciField::K1), 6);
    }

    #[test]
    fn test_identifier_selects_ul() {
        debug::setup_logging_verbose();
        let sizes = css_sizes();
        let fields = DciFields::new(DciKind::Ul00).with(DciField::Mcs, 17).with(DciField::HarqPid, 2);
        let payload = encode(&sizes, &fields);
        assert_eq!(payload.get_len(), 39);
        for rnti_type in [RntiType::C, RntiType::Tc] {
            assert_eq!(classify(rnti_type, DciFormatGroup::Fallback, &payload, &sizes), Ok(DciKind::Ul00));
        }
        assert_eq!(decode(DciKind::Ul00, &sizes, &payload), Ok(fields));
    }

    #[test]
    fn test_pdcch_order_only_for_c_rnti() {
        debug::setup_logging_verbose();
        let sizes = css_sizes();
        let order = DciFields::new(DciKind::PdcchOrder)
            .with(DciField::Fdra, 0x7ff)
            .with(DciField::PreambleIndex, 52)
            .with(DciField::SsbIndex, 0);
        let payload = encode(&sizes, &order);
        assert_eq!(classify(RntiType::C, DciFormatGroup::Fallback, &payload, &sizes), Ok(DciKind::PdcchOrder));
        assert_eq!(classify(RntiType::Tc, DciFormatGroup::Fallback, &payload, &sizes), Ok(DciKind::Dl10));
        let f = decode(DciKind::PdcchOrder, &sizes, &payload).unwrap();
        assert_eq!(f.get(DciField::PreambleIndex), 52);
    }

    #[test]
    fn test_rnti_dependent_layouts() {
        debug::setup_logging_verbose();
        let sizes = css_sizes();
        let payload = BitBuffer::new(39);
        assert_eq!(classify(RntiType::Ra, DciFormatGroup::Fallback, &payload, &sizes), Ok(DciKind::Dl10Ra));
        assert_eq!(classify(RntiType::Si, DciFormatGroup::Fallback, &payload, &sizes), Ok(DciKind::Dl10Si));
        assert!(matches!(
            classify(RntiType::P, DciFormatGroup::Fallback, &payload, &sizes),
            Err(MacError::NotImplemented { .. })
        ));
        assert!(matches!(
            classify(RntiType::Tc, DciFormatGroup::NonFallback, &payload, &sizes),
            Err(MacError::FalseDci { .. })
        ));
    }

    #[test]
    fn test_short_payload_rejected() {
        debug::setup_logging_verbose();
        let sizes = css_sizes();
        let payload = BitBuffer::new(20);
        assert_eq!(
            decode(DciKind::Dl10, &sizes, &payload),
            Err(MacError::Parse(PduParseErr::InconsistentLength { expected: 39, found: 20 }))
        );
    }
}
