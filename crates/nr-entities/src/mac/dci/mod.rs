//! Downlink control information: field layouts, sizing, bit extraction and the
//! interpretation of DL assignments and UL grants.

pub mod decoder;
pub mod dl_assignment;
pub mod sizes;
pub mod tables;
pub mod ul_grant;

use core::fmt;

use nr_config::UeMacConfig;
use nr_core::{Rnti, RntiType, SlotTime};

pub use decoder::{classify, decode, encode};
pub use dl_assignment::{DlAssignment, interpret_dl_assignment};
pub use sizes::DciSizes;
pub use ul_grant::{UlGrant, interpret_ul_grant};

/// Where and how a DCI was received
#[derive(Debug, Clone, Copy)]
pub struct DciContext<'a> {
    pub cfg: &'a UeMacConfig,
    /// Slot carrying the PDCCH
    pub time: SlotTime,
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub n_cce: u16,
    pub n_cce_total: u16,
}

impl DciContext<'_> {
    /// Broadcast assignments have no HARQ state or feedback
    pub fn is_broadcast(&self) -> bool {
        matches!(self.rnti_type, RntiType::Ra | RntiType::Si | RntiType::P)
    }

    pub fn koffset(&self) -> u16 {
        self.cfg.carrier.ntn_koffset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciFormat {
    F0_0,
    F0_1,
    F1_0,
    F1_1,
}

impl fmt::Display for DciFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DciFormat::F0_0 => "0_0",
            DciFormat::F0_1 => "0_1",
            DciFormat::F1_0 => "1_0",
            DciFormat::F1_1 => "1_1",
        };
        write!(f, "{}", s)
    }
}

/// One bit layout per (format, RNTI type) combination that changes the field list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciKind {
    /// 1_0 scrambled with RA-RNTI, schedules the RAR
    Dl10Ra,
    /// 1_0 scrambled with SI-RNTI
    Dl10Si,
    /// 1_0 scrambled with C-RNTI or TC-RNTI
    Dl10,
    /// 1_0 with C-RNTI and all-ones frequency assignment
    PdcchOrder,
    Ul00,
    Dl11,
    Ul01,
}

impl DciKind {
    pub fn format(self) -> DciFormat {
        match self {
            DciKind::Dl10Ra | DciKind::Dl10Si | DciKind::Dl10 | DciKind::PdcchOrder => DciFormat::F1_0,
            DciKind::Ul00 => DciFormat::F0_0,
            DciKind::Dl11 => DciFormat::F1_1,
            DciKind::Ul01 => DciFormat::F0_1,
        }
    }

    pub fn is_uplink(self) -> bool {
        matches!(self, DciKind::Ul00 | DciKind::Ul01)
    }

    /// Fields in transmission order, TS 38.212 7.3.1
    pub fn layout(self) -> &'static [DciField] {
        use DciField::*;
        match self {
            DciKind::Dl10Ra => &[Fdra, Tdra, VrbToPrb, Mcs, TbScaling],
            DciKind::Dl10Si => &[Fdra, Tdra, VrbToPrb, Mcs, Rv, SiIndicator],
            DciKind::Dl10 => &[Identifier, Fdra, Tdra, VrbToPrb, Mcs, Ndi, Rv, HarqPid, Dai, Tpc, Pri, K1],
            DciKind::PdcchOrder => &[Identifier, Fdra, PreambleIndex, UlSulIndicator, SsbIndex, PrachMask],
            DciKind::Ul00 => &[Identifier, Fdra, Tdra, FreqHopping, Mcs, Ndi, Rv, HarqPid, Tpc],
            DciKind::Dl11 => &[
                Identifier, BwpIndicator, Fdra, Tdra, VrbToPrb, Mcs, Ndi, Rv, Mcs2, Ndi2, Rv2, HarqPid, Dai, Tpc, Pri,
                K1, AntennaPorts, Tci, SrsRequest, DmrsSeqInit,
            ],
            DciKind::Ul01 => &[
                Identifier, BwpIndicator, Fdra, Tdra, FreqHopping, Mcs, Ndi, Rv, HarqPid, Dai, Tpc, Sri, Precoding,
                AntennaPorts, SrsRequest, CsiRequest, DmrsSeqInit, UlschIndicator,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciField {
    Identifier,
    BwpIndicator,
    Fdra,
    Tdra,
    VrbToPrb,
    FreqHopping,
    Mcs,
    Ndi,
    Rv,
    Mcs2,
    Ndi2,
    Rv2,
    HarqPid,
    Dai,
    Tpc,
    Pri,
    /// PDSCH-to-HARQ feedback timing indicator
    K1,
    TbScaling,
    SiIndicator,
    PreambleIndex,
    UlSulIndicator,
    SsbIndex,
    PrachMask,
    AntennaPorts,
    Tci,
    SrsRequest,
    CsiRequest,
    DmrsSeqInit,
    Sri,
    Precoding,
    UlschIndicator,
}

const NUM_DCI_FIELDS: usize = DciField::UlschIndicator as usize + 1;

/// Field values extracted from one DCI payload. Fields absent from the layout read as 0.
#[derive(Clone, PartialEq, Eq)]
pub struct DciFields {
    pub kind: DciKind,
    values: [u32; NUM_DCI_FIELDS],
}

impl DciFields {
    pub fn new(kind: DciKind) -> Self {
        let mut values = [0; NUM_DCI_FIELDS];
        values[DciField::Identifier as usize] = match kind.format() {
            DciFormat::F1_0 | DciFormat::F1_1 => 1,
            _ => 0,
        };
        Self { kind, values }
    }

    pub fn get(&self, field: DciField) -> u32 {
        self.values[field as usize]
    }

    /// Narrow accessor for fields of at most 8 bits
    pub fn get_u8(&self, field: DciField) -> u8 {
        self.values[field as usize] as u8
    }

    pub fn set(&mut self, field: DciField, value: u32) {
        self.values[field as usize] = value;
    }

    /// Builder-style set, for composing DCIs in tests and the emulated network
    pub fn with(mut self, field: DciField, value: u32) -> Self {
        self.set(field, value);
        self
    }
}

impl fmt::Debug for DciFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {{", self.kind)?;
        for field in self.kind.layout() {
            write!(f, " {:?}: {}", field, self.get(*field))?;
        }
        write!(f, " }}")
    }
}
