//! UCI multiplexing of overlapping PUCCH resources within a slot, TS 38.213 9.2.5

use nr_config::{CfgPucchResource, PucchFormat};

use super::resource::InitialPucch;

/// Where a UCI candidate would be transmitted
#[derive(Debug, Clone)]
pub enum UciResource {
    Dedicated(CfgPucchResource),
    /// Row of the common resource table with its r_PUCCH, before dedicated configuration
    Initial { row: InitialPucch, common_index: u8, r_pucch: u8 },
}

impl UciResource {
    pub fn format(&self) -> PucchFormat {
        match self {
            UciResource::Dedicated(r) => r.format,
            UciResource::Initial { row, .. } => row.format,
        }
    }

    pub fn start_symbol(&self) -> u8 {
        match self {
            UciResource::Dedicated(r) => r.start_symbol,
            UciResource::Initial { row, .. } => row.start_symbol,
        }
    }

    pub fn nr_symbols(&self) -> u8 {
        match self {
            UciResource::Dedicated(r) => r.nr_symbols,
            UciResource::Initial { row, .. } => row.nr_symbols,
        }
    }

    fn id(&self) -> Option<u8> {
        match self {
            UciResource::Dedicated(r) => Some(r.id),
            UciResource::Initial { .. } => None,
        }
    }
}

/// UCI that would go out on one PUCCH resource
#[derive(Debug, Clone)]
pub struct UciCandidate {
    pub resource: UciResource,
    pub n_sr: u8,
    /// 1 for a positive SR
    pub sr_payload: u8,
    pub n_harq: u8,
    pub ack_payload: u64,
    pub n_csi: u16,
    pub csi_payload: u64,
}

impl UciCandidate {
    pub fn sr(resource: CfgPucchResource, positive: bool) -> Self {
        Self { sr_payload: positive as u8, n_sr: 1, ..Self::empty(UciResource::Dedicated(resource)) }
    }

    pub fn csi(resource: CfgPucchResource, n_csi: u16, csi_payload: u64) -> Self {
        Self { n_csi, csi_payload, ..Self::empty(UciResource::Dedicated(resource)) }
    }

    pub fn harq(resource: UciResource, n_harq: u8, ack_payload: u64) -> Self {
        Self { n_harq, ack_payload, ..Self::empty(resource) }
    }

    fn empty(resource: UciResource) -> Self {
        Self { resource, n_sr: 0, sr_payload: 0, n_harq: 0, ack_payload: 0, n_csi: 0, csi_payload: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.n_sr == 0 && self.n_harq == 0 && self.n_csi == 0
    }

    pub fn is_negative_sr_only(&self) -> bool {
        self.n_harq == 0 && self.n_csi == 0 && self.n_sr > 0 && self.sr_payload == 0
    }

    pub fn n_uci(&self) -> u16 {
        self.n_harq as u16 + self.n_sr as u16 + self.n_csi
    }

    /// Bit layout for formats 2, 3 and 4: CSI above SR above HARQ-ACK
    pub fn long_payload(&self) -> u64 {
        let shift_sr = self.n_harq as u32;
        let shift_csi = shift_sr + self.n_sr as u32;
        let csi = if shift_csi >= 64 { 0 } else { self.csi_payload << shift_csi };
        csi | ((self.sr_payload as u64) << shift_sr) | self.ack_payload
    }

    fn end_symbol(&self) -> u8 {
        self.resource.start_symbol() + self.resource.nr_symbols()
    }

    fn overlaps(&self, later: &UciCandidate) -> bool {
        self.resource.start_symbol() < later.end_symbol() && later.resource.start_symbol() < self.end_symbol()
    }

    fn take_sr(&mut self, other: &UciCandidate) {
        if other.n_sr > 0 {
            self.n_sr = other.n_sr;
            self.sr_payload = other.sr_payload;
        }
    }

    fn take_harq(&mut self, other: &UciCandidate) {
        self.n_harq = other.n_harq;
        self.ack_payload = other.ack_payload;
    }

    fn take_csi(&mut self, other: &UciCandidate) {
        self.n_csi = other.n_csi;
        self.csi_payload = other.csi_payload;
    }
}

/// Sorts by first symbol, the longer resource first when two start together. The sort is stable.
pub fn order_candidates(candidates: &mut [UciCandidate]) {
    candidates.sort_by(|a, b| {
        a.resource
            .start_symbol()
            .cmp(&b.resource.start_symbol())
            .then(b.resource.nr_symbols().cmp(&a.resource.nr_symbols()))
    });
}

/// Merges every pair of overlapping candidates until none overlap
pub fn multiplex(mut candidates: Vec<UciCandidate>, simultaneous_harq_csi: bool) -> Vec<UciCandidate> {
    candidates.retain(|c| !c.is_empty());
    order_candidates(&mut candidates);
    while let Some(i) = (0..candidates.len().saturating_sub(1)).find(|i| candidates[*i].overlaps(&candidates[i + 1])) {
        let later = candidates.remove(i + 1);
        let earlier = candidates.remove(i);
        let merged = merge(earlier, later, simultaneous_harq_csi);
        if !merged.is_empty() {
            candidates.insert(i, merged);
        }
        order_candidates(&mut candidates);
    }
    candidates
}

/// Resolves two overlapping candidates into one
pub fn merge(a: UciCandidate, b: UciCandidate, simultaneous_harq_csi: bool) -> UciCandidate {
    if (a.n_harq > 0 && b.n_harq > 0) || (a.n_sr > 0 && b.n_sr > 0) || (a.n_csi > 0 && b.n_csi > 0) {
        tracing::error!(
            "overlapping PUCCH resources {:?} and {:?} carry the same UCI type, keeping the first",
            a.resource.id(),
            b.resource.id()
        );
        return a;
    }

    match (a.resource.format().is_short_payload(), b.resource.format().is_short_payload()) {
        (true, true) => {
            let (sr, harq) = if a.n_harq > 0 { (b, a) } else { (a, b) };
            match (sr.resource.format(), harq.resource.format()) {
                (PucchFormat::F1, PucchFormat::F1) => {
                    if sr.sr_payload == 0 {
                        harq
                    } else {
                        // Positive SR: HARQ-ACK goes out on the SR resource, the resource itself signals the SR
                        let mut out = sr;
                        out.take_harq(&harq);
                        out.n_sr = 0;
                        out.sr_payload = 0;
                        out
                    }
                }
                (PucchFormat::F0, PucchFormat::F1) => {
                    tracing::debug!("SR on format 0 dropped for HARQ-ACK on format 1");
                    harq
                }
                _ => {
                    let mut out = harq;
                    out.take_sr(&sr);
                    out
                }
            }
        }
        (false, false) => {
            let (harq, csi) = if b.n_harq > 0 { (b, a) } else { (a, b) };
            let mut out = harq;
            out.take_sr(&csi);
            if simultaneous_harq_csi {
                out.take_csi(&csi);
            } else if csi.n_csi > 0 {
                tracing::debug!("CSI dropped, simultaneous HARQ-ACK and CSI not configured");
            }
            out
        }
        (short_a, _) => {
            let (short, long) = if short_a { (a, b) } else { (b, a) };
            if short.n_harq == 0 {
                let mut out = long;
                out.take_sr(&short);
                out
            } else if simultaneous_harq_csi {
                let mut out = long;
                out.take_harq(&short);
                out.take_sr(&short);
                out
            } else {
                if long.n_csi > 0 {
                    tracing::debug!("CSI dropped, simultaneous HARQ-ACK and CSI not configured");
                }
                let mut out = short;
                out.take_sr(&long);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_config::CfgPucch;
    use nr_core::debug;

    fn res(id: u8) -> CfgPucchResource {
        CfgPucch::default().resource(id).cloned().unwrap()
    }

    fn with_symbols(mut r: CfgPucchResource, start_symbol: u8, nr_symbols: u8) -> CfgPucchResource {
        r.start_symbol = start_symbol;
        r.nr_symbols = nr_symbols;
        r
    }

    #[test]
    fn test_ordering_is_stable_longest_first() {
        let mut c = vec![
            UciCandidate::sr(with_symbols(res(3), 10, 2), true),
            UciCandidate::csi(with_symbols(res(2), 4, 2), 4, 0),
            UciCandidate::harq(UciResource::Dedicated(with_symbols(res(4), 4, 8)), 1, 1),
            UciCandidate::sr(with_symbols(res(0), 10, 2), false),
        ];
        order_candidates(&mut c);
        let ids: Vec<_> = c.iter().map(|c| c.resource.id().unwrap()).collect();
        assert_eq!(ids, vec![4, 2, 3, 0]);
    }

    #[test]
    fn test_sr_csi_harq_end_in_one_long_resource() {
        debug::setup_logging_verbose();
        let c = vec![
            UciCandidate::sr(res(3), true),
            UciCandidate::csi(res(4), 6, 0b101101),
            UciCandidate::harq(UciResource::Dedicated(res(0)), 1, 1),
        ];
        let out = multiplex(c, true);
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.resource.format(), PucchFormat::F2);
        assert_eq!((m.n_harq, m.n_sr, m.n_csi), (1, 1, 6));
        assert_eq!(m.long_payload(), (0b101101 << 2) | (1 << 1) | 1);
    }

    #[test]
    fn test_csi_dropped_without_simultaneous() {
        debug::setup_logging_verbose();
        let c = vec![UciCandidate::csi(res(4), 6, 0x3f), UciCandidate::harq(UciResource::Dedicated(res(1)), 2, 0b10)];
        let out = multiplex(c, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].resource.id(), Some(1));
        assert_eq!((out[0].n_harq, out[0].n_csi), (2, 0));
    }

    #[test]
    fn test_f0_sr_joins_f0_harq() {
        debug::setup_logging_verbose();
        let out = multiplex(vec![UciCandidate::sr(res(3), true), UciCandidate::harq(UciResource::Dedicated(res(0)), 1, 0)], true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].resource.id(), Some(0));
        assert_eq!((out[0].n_sr, out[0].sr_payload, out[0].n_harq), (1, 1, 1));
    }

    #[test]
    fn test_f1_positive_sr_carries_harq() {
        debug::setup_logging_verbose();
        let mut sr_res = res(3);
        sr_res.format = PucchFormat::F1;
        let mut harq_res = res(0);
        harq_res.format = PucchFormat::F1;

        let out = merge(UciCandidate::sr(sr_res.clone(), true), UciCandidate::harq(UciResource::Dedicated(harq_res.clone()), 1, 1), true);
        assert_eq!(out.resource.id(), Some(3));
        assert_eq!((out.n_sr, out.n_harq, out.ack_payload), (0, 1, 1));

        let out = merge(UciCandidate::sr(sr_res, false), UciCandidate::harq(UciResource::Dedicated(harq_res), 1, 1), true);
        assert_eq!(out.resource.id(), Some(0));
        assert_eq!(out.n_sr, 0);
    }

    #[test]
    fn test_non_overlapping_stay_apart() {
        debug::setup_logging_verbose();
        let out = multiplex(
            vec![UciCandidate::sr(with_symbols(res(3), 0, 2), true), UciCandidate::harq(UciResource::Dedicated(res(0)), 1, 1)],
            true,
        );
        assert_eq!(out.len(), 2);
    }
}
