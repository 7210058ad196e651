//! UL power control state, TS 38.213 7.1 and 7.2. Path loss is not estimated and taken as 0 dB.

/// Maximum UE output power, power class 3
pub const P_CMAX_DBM: i16 = 23;

fn bandwidth_term(mu: u8, nb_rb: u16) -> f64 {
    10.0 * ((1u32 << mu) as f64 * nb_rb.max(1) as f64).log10()
}

fn clamp_dbm(p: f64) -> i16 {
    (p.round() as i16).min(P_CMAX_DBM)
}

/// PUSCH and PUCCH closed-loop adjustment states
#[derive(Debug, Clone, Default)]
pub struct PowerControl {
    accumulation: bool,
    /// f_b,f,c(i,l) in dB
    f_pusch: i32,
    /// g_b,f,c(i,l) in dB
    g_pucch: i32,
}

impl PowerControl {
    pub fn new(accumulation: bool) -> Self {
        Self { accumulation, f_pusch: 0, g_pucch: 0 }
    }

    pub fn apply_pusch_tpc(&mut self, delta_db: i8) {
        if self.accumulation {
            self.f_pusch += delta_db as i32;
        } else {
            self.f_pusch = delta_db as i32;
        }
    }

    /// PUCCH TPC always accumulates
    pub fn apply_pucch_tpc(&mut self, delta_db: i8) {
        self.g_pucch += delta_db as i32;
    }

    /// Initial PUSCH adjustment after random access: total preamble ramp-up plus the
    /// Msg3 TPC from the RAR grant
    pub fn init_after_ra(&mut self, ramp_up_db: i16, msg3_tpc_db: i8) {
        self.f_pusch = ramp_up_db as i32 + msg3_tpc_db as i32;
        self.g_pucch = ramp_up_db as i32;
    }

    pub fn f_pusch(&self) -> i32 {
        self.f_pusch
    }

    pub fn g_pucch(&self) -> i32 {
        self.g_pucch
    }

    pub fn pusch_power(&self, p0: i16, mu: u8, nb_rb: u16) -> i16 {
        clamp_dbm(p0 as f64 + bandwidth_term(mu, nb_rb) + self.f_pusch as f64)
    }

    pub fn pucch_power(&self, p0: i16, mu: u8, nb_rb: u16) -> i16 {
        clamp_dbm(p0 as f64 + bandwidth_term(mu, nb_rb) + self.g_pucch as f64)
    }

    pub fn reset(&mut self) {
        self.f_pusch = 0;
        self.g_pucch = 0;
    }
}

/// Msg3 power: P0 is the preamble target plus the configured Msg3 delta
pub fn msg3_power(preamble_target: i16, msg3_delta_preamble: i8, ramp_up_db: i16, tpc_db: i8, mu: u8, nb_rb: u16) -> i16 {
    let p0 = preamble_target as f64 + msg3_delta_preamble as f64;
    clamp_dbm(p0 + bandwidth_term(mu, nb_rb) + ramp_up_db as f64 + tpc_db as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulated_vs_absolute() {
        let mut acc = PowerControl::new(true);
        acc.apply_pusch_tpc(1);
        acc.apply_pusch_tpc(3);
        assert_eq!(acc.f_pusch(), 4);

        let mut abs = PowerControl::new(false);
        abs.apply_pusch_tpc(-4);
        abs.apply_pusch_tpc(1);
        assert_eq!(abs.f_pusch(), 1);
    }

    #[test]
    fn test_power_formula_and_cap() {
        let mut pc = PowerControl::new(true);
        // -90 + 10log10(2 * 5) = -80
        assert_eq!(pc.pusch_power(-90, 1, 5), -80);
        pc.apply_pusch_tpc(3);
        assert_eq!(pc.pusch_power(-90, 1, 5), -77);
        pc.apply_pucch_tpc(-1);
        assert_eq!(pc.pucch_power(-90, 0, 1), -91);
        assert_eq!(pc.pusch_power(40, 1, 100), P_CMAX_DBM);
    }

    #[test]
    fn test_msg3_power() {
        // -96 + 0 + 10log10(1 * 10) + 4 + 2
        assert_eq!(msg3_power(-96, 0, 4, 2, 0, 10), -80);
    }
}
