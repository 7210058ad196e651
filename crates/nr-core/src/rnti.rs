use core::fmt;

/// Radio network temporary identifier
pub type Rnti = u16;

pub const SI_RNTI: Rnti = 0xFFFF;
pub const P_RNTI: Rnti = 0xFFFE;

/// The RNTI a DCI was scrambled with determines how its fields are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RntiType {
    /// Cell RNTI, assigned after random access
    C,
    /// Temporary cell RNTI, received in the RAR
    Tc,
    /// Random access RNTI, derived from the PRACH occasion
    Ra,
    /// System information
    Si,
    /// Paging
    P,
}

impl fmt::Display for RntiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RntiType::C => "C-RNTI",
            RntiType::Tc => "TC-RNTI",
            RntiType::Ra => "RA-RNTI",
            RntiType::Si => "SI-RNTI",
            RntiType::P => "P-RNTI",
        };
        write!(f, "{}", s)
    }
}
