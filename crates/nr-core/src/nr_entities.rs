/// Entities taking part in the UE stack. The router delivers messages by destination entity.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Copy)]
pub enum NrEntity {
    /// Physical layer abstraction (real or emulated)
    Phy,
    /// Medium access control
    Mac,
    /// Radio resource control, configures the MAC and drives UE state
    Rrc,
}

/// Service access points between entities
#[derive(PartialEq, Eq, Hash, Clone, Debug, Copy)]
pub enum Sap {
    /// Slot indications, DCI and PDSCH results up, scheduled responses down
    PhyMac,
    /// Random access requests and results between RRC and MAC
    MacRrc,
}
