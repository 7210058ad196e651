//! Random access: occasion association, the RAR PDU and the procedure itself.

pub mod prach_assoc;
pub mod procedure;
pub mod rar;

pub use prach_assoc::{PrachAssociation, PrachOccasion};
pub use procedure::{CONT_RES_ID_BYTES, Msg3Content, RaOutcome, RaProcedure, RaState, RarResult};
pub use rar::{MacRar, RarGrant, RarSubPdu};
