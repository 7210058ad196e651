mod common;

use nr_config::{UeMacState, UeState};
use nr_core::{NrEntity, Sap, SlotTime, SlotType, debug};
use nr_entities::mac::dci::tables::rbs_to_riv;
use nr_entities::mac::dci::{self, DciField, DciFields, DciKind, DciSizes};
use nr_entities::mac::mac_pdu::{self, DlSubPdu};
use nr_saps::phy_mac::{
    CoresetType, DciFormatGroup, DciInd, DlConfigPdu, DlIndication, PdschRxInd, ScheduledResponse, SearchSpaceType,
    SlotInd, UlConfigPdu,
};
use nr_saps::{SapMsg, SapMsgInner};
use common::{ComponentTest, default_test_config};

const CRNTI: u16 = 0x4601;

fn connected() -> UeState {
    UeState { mac_state: UeMacState::Connected, crnti: Some(CRNTI) }
}

fn phy_msg(time: SlotTime, msg: SapMsgInner) -> SapMsg {
    SapMsg::new(Sap::PhyMac, NrEntity::Phy, NrEntity::Mac, time, msg)
}

fn dl_ind(time: SlotTime, dcis: Vec<DciInd>, rx: Vec<PdschRxInd>) -> SapMsg {
    let ind = DlIndication { slot: SlotInd { time, slot_type: SlotType::Downlink }, dcis, rx };
    phy_msg(time, SapMsgInner::PhyDlInd(ind))
}

fn ul_ind(time: SlotTime, slot_type: SlotType) -> SapMsg {
    phy_msg(time, SapMsgInner::PhyUlSlotInd(SlotInd { time, slot_type }))
}

/// DCI 1_0 on the C-RNTI in CORESET 0
fn dl10(test: &ComponentTest, pid: u32, ndi: u32, k1_field: u32) -> DciInd {
    let sizes = DciSizes::new(&test.config.config(), SearchSpaceType::Common, CoresetType::Coreset0);
    let fields = DciFields::new(DciKind::Dl10)
        .with(DciField::Identifier, 1)
        .with(DciField::Fdra, rbs_to_riv(0, 10, sizes.n_rb_10))
        .with(DciField::Tdra, 0)
        .with(DciField::Mcs, 9)
        .with(DciField::Ndi, ndi)
        .with(DciField::HarqPid, pid)
        .with(DciField::Dai, 0)
        .with(DciField::Tpc, 1)
        .with(DciField::Pri, 0)
        .with(DciField::K1, k1_field);
    DciInd {
        rnti: CRNTI,
        format: DciFormatGroup::Fallback,
        payload: dci::encode(&sizes, &fields),
        ss_type: SearchSpaceType::Common,
        coreset_type: CoresetType::Coreset0,
        n_cce: 0,
        n_cce_total: 16,
    }
}

fn responses(msgs: Vec<SapMsg>) -> Vec<ScheduledResponse> {
    msgs.into_iter()
        .filter_map(|m| match m.msg {
            SapMsgInner::MacScheduledResponse(r) => Some(r),
            _ => None,
        })
        .collect()
}

#[test]
/// PDSCH on HARQ process 3 at 10.05 with feedback two slots later. The ACK goes out on
/// PUCCH in 10.07 and the SDU reaches RLC.
fn test_dl_harq_feedback_and_delivery() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_state(default_test_config(), connected(), None);
    test.populate_entities(vec![NrEntity::Mac], vec![NrEntity::Phy, NrEntity::Rrc]);

    let t5 = SlotTime::new(10, 5, 1);
    let dci = dl10(&test, 3, 1, 1);
    test.submit_message(dl_ind(t5, vec![dci], vec![]));
    test.deliver_all_messages();

    let resp = responses(test.dump_sinks());
    assert_eq!(resp.len(), 1);
    assert_eq!(resp[0].time, t5);
    assert_eq!(resp[0].dl.len(), 1);
    let DlConfigPdu::Pdsch(pdsch) = &resp[0].dl[0];
    assert_eq!(pdsch.harq_pid, 3);
    assert!(pdsch.tb1.new_data);
    assert_eq!(pdsch.k1_feedback, Some(2));

    let sdu = vec![0x5a; 20];
    let pdu = mac_pdu::build_dl_pdu(&[DlSubPdu::Sdu { lcid: 4, data: sdu.clone() }], pdsch.tb1.tb_size as usize);
    let rx = PdschRxInd { rnti: CRNTI, harq_pid: 3, tb: 0, ack: true, pdu: Some(pdu) };
    test.submit_message(dl_ind(SlotTime::new(10, 6, 1), vec![], vec![rx]));
    test.submit_message(ul_ind(SlotTime::new(10, 7, 1), SlotType::Mixed));
    test.deliver_all_messages();

    let resp = responses(test.dump_sinks());
    let ul: Vec<&UlConfigPdu> = resp.iter().flat_map(|r| r.ul.iter()).collect();
    assert_eq!(ul.len(), 1);
    let UlConfigPdu::Pucch(pucch) = ul[0] else { panic!("expected PUCCH, got {}", ul[0].name()) };
    assert_eq!((pucch.n_harq, pucch.n_sr), (1, 0));
    // Format 0 from resource set 0, ACK shift
    assert_eq!(pucch.m_cs, 6);

    let received = test.rlc.as_ref().unwrap().received();
    assert_eq!(received, vec![(4, sdu)]);

    // Feedback was consumed, the next UL slot carries no HARQ-ACK
    test.submit_message(ul_ind(SlotTime::new(10, 8, 1), SlotType::Uplink));
    test.deliver_all_messages();
    let resp = responses(test.dump_sinks());
    assert!(resp.iter().all(|r| r.ul.is_empty()));
}

#[test]
/// DCI whose HARQ-ACK would land in a DL slot is discarded without a PDSCH
fn test_false_dci_has_no_effect() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::with_state(default_test_config(), connected(), None);
    test.populate_entities(vec![NrEntity::Mac], vec![NrEntity::Phy]);

    // 0.00 + k1 2 is slot 2, a DL slot
    let t0 = SlotTime::new(0, 0, 1);
    let dci = dl10(&test, 0, 1, 1);
    test.submit_message(dl_ind(t0, vec![dci], vec![]));
    test.deliver_all_messages();

    let resp = responses(test.dump_sinks());
    assert_eq!(resp.len(), 1);
    assert!(resp[0].dl.is_empty());
}

#[test]
/// UL slot indications while not synced produce empty responses
fn test_idle_ul_slots() {
    debug::setup_logging_verbose();
    let mut test = ComponentTest::new(default_test_config(), None);
    test.populate_entities(vec![NrEntity::Mac], vec![NrEntity::Phy, NrEntity::Rrc]);

    for slot in 0..20 {
        let time = SlotTime::new(0, slot, 1);
        let slot_type = test.config.config().carrier.slot_type(slot);
        test.submit_message(ul_ind(time, slot_type));
    }
    test.deliver_all_messages();

    let msgs = test.dump_sinks();
    assert_eq!(msgs.len(), 20);
    assert!(responses(msgs).iter().all(|r| r.ul.is_empty() && r.dl.is_empty()));
}
