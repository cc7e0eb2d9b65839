//! Lifecycle and graph-invariant tests: states after commit, list
//! membership, name uniqueness, and attachment garbage collection.

mod common;

use common::{call_log, recording_settings};
use netfab_model::{Context, Error, State};
use pretty_assertions::assert_eq;

fn no_problems(problem: &netfab_model::Problem) {
    panic!("unexpected problem: {problem}");
}

#[test]
fn every_live_object_is_ok_after_commit() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();

    let remote = ctx.new_phys();
    ctx.phys_attach(remote, net).unwrap();

    let virt = ctx.new_virt(net);
    ctx.virt_connect(virt, phys, "lo").unwrap();

    ctx.commit(no_problems).unwrap();

    assert_eq!(ctx.settings(settings).state, State::Ok);
    assert_eq!(ctx.net(net).state, State::Ok);
    assert_eq!(ctx.phys(phys).state, State::Ok);
    assert_eq!(ctx.phys(remote).state, State::Ok);
    assert_eq!(ctx.virt(virt).state, State::Ok);
    for &pa in &ctx.net(net).attachments {
        assert_eq!(ctx.attachment(pa).state, State::Ok);
    }
}

#[test]
fn connected_virt_appears_exactly_once() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys_a = ctx.new_phys();
    let phys_b = ctx.new_phys();
    let virt = ctx.new_virt(net);

    ctx.virt_connect(virt, phys_a, "tap0").unwrap();
    let pa_a = ctx.virt(virt).connected_through.unwrap();
    assert_eq!(
        ctx.attachment(pa_a)
            .virts
            .iter()
            .filter(|linked| **linked == virt)
            .count(),
        1
    );

    // Reconnecting through the same phys must not duplicate the entry.
    ctx.virt_connect(virt, phys_a, "tap1").unwrap();
    let pa_a = ctx.virt(virt).connected_through.unwrap();
    assert_eq!(
        ctx.attachment(pa_a)
            .virts
            .iter()
            .filter(|linked| **linked == virt)
            .count(),
        1
    );

    // Migration: gone from the old attachment, once on the new one.
    ctx.virt_connect(virt, phys_b, "tap2").unwrap();
    let pa_b = ctx.virt(virt).connected_through.unwrap();
    assert_ne!(pa_a, pa_b);
    assert!(!ctx.attachment_alive(pa_a) || !ctx.attachment(pa_a).virts.contains(&virt));
    assert_eq!(
        ctx.attachment(pa_b)
            .virts
            .iter()
            .filter(|linked| **linked == virt)
            .count(),
        1
    );
}

#[test]
fn names_are_unique_per_namespace() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings_1 = recording_settings(&mut ctx, &calls);
    let settings_2 = recording_settings(&mut ctx, &calls);
    ctx.settings_set_name(settings_1, "default").unwrap();
    assert!(matches!(
        ctx.settings_set_name(settings_2, "default"),
        Err(Error::Duplicate { .. })
    ));
    assert_eq!(ctx.settings_by_name("default"), Some(settings_1));

    let net_1 = ctx.new_net(settings_1, 1);
    let net_2 = ctx.new_net(settings_1, 2);
    ctx.net_set_name(net_1, "left").unwrap();
    assert!(ctx.net_set_name(net_2, "left").is_err());
    ctx.net_set_name(net_2, "right").unwrap();
    assert_eq!(ctx.net_by_name("left"), Some(net_1));
    assert_eq!(ctx.net_by_name("right"), Some(net_2));

    let phys_1 = ctx.new_phys();
    let phys_2 = ctx.new_phys();
    ctx.phys_set_name(phys_1, "host0").unwrap();
    assert!(ctx.phys_set_name(phys_2, "host0").is_err());

    // Virt names are scoped to their net.
    let virt_1 = ctx.new_virt(net_1);
    let virt_2 = ctx.new_virt(net_1);
    let virt_3 = ctx.new_virt(net_2);
    ctx.virt_set_name(virt_1, "vm").unwrap();
    assert!(ctx.virt_set_name(virt_2, "vm").is_err());
    ctx.virt_set_name(virt_3, "vm").unwrap();
    assert_eq!(ctx.virt_by_name(net_1, "vm"), Some(virt_1));
    assert_eq!(ctx.virt_by_name(net_2, "vm"), Some(virt_3));
}

#[test]
fn detach_frees_empty_attachment() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);
    let phys = ctx.new_phys();

    ctx.phys_attach(phys, net).unwrap();
    let pa = ctx.phys(phys).attachments[0];
    assert!(ctx.attachment(pa).explicitly_attached);

    ctx.phys_detach(phys, net);
    assert!(!ctx.attachment_alive(pa));
    assert!(ctx.phys(phys).attachments.is_empty());
    assert!(ctx.net(net).attachments.is_empty());
}

#[test]
fn detach_keeps_attachment_with_virts() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);
    let phys = ctx.new_phys();

    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.new_virt(net);
    ctx.virt_connect(virt, phys, "tap0").unwrap();
    let pa = ctx.phys(phys).attachments[0];

    ctx.phys_detach(phys, net);
    assert!(ctx.attachment_alive(pa));
    assert!(!ctx.attachment(pa).explicitly_attached);

    // Removing the last virt lets the attachment go.
    ctx.virt_free(virt);
    assert!(!ctx.attachment_alive(pa));
}

#[test]
fn freeing_new_objects_is_immediate() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);
    let virt = ctx.new_virt(net);

    // Never committed: freeing removes it on the spot.
    ctx.virt_free(virt);
    assert!(!ctx.virt_alive(virt));
    ctx.net_free(net);
    assert!(!ctx.net_alive(net));
}

#[test]
fn freeing_committed_objects_waits_for_commit() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.new_virt(net);
    ctx.virt_connect(virt, phys, "lo").unwrap();
    ctx.commit(no_problems).unwrap();

    ctx.virt_free(virt);
    assert!(ctx.virt_alive(virt));
    assert_eq!(ctx.virt(virt).state, State::Delete);

    ctx.commit(no_problems).unwrap();
    assert!(!ctx.virt_alive(virt));
}

#[test]
fn settings_free_takes_nets_along() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net_1 = ctx.new_net(settings, 1);
    let net_2 = ctx.new_net(settings, 2);

    ctx.settings_free(settings);
    assert!(!ctx.net_alive(net_1));
    assert!(!ctx.net_alive(net_2));
}

#[test]
fn cleanup_tears_everything_down() {
    let mut ctx = Context::new("t").unwrap();
    let calls = call_log();
    let settings = recording_settings(&mut ctx, &calls);
    let net = ctx.new_net(settings, 0);

    let phys = ctx.new_phys();
    ctx.phys_set_iface(phys, "lo").unwrap();
    ctx.phys_claim_local(phys).unwrap();
    ctx.phys_attach(phys, net).unwrap();
    let virt = ctx.new_virt(net);
    ctx.virt_connect(virt, phys, "lo").unwrap();
    ctx.commit(no_problems).unwrap();
    calls.borrow_mut().clear();

    ctx.cleanup(no_problems).unwrap();
    let recorded = calls.borrow();
    assert!(recorded
        .iter()
        .any(|call| matches!(call, common::DriverCall::RemoveVirt(_))));
    assert!(recorded
        .iter()
        .any(|call| matches!(call, common::DriverCall::DestroyPa(_))));
}
